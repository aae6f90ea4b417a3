//! Unified error handling for the demo.

use crate::config::ConfigError;

/// Demo error type.
#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] entitle_engine::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

/// Result type alias for the demo.
pub type Result<T> = std::result::Result<T, DemoError>;
