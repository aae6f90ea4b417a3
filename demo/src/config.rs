//! Configuration management for the demo.

use entitle_engine::{EngineConfig, ManagedProducts, DEFAULT_RETRY_BUDGET};
use std::env;
use std::path::PathBuf;

/// Demo configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Managed subscription ids
    pub subscriptions: Vec<String>,
    /// Managed consumable ids
    pub consumables: Vec<String>,
    /// Retries for explicit connect requests
    pub retry_budget: u32,
    /// Directory the purchase cache is mirrored into
    pub cache_dir: Option<PathBuf>,
    /// Force every entitlement query to true
    pub debug_entitlements: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let subscriptions = list(lookup("ENTITLE_SUBSCRIPTIONS").as_deref().unwrap_or("premium_monthly"));
        let consumables = list(lookup("ENTITLE_CONSUMABLES").as_deref().unwrap_or("coins_100"));

        let retry_budget = match lookup("ENTITLE_RETRY_BUDGET") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidRetryBudget(value))?,
            None => DEFAULT_RETRY_BUDGET,
        };

        let cache_dir = lookup("ENTITLE_CACHE_DIR")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let debug_entitlements = match lookup("ENTITLE_DEBUG_ENTITLEMENTS") {
            Some(value) => flag(&value).ok_or(ConfigError::InvalidFlag(value))?,
            None => false,
        };

        Ok(Self {
            subscriptions,
            consumables,
            retry_budget,
            cache_dir,
            debug_entitlements,
        })
    }

    /// Engine configuration for these settings.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let products = ManagedProducts::new(self.subscriptions.clone(), self.consumables.clone())
            .map_err(ConfigError::Products)?;
        Ok(EngineConfig::new(products).with_retry_budget(self.retry_budget))
    }
}

fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid ENTITLE_RETRY_BUDGET value: {0}")]
    InvalidRetryBudget(String),

    #[error("Invalid ENTITLE_DEBUG_ENTITLEMENTS value: {0}")]
    InvalidFlag(String),

    #[error("Invalid managed products: {0}")]
    Products(entitle_engine::Error),
}
