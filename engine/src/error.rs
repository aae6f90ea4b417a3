//! Error types for the entitle engine.

use crate::{ProductId, ResponseCode};
use thiserror::Error;

/// All possible errors from the entitle engine.
///
/// Errors are `Clone` so that one coalesced connect outcome can be handed
/// to every caller waiting on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Backend errors, carrying the backend's own code
    #[error("billing connection failed: {0}")]
    Connection(ResponseCode),

    #[error("purchase query failed: {0}")]
    Query(ResponseCode),

    #[error("purchase failed: {0}")]
    Purchase(ResponseCode),

    #[error("consume failed: {0}")]
    Consume(ResponseCode),

    #[error("product details query failed: {0}")]
    Details(ResponseCode),

    // Engine-local errors
    #[error("malformed product details for '{product_id}': {reason}")]
    Parsing { product_id: ProductId, reason: String },

    #[error("item not owned: {0}")]
    ItemNotOwned(ProductId),

    #[error("product is not managed: {0}")]
    UnmanagedProduct(ProductId),

    #[error("product configured as both subscription and consumable: {0}")]
    OverlappingProduct(ProductId),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation interrupted before completion")]
    Interrupted,
}

impl Error {
    /// The response code surfaced to listeners for this error.
    pub fn code(&self) -> ResponseCode {
        match self {
            Error::Connection(code)
            | Error::Query(code)
            | Error::Purchase(code)
            | Error::Consume(code)
            | Error::Details(code) => *code,
            Error::Parsing { .. } => ResponseCode::ParsingFailed,
            Error::ItemNotOwned(_) => ResponseCode::ItemNotOwned,
            Error::UnmanagedProduct(_) => ResponseCode::DeveloperError,
            Error::OverlappingProduct(_)
            | Error::InvalidSnapshot(_)
            | Error::Storage(_)
            | Error::Interrupted => ResponseCode::Unknown,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
