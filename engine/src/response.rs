//! Response codes reported by the billing backend.
//!
//! Backend codes are passed through unchanged. A couple of engine-local
//! sentinels cover failures that have no backend equivalent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A billing response code.
///
/// Serialized as the raw integer so codes survive a round trip through
/// any collaborator unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ResponseCode {
    Ok,
    UserCanceled,
    ServiceUnavailable,
    BillingUnavailable,
    ItemUnavailable,
    DeveloperError,
    Error,
    ItemAlreadyOwned,
    ItemNotOwned,
    NetworkError,
    ServiceDisconnected,
    FeatureNotSupported,
    /// Engine-local: failure with no better classification
    Unknown,
    /// Engine-local: product details could not be normalized
    ParsingFailed,
    /// Any code this engine does not know by name
    Other(i32),
}

impl ResponseCode {
    /// The numeric value of this code.
    pub fn code(self) -> i32 {
        match self {
            ResponseCode::Ok => 0,
            ResponseCode::UserCanceled => 1,
            ResponseCode::ServiceUnavailable => 2,
            ResponseCode::BillingUnavailable => 3,
            ResponseCode::ItemUnavailable => 4,
            ResponseCode::DeveloperError => 5,
            ResponseCode::Error => 6,
            ResponseCode::ItemAlreadyOwned => 7,
            ResponseCode::ItemNotOwned => 8,
            ResponseCode::NetworkError => 12,
            ResponseCode::ServiceDisconnected => -1,
            ResponseCode::FeatureNotSupported => -2,
            ResponseCode::Unknown => -99,
            ResponseCode::ParsingFailed => -399,
            ResponseCode::Other(code) => code,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::UserCanceled => "USER_CANCELED",
            ResponseCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ResponseCode::BillingUnavailable => "BILLING_UNAVAILABLE",
            ResponseCode::ItemUnavailable => "ITEM_UNAVAILABLE",
            ResponseCode::DeveloperError => "DEVELOPER_ERROR",
            ResponseCode::Error => "ERROR",
            ResponseCode::ItemAlreadyOwned => "ITEM_ALREADY_OWNED",
            ResponseCode::ItemNotOwned => "ITEM_NOT_OWNED",
            ResponseCode::NetworkError => "NETWORK_ERROR",
            ResponseCode::ServiceDisconnected => "SERVICE_DISCONNECTED",
            ResponseCode::FeatureNotSupported => "FEATURE_NOT_SUPPORTED",
            ResponseCode::Unknown => "UNKNOWN",
            ResponseCode::ParsingFailed => "PARSING_FAILED",
            ResponseCode::Other(_) => "OTHER",
        }
    }
}

impl From<i32> for ResponseCode {
    fn from(code: i32) -> Self {
        match code {
            0 => ResponseCode::Ok,
            1 => ResponseCode::UserCanceled,
            2 => ResponseCode::ServiceUnavailable,
            3 => ResponseCode::BillingUnavailable,
            4 => ResponseCode::ItemUnavailable,
            5 => ResponseCode::DeveloperError,
            6 => ResponseCode::Error,
            7 => ResponseCode::ItemAlreadyOwned,
            8 => ResponseCode::ItemNotOwned,
            12 => ResponseCode::NetworkError,
            -1 => ResponseCode::ServiceDisconnected,
            -2 => ResponseCode::FeatureNotSupported,
            -99 => ResponseCode::Unknown,
            -399 => ResponseCode::ParsingFailed,
            other => ResponseCode::Other(other),
        }
    }
}

impl From<ResponseCode> for i32 {
    fn from(code: ResponseCode) -> Self {
        code.code()
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
