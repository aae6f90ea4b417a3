//! Purchase records as reported by the billing backend.

use crate::{ProductId, PurchaseToken, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which managed set a product belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    /// Recurring subscription
    Subscription,
    /// One-time product that can be consumed and bought again
    Consumable,
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductKind::Subscription => write!(f, "subscription"),
            ProductKind::Consumable => write!(f, "consumable"),
        }
    }
}

/// Lifecycle state of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseState {
    /// Payment not yet settled; grants nothing
    Pending,
    /// Paid for; grants an entitlement
    Purchased,
    /// Refunded, revoked or abandoned
    Cancelled,
}

/// One purchase grant.
///
/// A single record may cover several products bought in one transaction.
/// `original_json` is the backend's own representation and is kept
/// byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    /// Products granted by this purchase
    pub products: Vec<ProductId>,
    /// Backend-assigned token used to acknowledge or consume
    pub purchase_token: PurchaseToken,
    /// Backend order identifier, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// When the purchase was made (milliseconds since epoch)
    #[serde(default)]
    pub purchase_time: Timestamp,
    /// Current state
    pub state: PurchaseState,
    /// Whether the backend has confirmed receipt
    pub acknowledged: bool,
    /// Backend-original payload
    #[serde(default)]
    pub original_json: String,
}

impl PurchaseRecord {
    /// Create a purchased, unacknowledged record for a single product.
    pub fn new(product_id: impl Into<ProductId>, purchase_token: impl Into<PurchaseToken>) -> Self {
        Self {
            products: vec![product_id.into()],
            purchase_token: purchase_token.into(),
            order_id: None,
            purchase_time: 0,
            state: PurchaseState::Purchased,
            acknowledged: false,
            original_json: String::new(),
        }
    }

    /// Set the purchase state.
    pub fn with_state(mut self, state: PurchaseState) -> Self {
        self.state = state;
        self
    }

    /// Set the acknowledged flag.
    pub fn with_acknowledged(mut self, acknowledged: bool) -> Self {
        self.acknowledged = acknowledged;
        self
    }

    /// Add another product covered by this purchase.
    pub fn with_product(mut self, product_id: impl Into<ProductId>) -> Self {
        self.products.push(product_id.into());
        self
    }

    /// Attach the backend-original payload.
    pub fn with_original_json(mut self, json: impl Into<String>) -> Self {
        self.original_json = json.into();
        self
    }

    /// Check if this purchase currently grants an entitlement.
    pub fn is_purchased(&self) -> bool {
        self.state == PurchaseState::Purchased
    }

    /// Check if the purchase still needs an acknowledge call.
    pub fn needs_acknowledge(&self) -> bool {
        self.is_purchased() && !self.acknowledged
    }

    /// Check if this purchase covers the given product.
    pub fn covers(&self, product_id: &str) -> bool {
        self.products.iter().any(|p| p == product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_record() {
        let record = PurchaseRecord::new("coins_100", "T1");

        assert_eq!(record.products, vec!["coins_100".to_string()]);
        assert_eq!(record.purchase_token, "T1");
        assert!(record.is_purchased());
        assert!(record.needs_acknowledge());
        assert!(record.covers("coins_100"));
        assert!(!record.covers("coins_500"));
    }

    #[test]
    fn pending_never_needs_acknowledge() {
        let record = PurchaseRecord::new("coins_100", "T1").with_state(PurchaseState::Pending);
        assert!(!record.is_purchased());
        assert!(!record.needs_acknowledge());
    }

    #[test]
    fn bundle_covers_all_products() {
        let record = PurchaseRecord::new("a", "T").with_product("b");
        assert!(record.covers("a"));
        assert!(record.covers("b"));
    }

    #[test]
    fn serialization_roundtrip() {
        let record = PurchaseRecord::new("premium_monthly", "tok")
            .with_acknowledged(true)
            .with_original_json(r#"{"orderId":"GPA.1","autoRenewing":true}"#);

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("purchaseToken")); // camelCase
        let parsed: PurchaseRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(record, parsed);
        assert_eq!(parsed.original_json, record.original_json);
    }
}
