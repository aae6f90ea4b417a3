//! Remote billing backend seam.
//!
//! Every call is asynchronous and reports failure with the backend's own
//! [`ResponseCode`]. Unsolicited events (connection loss, purchase updates)
//! arrive on a notification channel that the engine drains.

use crate::{catalog::RawProductDetails, ProductId, ProductKind, PurchaseRecord, ResponseCode};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Result of a backend call.
pub type BackendResult<T> = std::result::Result<T, ResponseCode>;

/// Unsolicited event pushed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendNotification {
    /// The backend closed the link outside any explicit call.
    Disconnected,
    /// Purchases changed, either from a launched flow or pushed by the backend.
    PurchasesUpdated {
        code: ResponseCode,
        purchases: Vec<PurchaseRecord>,
    },
}

/// Sender half used by backends to push notifications.
pub type NotificationSender = mpsc::UnboundedSender<BackendNotification>;

/// Receiver half drained by the engine.
pub type NotificationReceiver = mpsc::UnboundedReceiver<BackendNotification>;

/// Capability contract of the remote billing service.
#[async_trait]
pub trait BillingBackend: Send + Sync {
    /// Open the shared connection.
    async fn start_connection(&self) -> BackendResult<()>;

    /// Close the shared connection.
    async fn end_connection(&self) {}

    /// All purchases the user currently holds of one kind.
    async fn query_purchases(&self, kind: ProductKind) -> BackendResult<Vec<PurchaseRecord>>;

    /// Store listings for the given products.
    async fn query_product_details(
        &self,
        product_ids: &[ProductId],
        kind: ProductKind,
    ) -> BackendResult<Vec<RawProductDetails>>;

    /// Confirm receipt of a purchase.
    async fn acknowledge(&self, purchase_token: &str) -> BackendResult<()>;

    /// Retire a one-time purchase. Returns the consumption token.
    async fn consume(&self, purchase_token: &str) -> BackendResult<String>;

    /// Show the purchase flow. The outcome arrives as a
    /// [`BackendNotification::PurchasesUpdated`].
    async fn launch_purchase_flow(
        &self,
        product_id: &str,
        offer_token: Option<&str>,
    ) -> BackendResult<()>;

    /// Take the notification stream. Returns `None` once taken.
    fn take_notifications(&self) -> Option<NotificationReceiver>;
}
