//! Sandbox billing backend.
//!
//! An in-memory [`BillingBackend`] that behaves like a well-mannered store:
//! it owns a catalog and the user's purchases, completes purchase flows
//! immediately, and lets callers inject failures, latency, disconnects and
//! pushed purchase updates. Every call is counted.

use crate::{
    backend::{
        BackendNotification, BackendResult, BillingBackend, NotificationReceiver,
        NotificationSender,
    },
    catalog::RawProductDetails,
    ProductId, ProductKind, PurchaseRecord, PurchaseState, ResponseCode,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Number of calls made to each backend operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SandboxCalls {
    pub start_connection: usize,
    pub query_purchases: usize,
    pub query_product_details: usize,
    pub acknowledge: usize,
    pub consume: usize,
    pub launch_purchase_flow: usize,
}

impl SandboxCalls {
    /// Total number of calls of any kind.
    pub fn total(&self) -> usize {
        self.start_connection
            + self.query_purchases
            + self.query_product_details
            + self.acknowledge
            + self.consume
            + self.launch_purchase_flow
    }
}

#[derive(Default)]
struct SandboxState {
    connected: bool,
    connect_delay: Option<Duration>,
    query_delay: Option<Duration>,
    connect_failures: VecDeque<ResponseCode>,
    query_failures: HashMap<ProductKind, ResponseCode>,
    details_failure: Option<ResponseCode>,
    acknowledge_failure: Option<ResponseCode>,
    consume_failure: Option<ResponseCode>,
    consume_token: Option<String>,
    pending_purchases: bool,
    catalog: HashMap<ProductId, (ProductKind, RawProductDetails)>,
    purchases: HashMap<ProductKind, Vec<PurchaseRecord>>,
    acknowledged: Vec<String>,
    launched: Vec<(ProductId, Option<String>)>,
    calls: SandboxCalls,
}

/// In-memory billing backend for tests and demos.
pub struct SandboxBackend {
    state: Mutex<SandboxState>,
    notify: NotificationSender,
    notifications: Mutex<Option<NotificationReceiver>>,
}

impl SandboxBackend {
    /// Create an empty sandbox.
    pub fn new() -> Self {
        let (notify, rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(SandboxState::default()),
            notify,
            notifications: Mutex::new(Some(rx)),
        }
    }

    /// Create an empty sandbox wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Call counters so far.
    pub fn calls(&self) -> SandboxCalls {
        self.state.lock().calls
    }

    /// Tokens acknowledged so far, in call order.
    pub fn acknowledged_tokens(&self) -> Vec<String> {
        self.state.lock().acknowledged.clone()
    }

    /// Purchase flows launched so far, with their offer tokens.
    pub fn launched_flows(&self) -> Vec<(ProductId, Option<String>)> {
        self.state.lock().launched.clone()
    }

    /// Whether the sandbox considers the link open.
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Fail the next connection attempts with these codes, in order.
    pub fn fail_connections(&self, codes: impl IntoIterator<Item = ResponseCode>) {
        self.state.lock().connect_failures.extend(codes);
    }

    /// Delay every connection attempt.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    /// Delay every purchase query after its result has been read.
    pub fn set_query_delay(&self, delay: Duration) {
        self.state.lock().query_delay = Some(delay);
    }

    /// Fail purchase queries of one kind until cleared with `None`.
    pub fn fail_purchase_query(&self, kind: ProductKind, code: Option<ResponseCode>) {
        let mut state = self.state.lock();
        match code {
            Some(code) => state.query_failures.insert(kind, code),
            None => state.query_failures.remove(&kind),
        };
    }

    /// Fail product detail queries until cleared with `None`.
    pub fn fail_details(&self, code: Option<ResponseCode>) {
        self.state.lock().details_failure = code;
    }

    /// Fail acknowledge calls until cleared with `None`.
    pub fn fail_acknowledge(&self, code: Option<ResponseCode>) {
        self.state.lock().acknowledge_failure = code;
    }

    /// Fail consume calls until cleared with `None`.
    pub fn fail_consume(&self, code: Option<ResponseCode>) {
        self.state.lock().consume_failure = code;
    }

    /// Token returned by successful consume calls instead of a random one.
    pub fn set_consume_token(&self, token: impl Into<String>) {
        self.state.lock().consume_token = Some(token.into());
    }

    /// Make launched purchase flows end in the pending state.
    pub fn set_pending_purchases(&self, pending: bool) {
        self.state.lock().pending_purchases = pending;
    }

    /// List a product in the catalog.
    pub fn add_listing(&self, kind: ProductKind, listing: RawProductDetails) {
        self.state
            .lock()
            .catalog
            .insert(listing.product_id.clone(), (kind, listing));
    }

    /// Give the user a purchase of one kind.
    pub fn add_purchase(&self, kind: ProductKind, record: PurchaseRecord) {
        self.state
            .lock()
            .purchases
            .entry(kind)
            .or_default()
            .push(record);
    }

    /// Purchases of one kind the sandbox currently holds.
    pub fn purchases(&self, kind: ProductKind) -> Vec<PurchaseRecord> {
        self.state
            .lock()
            .purchases
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Push a purchase update as if the backend reported it.
    pub fn push_purchase_update(&self, code: ResponseCode, purchases: Vec<PurchaseRecord>) {
        let _ = self
            .notify
            .send(BackendNotification::PurchasesUpdated { code, purchases });
    }

    /// Drop the link as if the backend closed it.
    pub fn drop_connection(&self) {
        self.state.lock().connected = false;
        let _ = self.notify.send(BackendNotification::Disconnected);
    }

    fn ensure_connected(state: &SandboxState) -> BackendResult<()> {
        if state.connected {
            Ok(())
        } else {
            Err(ResponseCode::ServiceDisconnected)
        }
    }

    fn owned_purchase(state: &SandboxState, product_id: &str) -> Option<PurchaseRecord> {
        state
            .purchases
            .values()
            .flatten()
            .find(|r| r.covers(product_id) && r.state != PurchaseState::Cancelled)
            .cloned()
    }
}

impl Default for SandboxBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BillingBackend for SandboxBackend {
    async fn start_connection(&self) -> BackendResult<()> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.start_connection += 1;
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        match state.connect_failures.pop_front() {
            Some(code) => Err(code),
            None => {
                state.connected = true;
                Ok(())
            }
        }
    }

    async fn end_connection(&self) {
        self.state.lock().connected = false;
    }

    async fn query_purchases(&self, kind: ProductKind) -> BackendResult<Vec<PurchaseRecord>> {
        let (result, delay) = {
            let mut state = self.state.lock();
            state.calls.query_purchases += 1;
            Self::ensure_connected(&state)?;
            let result = match state.query_failures.get(&kind) {
                Some(code) => Err(*code),
                None => Ok(state.purchases.get(&kind).cloned().unwrap_or_default()),
            };
            (result, state.query_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn query_product_details(
        &self,
        product_ids: &[ProductId],
        kind: ProductKind,
    ) -> BackendResult<Vec<RawProductDetails>> {
        let mut state = self.state.lock();
        state.calls.query_product_details += 1;
        Self::ensure_connected(&state)?;
        if let Some(code) = state.details_failure {
            return Err(code);
        }
        Ok(product_ids
            .iter()
            .filter_map(|id| state.catalog.get(id))
            .filter(|(listed_kind, _)| *listed_kind == kind)
            .map(|(_, listing)| listing.clone())
            .collect())
    }

    async fn acknowledge(&self, purchase_token: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.calls.acknowledge += 1;
        Self::ensure_connected(&state)?;
        if let Some(code) = state.acknowledge_failure {
            return Err(code);
        }
        for record in state.purchases.values_mut().flatten() {
            if record.purchase_token == purchase_token {
                record.acknowledged = true;
            }
        }
        state.acknowledged.push(purchase_token.to_string());
        Ok(())
    }

    async fn consume(&self, purchase_token: &str) -> BackendResult<String> {
        let mut state = self.state.lock();
        state.calls.consume += 1;
        Self::ensure_connected(&state)?;
        if let Some(code) = state.consume_failure {
            return Err(code);
        }

        let owned = state
            .purchases
            .values_mut()
            .map(|records| {
                let before = records.len();
                records.retain(|r| r.purchase_token != purchase_token);
                before - records.len()
            })
            .sum::<usize>();
        if owned == 0 {
            return Err(ResponseCode::ItemNotOwned);
        }

        Ok(state
            .consume_token
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()))
    }

    async fn launch_purchase_flow(
        &self,
        product_id: &str,
        offer_token: Option<&str>,
    ) -> BackendResult<()> {
        let update = {
            let mut state = self.state.lock();
            state.calls.launch_purchase_flow += 1;
            Self::ensure_connected(&state)?;

            let Some((kind, _)) = state.catalog.get(product_id) else {
                return Err(ResponseCode::ItemUnavailable);
            };
            let kind = *kind;
            state
                .launched
                .push((product_id.to_string(), offer_token.map(str::to_string)));

            match Self::owned_purchase(&state, product_id) {
                Some(existing) => BackendNotification::PurchasesUpdated {
                    code: ResponseCode::ItemAlreadyOwned,
                    purchases: vec![existing],
                },
                None => {
                    let token = uuid::Uuid::new_v4().to_string();
                    let purchase_state = if state.pending_purchases {
                        PurchaseState::Pending
                    } else {
                        PurchaseState::Purchased
                    };
                    let record = PurchaseRecord::new(product_id, token.clone())
                        .with_state(purchase_state)
                        .with_original_json(format!(
                            r#"{{"productId":"{product_id}","purchaseToken":"{token}"}}"#
                        ));
                    state
                        .purchases
                        .entry(kind)
                        .or_default()
                        .push(record.clone());
                    BackendNotification::PurchasesUpdated {
                        code: ResponseCode::Ok,
                        purchases: vec![record],
                    }
                }
            }
        };

        let _ = self.notify.send(update);
        Ok(())
    }

    fn take_notifications(&self) -> Option<NotificationReceiver> {
        self.notifications.lock().take()
    }
}
