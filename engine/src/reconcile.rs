//! Reconciliation - rebuilding the purchase cache from backend truth.
//!
//! # Algorithm
//!
//! 1. Query consumable purchases, then subscription purchases (never both at
//!    once). Either failure aborts with the cache untouched.
//! 2. Keep only `Purchased` records; pending and cancelled ones grant nothing.
//! 3. Install the result with a single `replace_all` (clear-then-refill).
//! 4. Acknowledge every kept record that still needs it. A failed
//!    acknowledgment is left for the next reconciliation.
//! 5. Persist the cache, best-effort.

use crate::{
    backend::BillingBackend, error::Result, storage::CacheMirror, Error, ProductId, ProductKind,
    PurchaseCache, PurchaseRecord, PurchaseToken, ResponseCode,
};
use std::sync::Arc;

/// Outcome of one successful reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ReconcileReport {
    /// Product ids installed in the cache
    pub installed: usize,
    /// Records dropped for being pending or cancelled
    pub skipped: usize,
    /// Tokens acknowledged during this run
    pub acknowledged: Vec<PurchaseToken>,
    /// Tokens whose acknowledgment failed, retried next time
    pub unacknowledged: Vec<(PurchaseToken, ResponseCode)>,
    /// Whether the cache blob was written
    pub persisted: bool,
}

/// Runs one reconciliation against a backend and a cache.
pub(crate) struct Reconciler<'a> {
    backend: &'a dyn BillingBackend,
    cache: &'a PurchaseCache,
    mirror: &'a CacheMirror,
}

impl<'a> Reconciler<'a> {
    pub(crate) fn new(
        backend: &'a dyn BillingBackend,
        cache: &'a PurchaseCache,
        mirror: &'a CacheMirror,
    ) -> Self {
        Self {
            backend,
            cache,
            mirror,
        }
    }

    pub(crate) async fn run(&self) -> Result<ReconcileReport> {
        let consumables = self.query(ProductKind::Consumable).await?;
        let subscriptions = self.query(ProductKind::Subscription).await?;

        let mut report = ReconcileReport::default();
        let mut entries: Vec<(ProductId, Arc<PurchaseRecord>)> = Vec::new();
        let mut granted: Vec<Arc<PurchaseRecord>> = Vec::new();

        for record in consumables.into_iter().chain(subscriptions) {
            if !record.is_purchased() {
                tracing::debug!(
                    token = %record.purchase_token,
                    state = ?record.state,
                    "Skipping purchase without entitlement"
                );
                report.skipped += 1;
                continue;
            }
            let record = Arc::new(record);
            for product_id in &record.products {
                entries.push((product_id.clone(), Arc::clone(&record)));
            }
            granted.push(record);
        }

        report.installed = entries.len();
        self.cache.replace_all(entries);

        for record in granted.iter().filter(|r| r.needs_acknowledge()) {
            let token = &record.purchase_token;
            match self.backend.acknowledge(token).await {
                Ok(()) => {
                    self.cache.mark_acknowledged(token);
                    report.acknowledged.push(token.clone());
                }
                Err(code) => {
                    tracing::warn!(token = %token, code = %code, "Acknowledge failed, will retry on next reconciliation");
                    report.unacknowledged.push((token.clone(), code));
                }
            }
        }

        report.persisted = self.mirror.save(self.cache).await;

        tracing::info!(
            installed = report.installed,
            skipped = report.skipped,
            acknowledged = report.acknowledged.len(),
            unacknowledged = report.unacknowledged.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }

    async fn query(&self, kind: ProductKind) -> Result<Vec<PurchaseRecord>> {
        self.backend.query_purchases(kind).await.map_err(|code| {
            tracing::warn!(kind = %kind, code = %code, "Purchase query failed, cache left unchanged");
            Error::Query(code)
        })
    }
}
