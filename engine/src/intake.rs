//! Purchase intake - handling purchase updates from the backend.
//!
//! Each update carries one response code and the records it concerns:
//!
//! | code                 | state     | cache                  | event                   |
//! |----------------------|-----------|------------------------|-------------------------|
//! | `OK`                 | Purchased | insert, then ack       | `PurchaseComplete` or `PurchaseError` |
//! | `OK`                 | Pending   | untouched              | `PurchasePending`       |
//! | `OK`                 | Cancelled | remove matching token  | none                    |
//! | `ITEM_ALREADY_OWNED` | Purchased | insert, no ack         | `PurchaseComplete`      |
//! | anything else        | any       | untouched              | one `PurchaseError`     |
//!
//! A failed acknowledgment never rolls back the insert; the next
//! reconciliation acknowledges it.

use crate::{
    backend::BillingBackend, events::EventDispatcher, storage::CacheMirror, ProductId,
    PurchaseCache, PurchaseRecord, PurchaseState, ResponseCode, StoreEvent,
};

pub(crate) struct PurchaseIntake<'a> {
    backend: &'a dyn BillingBackend,
    cache: &'a PurchaseCache,
    mirror: &'a CacheMirror,
    events: &'a EventDispatcher,
}

impl<'a> PurchaseIntake<'a> {
    pub(crate) fn new(
        backend: &'a dyn BillingBackend,
        cache: &'a PurchaseCache,
        mirror: &'a CacheMirror,
        events: &'a EventDispatcher,
    ) -> Self {
        Self {
            backend,
            cache,
            mirror,
            events,
        }
    }

    /// Process one purchase update. Returns whether the cache changed.
    pub(crate) async fn handle(&self, code: ResponseCode, purchases: Vec<PurchaseRecord>) -> bool {
        tracing::debug!(code = %code, count = purchases.len(), "Purchase update received");

        let mut mutated = false;
        match code {
            ResponseCode::Ok => {
                for record in purchases {
                    mutated |= self.accept(record).await;
                }
            }
            ResponseCode::ItemAlreadyOwned => {
                for record in purchases {
                    mutated |= self.already_owned(record);
                }
            }
            code => {
                tracing::warn!(code = %code, "Purchase update reported failure");
                self.events.publish(StoreEvent::PurchaseError { code });
            }
        }

        if mutated {
            self.mirror.save(self.cache).await;
        }
        mutated
    }

    async fn accept(&self, record: PurchaseRecord) -> bool {
        match record.state {
            PurchaseState::Purchased => {
                let token = record.purchase_token.clone();
                let needs_acknowledge = record.needs_acknowledge();
                let products = record.products.clone();
                self.cache.put_record(record);

                if needs_acknowledge {
                    if let Err(code) = self.backend.acknowledge(&token).await {
                        tracing::warn!(token = %token, code = %code, "Acknowledge failed, purchase kept");
                        self.events.publish(StoreEvent::PurchaseError { code });
                        return true;
                    }
                    self.cache.mark_acknowledged(&token);
                }
                self.complete(&products);
                true
            }
            PurchaseState::Pending => {
                for product_id in &record.products {
                    tracing::info!(product_id = %product_id, "Purchase pending");
                    self.events.publish(StoreEvent::PurchasePending {
                        product_id: product_id.clone(),
                    });
                }
                false
            }
            PurchaseState::Cancelled => {
                let removed = self.cache.remove_token(&record.purchase_token);
                tracing::info!(token = %record.purchase_token, removed, "Purchase cancelled");
                removed > 0
            }
        }
    }

    fn already_owned(&self, record: PurchaseRecord) -> bool {
        if !record.is_purchased() {
            tracing::warn!(token = %record.purchase_token, state = ?record.state, "Owned item reported without a purchase");
            self.events.publish(StoreEvent::PurchaseError {
                code: ResponseCode::ItemAlreadyOwned,
            });
            return false;
        }
        let products = record.products.clone();
        self.cache.put_record(record);
        self.complete(&products);
        true
    }

    fn complete(&self, products: &[ProductId]) {
        for product_id in products {
            tracing::info!(product_id = %product_id, "Purchase complete");
            self.events.publish(StoreEvent::PurchaseComplete {
                product_id: product_id.clone(),
            });
        }
    }
}
