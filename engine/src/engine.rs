//! Engine - the application-facing facade.
//!
//! An [`Engine`] is an explicitly constructed handle. Cloning it is cheap and
//! every clone talks to the same connection, cache and event queue. Build one
//! per process at the application's lifecycle root and pass it where needed.
//!
//! # Lifecycle
//!
//! ```text
//! start ──> connect ──> reconcile ──> BillingReady ──> queries / purchases
//!             ^                                              |
//!             └──────── unsolicited disconnect (budget 0) ───┘
//! ```

use crate::{
    backend::{BackendNotification, BillingBackend, NotificationReceiver},
    cache::CacheMap,
    catalog::{self, ProductDetails},
    connection::{BillingConnection, ConnectionState, DisconnectHandler},
    entitlement::EntitlementView,
    error::Result,
    events::{EventDispatcher, EventPump, StoreListener},
    intake::PurchaseIntake,
    reconcile::Reconciler,
    storage::{BlobStore, CacheMirror},
    EngineConfig, Error, ManagedProducts, ProductId, ProductKind, PurchaseCache, PurchaseRecord,
    ResponseCode, StoreEvent,
};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

struct Shared {
    products: ArcSwap<ManagedProducts>,
    retry_budget: u32,
    backend: Arc<dyn BillingBackend>,
    connection: Arc<BillingConnection>,
    cache: PurchaseCache,
    mirror: CacheMirror,
    events: EventDispatcher,
    /// Held by reconciliation, purchase intake and consumption so a
    /// reconciliation never installs query results older than a purchase
    /// update or a consumption it overlapped with
    mutations: tokio::sync::Mutex<()>,
    /// Set once the cache reflects backend truth (or a trusted restore)
    loaded: AtomicBool,
    debug_entitlements: AtomicBool,
    notifications: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    async fn reconcile(&self) -> Result<()> {
        let _mutating = self.mutations.lock().await;
        Reconciler::new(self.backend.as_ref(), &self.cache, &self.mirror)
            .run()
            .await?;
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    async fn handle_notification(&self, notification: BackendNotification) {
        match notification {
            BackendNotification::Disconnected => self.connection.handle_unsolicited_disconnect(),
            BackendNotification::PurchasesUpdated { code, purchases } => {
                let _mutating = self.mutations.lock().await;
                PurchaseIntake::new(self.backend.as_ref(), &self.cache, &self.mirror, &self.events)
                    .handle(code, purchases)
                    .await;
            }
        }
    }
}

/// Purchase-state synchronization engine.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Build an engine over a backend and an optional blob store.
    ///
    /// A persisted cache is restored first; an unreadable one is discarded.
    /// Returns the engine and the pump that delivers its events. The pump
    /// must be driven (see [`EventPump::run`]) for listeners to hear
    /// anything.
    pub async fn start(
        config: EngineConfig,
        backend: Arc<dyn BillingBackend>,
        storage: Option<Arc<dyn BlobStore>>,
    ) -> (Self, EventPump) {
        let mirror = CacheMirror::new(storage, config.storage_key.clone());
        let cache = PurchaseCache::new();
        let mut loaded = false;

        match mirror.restore().await {
            Ok(Some(snapshot)) => {
                tracing::info!(entries = snapshot.len(), trusted = config.trust_restored_cache, "Purchase cache restored");
                cache.replace_all(snapshot.into_cache_entries());
                loaded = config.trust_restored_cache;
            }
            Ok(None) => tracing::debug!("No persisted purchase cache"),
            Err(e) => tracing::warn!(error = %e, "Discarding unreadable purchase cache"),
        }

        let (events, pump) = EventDispatcher::new();
        let shared = Arc::new(Shared {
            products: ArcSwap::from_pointee(config.products),
            retry_budget: config.retry_budget,
            connection: Arc::new(BillingConnection::new(Arc::clone(&backend))),
            backend,
            cache,
            mirror,
            events,
            mutations: tokio::sync::Mutex::new(()),
            loaded: AtomicBool::new(loaded),
            debug_entitlements: AtomicBool::new(false),
            notifications: Mutex::new(None),
        });

        let engine = Self { shared };
        engine.install_default_disconnect_handler();
        if let Some(rx) = engine.shared.backend.take_notifications() {
            let handle = tokio::spawn(Self::drain_notifications(Arc::downgrade(&engine.shared), rx));
            *engine.shared.notifications.lock() = Some(handle);
        } else {
            tracing::warn!("Backend notifications already taken, purchase updates will be missed");
        }

        (engine, pump)
    }

    async fn drain_notifications(shared: Weak<Shared>, mut rx: NotificationReceiver) {
        while let Some(notification) = rx.recv().await {
            let Some(shared) = shared.upgrade() else {
                break;
            };
            shared.handle_notification(notification).await;
        }
        tracing::debug!("Notification pump finished");
    }

    fn install_default_disconnect_handler(&self) {
        let shared = Arc::downgrade(&self.shared);
        self.shared
            .connection
            .on_unsolicited_disconnect(Arc::new(move |retry_budget| {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                let engine = Engine { shared };
                tokio::spawn(async move {
                    if let Err(e) = engine.connect_with_budget(retry_budget).await {
                        tracing::debug!(error = %e, retry_budget, "Reconnect after disconnect failed");
                    }
                });
            }));
    }

    // ========================================================================
    // Configuration and listeners
    // ========================================================================

    /// Replace the managed product sets.
    pub fn configure<S, C>(&self, subscriptions: S, consumables: C) -> Result<()>
    where
        S: IntoIterator,
        S::Item: Into<ProductId>,
        C: IntoIterator,
        C::Item: Into<ProductId>,
    {
        let products = ManagedProducts::new(subscriptions, consumables)?;
        self.shared.products.store(Arc::new(products));
        Ok(())
    }

    /// The managed product sets currently in effect.
    pub fn managed_products(&self) -> Arc<ManagedProducts> {
        self.shared.products.load_full()
    }

    /// Register an event listener. Returns false if already registered.
    pub fn subscribe(&self, listener: Arc<dyn StoreListener>) -> bool {
        self.shared.events.subscribe(listener)
    }

    /// Remove an event listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, listener: &Arc<dyn StoreListener>) -> bool {
        self.shared.events.unsubscribe(listener)
    }

    /// Replace the unsolicited-disconnect handler.
    ///
    /// The default handler reconnects once with the budget it is given. A
    /// custom handler that needs the engine should hold it weakly.
    pub fn on_unsolicited_disconnect(&self, handler: DisconnectHandler) {
        self.shared.connection.on_unsolicited_disconnect(handler);
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    /// Whether entitlement queries are answered from the cache.
    pub fn is_ready(&self) -> bool {
        self.shared.loaded.load(Ordering::Acquire)
    }

    // ========================================================================
    // Connecting
    // ========================================================================

    /// Connect with the configured retry budget and reconcile.
    pub async fn connect(&self) -> Result<()> {
        self.connect_with_budget(self.shared.retry_budget).await
    }

    /// Connect with an explicit retry budget and reconcile.
    ///
    /// Raises exactly one `BillingReady` per connection attempt; callers
    /// that join an attempt in flight share its outcome and its event.
    pub async fn connect_with_budget(&self, retry_budget: u32) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .connection
            .connect(retry_budget, move |link| async move {
                let outcome = match link {
                    Ok(()) => shared.reconcile().await,
                    Err(e) => Err(e),
                };
                let event = match &outcome {
                    Ok(()) => StoreEvent::BillingReady {
                        success: true,
                        code: ResponseCode::Ok,
                    },
                    Err(e) => StoreEvent::BillingReady {
                        success: false,
                        code: e.code(),
                    },
                };
                shared.events.publish(event);
                outcome
            })
            .await
    }

    // ========================================================================
    // Purchasing
    // ========================================================================

    /// Show the purchase flow for a managed product.
    ///
    /// The outcome arrives later as a purchase update. A failure to launch
    /// raises `PurchaseError` and is also returned.
    pub async fn launch_purchase(&self, product_id: &str) -> Result<()> {
        let result = self.try_launch_purchase(product_id).await;
        if let Err(e) = &result {
            tracing::warn!(product_id = %product_id, error = %e, "Purchase flow not launched");
            self.shared
                .events
                .publish(StoreEvent::PurchaseError { code: e.code() });
        }
        result
    }

    async fn try_launch_purchase(&self, product_id: &str) -> Result<()> {
        let kind = self
            .shared
            .products
            .load()
            .kind_of(product_id)
            .ok_or_else(|| Error::UnmanagedProduct(product_id.to_string()))?;

        let backend = self.shared.backend.as_ref();
        let listings = backend
            .query_product_details(&[product_id.to_string()], kind)
            .await
            .map_err(Error::Purchase)?;
        let listing = listings
            .iter()
            .find(|l| l.product_id == product_id)
            .ok_or(Error::Purchase(ResponseCode::ItemUnavailable))?;

        let offer_token = match kind {
            ProductKind::Subscription => {
                Some(listing.first_offer_token().ok_or_else(|| Error::Parsing {
                    product_id: product_id.to_string(),
                    reason: "no subscription offers".to_string(),
                })?)
            }
            ProductKind::Consumable => None,
        };

        backend
            .launch_purchase_flow(product_id, offer_token)
            .await
            .map_err(Error::Purchase)?;
        tracing::info!(product_id = %product_id, kind = %kind, "Purchase flow launched");
        Ok(())
    }

    /// Consume an owned product. Returns the backend's consumption token.
    ///
    /// Fails with [`Error::ItemNotOwned`] without contacting the backend
    /// when the cache holds no purchase for the product.
    pub async fn consume(&self, product_id: &str) -> Result<String> {
        let _mutating = self.shared.mutations.lock().await;
        let record = self
            .shared
            .cache
            .get(product_id)
            .ok_or_else(|| Error::ItemNotOwned(product_id.to_string()))?;

        let token = &record.purchase_token;
        match self.shared.backend.consume(token).await {
            Ok(consumption_token) => {
                self.shared.cache.remove_token(token);
                self.shared.mirror.save(&self.shared.cache).await;
                tracing::info!(product_id = %product_id, "Purchase consumed");
                Ok(consumption_token)
            }
            Err(code) => {
                tracing::warn!(product_id = %product_id, code = %code, "Consume failed");
                Err(Error::Consume(code))
            }
        }
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Fetch normalized details for products of one kind.
    pub async fn fetch_details(
        &self,
        product_ids: &[ProductId],
        kind: ProductKind,
    ) -> Result<Vec<ProductDetails>> {
        catalog::fetch_details(self.shared.backend.as_ref(), product_ids, kind).await
    }

    /// Fetch details for every managed product, subscriptions first.
    pub async fn fetch_all_details(&self) -> Result<Vec<ProductDetails>> {
        let products = self.managed_products();
        let mut details = self
            .fetch_details(&products.ids(ProductKind::Subscription), ProductKind::Subscription)
            .await?;
        details.extend(
            self.fetch_details(&products.ids(ProductKind::Consumable), ProductKind::Consumable)
                .await?,
        );
        Ok(details)
    }

    // ========================================================================
    // Entitlement queries
    // ========================================================================

    fn view_with<R>(&self, query: impl FnOnce(&EntitlementView<'_>) -> R) -> R {
        let products = self.shared.products.load();
        let entries = self.shared.cache.snapshot();
        let view = EntitlementView::new(
            &products,
            &entries,
            self.is_ready(),
            self.shared.debug_entitlements.load(Ordering::Relaxed),
        );
        query(&view)
    }

    /// Whether any of the given consumables is owned.
    pub fn has_any_consumable<I>(&self, product_ids: I) -> bool
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.view_with(|v| v.owns_any(product_ids, ProductKind::Consumable))
    }

    /// Whether any of the given subscriptions is active.
    pub fn is_subscribed_to_any<I>(&self, product_ids: I) -> bool
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.view_with(|v| v.owns_any(product_ids, ProductKind::Subscription))
    }

    /// Whether any of the given subscriptions or consumables is owned.
    pub fn has_any_sub_or_consumable<S, C>(&self, subscription_ids: S, consumable_ids: C) -> bool
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        self.view_with(|v| {
            v.owns_any(subscription_ids, ProductKind::Subscription)
                || v.owns_any(consumable_ids, ProductKind::Consumable)
        })
    }

    /// Whether a consumable is owned.
    pub fn has_consumable(&self, product_id: &str) -> bool {
        self.has_any_consumable([product_id])
    }

    /// Whether a subscription is active.
    pub fn is_subscribed_to(&self, product_id: &str) -> bool {
        self.is_subscribed_to_any([product_id])
    }

    /// Whether any managed consumable is owned.
    pub fn has_any_managed_consumable(&self) -> bool {
        self.view_with(|v| v.owns_any_managed(ProductKind::Consumable))
    }

    /// Whether any managed subscription is active.
    pub fn is_subscribed_to_any_managed(&self) -> bool {
        self.view_with(|v| v.owns_any_managed(ProductKind::Subscription))
    }

    /// Whether any managed product is owned.
    pub fn has_any_managed_entitlement(&self) -> bool {
        self.view_with(|v| {
            v.owns_any_managed(ProductKind::Subscription)
                || v.owns_any_managed(ProductKind::Consumable)
        })
    }

    /// Force every entitlement query to return true. Offline development only.
    pub fn set_debug_entitlements(&self, enabled: bool) {
        if enabled {
            tracing::warn!("Debug entitlements enabled, every query returns true");
        }
        self.shared
            .debug_entitlements
            .store(enabled, Ordering::Relaxed);
    }

    // ========================================================================
    // Inspection and teardown
    // ========================================================================

    /// Immutable copy of the purchase cache.
    pub fn purchases(&self) -> Arc<CacheMap> {
        self.shared.cache.snapshot()
    }

    /// The cached purchase covering a product.
    pub fn purchase(&self, product_id: &str) -> Option<Arc<PurchaseRecord>> {
        self.shared.cache.get(product_id)
    }

    /// Stop handling notifications, close the event queue and drop the link.
    ///
    /// The [`EventPump`] finishes after delivering what is already queued.
    pub async fn shutdown(&self) {
        let notifications = self.shared.notifications.lock().take();
        if let Some(handle) = notifications {
            handle.abort();
        }
        self.shared.connection.disconnect().await;
        self.shared.events.close();
        tracing::info!("Engine shut down");
    }
}
