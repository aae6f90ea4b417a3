//! # Entitle Engine
//!
//! A purchase-state synchronization engine for store-billed applications.
//!
//! This crate keeps a local view of what the user owns (subscriptions and
//! consumable items) in step with a remote billing backend, and answers
//! "is entitlement X active" without touching the network.
//!
//! ## Design Principles
//!
//! - **Explicit ownership**: one [`Engine`] per process, built and owned by
//!   the application; no global state
//! - **Backend truth wins**: the cache is rebuilt from backend queries after
//!   every connect, never merged in place
//! - **Never partial**: readers see the whole old cache or the whole new one
//! - **Single consumer events**: listeners run wherever the application
//!   drives the [`EventPump`]
//!
//! ## Core Concepts
//!
//! ### Connection
//!
//! The [`BillingConnection`] owns the single shared link. Concurrent connect
//! requests coalesce into one attempt; failures retry within a budget.
//!
//! ### Reconciliation
//!
//! After each successful connect the engine queries consumable, then
//! subscription purchases, keeps the `Purchased` ones, installs them in the
//! [`PurchaseCache`] and acknowledges what still needs it.
//!
//! ### Intake
//!
//! Purchase updates pushed by the backend are classified by response code
//! and purchase state, applied to the cache and reported as [`StoreEvent`]s.
//!
//! ## Quick Start
//!
//! The in-memory `SandboxBackend` below is available with the `sandbox`
//! feature.
//!
//! ```rust
//! use entitle_engine::{
//!     Engine, EngineConfig, ManagedProducts, ProductKind, PurchaseRecord, SandboxBackend,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> entitle_engine::Result<()> {
//! // 1. A backend that already knows about one purchase
//! let backend = SandboxBackend::new_shared();
//! backend.add_purchase(ProductKind::Consumable, PurchaseRecord::new("coins_100", "T1"));
//!
//! // 2. Start the engine and drive its events
//! let products = ManagedProducts::new(["premium_monthly"], ["coins_100"])?;
//! let (engine, pump) = Engine::start(EngineConfig::new(products), backend, None).await;
//! tokio::spawn(pump.run());
//!
//! // 3. Connect (reconciles the cache)
//! engine.connect().await?;
//! assert!(engine.has_any_managed_consumable());
//! assert!(!engine.is_subscribed_to_any_managed());
//!
//! // 4. Spend it
//! let token = engine.consume("coins_100").await?;
//! assert!(!token.is_empty());
//! assert!(!engine.has_consumable("coins_100"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence
//!
//! Pass a [`BlobStore`] to [`Engine::start`] to mirror the cache across
//! restarts. The blob is a [`CacheSnapshot`] in JSON with deterministic
//! ordering.

pub mod backend;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod engine;
mod entitlement;
pub mod error;
pub mod events;
mod intake;
mod reconcile;
pub mod record;
pub mod response;
#[cfg(any(test, feature = "sandbox"))]
pub mod sandbox;
pub mod snapshot;
pub mod storage;

// Re-export main types at crate root
pub use backend::{
    BackendNotification, BackendResult, BillingBackend, NotificationReceiver, NotificationSender,
};
pub use cache::{CacheMap, PurchaseCache};
pub use catalog::{OneTimeOffer, PricingPhase, ProductDetails, RawProductDetails, SubscriptionOffer};
pub use config::{EngineConfig, ManagedProducts, DEFAULT_RETRY_BUDGET, DEFAULT_STORAGE_KEY};
pub use connection::{BillingConnection, ConnectionState, DisconnectHandler};
pub use engine::Engine;
pub use error::{Error, Result};
pub use events::{EventDispatcher, EventPump, StoreEvent, StoreListener};
pub use record::{ProductKind, PurchaseRecord, PurchaseState};
pub use response::ResponseCode;
#[cfg(any(test, feature = "sandbox"))]
pub use sandbox::{SandboxBackend, SandboxCalls};
pub use snapshot::{CacheSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use storage::{BlobStore, MemoryBlobStore};

/// Type aliases for clarity
pub type ProductId = String;
pub type PurchaseToken = String;
pub type Timestamp = u64;
