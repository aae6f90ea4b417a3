//! Entitle Demo - a walkthrough of the entitle engine.
//!
//! Wires the engine to the sandbox billing backend and, optionally, a
//! file-backed cache. Then it connects, lists the catalog, buys the first
//! consumable, checks entitlements and spends the purchase.

mod config;
mod error;
mod file_store;

use crate::config::Config;
use crate::error::{DemoError, Result};
use crate::file_store::FileBlobStore;
use entitle_engine::{
    BlobStore, Engine, OneTimeOffer, PricingPhase, ProductKind, RawProductDetails, SandboxBackend,
    StoreEvent, StoreListener, SubscriptionOffer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "entitle_engine=debug,entitle_demo=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    run(config).await?;
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let backend = sandbox(&config);
    let storage = config
        .cache_dir
        .as_ref()
        .map(|dir| Arc::new(FileBlobStore::new(dir)) as Arc<dyn BlobStore>);

    tracing::info!(
        subscriptions = ?config.subscriptions,
        consumables = ?config.consumables,
        persistent = storage.is_some(),
        "Starting entitle engine"
    );
    let (engine, pump) = Engine::start(config.engine_config()?, backend.clone(), storage).await;
    engine.set_debug_entitlements(config.debug_entitlements);

    // Print every event and forward it to this task
    let (tx, mut events) = mpsc::unbounded_channel();
    let listener: Arc<dyn StoreListener> = Arc::new(move |event: &StoreEvent| {
        match serde_json::to_string(event) {
            Ok(json) => println!("event: {json}"),
            Err(e) => tracing::warn!(error = %e, "Unprintable event"),
        }
        let _ = tx.send(event.clone());
    });
    engine.subscribe(listener);
    let pumping = tokio::spawn(pump.run());

    engine.connect().await?;
    wait_for(&mut events, "billing ready", |e| {
        matches!(e, StoreEvent::BillingReady { .. })
    })
    .await?;

    for details in engine.fetch_all_details().await? {
        println!("product: {}", serde_json::to_string(&details)?);
    }

    if let Some(product_id) = config.consumables.first() {
        engine.launch_purchase(product_id).await?;
        let outcome = wait_for(&mut events, "purchase outcome", |e| {
            matches!(
                e,
                StoreEvent::PurchaseComplete { .. }
                    | StoreEvent::PurchasePending { .. }
                    | StoreEvent::PurchaseError { .. }
            )
        })
        .await?;
        tracing::info!(?outcome, "Purchase finished");

        report(&engine);

        if engine.purchase(product_id).is_some() {
            let token = engine.consume(product_id).await?;
            tracing::info!(product_id = %product_id, token = %token, "Consumed");
        }
    }

    report(&engine);

    engine.shutdown().await;
    let _ = pumping.await;
    tracing::info!(calls = ?backend.calls(), "Done");
    Ok(())
}

fn report(engine: &Engine) {
    println!(
        "entitlements: consumable={} subscription={} any={}",
        engine.has_any_managed_consumable(),
        engine.is_subscribed_to_any_managed(),
        engine.has_any_managed_entitlement()
    );
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<StoreEvent>,
    what: &'static str,
    wanted: impl Fn(&StoreEvent) -> bool,
) -> Result<StoreEvent> {
    let waiting = async {
        while let Some(event) = events.recv().await {
            if wanted(&event) {
                return Some(event);
            }
        }
        None
    };
    match tokio::time::timeout(EVENT_TIMEOUT, waiting).await {
        Ok(Some(event)) => Ok(event),
        Ok(None) | Err(_) => Err(DemoError::Timeout(what)),
    }
}

/// A sandbox listing every configured product.
fn sandbox(config: &Config) -> Arc<SandboxBackend> {
    let backend = SandboxBackend::new_shared();

    for product_id in &config.subscriptions {
        backend.add_listing(
            ProductKind::Subscription,
            RawProductDetails {
                product_id: product_id.clone(),
                title: format!("{product_id} (sandbox)"),
                description: "Sandbox subscription".into(),
                one_time_offer: None,
                subscription_offers: Some(vec![SubscriptionOffer {
                    offer_token: format!("{product_id}-base"),
                    pricing_phases: vec![
                        PricingPhase {
                            formatted_price: "Free".into(),
                            price_micros: 0,
                            currency_code: "USD".into(),
                            billing_period: "P1W".into(),
                        },
                        PricingPhase {
                            formatted_price: "$4.99".into(),
                            price_micros: 4_990_000,
                            currency_code: "USD".into(),
                            billing_period: "P1M".into(),
                        },
                    ],
                }]),
            },
        );
    }

    for product_id in &config.consumables {
        backend.add_listing(
            ProductKind::Consumable,
            RawProductDetails {
                product_id: product_id.clone(),
                title: format!("{product_id} (sandbox)"),
                description: "Sandbox consumable".into(),
                one_time_offer: Some(OneTimeOffer {
                    formatted_price: "$0.99".into(),
                    price_micros: 990_000,
                    currency_code: "USD".into(),
                }),
                subscription_offers: None,
            },
        );
    }

    backend
}
