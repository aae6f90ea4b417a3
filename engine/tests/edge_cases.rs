//! Edge case tests for entitle-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use entitle_engine::{
    CacheSnapshot, Engine, EngineConfig, Error, ManagedProducts, MemoryBlobStore, PricingPhase,
    ProductKind, PurchaseCache, PurchaseRecord, PurchaseState, RawProductDetails, ResponseCode,
    SandboxBackend, SubscriptionOffer, SNAPSHOT_FORMAT_VERSION,
};
use proptest::prelude::*;
use std::sync::Arc;

fn config() -> EngineConfig {
    EngineConfig::new(ManagedProducts::new(["premium_monthly"], ["coins_100"]).unwrap())
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Configuration Edge Cases
// ============================================================================

#[test]
fn overlapping_product_rejected() {
    let result = ManagedProducts::new(["shared", "premium"], ["coins", "shared"]);
    assert_eq!(result, Err(Error::OverlappingProduct("shared".into())));
}

#[test]
fn empty_managed_sets() {
    let products = ManagedProducts::new(Vec::<String>::new(), Vec::<String>::new()).unwrap();
    assert!(products.is_empty());
    assert_eq!(products.kind_of("anything"), None);
}

#[tokio::test]
async fn empty_managed_sets_answer_false() {
    let backend = SandboxBackend::new_shared();
    backend.add_purchase(ProductKind::Consumable, PurchaseRecord::new("coins_100", "T1"));
    let (engine, _pump) = Engine::start(EngineConfig::default(), backend, None).await;
    engine.connect().await.unwrap();

    assert!(engine.purchase("coins_100").is_some());
    assert!(!engine.has_any_managed_entitlement());
    assert!(!engine.has_any_consumable(["coins_100"]));
}

#[tokio::test]
async fn reconfigure_changes_answers() {
    let backend = SandboxBackend::new_shared();
    backend.add_purchase(ProductKind::Consumable, PurchaseRecord::new("gems_10", "T1"));
    let (engine, _pump) = Engine::start(config(), backend, None).await;
    engine.connect().await.unwrap();
    assert!(!engine.has_consumable("gems_10"));

    engine.configure(["premium_monthly"], ["coins_100", "gems_10"]).unwrap();

    assert!(engine.has_consumable("gems_10"));
}

// ============================================================================
// Query Edge Cases
// ============================================================================

#[tokio::test]
async fn empty_id_lists_answer_false() {
    let backend = SandboxBackend::new_shared();
    backend.add_purchase(ProductKind::Consumable, PurchaseRecord::new("coins_100", "T1"));
    let (engine, _pump) = Engine::start(config(), backend, None).await;
    engine.connect().await.unwrap();

    assert!(!engine.has_any_consumable(Vec::<&str>::new()));
    assert!(!engine.is_subscribed_to_any(Vec::<&str>::new()));
    assert!(engine.has_any_sub_or_consumable(Vec::<&str>::new(), ["coins_100"]));
}

#[tokio::test]
async fn consumable_is_not_a_subscription() {
    let backend = SandboxBackend::new_shared();
    backend.add_purchase(ProductKind::Consumable, PurchaseRecord::new("coins_100", "T1"));
    let (engine, _pump) = Engine::start(config(), backend, None).await;
    engine.connect().await.unwrap();

    assert!(!engine.is_subscribed_to("coins_100"));
    assert!(engine.has_any_sub_or_consumable(["premium_monthly"], ["coins_100"]));
}

// ============================================================================
// Bundle Edge Cases
// ============================================================================

#[tokio::test]
async fn consuming_bundle_removes_every_product() {
    let backend = SandboxBackend::new_shared();
    backend.add_purchase(
        ProductKind::Consumable,
        PurchaseRecord::new("coins_100", "T1").with_product("gems_10"),
    );
    let (engine, _pump) = Engine::start(
        EngineConfig::new(ManagedProducts::new(Vec::<String>::new(), ["coins_100", "gems_10"]).unwrap()),
        backend,
        None,
    )
    .await;
    engine.connect().await.unwrap();
    assert!(engine.has_consumable("gems_10"));

    engine.consume("coins_100").await.unwrap();

    assert!(engine.purchases().is_empty());
}

// ============================================================================
// Catalog Edge Cases
// ============================================================================

#[tokio::test]
async fn catalog_batch_fails_as_a_whole() {
    let backend = SandboxBackend::new_shared();
    backend.add_listing(
        ProductKind::Subscription,
        RawProductDetails {
            product_id: "premium_monthly".into(),
            title: "Premium".into(),
            description: String::new(),
            one_time_offer: None,
            subscription_offers: Some(vec![SubscriptionOffer {
                offer_token: "base".into(),
                pricing_phases: vec![PricingPhase {
                    formatted_price: "$4.99".into(),
                    price_micros: 4_990_000,
                    currency_code: "USD".into(),
                    billing_period: "P1M".into(),
                }],
            }]),
        },
    );
    backend.add_listing(
        ProductKind::Subscription,
        RawProductDetails {
            product_id: "premium_yearly".into(),
            title: "Premium yearly".into(),
            description: String::new(),
            one_time_offer: None,
            subscription_offers: None,
        },
    );
    let (engine, _pump) = Engine::start(config(), backend, None).await;
    engine.connect().await.unwrap();

    let ok = engine
        .fetch_details(&["premium_monthly".to_string()], ProductKind::Subscription)
        .await
        .unwrap();
    assert_eq!(ok.len(), 1);

    let err = engine
        .fetch_details(
            &["premium_monthly".to_string(), "premium_yearly".to_string()],
            ProductKind::Subscription,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ResponseCode::ParsingFailed);
}

#[tokio::test]
async fn catalog_empty_request_skips_backend() {
    let backend = SandboxBackend::new_shared();
    let (engine, _pump) = Engine::start(config(), backend.clone(), None).await;

    let details = engine.fetch_details(&[], ProductKind::Consumable).await.unwrap();

    assert!(details.is_empty());
    assert_eq!(backend.calls().query_product_details, 0);
}

#[tokio::test]
async fn catalog_backend_error_passes_code_through() {
    let backend = SandboxBackend::new_shared();
    let (engine, _pump) = Engine::start(config(), backend.clone(), None).await;
    engine.connect().await.unwrap();
    backend.fail_details(Some(ResponseCode::NetworkError));

    let err = engine.fetch_all_details().await.unwrap_err();

    assert_eq!(err, Error::Details(ResponseCode::NetworkError));
}

// ============================================================================
// Snapshot Edge Cases
// ============================================================================

#[test]
fn snapshot_from_future_version_rejected() {
    let json = format!(
        r#"{{"formatVersion":{},"entries":{{}}}}"#,
        SNAPSHOT_FORMAT_VERSION + 1
    );
    assert!(matches!(
        CacheSnapshot::from_bytes(json.as_bytes()),
        Err(Error::InvalidSnapshot(_))
    ));
}

#[tokio::test]
async fn snapshot_with_cancelled_record_discarded() {
    let mut snapshot = CacheSnapshot::new();
    snapshot.add(
        "coins_100",
        PurchaseRecord::new("coins_100", "T1").with_state(PurchaseState::Cancelled),
    );
    let store = MemoryBlobStore::new_shared();
    store.insert("purchases", snapshot.to_bytes().unwrap());

    let (engine, _pump) = Engine::start(
        config().with_trusted_restore(true),
        SandboxBackend::new_shared(),
        Some(store),
    )
    .await;

    assert!(engine.purchases().is_empty());
}

#[test]
fn original_json_preserved_byte_for_byte() {
    let raw = "{\"orderId\":\"GPA.1\" , \"note\":\"\u{65e5}\u{672c}\\n\"}";
    let cache = PurchaseCache::new();
    cache.put_record(PurchaseRecord::new("coins_100", "T1").with_original_json(raw));

    let bytes = CacheSnapshot::capture(&cache.snapshot()).to_bytes().unwrap();
    let restored = CacheSnapshot::from_bytes(&bytes).unwrap();

    assert_eq!(restored.entries["coins_100"].original_json, raw);
}

// ============================================================================
// Property Tests
// ============================================================================

fn arb_record() -> impl Strategy<Value = PurchaseRecord> {
    (
        prop::collection::vec("[a-z_]{1,8}", 1..3),
        "[A-Za-z0-9]{4,12}",
        any::<bool>(),
        any::<u64>(),
        ".{0,40}",
    )
        .prop_map(|(products, token, acknowledged, time, json)| {
            let mut record = PurchaseRecord::new(products[0].clone(), token)
                .with_acknowledged(acknowledged)
                .with_original_json(json);
            for product in &products[1..] {
                record = record.with_product(product.clone());
            }
            record.purchase_time = time;
            record
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_snapshot_round_trip(records in prop::collection::vec(arb_record(), 0..10)) {
        let cache = PurchaseCache::new();
        for record in records {
            cache.put_record(record);
        }
        let before = cache.snapshot();

        let bytes = CacheSnapshot::capture(&before).to_bytes().unwrap();
        let snapshot = CacheSnapshot::from_bytes(&bytes).unwrap();
        prop_assert!(snapshot.validate().is_ok());

        let restored = PurchaseCache::new();
        restored.replace_all(snapshot.into_cache_entries());

        prop_assert_eq!(restored.snapshot(), before);
    }

    #[test]
    fn prop_unmanaged_ids_never_entitled(ids in prop::collection::vec("[a-z]{1,10}", 1..8)) {
        runtime().block_on(async {
            let backend = SandboxBackend::new_shared();
            for (i, id) in ids.iter().enumerate() {
                backend.add_purchase(ProductKind::Consumable, PurchaseRecord::new(id.clone(), format!("C{i}")));
                backend.add_purchase(ProductKind::Subscription, PurchaseRecord::new(id.clone(), format!("S{i}")));
            }
            let products = ManagedProducts::new(["premium_monthly"], ["coins_100"]).unwrap();
            let unmanaged: Vec<&String> = ids
                .iter()
                .filter(|id| products.kind_of(id).is_none())
                .collect();
            let (engine, _pump) =
                Engine::start(EngineConfig::new(products), backend.clone(), None).await;
            engine.connect().await.unwrap();
            let calls = backend.calls();

            prop_assert!(!engine.has_any_consumable(&unmanaged));
            prop_assert!(!engine.is_subscribed_to_any(&unmanaged));
            prop_assert!(!engine.has_any_sub_or_consumable(&unmanaged, &unmanaged));
            for id in &unmanaged {
                prop_assert!(!engine.has_consumable(id));
                prop_assert!(!engine.is_subscribed_to(id));
            }
            prop_assert_eq!(backend.calls(), calls);
            Ok(())
        })?;
    }
}

#[test]
fn shared_record_survives_round_trip_as_one() {
    let cache = PurchaseCache::new();
    cache.put_record(PurchaseRecord::new("coins_100", "T1").with_product("gems_10"));

    let bytes = CacheSnapshot::capture(&cache.snapshot()).to_bytes().unwrap();
    let entries = CacheSnapshot::from_bytes(&bytes).unwrap().into_cache_entries();

    assert_eq!(entries.len(), 2);
    assert!(Arc::ptr_eq(&entries[0].1, &entries[1].1));
}
