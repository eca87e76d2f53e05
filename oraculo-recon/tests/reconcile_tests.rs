//! Reconciliation pipeline integration tests

mod helpers;

use helpers::{count_rows, create_test_context, drain_events, seed_catalog, set_reference_prices};
use oraculo_common::events::ReconEvent;
use oraculo_recon::db::history::history_for_url;
use oraculo_recon::db::offers::find_offer_by_url;
use oraculo_recon::db::pending::find_pending_by_url;
use oraculo_recon::db::products::NewProduct;
use oraculo_recon::db::snapshots::list_snapshots;
use oraculo_recon::error::RecordIssue;
use oraculo_recon::models::{HistoryAction, ScrapedRecord, ValidationStatus};
use oraculo_recon::workflow::reconcile::AMBIGUOUS_TIE_FLAG;
use oraculo_recon::{ReconContext, ReconError};

const SKELETOR_URL: &str = "https://shop-a.example/figuras/skeletor-origins-15cm";
const STRATOS_EAN: &str = "8435026634356";

/// Skeletor, Roboto, Panthor, Stratos (with EAN); returns their ids
async fn seed_origins(ctx: &ReconContext) -> Vec<i64> {
    let products = vec![
        NewProduct::named("Skeletor (Origins)"),
        NewProduct::named("Roboto (Origins)"),
        NewProduct::named("Panthor (Origins)"),
        NewProduct {
            ean: Some(STRATOS_EAN.to_string()),
            ..NewProduct::named("Stratos (Origins)")
        },
    ];
    seed_catalog(&ctx.db, &products).await.unwrap()
}

fn skeletor(price: f64) -> ScrapedRecord {
    ScrapedRecord::new(
        "ShopA",
        "Figura Skeletor Master of the Univers Origins Articulada 15 cms",
        price,
        SKELETOR_URL,
    )
}

fn panthor_listing() -> ScrapedRecord {
    ScrapedRecord::new(
        "ShopB",
        "Figura Panthor Master del Universo Origins",
        24.99,
        "https://shop-b.example/p/123",
    )
}

/// Nobody in the seeded catalog
fn unknown_listing() -> ScrapedRecord {
    ScrapedRecord::new(
        "ShopB",
        "Figura Trap Jaw Master del Universo Origins",
        21.50,
        "https://shop-b.example/p/456",
    )
}

#[tokio::test]
async fn test_typo_laden_listing_is_linked() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    let ids = seed_origins(&ctx).await;
    let mut rx = ctx.event_bus.subscribe();

    let result = ctx.reconciler().reconcile(&[skeletor(19.99)]).await.unwrap();
    assert_eq!(result.linked, 1);
    assert_eq!(result.purgatoried, 0);

    let mut conn = ctx.db.acquire().await.unwrap();
    let offer = find_offer_by_url(&mut conn, SKELETOR_URL).await.unwrap().unwrap();
    assert_eq!(offer.product_id, ids[0]);
    assert_eq!(offer.min_price, 19.99);
    assert_eq!(offer.max_price, 19.99);
    // No reference price yet
    assert_eq!(offer.validation_status, ValidationStatus::Unverified);

    assert_eq!(list_snapshots(&mut conn, offer.id).await.unwrap().len(), 1);
    assert_eq!(count_rows(&ctx.db, "confirmed_aliases").await.unwrap(), 1);

    let history = history_for_url(&mut conn, SKELETOR_URL).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, HistoryAction::SmartMatch);
    assert_eq!(history[0].product_id, Some(ids[0]));

    let events = drain_events(&mut rx);
    assert!(matches!(
        events.last(),
        Some(ReconEvent::BatchReconciled { linked: 1, .. })
    ));
}

#[tokio::test]
async fn test_wrong_character_goes_to_purgatory() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    let products = vec![NewProduct::named("Roboto (Origins)"), NewProduct::named("Skeletor (Origins)")];
    seed_catalog(&ctx.db, &products).await.unwrap();

    let result = ctx.reconciler().reconcile(&[panthor_listing()]).await.unwrap();
    assert_eq!(result.linked, 0);
    assert_eq!(result.purgatoried, 1);
    assert_eq!(count_rows(&ctx.db, "offers").await.unwrap(), 0);

    let mut conn = ctx.db.acquire().await.unwrap();
    let pending = find_pending_by_url(&mut conn, "https://shop-b.example/p/123")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.scraped_name, "Figura Panthor Master del Universo Origins");
    assert!(!pending.is_blocked);

    let history = history_for_url(&mut conn, &pending.url).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, HistoryAction::Purgatory);
    let info = history[0].info.clone().unwrap_or_default();
    assert!(info.contains("Identity conflict"), "{}", info);
}

#[tokio::test]
async fn test_matching_ean_links_unrelated_title() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    let ids = seed_origins(&ctx).await;

    let record = ScrapedRecord::new("ShopC", "Completely unrelated listing", 30.0, "https://shop-c.example/x1")
        .with_ean(STRATOS_EAN);
    let result = ctx.reconciler().reconcile(&[record]).await.unwrap();
    assert_eq!(result.linked, 1);

    let mut conn = ctx.db.acquire().await.unwrap();
    let offer = find_offer_by_url(&mut conn, "https://shop-c.example/x1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(offer.product_id, ids[3]);
    assert_eq!(offer.ean.as_deref(), Some(STRATOS_EAN));
}

#[tokio::test]
async fn test_price_anomaly_overrides_perfect_match() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    let ids = seed_origins(&ctx).await;
    set_reference_prices(&ctx.db, ids[0], 100.0).await.unwrap();
    let mut rx = ctx.event_bus.subscribe();

    let result = ctx.reconciler().reconcile(&[skeletor(150.0)]).await.unwrap();
    assert_eq!(result.linked, 0);
    assert_eq!(result.blocked, 1);
    assert_eq!(result.purgatoried, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].issue, RecordIssue::AnomalyBlocked);
    assert_eq!(count_rows(&ctx.db, "offers").await.unwrap(), 0);
    assert_eq!(count_rows(&ctx.db, "confirmed_aliases").await.unwrap(), 0);

    let mut conn = ctx.db.acquire().await.unwrap();
    let pending = find_pending_by_url(&mut conn, SKELETOR_URL).await.unwrap().unwrap();
    assert!(pending.is_blocked);
    assert_eq!(pending.validation_status, ValidationStatus::Pending);
    assert!(pending.anomaly_flags.iter().any(|f| f.contains(">40%")), "{:?}", pending.anomaly_flags);

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ReconEvent::AnomalyBlocked { reference_price, .. } if *reference_price == 100.0
    )));
}

#[tokio::test]
async fn test_plausible_price_is_verified() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    let ids = seed_origins(&ctx).await;
    set_reference_prices(&ctx.db, ids[0], 20.0).await.unwrap();

    ctx.reconciler().reconcile(&[skeletor(22.0)]).await.unwrap();

    let mut conn = ctx.db.acquire().await.unwrap();
    let offer = find_offer_by_url(&mut conn, SKELETOR_URL).await.unwrap().unwrap();
    assert_eq!(offer.validation_status, ValidationStatus::Verified);
    assert!(!offer.is_blocked);
}

#[tokio::test]
async fn test_empty_batch_is_refused_without_side_effects() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_origins(&ctx).await;
    let mut rx = ctx.event_bus.subscribe();

    let err = ctx.reconciler().reconcile(&[]).await.unwrap_err();
    assert!(matches!(err, ReconError::EmptyBatch));
    assert_eq!(count_rows(&ctx.db, "history_entries").await.unwrap(), 0);
    assert!(drain_events(&mut rx).is_empty());
}

#[tokio::test]
async fn test_reconciling_twice_leaves_same_state() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_origins(&ctx).await;
    let batch = vec![skeletor(19.99), unknown_listing()];
    let tables = ["offers", "pending_records", "history_entries", "confirmed_aliases", "price_snapshots"];

    let first = ctx.reconciler().reconcile(&batch).await.unwrap();
    assert_eq!(first.linked, 1);
    assert_eq!(first.purgatoried, 1);
    let mut before = Vec::new();
    for table in tables {
        before.push(count_rows(&ctx.db, table).await.unwrap());
    }

    let second = ctx.reconciler().reconcile(&batch).await.unwrap();
    assert_eq!(second.linked, 0);
    assert_eq!(second.updated, 1);
    let mut after = Vec::new();
    for table in tables {
        after.push(count_rows(&ctx.db, table).await.unwrap());
    }
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_unmatched_listing_is_parked_once() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    let products = vec![NewProduct::named("Roboto (Origins)")];
    seed_catalog(&ctx.db, &products).await.unwrap();

    ctx.reconciler().reconcile(&[panthor_listing()]).await.unwrap();
    ctx.reconciler().reconcile(&[panthor_listing()]).await.unwrap();
    assert_eq!(count_rows(&ctx.db, "pending_records").await.unwrap(), 1);
    assert_eq!(count_rows(&ctx.db, "history_entries").await.unwrap(), 1);

    // A new price is worth a second look
    let mut repriced = panthor_listing();
    repriced.price = 19.99;
    ctx.reconciler().reconcile(&[repriced]).await.unwrap();
    assert_eq!(count_rows(&ctx.db, "pending_records").await.unwrap(), 1);
    assert_eq!(count_rows(&ctx.db, "history_entries").await.unwrap(), 2);
}

#[tokio::test]
async fn test_duplicate_and_invalid_records_are_reported() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_origins(&ctx).await;

    let batch = vec![
        skeletor(19.99),
        skeletor(18.50),
        ScrapedRecord::new("ShopA", "Roboto Origins", 0.0, "https://shop-a.example/roboto"),
    ];
    let result = ctx.reconciler().reconcile(&batch).await.unwrap();
    assert_eq!(result.linked, 1);
    assert_eq!(result.duplicates, 1);
    let issues: Vec<RecordIssue> = result.errors.iter().map(|e| e.issue).collect();
    assert!(issues.contains(&RecordIssue::DuplicateUrl));
    assert!(issues.contains(&RecordIssue::InvalidRecord));

    // First occurrence wins
    let mut conn = ctx.db.acquire().await.unwrap();
    let offer = find_offer_by_url(&mut conn, SKELETOR_URL).await.unwrap().unwrap();
    assert_eq!(offer.price, 19.99);
    assert!(find_pending_by_url(&mut conn, "https://shop-a.example/roboto")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_identical_catalog_entries_are_not_guessed() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    let products = vec![
        NewProduct::named("Skeletor (Origins)"),
        NewProduct::named("Skeletor (Origins)"),
        NewProduct::named("Roboto (Origins)"),
    ];
    seed_catalog(&ctx.db, &products).await.unwrap();

    let result = ctx.reconciler().reconcile(&[skeletor(19.99)]).await.unwrap();
    assert_eq!(result.linked, 0);
    assert_eq!(result.purgatoried, 1);
    assert_eq!(result.errors[0].issue, RecordIssue::AmbiguousTie);

    let mut conn = ctx.db.acquire().await.unwrap();
    let pending = find_pending_by_url(&mut conn, SKELETOR_URL).await.unwrap().unwrap();
    assert_eq!(pending.anomaly_flags, vec![AMBIGUOUS_TIE_FLAG.to_string()]);
}

#[tokio::test]
async fn test_known_url_updates_price_and_raises_deal() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_origins(&ctx).await;
    ctx.reconciler().reconcile(&[skeletor(100.0)]).await.unwrap();
    let mut rx = ctx.event_bus.subscribe();

    // Alias fast path: the title no longer matters
    let mut sighting = ScrapedRecord::new("ShopA", "Oferta flash", 70.0, SKELETOR_URL);
    sighting.is_available = false;
    let result = ctx.reconciler().reconcile(&[sighting]).await.unwrap();
    assert_eq!(result.updated, 1);
    assert_eq!(result.discounts, 1);

    let mut conn = ctx.db.acquire().await.unwrap();
    let offer = find_offer_by_url(&mut conn, SKELETOR_URL).await.unwrap().unwrap();
    assert_eq!(offer.price, 70.0);
    assert_eq!(offer.min_price, 70.0);
    assert_eq!(offer.max_price, 100.0);
    assert!(!offer.is_available);
    assert!(offer.last_price_update.is_some());
    assert_eq!(list_snapshots(&mut conn, offer.id).await.unwrap().len(), 2);

    let history = history_for_url(&mut conn, SKELETOR_URL).await.unwrap();
    assert_eq!(history.last().map(|e| e.action), Some(HistoryAction::PriceChanged));

    let events = drain_events(&mut rx);
    let deal = events
        .iter()
        .find(|e| matches!(e, ReconEvent::DealAlert { .. }))
        .expect("deal alert published");
    match deal {
        ReconEvent::DealAlert {
            previous_min,
            discount,
            nuclear,
            ..
        } => {
            assert_eq!(*previous_min, 100.0);
            assert!((discount - 0.30).abs() < 1e-9);
            assert!(!nuclear);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_second_deal_for_product_is_throttled() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_origins(&ctx).await;
    ctx.reconciler().reconcile(&[skeletor(100.0)]).await.unwrap();
    let mut rx = ctx.event_bus.subscribe();

    ctx.reconciler()
        .reconcile(&[ScrapedRecord::new("ShopA", "x", 70.0, SKELETOR_URL)])
        .await
        .unwrap();
    let result = ctx
        .reconciler()
        .reconcile(&[ScrapedRecord::new("ShopA", "x", 40.0, SKELETOR_URL)])
        .await
        .unwrap();
    // Signal raised, alert suppressed
    assert_eq!(result.discounts, 1);

    let deals = drain_events(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, ReconEvent::DealAlert { .. }))
        .count();
    assert_eq!(deals, 1);
}

#[tokio::test]
async fn test_anomalous_sighting_flags_existing_offer() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    let ids = seed_origins(&ctx).await;
    ctx.reconciler().reconcile(&[skeletor(20.0)]).await.unwrap();
    set_reference_prices(&ctx.db, ids[0], 20.0).await.unwrap();

    let result = ctx
        .reconciler()
        .reconcile(&[ScrapedRecord::new("ShopA", "x", 2.0, SKELETOR_URL)])
        .await
        .unwrap();
    assert_eq!(result.blocked, 1);
    assert_eq!(result.updated, 0);

    let mut conn = ctx.db.acquire().await.unwrap();
    let offer = find_offer_by_url(&mut conn, SKELETOR_URL).await.unwrap().unwrap();
    assert!(offer.is_blocked);
    assert_eq!(offer.price, 20.0);
    assert_eq!(offer.min_price, 20.0);

    let history = history_for_url(&mut conn, SKELETOR_URL).await.unwrap();
    assert_eq!(history.last().map(|e| e.action), Some(HistoryAction::Flagged));
}

#[tokio::test]
async fn test_blacklisted_url_is_skipped() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_origins(&ctx).await;
    ctx.reconciler().reconcile(&[unknown_listing()]).await.unwrap();

    let pending = ctx.manual().pending().await.unwrap();
    ctx.manual().discard_pending(pending[0].id, "Not a figure").await.unwrap();

    let result = ctx.reconciler().reconcile(&[unknown_listing()]).await.unwrap();
    assert_eq!(result.rejected, 1);
    assert_eq!(result.purgatoried, 0);
    assert_eq!(count_rows(&ctx.db, "pending_records").await.unwrap(), 0);
}

#[tokio::test]
async fn test_failure_mid_batch_rolls_back_earlier_records() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_origins(&ctx).await;
    let mut rx = ctx.event_bus.subscribe();

    // The second listing's ledger write fails after the first one linked
    let poisoned = unknown_listing();
    sqlx::query(&format!(
        "CREATE TRIGGER fail_history BEFORE INSERT ON history_entries \
         WHEN NEW.offer_url = '{}' BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        poisoned.url
    ))
    .execute(&ctx.db)
    .await
    .unwrap();

    let err = ctx
        .reconciler()
        .reconcile(&[skeletor(19.99), poisoned])
        .await
        .unwrap_err();
    assert!(matches!(err, ReconError::Persistence(_)));

    assert_eq!(count_rows(&ctx.db, "offers").await.unwrap(), 0);
    assert_eq!(count_rows(&ctx.db, "price_snapshots").await.unwrap(), 0);
    assert_eq!(count_rows(&ctx.db, "confirmed_aliases").await.unwrap(), 0);
    assert_eq!(count_rows(&ctx.db, "pending_records").await.unwrap(), 0);
    assert_eq!(count_rows(&ctx.db, "history_entries").await.unwrap(), 0);
    assert!(drain_events(&mut rx).is_empty());

    // Nothing half-applied: the same first listing links cleanly afterwards
    sqlx::query("DROP TRIGGER fail_history").execute(&ctx.db).await.unwrap();
    let result = ctx.reconciler().reconcile(&[skeletor(19.99)]).await.unwrap();
    assert_eq!(result.linked, 1);
}

#[tokio::test]
async fn test_cancelled_batch_writes_nothing() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_origins(&ctx).await;
    let mut rx = ctx.event_bus.subscribe();

    ctx.cancel.cancel();
    let err = ctx
        .reconciler()
        .reconcile(&[skeletor(19.99), unknown_listing()])
        .await
        .unwrap_err();
    assert!(matches!(err, ReconError::Cancelled));

    assert_eq!(count_rows(&ctx.db, "offers").await.unwrap(), 0);
    assert_eq!(count_rows(&ctx.db, "pending_records").await.unwrap(), 0);
    assert_eq!(count_rows(&ctx.db, "history_entries").await.unwrap(), 0);
    assert!(drain_events(&mut rx).is_empty());
}
