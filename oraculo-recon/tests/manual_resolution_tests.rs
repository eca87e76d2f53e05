//! Manual resolution integration tests

mod helpers;

use helpers::{count_rows, create_test_context, seed_catalog, set_reference_prices};
use oraculo_recon::db::aliases::find_alias;
use oraculo_recon::db::offers::find_offer_by_url;
use oraculo_recon::db::products::{load_product, NewProduct};
use oraculo_recon::models::{HistoryAction, ScrapedRecord, SourceKind, ValidationStatus};
use oraculo_recon::ReconError;

const LOT_URL: &str = "https://b.example/lote";
const TRAP_JAW_URL: &str = "https://c.example/trap-jaw";

fn lot() -> ScrapedRecord {
    ScrapedRecord::new("ShopB", "Lote de figuras variadas", 5.0, LOT_URL)
}

fn trap_jaw() -> ScrapedRecord {
    ScrapedRecord::new("ShopC", "Figura Trap Jaw Masters of the Universe Origins", 22.0, TRAP_JAW_URL)
}

fn catalog() -> Vec<NewProduct> {
    vec![
        NewProduct::named("Skeletor (Origins)"),
        NewProduct::named("Roboto (Origins)"),
        NewProduct::named("Panthor (Origins)"),
    ]
}

#[tokio::test]
async fn test_match_pending_creates_confirmed_link() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    let ids = seed_catalog(&ctx.db, &catalog()).await.unwrap();
    ctx.reconciler().reconcile(&[lot()]).await.unwrap();

    let pending = ctx.manual().pending().await.unwrap();
    let offer_id = ctx.manual().match_pending(pending[0].id, ids[1]).await.unwrap();
    assert!(offer_id > 0);
    assert_eq!(count_rows(&ctx.db, "pending_records").await.unwrap(), 0);

    let mut conn = ctx.db.acquire().await.unwrap();
    let offer = find_offer_by_url(&mut conn, LOT_URL).await.unwrap().unwrap();
    assert_eq!(offer.product_id, ids[1]);
    assert_eq!(offer.validation_status, ValidationStatus::Verified);
    assert_eq!(find_alias(&mut conn, LOT_URL).await.unwrap().unwrap().product_id, ids[1]);
    drop(conn);

    // Next sighting follows the alias, not the matcher
    let result = ctx.reconciler().reconcile(&[lot()]).await.unwrap();
    assert_eq!(result.updated, 1);
    assert_eq!(result.purgatoried, 0);
}

#[tokio::test]
async fn test_match_pending_rejects_unknown_ids() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    let ids = seed_catalog(&ctx.db, &catalog()).await.unwrap();
    ctx.reconciler().reconcile(&[lot()]).await.unwrap();
    let pending = ctx.manual().pending().await.unwrap();

    let err = ctx.manual().match_pending(pending[0].id, 999).await.unwrap_err();
    assert!(matches!(err, ReconError::NotFound(_)));
    let err = ctx.manual().match_pending(999, ids[0]).await.unwrap_err();
    assert!(matches!(err, ReconError::NotFound(_)));

    // Nothing changed
    assert_eq!(count_rows(&ctx.db, "pending_records").await.unwrap(), 1);
    assert_eq!(count_rows(&ctx.db, "offers").await.unwrap(), 0);
}

#[tokio::test]
async fn test_bulk_discard_skips_missing_ids() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_catalog(&ctx.db, &catalog()).await.unwrap();
    ctx.reconciler().reconcile(&[lot(), trap_jaw()]).await.unwrap();

    let ids: Vec<i64> = ctx.manual().pending().await.unwrap().iter().map(|p| p.id).collect();
    assert_eq!(ids.len(), 2);

    let discarded = ctx
        .manual()
        .bulk_discard(&[ids[0], ids[1], 999], "Not in catalog scope")
        .await
        .unwrap();
    assert_eq!(discarded, 2);
    assert_eq!(count_rows(&ctx.db, "pending_records").await.unwrap(), 0);
    assert_eq!(count_rows(&ctx.db, "rejected_urls").await.unwrap(), 2);
}

#[tokio::test]
async fn test_purge_does_not_blacklist() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_catalog(&ctx.db, &catalog()).await.unwrap();
    ctx.reconciler().reconcile(&[lot()]).await.unwrap();

    let pending = ctx.manual().pending().await.unwrap();
    ctx.manual().purge_pending(pending[0].id).await.unwrap();
    assert_eq!(count_rows(&ctx.db, "pending_records").await.unwrap(), 0);
    assert_eq!(count_rows(&ctx.db, "rejected_urls").await.unwrap(), 0);
    assert_eq!(ctx.ledger().recent(1).await.unwrap()[0].action, HistoryAction::Purged);

    let result = ctx.reconciler().reconcile(&[lot()]).await.unwrap();
    assert_eq!(result.purgatoried, 1);
}

#[tokio::test]
async fn test_unlink_sends_offer_back_to_purgatory() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    let ids = seed_catalog(&ctx.db, &catalog()).await.unwrap();
    ctx.reconciler().reconcile(&[lot()]).await.unwrap();
    let pending = ctx.manual().pending().await.unwrap();
    let offer_id = ctx.manual().match_pending(pending[0].id, ids[0]).await.unwrap();

    let pending_id = ctx.manual().unlink_offer(offer_id).await.unwrap();
    assert_eq!(count_rows(&ctx.db, "offers").await.unwrap(), 0);
    assert_eq!(count_rows(&ctx.db, "confirmed_aliases").await.unwrap(), 0);
    assert_eq!(count_rows(&ctx.db, "price_snapshots").await.unwrap(), 0);

    let pending = ctx.manual().pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, pending_id);
    assert_eq!(pending[0].url, LOT_URL);

    let unlinked = ctx.ledger().recent(1).await.unwrap().remove(0);
    assert_eq!(unlinked.action, HistoryAction::Unlinked);
    assert_eq!(unlinked.product_id, Some(ids[0]));

    assert!(matches!(
        ctx.manual().unlink_offer(offer_id).await,
        Err(ReconError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_relink_moves_offer_and_alias() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    let ids = seed_catalog(&ctx.db, &catalog()).await.unwrap();
    ctx.reconciler().reconcile(&[lot()]).await.unwrap();
    let pending = ctx.manual().pending().await.unwrap();
    let offer_id = ctx.manual().match_pending(pending[0].id, ids[0]).await.unwrap();

    ctx.manual().relink_offer(offer_id, ids[2]).await.unwrap();

    let mut conn = ctx.db.acquire().await.unwrap();
    let offer = find_offer_by_url(&mut conn, LOT_URL).await.unwrap().unwrap();
    assert_eq!(offer.id, offer_id);
    assert_eq!(offer.product_id, ids[2]);
    assert_eq!(find_alias(&mut conn, LOT_URL).await.unwrap().unwrap().product_id, ids[2]);
    drop(conn);

    let relinked = ctx.ledger().recent(1).await.unwrap().remove(0);
    assert_eq!(relinked.action, HistoryAction::Relinked);
    assert_eq!(relinked.product_id, Some(ids[2]));

    let err = ctx.manual().relink_offer(offer_id, ids[2]).await.unwrap_err();
    assert!(matches!(err, ReconError::InvalidInput(_)));
}

#[tokio::test]
async fn test_auto_link_uses_current_catalog() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_catalog(&ctx.db, &catalog()).await.unwrap();
    ctx.reconciler().reconcile(&[lot(), trap_jaw()]).await.unwrap();
    assert_eq!(count_rows(&ctx.db, "pending_records").await.unwrap(), 2);

    // The product arrives after the listing was parked
    let added = seed_catalog(&ctx.db, &[NewProduct::named("Trap Jaw (Origins)")])
        .await
        .unwrap();

    let summary = ctx.manual().bulk_auto_link(0.90).await.unwrap();
    assert_eq!(summary.examined, 2);
    assert_eq!(summary.linked, 1);
    assert_eq!(summary.below_threshold, 1);

    let mut conn = ctx.db.acquire().await.unwrap();
    let offer = find_offer_by_url(&mut conn, TRAP_JAW_URL).await.unwrap().unwrap();
    assert_eq!(offer.product_id, added[0]);
    drop(conn);

    let pending = ctx.manual().pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].url, LOT_URL);
}

#[tokio::test]
async fn test_auto_link_respects_sentinel() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_catalog(&ctx.db, &catalog()).await.unwrap();
    ctx.reconciler().reconcile(&[trap_jaw()]).await.unwrap();

    let added = seed_catalog(&ctx.db, &[NewProduct::named("Trap Jaw (Origins)")])
        .await
        .unwrap();
    set_reference_prices(&ctx.db, added[0], 60.0).await.unwrap();

    let summary = ctx.manual().bulk_auto_link(0.90).await.unwrap();
    assert_eq!(summary.linked, 0);
    assert_eq!(summary.blocked, 1);
    assert_eq!(count_rows(&ctx.db, "pending_records").await.unwrap(), 1);
}

#[tokio::test]
async fn test_auto_link_rejects_bad_threshold() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    for threshold in [0.0, 1.5, f64::NAN] {
        assert!(matches!(
            ctx.manual().bulk_auto_link(threshold).await,
            Err(ReconError::InvalidInput(_))
        ));
    }
}

#[tokio::test]
async fn test_recompute_price_statistics() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    let ids = seed_catalog(&ctx.db, &catalog()).await.unwrap();

    let batch = vec![
        ScrapedRecord::new("ShopA", "Skeletor Origins", 20.0, "https://a.example/skeletor"),
        ScrapedRecord::new("ShopB", "Skeletor Origins", 30.0, "https://b.example/skeletor"),
        ScrapedRecord::new("Wallapop", "Skeletor Origins usado", 10.0, "https://w.example/1")
            .with_source_kind(SourceKind::PeerToPeer),
        ScrapedRecord::new("Wallapop", "Skeletor Origins", 14.0, "https://w.example/2")
            .with_source_kind(SourceKind::PeerToPeer),
    ];
    let result = ctx.reconciler().reconcile(&batch).await.unwrap();
    assert_eq!(result.linked, 4);

    let updated = ctx.recompute_price_statistics().await.unwrap();
    assert_eq!(updated, 3);

    let mut conn = ctx.db.acquire().await.unwrap();
    let skeletor = load_product(&mut conn, ids[0]).await.unwrap().unwrap();
    assert_eq!(skeletor.avg_retail_price, 25.0);
    assert_eq!(skeletor.avg_p2p_price, 12.0);
    assert_eq!(skeletor.avg_market_price, 25.0);
    // sorted [10, 14], index floor(2 * 0.25) = 0
    assert_eq!(skeletor.p25_price, 10.0);

    let roboto = load_product(&mut conn, ids[1]).await.unwrap().unwrap();
    assert_eq!(roboto.avg_market_price, 0.0);
}
