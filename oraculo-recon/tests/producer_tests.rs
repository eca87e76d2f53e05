//! Multi-source run integration tests

mod helpers;

use async_trait::async_trait;
use helpers::{count_rows, create_test_context, seed_catalog};
use oraculo_recon::db::products::NewProduct;
use oraculo_recon::models::ScrapedRecord;
use oraculo_recon::workflow::{run_sources, RecordProducer};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct StaticProducer {
    name: &'static str,
    records: Vec<ScrapedRecord>,
}

#[async_trait]
impl RecordProducer for StaticProducer {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, _cancel: &CancellationToken) -> anyhow::Result<Vec<ScrapedRecord>> {
        Ok(self.records.clone())
    }
}

struct DownProducer;

#[async_trait]
impl RecordProducer for DownProducer {
    fn name(&self) -> &str {
        "down"
    }

    async fn fetch(&self, _cancel: &CancellationToken) -> anyhow::Result<Vec<ScrapedRecord>> {
        anyhow::bail!("503 Service Unavailable")
    }
}

fn producer(name: &'static str, records: Vec<ScrapedRecord>) -> Arc<dyn RecordProducer> {
    Arc::new(StaticProducer { name, records })
}

#[tokio::test]
async fn test_sources_reconcile_independently() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_catalog(
        &ctx.db,
        &[NewProduct::named("Skeletor (Origins)"), NewProduct::named("Roboto (Origins)")],
    )
    .await
    .unwrap();

    let producers = vec![
        producer(
            "shop-a",
            vec![ScrapedRecord::new("ShopA", "Skeletor Origins", 19.99, "https://a.example/skeletor")],
        ),
        producer("shop-b", Vec::new()),
        Arc::new(DownProducer) as Arc<dyn RecordProducer>,
        producer(
            "shop-c",
            vec![
                ScrapedRecord::new("ShopC", "Roboto Origins", 21.0, "https://c.example/roboto"),
                ScrapedRecord::new("ShopC", "Funko Pop aleatorio", 9.0, "https://c.example/funko"),
            ],
        ),
    ];

    let reports = run_sources(&ctx.reconciler(), &producers, Duration::from_secs(5))
        .await
        .unwrap();

    let sources: Vec<&str> = reports.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(sources, vec!["shop-a", "shop-b", "shop-c"]);

    assert_eq!(reports[0].result.as_ref().map(|r| r.linked), Some(1));
    assert!(reports[1].result.is_none());
    assert!(reports[1].skipped.is_some());
    let shop_c = reports[2].result.as_ref().unwrap();
    assert_eq!(shop_c.linked, 1);
    assert_eq!(shop_c.purgatoried, 1);

    assert_eq!(count_rows(&ctx.db, "offers").await.unwrap(), 2);
    assert_eq!(count_rows(&ctx.db, "pending_records").await.unwrap(), 1);
}

#[tokio::test]
async fn test_cancelled_run_applies_nothing() {
    let (_tmp, ctx) = create_test_context().await.unwrap();
    seed_catalog(&ctx.db, &[NewProduct::named("Skeletor (Origins)")])
        .await
        .unwrap();

    let producers = vec![producer(
        "shop-a",
        vec![ScrapedRecord::new("ShopA", "Skeletor Origins", 19.99, "https://a.example/skeletor")],
    )];

    ctx.cancel.cancel();
    let reports = run_sources(&ctx.reconciler(), &producers, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(reports.is_empty());
    assert_eq!(count_rows(&ctx.db, "offers").await.unwrap(), 0);
}
