//! Database Test Utilities

use anyhow::Result;
use chrono::Utc;
use oraculo_common::events::{EventBus, ReconEvent};
use oraculo_recon::config::ReconConfig;
use oraculo_recon::db::products::{insert_product, update_price_statistics, NewProduct, PriceStatistics};
use oraculo_recon::ReconContext;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Create temporary test database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_oraculo.db");
    let pool = oraculo_common::db::init_database(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Fresh database plus an engine context with default configuration
pub async fn create_test_context() -> Result<(TempDir, ReconContext)> {
    let (temp_dir, pool) = create_test_db().await?;
    let ctx = ReconContext::new(pool, EventBus::new(64), ReconConfig::default());
    Ok((temp_dir, ctx))
}

/// Insert products in order; returns their ids
pub async fn seed_catalog(pool: &SqlitePool, products: &[NewProduct]) -> Result<Vec<i64>> {
    let mut conn = pool.acquire().await?;
    let mut ids = Vec::with_capacity(products.len());
    for product in products {
        ids.push(insert_product(&mut conn, product).await?);
    }
    Ok(ids)
}

/// Give a product a retail (and blended) reference price
pub async fn set_reference_prices(pool: &SqlitePool, product_id: i64, retail: f64) -> Result<()> {
    let mut conn = pool.acquire().await?;
    let stats = PriceStatistics {
        avg_retail_price: retail,
        avg_p2p_price: 0.0,
        avg_market_price: retail,
        p25_price: 0.0,
    };
    update_price_statistics(&mut conn, product_id, &stats, Utc::now()).await?;
    Ok(())
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Everything published so far
pub fn drain_events(rx: &mut broadcast::Receiver<ReconEvent>) -> Vec<ReconEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
