//! Reference price statistics recompute
//!
//! The only place the engine writes to `products`. Averages come from
//! available, unblocked offers; blocked offers are exactly the ones whose
//! price is in doubt.

use crate::db::offers::{load_all_offers, Offer};
use crate::db::products::{load_catalog, update_price_statistics, PriceStatistics};
use crate::error::ReconResult;
use crate::models::SourceKind;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Statistics for one product's offers
pub fn compute_statistics<'a>(offers: impl IntoIterator<Item = &'a Offer>) -> PriceStatistics {
    let mut retail = Vec::new();
    let mut p2p = Vec::new();
    for offer in offers {
        if !offer.is_available || offer.is_blocked || offer.price <= 0.0 {
            continue;
        }
        match offer.source_kind {
            SourceKind::Retail => retail.push(offer.price),
            SourceKind::PeerToPeer => p2p.push(offer.price),
        }
    }

    let avg_retail_price = mean(&retail);
    let avg_p2p_price = mean(&p2p);
    let p25_price = percentile_25(&mut p2p);
    let avg_market_price = if avg_retail_price > 0.0 {
        avg_retail_price
    } else {
        avg_p2p_price
    };

    PriceStatistics {
        avg_retail_price: round2(avg_retail_price),
        avg_p2p_price: round2(avg_p2p_price),
        avg_market_price: round2(avg_market_price),
        p25_price: round2(p25_price),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Value at index `floor(len * 0.25)` of the sorted prices
fn percentile_25(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    values[(values.len() as f64 * 0.25) as usize]
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Recompute and store statistics for every product; returns how many
/// products were written
pub async fn recompute_price_statistics(pool: &SqlitePool, write_lock: &Arc<Mutex<()>>) -> ReconResult<usize> {
    let _guard = write_lock.lock().await;
    let mut tx = pool.begin().await?;

    let catalog = load_catalog(&mut tx).await?;
    let offers = load_all_offers(&mut tx).await?;

    let mut by_product: HashMap<i64, Vec<&Offer>> = HashMap::new();
    for offer in &offers {
        by_product.entry(offer.product_id).or_default().push(offer);
    }

    let now = Utc::now();
    for product in &catalog {
        let stats = compute_statistics(by_product.get(&product.id).into_iter().flatten().copied());
        update_price_statistics(&mut tx, product.id, &stats, now).await?;
    }

    tx.commit().await?;
    info!(products = catalog.len(), offers = offers.len(), "Price statistics recomputed");
    Ok(catalog.len())
}
