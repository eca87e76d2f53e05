//! Price-delta logic for repeat sightings of a linked offer
//!
//! Pure computation; the reconciler persists whatever this decides.

use crate::config::PricingConfig;
use crate::db::offers::{Offer, OfferSighting};
use crate::db::snapshots::PriceSnapshot;
use crate::models::ValidationStatus;
use chrono::{DateTime, Duration, Utc};

/// Smallest move that counts as a price change
pub const PRICE_EPSILON: f64 = 0.01;

/// Row to append to the offer's price history
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotDue {
    pub price: f64,
    /// Periodic sample of an unchanged price
    pub is_snapshot: bool,
}

/// Discount relative to the offer's previous range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Discount {
    pub previous_min: f64,
    pub previous_max: f64,
    pub fraction: f64,
    pub nuclear: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    pub sighting: OfferSighting,
    pub snapshot: Option<SnapshotDue>,
    pub price_changed: bool,
    pub discount: Option<Discount>,
}

/// Decide what a new sighting does to an offer
///
/// A clean sighting also clears any earlier sentinel block on the offer.
pub fn evaluate_sighting(
    offer: &Offer,
    price: f64,
    is_available: bool,
    status: ValidationStatus,
    last_snapshot: Option<&PriceSnapshot>,
    config: &PricingConfig,
    now: DateTime<Utc>,
) -> PriceUpdate {
    let price_changed = (price - offer.price).abs() > PRICE_EPSILON;

    let snapshot = if price_changed {
        Some(SnapshotDue {
            price,
            is_snapshot: false,
        })
    } else {
        let stale = last_snapshot.map_or(true, |last| {
            now - last.recorded_at > Duration::hours(config.snapshot_interval_hours)
        });
        stale.then_some(SnapshotDue {
            price,
            is_snapshot: true,
        })
    };

    let discount = detect_discount(offer.min_price, offer.max_price, price, config);

    let min_price = if offer.min_price > 0.0 {
        offer.min_price.min(price)
    } else {
        price
    };
    let max_price = offer.max_price.max(price);

    PriceUpdate {
        sighting: OfferSighting {
            price,
            min_price,
            max_price,
            is_available,
            validation_status: status,
            anomaly_flags: Vec::new(),
            is_blocked: false,
            last_seen_at: now,
            last_price_update: if price_changed {
                Some(now)
            } else {
                offer.last_price_update
            },
        },
        snapshot,
        price_changed,
        discount,
    }
}

/// `(min - price) / max` when the new price undercuts the old minimum by at
/// least the configured fraction of the old maximum
pub fn detect_discount(min_price: f64, max_price: f64, price: f64, config: &PricingConfig) -> Option<Discount> {
    if min_price <= 0.0 || max_price <= 0.0 || price >= min_price {
        return None;
    }

    let fraction = (min_price - price) / max_price;
    if fraction + f64::EPSILON < config.discount_threshold {
        return None;
    }

    Some(Discount {
        previous_min: min_price,
        previous_max: max_price,
        fraction,
        nuclear: fraction + f64::EPSILON >= config.nuclear_threshold,
    })
}
