//! Reconciliation Pipeline
//!
//! Drives one batch of scraped records to confirmed links, Purgatory or the
//! blacklist. The whole batch is one transaction: a persistence failure or a
//! cancellation rolls everything back, and events are only published once
//! the commit succeeded.

use crate::config::PricingConfig;
use crate::db::history::{insert_history, NewHistoryEntry};
use crate::db::offers::{self, Offer, OfferSighting};
use crate::db::pending::PendingDraft;
use crate::db::products::{self, load_catalog, Product};
use crate::db::{aliases, blacklist, snapshots};
use crate::error::{ReconError, ReconResult, RecordIssue};
use crate::models::{HistoryAction, OriginalRecord, ScrapedRecord, ValidationStatus};
use crate::services::anomaly_sentinel::{AnomalySentinel, SentinelVerdict};
use crate::services::deal_notifier::{DealNotifier, DiscountSignal};
use crate::services::resolver::{ListingRef, Resolution, Resolver};
use crate::services::weight_model::{WeightModel, WeightTable};
use crate::workflow::price_tracker::evaluate_sighting;
use crate::workflow::storage::{create_link, park_pending};
use chrono::{DateTime, Utc};
use oraculo_common::events::{EventBus, ReconEvent};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Anomaly flag for listings that matched several products equally well
pub const AMBIGUOUS_TIE_FLAG: &str = "ambiguous_tie";

/// Catalog as read at the start of a run
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    products: Vec<Product>,
    index: HashMap<i64, usize>,
    loaded_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    pub fn from_products(products: Vec<Product>) -> Self {
        let index = products
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id, i))
            .collect();
        Self {
            products,
            index,
            loaded_at: Utc::now(),
        }
    }

    pub async fn load(pool: &SqlitePool) -> ReconResult<Self> {
        let mut conn = pool.acquire().await?;
        let products = load_catalog(&mut conn).await?;
        Ok(Self::from_products(products))
    }

    pub fn get(&self, id: i64) -> Option<&Product> {
        self.index.get(&id).map(|i| &self.products[*i])
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Per-record condition worth surfacing to the operator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordError {
    pub url: String,
    pub issue: RecordIssue,
    pub detail: String,
}

/// Counts for one committed batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    /// New confirmed links
    pub linked: usize,
    /// Sightings of already linked URLs applied to their offer
    pub updated: usize,
    /// Listings parked in Purgatory (including blocked matches)
    pub purgatoried: usize,
    /// Matches or sightings held back by the sentinel
    pub blocked: usize,
    /// Blacklisted URLs skipped
    pub rejected: usize,
    pub duplicates: usize,
    pub errors: Vec<RecordError>,
    /// Discount signals raised
    pub discounts: usize,
}

/// Work collected during the transaction, acted on after commit
#[derive(Default)]
struct BatchOutcome {
    result: BatchResult,
    deals: Vec<DiscountSignal>,
    events: Vec<ReconEvent>,
}

impl BatchOutcome {
    fn issue(&mut self, url: &str, issue: RecordIssue, detail: impl Into<String>) {
        self.result.errors.push(RecordError {
            url: url.to_string(),
            issue,
            detail: detail.into(),
        });
    }
}

pub struct Reconciler {
    db: SqlitePool,
    resolver: Arc<Resolver>,
    weights: Arc<WeightModel>,
    sentinel: Arc<AnomalySentinel>,
    notifier: DealNotifier,
    event_bus: EventBus,
    pricing: PricingConfig,
    write_lock: Arc<Mutex<()>>,
    cancel: CancellationToken,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        resolver: Arc<Resolver>,
        weights: Arc<WeightModel>,
        sentinel: Arc<AnomalySentinel>,
        notifier: DealNotifier,
        event_bus: EventBus,
        pricing: PricingConfig,
        write_lock: Arc<Mutex<()>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            resolver,
            weights,
            sentinel,
            notifier,
            event_bus,
            pricing,
            write_lock,
            cancel,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Reconcile one batch against a freshly loaded catalog
    pub async fn reconcile(&self, records: &[ScrapedRecord]) -> ReconResult<BatchResult> {
        if records.is_empty() {
            warn!("Empty batch received, skipping update");
            return Err(ReconError::EmptyBatch);
        }
        let catalog = CatalogSnapshot::load(&self.db).await?;
        self.reconcile_with_catalog(&catalog, records).await
    }

    /// Reconcile one batch against a catalog snapshot shared by the run
    pub async fn reconcile_with_catalog(
        &self,
        catalog: &CatalogSnapshot,
        records: &[ScrapedRecord],
    ) -> ReconResult<BatchResult> {
        // An empty batch usually means a dead producer, not an empty shop
        if records.is_empty() {
            warn!("Empty batch received, skipping update");
            return Err(ReconError::EmptyBatch);
        }

        let weights = self.current_weights(catalog);

        // One writer at a time: two batches must not race to alias a URL
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.begin().await?;
        let mut outcome = BatchOutcome::default();
        let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());

        for record in records {
            if self.cancel.is_cancelled() {
                info!(
                    processed = seen.len(),
                    total = records.len(),
                    "Reconciliation cancelled, rolling back batch"
                );
                return Err(ReconError::Cancelled);
            }
            self.process_record(&mut tx, catalog, &weights, record, &mut seen, &mut outcome)
                .await?;
        }

        tx.commit().await?;

        let BatchOutcome {
            mut result,
            deals,
            events,
        } = outcome;
        result.discounts = deals.len();

        for deal in &deals {
            self.notifier.notify_deal(deal);
        }
        for event in events {
            self.event_bus.emit_lossy(event);
        }
        self.event_bus.emit_lossy(ReconEvent::BatchReconciled {
            linked: result.linked,
            updated: result.updated,
            pending: result.purgatoried,
            blocked: result.blocked,
            rejected: result.rejected,
            duplicates: result.duplicates,
            errors: result.errors.len(),
            timestamp: Utc::now(),
        });

        info!(
            records = records.len(),
            linked = result.linked,
            updated = result.updated,
            purgatoried = result.purgatoried,
            blocked = result.blocked,
            rejected = result.rejected,
            duplicates = result.duplicates,
            "Batch reconciled"
        );
        Ok(result)
    }

    /// Weight snapshot for this batch; built from the catalog on first use
    fn current_weights(&self, catalog: &CatalogSnapshot) -> Arc<WeightTable> {
        let weights = self.weights.snapshot();
        if weights.corpus_size() == 0 && !catalog.is_empty() {
            debug!("Weight table empty, building from catalog snapshot");
            return self.weights.rebuild(catalog.products());
        }
        weights
    }

    async fn process_record<'r>(
        &self,
        conn: &mut SqliteConnection,
        catalog: &CatalogSnapshot,
        weights: &WeightTable,
        record: &'r ScrapedRecord,
        seen: &mut HashSet<&'r str>,
        out: &mut BatchOutcome,
    ) -> ReconResult<()> {
        if let Err(detail) = record.validate() {
            debug!(url = %record.url, %detail, "Invalid record skipped");
            out.issue(&record.url, RecordIssue::InvalidRecord, detail);
            return Ok(());
        }

        if !seen.insert(record.url.as_str()) {
            out.result.duplicates += 1;
            out.issue(&record.url, RecordIssue::DuplicateUrl, "URL repeated within batch");
            return Ok(());
        }

        let now = Utc::now();
        let original = OriginalRecord::from(record);

        // Known URL: skip the matcher entirely
        let offer = offers::find_offer_by_url(&mut *conn, &record.url).await?;
        let alias = aliases::find_alias(&mut *conn, &record.url)
            .await?
            .filter(|a| a.confirmed);
        let known_product = offer
            .as_ref()
            .map(|o| o.product_id)
            .or(alias.as_ref().map(|a| a.product_id));

        if let Some(product_id) = known_product {
            let product = match catalog.get(product_id) {
                Some(product) => Some(product.clone()),
                None => products::load_product(&mut *conn, product_id).await?,
            };
            match product {
                Some(product) => {
                    return self
                        .apply_known_link(conn, &product, offer, record, &original, now, out)
                        .await;
                }
                None => warn!(url = %record.url, product_id, "Link points at a missing product, re-matching"),
            }
        }

        if blacklist::is_blacklisted(&mut *conn, &record.url).await? {
            debug!(url = %record.url, "Blacklisted URL skipped");
            out.result.rejected += 1;
            return Ok(());
        }

        let listing = ListingRef {
            title: &record.title,
            url: &record.url,
            ean: record.ean.as_deref(),
        };

        match self.resolver.best_match(weights, catalog.products(), &listing) {
            Resolution::Accepted {
                product_id,
                score,
                reason,
            } => {
                let product = catalog.get(product_id).ok_or_else(|| {
                    ReconError::NotFound(format!("product {} vanished from snapshot", product_id))
                })?;
                let verdict = self.sentinel.validate(
                    product,
                    record.price,
                    record.source_kind,
                    record.image_url.as_deref(),
                );

                if verdict.blocked {
                    let info = format!(
                        "Anomaly: matched '{}' ({:.2}) but price {:.2} deviates from reference",
                        product.name, score, record.price
                    );
                    self.park_blocked(conn, product, record, &original, &verdict, info, now, out)
                        .await?;
                    return Ok(());
                }

                create_link(
                    conn,
                    product,
                    &original,
                    record.is_available,
                    verdict.status,
                    HistoryAction::SmartMatch,
                    format!("{} (score {:.2})", reason, score),
                    now,
                )
                .await?;
                debug!(url = %record.url, product = %product.name, score, "Linked");
                out.result.linked += 1;
            }

            Resolution::AmbiguousTie { score, candidates } => {
                let mut draft = pending_draft(record, &original);
                draft.anomaly_flags.push(AMBIGUOUS_TIE_FLAG.to_string());
                let detail = format!("Products {:?} tie at score {:.2}", candidates, score);
                park_pending(conn, &draft, detail.clone(), now).await?;
                out.result.purgatoried += 1;
                out.issue(&record.url, RecordIssue::AmbiguousTie, detail);
            }

            Resolution::Rejected { closest } => {
                let info = match &closest {
                    Some(c) => format!("Closest product {}: {} ({:.2})", c.product_id, c.detail, c.score),
                    None => "Catalog is empty".to_string(),
                };
                park_pending(conn, &pending_draft(record, &original), info, now).await?;
                out.result.purgatoried += 1;
            }
        }

        Ok(())
    }

    /// Sighting of a URL whose product is already known
    #[allow(clippy::too_many_arguments)]
    async fn apply_known_link(
        &self,
        conn: &mut SqliteConnection,
        product: &Product,
        offer: Option<Offer>,
        record: &ScrapedRecord,
        original: &OriginalRecord,
        now: DateTime<Utc>,
        out: &mut BatchOutcome,
    ) -> ReconResult<()> {
        let verdict = self.sentinel.validate(
            product,
            record.price,
            record.source_kind,
            record.image_url.as_deref(),
        );

        let Some(offer) = offer else {
            // Confirmed alias whose offer was removed outside the engine
            if verdict.blocked {
                let info = format!(
                    "Anomaly on aliased URL: price {:.2} for '{}'",
                    record.price, product.name
                );
                return self
                    .park_blocked(conn, product, record, original, &verdict, info, now, out)
                    .await;
            }
            create_link(
                conn,
                product,
                original,
                record.is_available,
                verdict.status,
                HistoryAction::Linked,
                "Restored from confirmed alias".to_string(),
                now,
            )
            .await?;
            out.result.linked += 1;
            return Ok(());
        };

        if verdict.blocked {
            return self
                .flag_offer(conn, product, &offer, record, original, &verdict, now, out)
                .await;
        }

        let last = snapshots::last_snapshot(&mut *conn, offer.id).await?;
        let update = evaluate_sighting(
            &offer,
            record.price,
            record.is_available,
            verdict.status,
            last.as_ref(),
            &self.pricing,
            now,
        );
        let mut sighting = update.sighting;
        sighting.anomaly_flags = verdict.flags.clone();
        offers::update_sighting(&mut *conn, offer.id, &sighting).await?;

        if let Some(due) = update.snapshot {
            snapshots::insert_snapshot(&mut *conn, offer.id, due.price, now, due.is_snapshot).await?;
        }

        if update.price_changed {
            let entry = NewHistoryEntry::for_record(HistoryAction::PriceChanged, original)
                .product(product.id, &product.name)
                .info(format!("{:.2} -> {:.2}", offer.price, record.price));
            insert_history(&mut *conn, &entry, now).await?;
        }

        if let Some(discount) = update.discount {
            out.deals.push(DiscountSignal {
                product_id: product.id,
                product_name: product.name.clone(),
                shop: record.shop.clone(),
                url: record.url.clone(),
                price: record.price,
                previous_min: discount.previous_min,
                previous_max: discount.previous_max,
                discount: discount.fraction,
                nuclear: discount.nuclear,
                detected_at: now,
            });
        }

        out.result.updated += 1;
        Ok(())
    }

    /// Hold an existing offer's sighting back; price and range stay as they were
    #[allow(clippy::too_many_arguments)]
    async fn flag_offer(
        &self,
        conn: &mut SqliteConnection,
        product: &Product,
        offer: &Offer,
        record: &ScrapedRecord,
        original: &OriginalRecord,
        verdict: &SentinelVerdict,
        now: DateTime<Utc>,
        out: &mut BatchOutcome,
    ) -> ReconResult<()> {
        let newly_flagged = !offer.is_blocked || offer.anomaly_flags != verdict.flags;

        let sighting = OfferSighting {
            price: offer.price,
            min_price: offer.min_price,
            max_price: offer.max_price,
            is_available: record.is_available,
            validation_status: ValidationStatus::Pending,
            anomaly_flags: verdict.flags.clone(),
            is_blocked: true,
            last_seen_at: now,
            last_price_update: offer.last_price_update,
        };
        offers::update_sighting(&mut *conn, offer.id, &sighting).await?;

        if newly_flagged {
            let entry = NewHistoryEntry::for_record(HistoryAction::Flagged, original)
                .product(product.id, &product.name)
                .info(describe_verdict(verdict));
            insert_history(&mut *conn, &entry, now).await?;
            out.events.push(anomaly_event(record, verdict, now));
        }

        out.result.blocked += 1;
        out.issue(&record.url, RecordIssue::AnomalyBlocked, describe_verdict(verdict));
        Ok(())
    }

    /// Send a matched-but-implausible listing to Purgatory
    #[allow(clippy::too_many_arguments)]
    async fn park_blocked(
        &self,
        conn: &mut SqliteConnection,
        product: &Product,
        record: &ScrapedRecord,
        original: &OriginalRecord,
        verdict: &SentinelVerdict,
        info: String,
        now: DateTime<Utc>,
        out: &mut BatchOutcome,
    ) -> ReconResult<()> {
        let mut draft = pending_draft(record, original);
        draft.anomaly_flags = verdict.flags.clone();
        draft.is_blocked = true;
        draft.validation_status = verdict.status;

        let upsert = park_pending(conn, &draft, info, now).await?;
        if upsert.is_material() {
            out.events.push(anomaly_event(record, verdict, now));
        }
        warn!(
            url = %record.url,
            product = %product.name,
            price = record.price,
            reference = ?verdict.reference_price,
            "Price anomaly, match held for review"
        );

        out.result.blocked += 1;
        out.result.purgatoried += 1;
        out.issue(&record.url, RecordIssue::AnomalyBlocked, describe_verdict(verdict));
        Ok(())
    }
}

fn pending_draft(record: &ScrapedRecord, original: &OriginalRecord) -> PendingDraft {
    PendingDraft {
        original: original.clone(),
        is_available: record.is_available,
        captured_at: record.captured_at,
        anomaly_flags: Vec::new(),
        is_blocked: false,
        validation_status: ValidationStatus::Pending,
    }
}

fn describe_verdict(verdict: &SentinelVerdict) -> String {
    match (verdict.reference_price, verdict.deviation) {
        (Some(reference), Some(deviation)) => format!(
            "{} (reference {:.2}, deviation {:.0}%)",
            verdict.flags.join(", "),
            reference,
            deviation * 100.0
        ),
        _ => verdict.flags.join(", "),
    }
}

fn anomaly_event(record: &ScrapedRecord, verdict: &SentinelVerdict, now: DateTime<Utc>) -> ReconEvent {
    ReconEvent::AnomalyBlocked {
        url: record.url.clone(),
        shop: record.shop.clone(),
        price: record.price,
        reference_price: verdict.reference_price.unwrap_or(0.0),
        deviation: verdict.deviation.unwrap_or(0.0),
        timestamp: now,
    }
}
