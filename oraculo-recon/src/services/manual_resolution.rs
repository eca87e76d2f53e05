//! Manual resolution actions
//!
//! Operator decisions on the Purgatory queue and on confirmed links. Every
//! action runs in one transaction under the shared write lock and leaves a
//! history entry carrying the listing snapshot, so the undoable ones can be
//! reverted through the ledger.

use crate::db::history::{insert_history, NewHistoryEntry};
use crate::db::pending::{self, upsert_pending, PendingDraft, PendingRecord};
use crate::db::products::{load_catalog, load_product, Product};
use crate::db::{aliases, blacklist, offers};
use crate::error::{ReconError, ReconResult};
use crate::models::{HistoryAction, ValidationStatus};
use crate::services::anomaly_sentinel::AnomalySentinel;
use crate::services::resolver::{ListingRef, Resolution, Resolver};
use crate::services::weight_model::WeightModel;
use crate::workflow::storage::create_link;
use chrono::Utc;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of one bulk auto-link pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutoLinkSummary {
    pub examined: usize,
    pub linked: usize,
    /// Confident matches the sentinel still refused
    pub blocked: usize,
    pub below_threshold: usize,
}

#[derive(Clone)]
pub struct ManualResolution {
    db: SqlitePool,
    resolver: Arc<Resolver>,
    weights: Arc<WeightModel>,
    sentinel: Arc<AnomalySentinel>,
    write_lock: Arc<Mutex<()>>,
}

impl ManualResolution {
    pub fn new(
        db: SqlitePool,
        resolver: Arc<Resolver>,
        weights: Arc<WeightModel>,
        sentinel: Arc<AnomalySentinel>,
        write_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            db,
            resolver,
            weights,
            sentinel,
            write_lock,
        }
    }

    /// Current Purgatory queue, oldest first
    pub async fn pending(&self) -> ReconResult<Vec<PendingRecord>> {
        let mut conn = self.db.acquire().await?;
        pending::list_pending(&mut conn).await
    }

    /// Link a Purgatory entry to a product chosen by the operator
    ///
    /// The operator's decision overrides both the matcher and the sentinel.
    /// Returns the new offer id.
    pub async fn match_pending(&self, pending_id: i64, product_id: i64) -> ReconResult<i64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.begin().await?;

        let record = require_pending(&mut tx, pending_id).await?;
        let product = require_product(&mut tx, product_id).await?;
        if offers::find_offer_by_url(&mut tx, &record.url).await?.is_some() {
            return Err(ReconError::InvalidInput(format!(
                "{} is already linked",
                record.url
            )));
        }

        let offer_id = create_link(
            &mut tx,
            &product,
            &record.original_record(),
            record.is_available,
            ValidationStatus::Verified,
            HistoryAction::Linked,
            format!("Manual match from Purgatory #{}", pending_id),
            Utc::now(),
        )
        .await?;
        // Manual confirmation also lifts an earlier rejection
        blacklist::remove_rejected(&mut tx, &record.url).await?;

        tx.commit().await?;
        info!(pending_id, product_id, offer_id, url = %record.url, "Pending record matched manually");
        Ok(offer_id)
    }

    /// Blacklist a Purgatory entry's URL
    pub async fn discard_pending(&self, pending_id: i64, reason: &str) -> ReconResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.begin().await?;
        let record = require_pending(&mut tx, pending_id).await?;
        discard(&mut tx, &record, reason).await?;
        tx.commit().await?;
        info!(pending_id, url = %record.url, reason, "Pending record discarded");
        Ok(())
    }

    /// Blacklist several entries at once; ids no longer in Purgatory are
    /// skipped. Returns how many were discarded.
    pub async fn bulk_discard(&self, pending_ids: &[i64], reason: &str) -> ReconResult<usize> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.begin().await?;

        let mut discarded = 0;
        for &id in pending_ids {
            match pending::load_pending(&mut tx, id).await? {
                Some(record) => {
                    discard(&mut tx, &record, reason).await?;
                    discarded += 1;
                }
                None => warn!(pending_id = id, "Pending record not found, skipping discard"),
            }
        }

        tx.commit().await?;
        info!(requested = pending_ids.len(), discarded, "Bulk discard complete");
        Ok(discarded)
    }

    /// Drop a Purgatory entry without blacklisting; the URL may come back
    pub async fn purge_pending(&self, pending_id: i64) -> ReconResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.begin().await?;

        let record = require_pending(&mut tx, pending_id).await?;
        let original = record.original_record();
        pending::delete_pending(&mut tx, pending_id).await?;
        let entry = NewHistoryEntry::for_record(HistoryAction::Purged, &original).info("Purged from Purgatory");
        insert_history(&mut tx, &entry, Utc::now()).await?;

        tx.commit().await?;
        info!(pending_id, url = %record.url, "Pending record purged");
        Ok(())
    }

    /// Break a confirmed link and send the listing back to Purgatory
    ///
    /// Returns the Purgatory entry id.
    pub async fn unlink_offer(&self, offer_id: i64) -> ReconResult<i64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.begin().await?;
        let now = Utc::now();

        let offer = offers::load_offer(&mut tx, offer_id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("offer {}", offer_id)))?;
        let product = load_product(&mut tx, offer.product_id).await?;
        let original = offer.original_record();

        offers::delete_offer(&mut tx, offer_id).await?;
        aliases::delete_alias(&mut tx, &offer.url).await?;

        let mut draft = PendingDraft::new(original.clone());
        draft.is_available = offer.is_available;
        let upsert = upsert_pending(&mut tx, &draft, now).await?;

        let mut entry = NewHistoryEntry::for_record(HistoryAction::Unlinked, &original)
            .info(format!("Unlinked offer #{}", offer_id));
        if let Some(product) = &product {
            entry = entry.product(product.id, &product.name);
        }
        insert_history(&mut tx, &entry, now).await?;

        tx.commit().await?;
        info!(offer_id, url = %offer.url, "Offer unlinked");
        Ok(upsert.id())
    }

    /// Move a confirmed link and its alias to another product
    pub async fn relink_offer(&self, offer_id: i64, product_id: i64) -> ReconResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.begin().await?;
        let now = Utc::now();

        let offer = offers::load_offer(&mut tx, offer_id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("offer {}", offer_id)))?;
        let product = require_product(&mut tx, product_id).await?;
        if offer.product_id == product_id {
            return Err(ReconError::InvalidInput(format!(
                "offer {} already belongs to product {}",
                offer_id, product_id
            )));
        }

        offers::reassign_offer(&mut tx, offer_id, product_id).await?;
        aliases::upsert_alias(&mut tx, &offer.url, product_id, now).await?;

        let original = offer.original_record();
        let entry = NewHistoryEntry::for_record(HistoryAction::Relinked, &original)
            .product(product.id, &product.name)
            .info(format!("Moved from product #{}", offer.product_id));
        insert_history(&mut tx, &entry, now).await?;

        tx.commit().await?;
        info!(offer_id, from = offer.product_id, to = product_id, "Offer relinked");
        Ok(())
    }

    /// Re-run the matcher on every Purgatory entry and link the confident ones
    ///
    /// Always matches against the catalog as it is now, with weights rebuilt
    /// from it; nothing from earlier runs is reused.
    pub async fn bulk_auto_link(&self, threshold: f64) -> ReconResult<AutoLinkSummary> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ReconError::InvalidInput(format!(
                "auto-link threshold must be in (0, 1], got {}",
                threshold
            )));
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.begin().await?;
        let now = Utc::now();

        let catalog = load_catalog(&mut tx).await?;
        let weights = self.weights.rebuild(&catalog);
        let queue = pending::list_pending(&mut tx).await?;

        let mut summary = AutoLinkSummary::default();
        for record in &queue {
            summary.examined += 1;
            let listing = ListingRef {
                title: &record.scraped_name,
                url: &record.url,
                ean: record.ean.as_deref(),
            };

            let (product_id, score) = match self.resolver.best_match(&weights, &catalog, &listing) {
                Resolution::Accepted { product_id, score, .. } if score >= threshold => (product_id, score),
                other => {
                    debug!(url = %record.url, score = other.best_score(), "Below auto-link threshold");
                    summary.below_threshold += 1;
                    continue;
                }
            };
            let Some(product) = catalog.iter().find(|p| p.id == product_id) else {
                continue;
            };

            let verdict = self.sentinel.validate(
                product,
                record.price,
                record.source_kind,
                record.image_url.as_deref(),
            );
            if verdict.blocked {
                debug!(url = %record.url, product = %product.name, "Auto-link held back by sentinel");
                summary.blocked += 1;
                continue;
            }

            create_link(
                &mut tx,
                product,
                &record.original_record(),
                record.is_available,
                verdict.status,
                HistoryAction::SmartMatch,
                format!("Auto-linked (score {:.2})", score),
                now,
            )
            .await?;
            summary.linked += 1;
        }

        tx.commit().await?;
        info!(
            examined = summary.examined,
            linked = summary.linked,
            blocked = summary.blocked,
            threshold,
            "Bulk auto-link complete"
        );
        Ok(summary)
    }
}

async fn require_pending(conn: &mut SqliteConnection, id: i64) -> ReconResult<PendingRecord> {
    pending::load_pending(conn, id)
        .await?
        .ok_or_else(|| ReconError::NotFound(format!("pending record {}", id)))
}

async fn require_product(conn: &mut SqliteConnection, id: i64) -> ReconResult<Product> {
    load_product(conn, id)
        .await?
        .ok_or_else(|| ReconError::NotFound(format!("product {}", id)))
}

async fn discard(conn: &mut SqliteConnection, record: &PendingRecord, reason: &str) -> ReconResult<()> {
    let now = Utc::now();
    let original = record.original_record();
    blacklist::insert_rejected(
        &mut *conn,
        &record.url,
        &record.scraped_name,
        reason,
        record.source_kind,
        now,
    )
    .await?;
    pending::delete_pending(&mut *conn, record.id).await?;

    let entry = NewHistoryEntry::for_record(HistoryAction::Discarded, &original).info(reason);
    insert_history(&mut *conn, &entry, now).await?;
    Ok(())
}
