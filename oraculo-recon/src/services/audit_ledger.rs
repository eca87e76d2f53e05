//! Audit Ledger
//!
//! Read access to the append-only history, and one-shot undo. Undo never
//! deletes or rewrites an entry: it stamps `undone_at` on the original and
//! appends an `UNDONE` entry pointing back at it.

use crate::db::history::{self, insert_history, NewHistoryEntry};
use crate::db::pending::{upsert_pending, PendingDraft};
use crate::db::{aliases, blacklist, offers};
use crate::error::{ReconError, ReconResult};
use crate::models::{HistoryAction, HistoryEntry};
use chrono::Utc;
use oraculo_common::events::{EventBus, ReconEvent};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// What an undo restored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UndoReport {
    pub entry_id: i64,
    pub action: HistoryAction,
    /// The compensating `UNDONE` entry
    pub undo_entry_id: i64,
    /// Purgatory entry recreated from the snapshot
    pub pending_id: i64,
    pub removed_offer: bool,
}

#[derive(Clone)]
pub struct AuditLedger {
    db: SqlitePool,
    event_bus: EventBus,
    write_lock: Arc<Mutex<()>>,
}

impl AuditLedger {
    pub fn new(db: SqlitePool, event_bus: EventBus, write_lock: Arc<Mutex<()>>) -> Self {
        Self {
            db,
            event_bus,
            write_lock,
        }
    }

    pub async fn entry(&self, id: i64) -> ReconResult<HistoryEntry> {
        let mut conn = self.db.acquire().await?;
        history::load_history(&mut conn, id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("history entry {}", id)))
    }

    /// Newest first
    pub async fn recent(&self, limit: i64) -> ReconResult<Vec<HistoryEntry>> {
        let mut conn = self.db.acquire().await?;
        history::recent_history(&mut conn, limit).await
    }

    pub async fn for_url(&self, url: &str) -> ReconResult<Vec<HistoryEntry>> {
        let mut conn = self.db.acquire().await?;
        history::history_for_url(&mut conn, url).await
    }

    /// Revert one entry, restoring its listing to Purgatory
    ///
    /// Fails with [`ReconError::UndoAlreadyApplied`] on a second call for
    /// the same entry, with [`ReconError::NotUndoable`] for bookkeeping
    /// entries, and with [`ReconError::Superseded`] or
    /// [`ReconError::StateDiverged`] once a later action owns the listing.
    /// No failure changes anything.
    pub async fn undo(&self, id: i64) -> ReconResult<UndoReport> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.begin().await?;
        let (report, offer_url) = undo_entry(&mut tx, id).await?;
        tx.commit().await?;

        info!(
            entry_id = id,
            action = %report.action,
            url = %offer_url,
            removed_offer = report.removed_offer,
            "History entry undone"
        );
        self.event_bus.emit_lossy(ReconEvent::EntryUndone {
            entry_id: id,
            action: report.action.as_str().to_string(),
            offer_url,
            timestamp: Utc::now(),
        });
        Ok(report)
    }
}

/// Undo inside the caller's transaction
pub async fn undo_entry(conn: &mut SqliteConnection, id: i64) -> ReconResult<(UndoReport, String)> {
    let entry = history::load_history(&mut *conn, id)
        .await?
        .ok_or_else(|| ReconError::NotFound(format!("history entry {}", id)))?;

    if entry.action == HistoryAction::Undone || entry.is_undone() {
        return Err(ReconError::UndoAlreadyApplied(id));
    }
    if !entry.action.is_undoable() {
        return Err(ReconError::NotUndoable {
            id,
            action: entry.action.as_str().to_string(),
        });
    }
    let Some(original) = entry.original.clone() else {
        return Err(ReconError::NotUndoable {
            id,
            action: format!("{} without listing snapshot", entry.action),
        });
    };

    let later = history::history_for_url_after(&mut *conn, &entry.offer_url, id).await?;
    if let Some(newer) = later
        .iter()
        .find(|e| e.action.changes_listing_state() && !e.is_undone())
    {
        return Err(ReconError::Superseded { id, by: newer.id });
    }

    let offer = offers::find_offer_by_url(&mut *conn, &original.url).await?;
    match (&offer, entry.action.is_link()) {
        (None, true) => {
            return Err(ReconError::StateDiverged {
                id,
                detail: "no offer exists for the listing".to_string(),
            });
        }
        (Some(offer), true) if Some(offer.product_id) != entry.product_id => {
            return Err(ReconError::StateDiverged {
                id,
                detail: format!("offer {} now belongs to product {}", offer.id, offer.product_id),
            });
        }
        (Some(offer), false) => {
            return Err(ReconError::StateDiverged {
                id,
                detail: format!("listing is linked as offer {}", offer.id),
            });
        }
        _ => {}
    }

    let now = Utc::now();
    let mut removed_offer = false;

    if let Some(offer) = offer {
        removed_offer = offers::delete_offer(&mut *conn, offer.id).await?;
        aliases::delete_alias(&mut *conn, &original.url).await?;
    }
    if entry.action == HistoryAction::Discarded {
        blacklist::remove_rejected(&mut *conn, &original.url).await?;
    }

    let pending = upsert_pending(&mut *conn, &PendingDraft::new(original.clone()), now).await?;

    if !history::mark_undone(&mut *conn, id, now).await? {
        // Lost a race with another undo of the same entry
        return Err(ReconError::UndoAlreadyApplied(id));
    }

    let mut undo = NewHistoryEntry::for_record(HistoryAction::Undone, &original)
        .info(format!("Reverted {} #{}", entry.action, id));
    undo.product_id = entry.product_id;
    undo.product_name = entry.product_name.as_deref();
    undo.reverts_entry_id = Some(id);
    let undo_entry_id = insert_history(&mut *conn, &undo, now).await?;

    Ok((
        UndoReport {
            entry_id: id,
            action: entry.action,
            undo_entry_id,
            pending_id: pending.id(),
            removed_offer,
        },
        original.url,
    ))
}
