//! Multi-table writes shared by the reconciler and manual resolution
//!
//! Each helper performs one state transition and appends its history entry
//! on the caller's connection, so both land in the caller's transaction.

use crate::db::history::{insert_history, NewHistoryEntry};
use crate::db::pending::{upsert_pending, PendingDraft, PendingUpsert};
use crate::db::products::Product;
use crate::db::{aliases, offers, pending, snapshots};
use crate::error::ReconResult;
use crate::models::{HistoryAction, OriginalRecord, ValidationStatus};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

/// Confirm a listing as an offer of `product`
///
/// Creates the offer with its first price snapshot, confirms the alias and
/// clears any Purgatory entry for the URL.
#[allow(clippy::too_many_arguments)]
pub async fn create_link(
    conn: &mut SqliteConnection,
    product: &Product,
    original: &OriginalRecord,
    is_available: bool,
    status: ValidationStatus,
    action: HistoryAction,
    info: String,
    now: DateTime<Utc>,
) -> ReconResult<i64> {
    let offer_id =
        offers::insert_offer(&mut *conn, product.id, original, is_available, status, now).await?;
    snapshots::insert_snapshot(&mut *conn, offer_id, original.price, now, false).await?;
    aliases::upsert_alias(&mut *conn, &original.url, product.id, now).await?;
    if pending::delete_pending_by_url(&mut *conn, &original.url).await? {
        debug!(url = %original.url, "Cleared Purgatory entry for newly linked URL");
    }

    let entry = NewHistoryEntry::for_record(action, original)
        .product(product.id, &product.name)
        .info(info);
    insert_history(&mut *conn, &entry, now).await?;

    Ok(offer_id)
}

/// Put a listing in Purgatory
///
/// Logged only when the entry is new or something reviewable changed, so
/// re-running a batch leaves the ledger untouched.
pub async fn park_pending(
    conn: &mut SqliteConnection,
    draft: &PendingDraft,
    info: String,
    now: DateTime<Utc>,
) -> ReconResult<PendingUpsert> {
    let upsert = upsert_pending(&mut *conn, draft, now).await?;
    if upsert.is_material() {
        let entry = NewHistoryEntry::for_record(HistoryAction::Purgatory, &draft.original).info(info);
        insert_history(&mut *conn, &entry, now).await?;
    }
    Ok(upsert)
}
