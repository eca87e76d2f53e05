//! History entry operations
//!
//! Rows are never deleted. The only update is stamping `undone_at`, which
//! happens at most once per row.

use crate::db::parse_column;
use crate::error::ReconResult;
use crate::models::{HistoryAction, HistoryEntry, OriginalRecord};
use chrono::{DateTime, Utc};
use oraculo_common::time;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

/// Entry to append
#[derive(Debug, Clone)]
pub struct NewHistoryEntry<'a> {
    pub action: HistoryAction,
    pub offer_url: &'a str,
    pub product_id: Option<i64>,
    pub product_name: Option<&'a str>,
    pub shop: Option<&'a str>,
    pub price: Option<f64>,
    pub original: Option<&'a OriginalRecord>,
    pub info: Option<String>,
    pub reverts_entry_id: Option<i64>,
}

impl<'a> NewHistoryEntry<'a> {
    /// Entry carrying a listing snapshot; shop and price come from it
    pub fn for_record(action: HistoryAction, original: &'a OriginalRecord) -> Self {
        Self {
            action,
            offer_url: &original.url,
            product_id: None,
            product_name: None,
            shop: Some(&original.shop),
            price: Some(original.price),
            original: Some(original),
            info: None,
            reverts_entry_id: None,
        }
    }

    pub fn product(mut self, id: i64, name: &'a str) -> Self {
        self.product_id = Some(id);
        self.product_name = Some(name);
        self
    }

    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }
}

const HISTORY_COLUMNS: &str = "id, action, offer_url, product_id, product_name, shop, price, \
                               snapshot, info, created_at, undone_at, reverts_entry_id";

fn history_from_row(row: &SqliteRow) -> ReconResult<HistoryEntry> {
    let action: String = row.get("action");
    let snapshot: Option<String> = row.get("snapshot");
    let created_at: String = row.get("created_at");

    Ok(HistoryEntry {
        id: row.get("id"),
        action: parse_column(&action)?,
        offer_url: row.get("offer_url"),
        product_id: row.get("product_id"),
        product_name: row.get("product_name"),
        shop: row.get("shop"),
        price: row.get("price"),
        original: snapshot
            .as_deref()
            .map(serde_json::from_str::<OriginalRecord>)
            .transpose()?,
        info: row.get("info"),
        created_at: time::from_db(&created_at)?,
        undone_at: time::from_db_opt(row.get("undone_at"))?,
        reverts_entry_id: row.get("reverts_entry_id"),
    })
}

/// Append an entry, returning its id
pub async fn insert_history(
    conn: &mut SqliteConnection,
    entry: &NewHistoryEntry<'_>,
    now: DateTime<Utc>,
) -> ReconResult<i64> {
    let snapshot = entry.original.map(serde_json::to_string).transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO history_entries (
            action, offer_url, product_id, product_name, shop, price, snapshot, info,
            created_at, reverts_entry_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.action.as_str())
    .bind(entry.offer_url)
    .bind(entry.product_id)
    .bind(entry.product_name)
    .bind(entry.shop)
    .bind(entry.price)
    .bind(snapshot)
    .bind(&entry.info)
    .bind(time::to_db(&now))
    .bind(entry.reverts_entry_id)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn load_history(conn: &mut SqliteConnection, id: i64) -> ReconResult<Option<HistoryEntry>> {
    let sql = format!("SELECT {} FROM history_entries WHERE id = ?", HISTORY_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
    row.as_ref().map(history_from_row).transpose()
}

/// Newest entries first
pub async fn recent_history(conn: &mut SqliteConnection, limit: i64) -> ReconResult<Vec<HistoryEntry>> {
    let sql = format!(
        "SELECT {} FROM history_entries ORDER BY id DESC LIMIT ?",
        HISTORY_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(conn).await?;
    rows.iter().map(history_from_row).collect()
}

/// Entries touching one URL, oldest first
pub async fn history_for_url(conn: &mut SqliteConnection, url: &str) -> ReconResult<Vec<HistoryEntry>> {
    let sql = format!(
        "SELECT {} FROM history_entries WHERE offer_url = ? ORDER BY id",
        HISTORY_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(url).fetch_all(conn).await?;
    rows.iter().map(history_from_row).collect()
}

/// Entries touching one URL appended after `after_id`, oldest first
pub async fn history_for_url_after(
    conn: &mut SqliteConnection,
    url: &str,
    after_id: i64,
) -> ReconResult<Vec<HistoryEntry>> {
    let sql = format!(
        "SELECT {} FROM history_entries WHERE offer_url = ? AND id > ? ORDER BY id",
        HISTORY_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(url).bind(after_id).fetch_all(conn).await?;
    rows.iter().map(history_from_row).collect()
}

/// Stamp `undone_at`; false when the entry was already stamped
pub async fn mark_undone(conn: &mut SqliteConnection, id: i64, now: DateTime<Utc>) -> ReconResult<bool> {
    let result = sqlx::query(
        "UPDATE history_entries SET undone_at = ? WHERE id = ? AND undone_at IS NULL",
    )
    .bind(time::to_db(&now))
    .bind(id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}
