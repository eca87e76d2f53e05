//! Purgatory (pending record) operations

use crate::db::{flags_from_json, flags_to_json, parse_column};
use crate::error::ReconResult;
use crate::models::{OriginalRecord, SourceKind, ValidationStatus};
use chrono::{DateTime, Utc};
use oraculo_common::time;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

/// A listing waiting for a human decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingRecord {
    pub id: i64,
    pub scraped_name: String,
    pub ean: Option<String>,
    pub price: f64,
    pub currency: String,
    pub url: String,
    pub shop: String,
    pub image_url: Option<String>,
    pub source_kind: SourceKind,
    pub is_available: bool,
    pub captured_at: Option<DateTime<Utc>>,
    pub anomaly_flags: Vec<String>,
    pub is_blocked: bool,
    pub validation_status: ValidationStatus,
    pub found_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingRecord {
    pub fn original_record(&self) -> OriginalRecord {
        OriginalRecord {
            name: self.scraped_name.clone(),
            ean: self.ean.clone(),
            price: self.price,
            currency: self.currency.clone(),
            url: self.url.clone(),
            shop: self.shop.clone(),
            image_url: self.image_url.clone(),
            source_kind: self.source_kind,
        }
    }
}

/// Values to write into Purgatory for one URL
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDraft {
    pub original: OriginalRecord,
    pub is_available: bool,
    pub captured_at: Option<DateTime<Utc>>,
    pub anomaly_flags: Vec<String>,
    pub is_blocked: bool,
    pub validation_status: ValidationStatus,
}

impl PendingDraft {
    /// Unflagged draft awaiting review
    pub fn new(original: OriginalRecord) -> Self {
        Self {
            original,
            is_available: true,
            captured_at: None,
            anomaly_flags: Vec::new(),
            is_blocked: false,
            validation_status: ValidationStatus::Pending,
        }
    }
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingUpsert {
    Inserted(i64),
    /// Row existed; `changed` is false when every reviewed field was identical
    Updated { id: i64, changed: bool },
}

impl PendingUpsert {
    pub fn id(&self) -> i64 {
        match self {
            PendingUpsert::Inserted(id) | PendingUpsert::Updated { id, .. } => *id,
        }
    }

    /// Whether the ledger should hear about it
    pub fn is_material(&self) -> bool {
        !matches!(self, PendingUpsert::Updated { changed: false, .. })
    }
}

const PENDING_COLUMNS: &str = "id, scraped_name, ean, price, currency, url, shop, image_url, \
                               source_kind, is_available, captured_at, anomaly_flags, is_blocked, \
                               validation_status, found_at, updated_at";

fn pending_from_row(row: &SqliteRow) -> ReconResult<PendingRecord> {
    let source_kind: String = row.get("source_kind");
    let status: String = row.get("validation_status");
    let flags: String = row.get("anomaly_flags");
    let found_at: String = row.get("found_at");
    let updated_at: String = row.get("updated_at");

    Ok(PendingRecord {
        id: row.get("id"),
        scraped_name: row.get("scraped_name"),
        ean: row.get("ean"),
        price: row.get("price"),
        currency: row.get("currency"),
        url: row.get("url"),
        shop: row.get("shop"),
        image_url: row.get("image_url"),
        source_kind: parse_column(&source_kind)?,
        is_available: row.get::<i64, _>("is_available") != 0,
        captured_at: time::from_db_opt(row.get("captured_at"))?,
        anomaly_flags: flags_from_json(&flags)?,
        is_blocked: row.get::<i64, _>("is_blocked") != 0,
        validation_status: parse_column(&status)?,
        found_at: time::from_db(&found_at)?,
        updated_at: time::from_db(&updated_at)?,
    })
}

pub async fn find_pending_by_url(
    conn: &mut SqliteConnection,
    url: &str,
) -> ReconResult<Option<PendingRecord>> {
    let sql = format!("SELECT {} FROM pending_records WHERE url = ?", PENDING_COLUMNS);
    let row = sqlx::query(&sql).bind(url).fetch_optional(conn).await?;
    row.as_ref().map(pending_from_row).transpose()
}

pub async fn load_pending(conn: &mut SqliteConnection, id: i64) -> ReconResult<Option<PendingRecord>> {
    let sql = format!("SELECT {} FROM pending_records WHERE id = ?", PENDING_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
    row.as_ref().map(pending_from_row).transpose()
}

/// Whole Purgatory queue, oldest first
pub async fn list_pending(conn: &mut SqliteConnection) -> ReconResult<Vec<PendingRecord>> {
    let sql = format!("SELECT {} FROM pending_records ORDER BY found_at, id", PENDING_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(conn).await?;
    rows.iter().map(pending_from_row).collect()
}

/// Insert or refresh the Purgatory entry for a URL
///
/// `found_at` is kept from the first sighting.
pub async fn upsert_pending(
    conn: &mut SqliteConnection,
    draft: &PendingDraft,
    now: DateTime<Utc>,
) -> ReconResult<PendingUpsert> {
    let record = &draft.original;
    let flags = flags_to_json(&draft.anomaly_flags)?;
    let now = time::to_db(&now);

    if let Some(existing) = find_pending_by_url(&mut *conn, &record.url).await? {
        let changed = existing.scraped_name != record.name
            || existing.ean != record.ean
            || (existing.price - record.price).abs() > f64::EPSILON
            || existing.currency != record.currency
            || existing.shop != record.shop
            || existing.image_url != record.image_url
            || existing.source_kind != record.source_kind
            || existing.is_available != draft.is_available
            || existing.anomaly_flags != draft.anomaly_flags
            || existing.is_blocked != draft.is_blocked
            || existing.validation_status != draft.validation_status;

        sqlx::query(
            r#"
            UPDATE pending_records
            SET scraped_name = ?, ean = ?, price = ?, currency = ?, shop = ?, image_url = ?,
                source_kind = ?, is_available = ?, captured_at = ?, anomaly_flags = ?,
                is_blocked = ?, validation_status = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.name)
        .bind(&record.ean)
        .bind(record.price)
        .bind(&record.currency)
        .bind(&record.shop)
        .bind(&record.image_url)
        .bind(record.source_kind.as_str())
        .bind(draft.is_available)
        .bind(draft.captured_at.as_ref().map(time::to_db))
        .bind(&flags)
        .bind(draft.is_blocked)
        .bind(draft.validation_status.as_str())
        .bind(&now)
        .bind(existing.id)
        .execute(&mut *conn)
        .await?;

        return Ok(PendingUpsert::Updated {
            id: existing.id,
            changed,
        });
    }

    let result = sqlx::query(
        r#"
        INSERT INTO pending_records (
            scraped_name, ean, price, currency, url, shop, image_url, source_kind,
            is_available, captured_at, anomaly_flags, is_blocked, validation_status,
            found_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.name)
    .bind(&record.ean)
    .bind(record.price)
    .bind(&record.currency)
    .bind(&record.url)
    .bind(&record.shop)
    .bind(&record.image_url)
    .bind(record.source_kind.as_str())
    .bind(draft.is_available)
    .bind(draft.captured_at.as_ref().map(time::to_db))
    .bind(&flags)
    .bind(draft.is_blocked)
    .bind(draft.validation_status.as_str())
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    Ok(PendingUpsert::Inserted(result.last_insert_rowid()))
}

pub async fn delete_pending(conn: &mut SqliteConnection, id: i64) -> ReconResult<bool> {
    let result = sqlx::query("DELETE FROM pending_records WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_pending_by_url(conn: &mut SqliteConnection, url: &str) -> ReconResult<bool> {
    let result = sqlx::query("DELETE FROM pending_records WHERE url = ?")
        .bind(url)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
