//! Confirmed link ("offer") operations

use crate::db::{flags_from_json, flags_to_json, parse_column};
use crate::error::ReconResult;
use crate::models::{OriginalRecord, SourceKind, ValidationStatus};
use chrono::{DateTime, Utc};
use oraculo_common::time;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

/// A listing URL confirmed to sell a catalog product
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Offer {
    pub id: i64,
    pub product_id: i64,
    pub shop: String,
    pub url: String,
    /// Listing title at the time of linking
    pub scraped_name: String,
    pub ean: Option<String>,
    pub image_url: Option<String>,
    pub price: f64,
    pub currency: String,
    pub min_price: f64,
    pub max_price: f64,
    pub is_available: bool,
    pub source_kind: SourceKind,
    pub validation_status: ValidationStatus,
    pub anomaly_flags: Vec<String>,
    pub is_blocked: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_price_update: Option<DateTime<Utc>>,
}

impl Offer {
    /// Listing fields as they would have been scraped, at the current price
    pub fn original_record(&self) -> OriginalRecord {
        OriginalRecord {
            name: if self.scraped_name.is_empty() {
                self.url.clone()
            } else {
                self.scraped_name.clone()
            },
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

/// Mutable state written on every sighting of a linked URL
#[derive(Debug, Clone, PartialEq)]
pub struct OfferSighting {
    pub price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub is_available: bool,
    pub validation_status: ValidationStatus,
    pub anomaly_flags: Vec<String>,
    pub is_blocked: bool,
    pub last_seen_at: DateTime<Utc>,
    pub last_price_update: Option<DateTime<Utc>>,
}

const OFFER_COLUMNS: &str = "id, product_id, shop, url, scraped_name, ean, image_url, price, \
                             currency, min_price, max_price, is_available, source_kind, \
                             validation_status, anomaly_flags, is_blocked, first_seen_at, \
                             last_seen_at, last_price_update";

fn offer_from_row(row: &SqliteRow) -> ReconResult<Offer> {
    let source_kind: String = row.get("source_kind");
    let status: String = row.get("validation_status");
    let flags: String = row.get("anomaly_flags");
    let first_seen: String = row.get("first_seen_at");
    let last_seen: String = row.get("last_seen_at");

    Ok(Offer {
        id: row.get("id"),
        product_id: row.get("product_id"),
        shop: row.get("shop"),
        url: row.get("url"),
        scraped_name: row.get("scraped_name"),
        ean: row.get("ean"),
        image_url: row.get("image_url"),
        price: row.get("price"),
        currency: row.get("currency"),
        min_price: row.get("min_price"),
        max_price: row.get("max_price"),
        is_available: row.get::<i64, _>("is_available") != 0,
        source_kind: parse_column(&source_kind)?,
        validation_status: parse_column(&status)?,
        anomaly_flags: flags_from_json(&flags)?,
        is_blocked: row.get::<i64, _>("is_blocked") != 0,
        first_seen_at: time::from_db(&first_seen)?,
        last_seen_at: time::from_db(&last_seen)?,
        last_price_update: time::from_db_opt(row.get("last_price_update"))?,
    })
}

/// Create an offer for a freshly linked listing
///
/// Running min/max start at the listing price.
pub async fn insert_offer(
    conn: &mut SqliteConnection,
    product_id: i64,
    record: &OriginalRecord,
    is_available: bool,
    status: ValidationStatus,
    now: DateTime<Utc>,
) -> ReconResult<i64> {
    let now = time::to_db(&now);
    let result = sqlx::query(
        r#"
        INSERT INTO offers (
            product_id, shop, url, scraped_name, ean, image_url, price, currency,
            min_price, max_price, is_available, source_kind, validation_status,
            anomaly_flags, is_blocked, first_seen_at, last_seen_at, last_price_update
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '[]', 0, ?, ?, ?)
        "#,
    )
    .bind(product_id)
    .bind(&record.shop)
    .bind(&record.url)
    .bind(&record.name)
    .bind(&record.ean)
    .bind(&record.image_url)
    .bind(record.price)
    .bind(&record.currency)
    .bind(record.price)
    .bind(record.price)
    .bind(is_available)
    .bind(record.source_kind.as_str())
    .bind(status.as_str())
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn find_offer_by_url(conn: &mut SqliteConnection, url: &str) -> ReconResult<Option<Offer>> {
    let sql = format!("SELECT {} FROM offers WHERE url = ?", OFFER_COLUMNS);
    let row = sqlx::query(&sql).bind(url).fetch_optional(conn).await?;
    row.as_ref().map(offer_from_row).transpose()
}

pub async fn load_offer(conn: &mut SqliteConnection, id: i64) -> ReconResult<Option<Offer>> {
    let sql = format!("SELECT {} FROM offers WHERE id = ?", OFFER_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
    row.as_ref().map(offer_from_row).transpose()
}

/// All offers, grouped by product
pub async fn load_all_offers(conn: &mut SqliteConnection) -> ReconResult<Vec<Offer>> {
    let sql = format!("SELECT {} FROM offers ORDER BY product_id, id", OFFER_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(conn).await?;
    rows.iter().map(offer_from_row).collect()
}

/// Write the state computed for a new sighting
pub async fn update_sighting(
    conn: &mut SqliteConnection,
    id: i64,
    sighting: &OfferSighting,
) -> ReconResult<()> {
    sqlx::query(
        r#"
        UPDATE offers
        SET price = ?, min_price = ?, max_price = ?, is_available = ?,
            validation_status = ?, anomaly_flags = ?, is_blocked = ?,
            last_seen_at = ?, last_price_update = ?
        WHERE id = ?
        "#,
    )
    .bind(sighting.price)
    .bind(sighting.min_price)
    .bind(sighting.max_price)
    .bind(sighting.is_available)
    .bind(sighting.validation_status.as_str())
    .bind(flags_to_json(&sighting.anomaly_flags)?)
    .bind(sighting.is_blocked)
    .bind(time::to_db(&sighting.last_seen_at))
    .bind(sighting.last_price_update.as_ref().map(time::to_db))
    .bind(id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Point an offer at a different product
pub async fn reassign_offer(conn: &mut SqliteConnection, id: i64, product_id: i64) -> ReconResult<()> {
    sqlx::query("UPDATE offers SET product_id = ? WHERE id = ?")
        .bind(product_id)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Delete an offer together with its price history
///
/// Returns false when the offer did not exist.
pub async fn delete_offer(conn: &mut SqliteConnection, id: i64) -> ReconResult<bool> {
    // Explicit so the cascade does not depend on the connection's FK pragma
    sqlx::query("DELETE FROM price_snapshots WHERE offer_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    let result = sqlx::query("DELETE FROM offers WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}
