//! Price snapshot operations (append-only)

use crate::error::ReconResult;
use chrono::{DateTime, Utc};
use oraculo_common::time;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub id: i64,
    pub offer_id: i64,
    pub price: f64,
    pub recorded_at: DateTime<Utc>,
    /// True for periodic samples of an unchanged price
    pub is_snapshot: bool,
}

fn snapshot_from_row(row: &SqliteRow) -> ReconResult<PriceSnapshot> {
    let recorded_at: String = row.get("recorded_at");
    Ok(PriceSnapshot {
        id: row.get("id"),
        offer_id: row.get("offer_id"),
        price: row.get("price"),
        recorded_at: time::from_db(&recorded_at)?,
        is_snapshot: row.get::<i64, _>("is_snapshot") != 0,
    })
}

pub async fn insert_snapshot(
    conn: &mut SqliteConnection,
    offer_id: i64,
    price: f64,
    recorded_at: DateTime<Utc>,
    is_snapshot: bool,
) -> ReconResult<i64> {
    let result = sqlx::query(
        "INSERT INTO price_snapshots (offer_id, price, recorded_at, is_snapshot) VALUES (?, ?, ?, ?)",
    )
    .bind(offer_id)
    .bind(price)
    .bind(time::to_db(&recorded_at))
    .bind(is_snapshot)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Most recent row for an offer
pub async fn last_snapshot(
    conn: &mut SqliteConnection,
    offer_id: i64,
) -> ReconResult<Option<PriceSnapshot>> {
    let row = sqlx::query(
        r#"
        SELECT id, offer_id, price, recorded_at, is_snapshot
        FROM price_snapshots
        WHERE offer_id = ?
        ORDER BY recorded_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(offer_id)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(snapshot_from_row).transpose()
}

/// Full history for an offer, oldest first
pub async fn list_snapshots(conn: &mut SqliteConnection, offer_id: i64) -> ReconResult<Vec<PriceSnapshot>> {
    let rows = sqlx::query(
        r#"
        SELECT id, offer_id, price, recorded_at, is_snapshot
        FROM price_snapshots
        WHERE offer_id = ?
        ORDER BY recorded_at, id
        "#,
    )
    .bind(offer_id)
    .fetch_all(conn)
    .await?;

    rows.iter().map(snapshot_from_row).collect()
}
