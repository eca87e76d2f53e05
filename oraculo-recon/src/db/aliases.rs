//! Confirmed alias operations (URL -> product)

use crate::error::ReconResult;
use chrono::{DateTime, Utc};
use oraculo_common::time;
use sqlx::{Row, SqliteConnection};

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedAlias {
    pub id: i64,
    pub url: String,
    pub product_id: i64,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn find_alias(conn: &mut SqliteConnection, url: &str) -> ReconResult<Option<ConfirmedAlias>> {
    let row = sqlx::query(
        "SELECT id, url, product_id, confirmed, created_at FROM confirmed_aliases WHERE url = ?",
    )
    .bind(url)
    .fetch_optional(conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let created_at: String = row.get("created_at");
    Ok(Some(ConfirmedAlias {
        id: row.get("id"),
        url: row.get("url"),
        product_id: row.get("product_id"),
        confirmed: row.get::<i64, _>("confirmed") != 0,
        created_at: time::from_db(&created_at)?,
    }))
}

/// Confirm `url` as selling `product_id`, replacing any earlier target
pub async fn upsert_alias(
    conn: &mut SqliteConnection,
    url: &str,
    product_id: i64,
    now: DateTime<Utc>,
) -> ReconResult<()> {
    sqlx::query(
        r#"
        INSERT INTO confirmed_aliases (url, product_id, confirmed, created_at)
        VALUES (?, ?, 1, ?)
        ON CONFLICT(url) DO UPDATE SET product_id = excluded.product_id, confirmed = 1
        "#,
    )
    .bind(url)
    .bind(product_id)
    .bind(time::to_db(&now))
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn delete_alias(conn: &mut SqliteConnection, url: &str) -> ReconResult<bool> {
    let result = sqlx::query("DELETE FROM confirmed_aliases WHERE url = ?")
        .bind(url)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
