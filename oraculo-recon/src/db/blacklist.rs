//! Rejected URL ("blacklist") operations

use crate::db::parse_column;
use crate::error::ReconResult;
use crate::models::SourceKind;
use chrono::{DateTime, Utc};
use oraculo_common::time;
use sqlx::{Row, SqliteConnection};

/// Permanent negative cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedUrl {
    pub id: i64,
    pub url: String,
    pub scraped_name: Option<String>,
    pub reason: String,
    pub source_kind: Option<SourceKind>,
    pub created_at: DateTime<Utc>,
}

pub async fn is_blacklisted(conn: &mut SqliteConnection, url: &str) -> ReconResult<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM rejected_urls WHERE url = ?)")
            .bind(url)
            .fetch_one(conn)
            .await?;
    Ok(exists)
}

pub async fn find_rejected(conn: &mut SqliteConnection, url: &str) -> ReconResult<Option<RejectedUrl>> {
    let row = sqlx::query(
        "SELECT id, url, scraped_name, reason, source_kind, created_at FROM rejected_urls WHERE url = ?",
    )
    .bind(url)
    .fetch_optional(conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let source_kind: Option<String> = row.get("source_kind");
    let created_at: String = row.get("created_at");
    Ok(Some(RejectedUrl {
        id: row.get("id"),
        url: row.get("url"),
        scraped_name: row.get("scraped_name"),
        reason: row.get("reason"),
        source_kind: source_kind.as_deref().map(parse_column::<SourceKind>).transpose()?,
        created_at: time::from_db(&created_at)?,
    }))
}

/// Blacklist a URL; re-rejecting only refreshes the reason
pub async fn insert_rejected(
    conn: &mut SqliteConnection,
    url: &str,
    scraped_name: &str,
    reason: &str,
    source_kind: SourceKind,
    now: DateTime<Utc>,
) -> ReconResult<()> {
    sqlx::query(
        r#"
        INSERT INTO rejected_urls (url, scraped_name, reason, source_kind, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(url) DO UPDATE SET reason = excluded.reason
        "#,
    )
    .bind(url)
    .bind(scraped_name)
    .bind(reason)
    .bind(source_kind.as_str())
    .bind(time::to_db(&now))
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn remove_rejected(conn: &mut SqliteConnection, url: &str) -> ReconResult<bool> {
    let result = sqlx::query("DELETE FROM rejected_urls WHERE url = ?")
        .bind(url)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
