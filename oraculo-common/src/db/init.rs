//! Database initialization
//!
//! Creates the catalog database on first run and brings existing files up to
//! the current schema. Every table uses `CREATE TABLE IF NOT EXISTS`, so
//! opening the same file repeatedly is safe.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Milliseconds a writer waits on a locked database before failing
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas go on the connect options so every pooled connection gets them;
    // a one-off `PRAGMA foreign_keys = ON` only reaches a single connection.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema
///
/// The pool is capped at one connection because every `:memory:` connection
/// is a separate database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_products_table(pool).await?;
    create_offers_table(pool).await?;
    create_price_snapshots_table(pool).await?;
    create_pending_records_table(pool).await?;
    create_rejected_urls_table(pool).await?;
    create_confirmed_aliases_table(pool).await?;
    create_history_entries_table(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_products_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            ean TEXT,
            sub_series TEXT,
            image_hash TEXT,
            avg_retail_price REAL NOT NULL DEFAULT 0.0,
            avg_p2p_price REAL NOT NULL DEFAULT 0.0,
            avg_market_price REAL NOT NULL DEFAULT 0.0,
            p25_price REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_ean ON products(ean)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_offers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS offers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            shop TEXT NOT NULL,
            url TEXT NOT NULL UNIQUE,
            scraped_name TEXT NOT NULL DEFAULT '',
            ean TEXT,
            image_url TEXT,
            price REAL NOT NULL,
            currency TEXT NOT NULL DEFAULT 'EUR',
            min_price REAL NOT NULL DEFAULT 0.0,
            max_price REAL NOT NULL DEFAULT 0.0,
            is_available INTEGER NOT NULL DEFAULT 1,
            source_kind TEXT NOT NULL DEFAULT 'Retail',
            validation_status TEXT NOT NULL DEFAULT 'Verified',
            anomaly_flags TEXT NOT NULL DEFAULT '[]',
            is_blocked INTEGER NOT NULL DEFAULT 0,
            first_seen_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            last_price_update TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_offers_product ON offers(product_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_price_snapshots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS price_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            offer_id INTEGER NOT NULL REFERENCES offers(id) ON DELETE CASCADE,
            price REAL NOT NULL,
            recorded_at TEXT NOT NULL,
            is_snapshot INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_price_snapshots_offer ON price_snapshots(offer_id, recorded_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_pending_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scraped_name TEXT NOT NULL,
            ean TEXT,
            price REAL NOT NULL,
            currency TEXT NOT NULL DEFAULT 'EUR',
            url TEXT NOT NULL UNIQUE,
            shop TEXT NOT NULL,
            image_url TEXT,
            source_kind TEXT NOT NULL DEFAULT 'Retail',
            is_available INTEGER NOT NULL DEFAULT 1,
            captured_at TEXT,
            anomaly_flags TEXT NOT NULL DEFAULT '[]',
            is_blocked INTEGER NOT NULL DEFAULT 0,
            validation_status TEXT NOT NULL DEFAULT 'Pending',
            found_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_rejected_urls_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rejected_urls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            scraped_name TEXT,
            reason TEXT NOT NULL DEFAULT 'user_discarded',
            source_kind TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_confirmed_aliases_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS confirmed_aliases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            confirmed INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_history_entries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS history_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL,
            offer_url TEXT NOT NULL,
            product_id INTEGER,
            product_name TEXT,
            shop TEXT,
            price REAL,
            snapshot TEXT,
            info TEXT,
            created_at TEXT NOT NULL,
            undone_at TEXT,
            reverts_entry_id INTEGER REFERENCES history_entries(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_history_entries_created ON history_entries(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
