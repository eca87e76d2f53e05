//! Database initialization tests

use oraculo_common::db::{get_schema_version, init_database, init_memory_database, CURRENT_SCHEMA_VERSION};
use sqlx::Row;
use tempfile::TempDir;

const EXPECTED_TABLES: &[&str] = &[
    "confirmed_aliases",
    "history_entries",
    "offers",
    "pending_records",
    "price_snapshots",
    "products",
    "rejected_urls",
    "schema_version",
];

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("oraculo.db");
    assert!(!db_path.exists());

    let pool = init_database(&db_path).await.expect("init should create file");
    assert!(db_path.exists(), "Database file was not created");

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(tables, EXPECTED_TABLES);
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("oraculo.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query(
        "INSERT INTO products (name, created_at, updated_at) VALUES ('Skeletor', 'x', 'x')",
    )
    .execute(&pool1)
    .await
    .unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await.expect("reopen should succeed");
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(count, 1, "Existing rows must survive re-initialization");
    assert_eq!(get_schema_version(&pool2).await.unwrap(), CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn test_foreign_keys_cascade_snapshots() {
    let pool = init_memory_database().await.unwrap();

    sqlx::query("INSERT INTO products (id, name, created_at, updated_at) VALUES (1, 'He-Man', 't', 't')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO offers (id, product_id, shop, url, price, first_seen_at, last_seen_at) \
         VALUES (1, 1, 'ShopA', 'https://a.example/he-man', 20.0, 't', 't')",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO price_snapshots (offer_id, price, recorded_at) VALUES (1, 20.0, 't')")
        .execute(&pool)
        .await
        .unwrap();

    sqlx::query("DELETE FROM offers WHERE id = 1")
        .execute(&pool)
        .await
        .unwrap();

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_snapshots")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn test_offer_urls_are_unique() {
    let pool = init_memory_database().await.unwrap();
    sqlx::query("INSERT INTO products (id, name, created_at, updated_at) VALUES (1, 'Beast Man', 't', 't')")
        .execute(&pool)
        .await
        .unwrap();

    let insert = "INSERT INTO offers (product_id, shop, url, price, first_seen_at, last_seen_at) \
                  VALUES (1, 'ShopA', 'https://a.example/beast', 10.0, 't', 't')";
    sqlx::query(insert).execute(&pool).await.unwrap();
    assert!(sqlx::query(insert).execute(&pool).await.is_err());
}

#[tokio::test]
async fn test_migration_adds_missing_columns_to_old_layout() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("old.db");

    // First-release layout: no last_price_update, no p25_price, unstamped
    {
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = sqlx::SqlitePool::connect(&url).await.unwrap();
        sqlx::query(
            "CREATE TABLE products (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, ean TEXT, \
             sub_series TEXT, image_hash TEXT, avg_retail_price REAL NOT NULL DEFAULT 0.0, \
             avg_p2p_price REAL NOT NULL DEFAULT 0.0, avg_market_price REAL NOT NULL DEFAULT 0.0, \
             created_at TEXT NOT NULL, updated_at TEXT NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE offers (id INTEGER PRIMARY KEY AUTOINCREMENT, product_id INTEGER NOT NULL, \
             shop TEXT NOT NULL, url TEXT NOT NULL UNIQUE, price REAL NOT NULL, \
             currency TEXT NOT NULL DEFAULT 'EUR', min_price REAL NOT NULL DEFAULT 0.0, \
             max_price REAL NOT NULL DEFAULT 0.0, is_available INTEGER NOT NULL DEFAULT 1, \
             source_kind TEXT NOT NULL DEFAULT 'Retail', validation_status TEXT NOT NULL DEFAULT 'Verified', \
             anomaly_flags TEXT NOT NULL DEFAULT '[]', is_blocked INTEGER NOT NULL DEFAULT 0, \
             first_seen_at TEXT NOT NULL, last_seen_at TEXT NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
    }

    let pool = init_database(&db_path).await.unwrap();
    let columns: Vec<String> = sqlx::query("SELECT name FROM pragma_table_info('offers')")
        .fetch_all(&pool)
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();
    assert!(columns.contains(&"last_price_update".to_string()));

    let has_p25: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info('products') WHERE name = 'p25_price'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(has_p25, 1);
    assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
}
