//! Catalog product operations
//!
//! Products are created by the external catalog sync. The engine only reads
//! them and rewrites their reference price statistics.

use crate::error::ReconResult;
use chrono::{DateTime, Utc};
use oraculo_common::time;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

/// Canonical catalog entity
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub ean: Option<String>,
    pub sub_series: Option<String>,
    pub image_hash: Option<String>,
    pub avg_retail_price: f64,
    pub avg_p2p_price: f64,
    /// Blended reference: retail average, else peer-to-peer average
    pub avg_market_price: f64,
    pub p25_price: f64,
}

/// Fields supplied by catalog sync
#[derive(Debug, Clone, Default)]
pub struct NewProduct {
    pub name: String,
    pub ean: Option<String>,
    pub sub_series: Option<String>,
    pub image_hash: Option<String>,
}

impl NewProduct {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Reference price statistics written by the recompute hook
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceStatistics {
    pub avg_retail_price: f64,
    pub avg_p2p_price: f64,
    pub avg_market_price: f64,
    pub p25_price: f64,
}

fn product_from_row(row: &SqliteRow) -> Product {
    Product {
        id: row.get("id"),
        name: row.get("name"),
        ean: row.get("ean"),
        sub_series: row.get("sub_series"),
        image_hash: row.get("image_hash"),
        avg_retail_price: row.get("avg_retail_price"),
        avg_p2p_price: row.get("avg_p2p_price"),
        avg_market_price: row.get("avg_market_price"),
        p25_price: row.get("p25_price"),
    }
}

const PRODUCT_COLUMNS: &str = "id, name, ean, sub_series, image_hash, avg_retail_price, \
                               avg_p2p_price, avg_market_price, p25_price";

/// Insert a catalog product, returning its id
pub async fn insert_product(conn: &mut SqliteConnection, product: &NewProduct) -> ReconResult<i64> {
    let now = time::to_db(&Utc::now());
    let result = sqlx::query(
        r#"
        INSERT INTO products (name, ean, sub_series, image_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&product.name)
    .bind(&product.ean)
    .bind(&product.sub_series)
    .bind(&product.image_hash)
    .bind(&now)
    .bind(&now)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Load the whole catalog ordered by id
pub async fn load_catalog(conn: &mut SqliteConnection) -> ReconResult<Vec<Product>> {
    let sql = format!("SELECT {} FROM products ORDER BY id", PRODUCT_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(conn).await?;
    Ok(rows.iter().map(product_from_row).collect())
}

/// Load one product
pub async fn load_product(conn: &mut SqliteConnection, id: i64) -> ReconResult<Option<Product>> {
    let sql = format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
    Ok(row.as_ref().map(product_from_row))
}

/// Overwrite a product's reference price statistics
pub async fn update_price_statistics(
    conn: &mut SqliteConnection,
    id: i64,
    stats: &PriceStatistics,
    now: DateTime<Utc>,
) -> ReconResult<()> {
    sqlx::query(
        r#"
        UPDATE products
        SET avg_retail_price = ?, avg_p2p_price = ?, avg_market_price = ?, p25_price = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(stats.avg_retail_price)
    .bind(stats.avg_p2p_price)
    .bind(stats.avg_market_price)
    .bind(stats.p25_price)
    .bind(time::to_db(&now))
    .bind(id)
    .execute(conn)
    .await?;

    Ok(())
}
