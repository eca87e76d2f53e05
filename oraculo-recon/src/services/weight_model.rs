//! Dynamic Weight Model
//!
//! IDF-style token weights over the current catalog. Rare tokens (a single
//! character's name) weigh close to 10, tokens shared by most of the catalog
//! (the product line) weigh close to 1.
//!
//! The table is immutable once built. `refresh` builds a new table off to the
//! side and swaps the `Arc` under a write lock, so readers holding a snapshot
//! keep a complete table for as long as they need it.

use crate::db::products::{load_catalog, Product};
use crate::error::ReconResult;
use crate::services::token_normalizer::TokenNormalizer;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

pub const MIN_WEIGHT: f64 = 1.0;
pub const MAX_WEIGHT: f64 = 10.0;

/// Immutable weight snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    weights: HashMap<String, f64>,
    corpus_size: usize,
    identity_threshold: f64,
}

impl WeightTable {
    /// Table with no known tokens; every lookup returns [`MIN_WEIGHT`]
    pub fn empty(identity_threshold: f64) -> Self {
        Self {
            weights: HashMap::new(),
            corpus_size: 0,
            identity_threshold,
        }
    }

    /// Count document frequencies over `name + sub_series` of every product
    pub fn build(products: &[Product], normalizer: &TokenNormalizer, identity_threshold: f64) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for product in products {
            for token in normalizer.normalize(&catalog_text(product)) {
                *doc_freq.entry(token).or_insert(0) += 1;
            }
        }

        let n = products.len();
        let max_idf = (n as f64).log10();
        let weights = doc_freq
            .into_iter()
            .map(|(token, df)| {
                let weight = if max_idf > 0.0 {
                    let idf = (n as f64 / df as f64).log10();
                    round2(MIN_WEIGHT + 9.0 * (idf / max_idf))
                } else {
                    MIN_WEIGHT
                };
                (token, weight.clamp(MIN_WEIGHT, MAX_WEIGHT))
            })
            .collect();

        Self {
            weights,
            corpus_size: n,
            identity_threshold,
        }
    }

    /// Weight of a token; unknown tokens are noise at [`MIN_WEIGHT`]
    pub fn weight(&self, token: &str) -> f64 {
        self.weights.get(token).copied().unwrap_or(MIN_WEIGHT)
    }

    pub fn is_known(&self, token: &str) -> bool {
        self.weights.contains_key(token)
    }

    /// Known and rarer than the identity threshold
    pub fn is_identity(&self, token: &str) -> bool {
        self.weights
            .get(token)
            .is_some_and(|w| *w > self.identity_threshold)
    }

    pub fn corpus_size(&self) -> usize {
        self.corpus_size
    }

    pub fn vocabulary_size(&self) -> usize {
        self.weights.len()
    }
}

/// Text a product contributes to the corpus and to matching
pub fn catalog_text(product: &Product) -> String {
    match product.sub_series.as_deref() {
        Some(sub) if !sub.is_empty() => format!("{} {}", product.name, sub),
        _ => product.name.clone(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Owner of the current [`WeightTable`]
pub struct WeightModel {
    normalizer: Arc<TokenNormalizer>,
    identity_threshold: f64,
    current: RwLock<Arc<WeightTable>>,
}

impl WeightModel {
    pub fn new(normalizer: Arc<TokenNormalizer>, identity_threshold: f64) -> Self {
        Self {
            normalizer,
            identity_threshold,
            current: RwLock::new(Arc::new(WeightTable::empty(identity_threshold))),
        }
    }

    /// Current table; cheap to clone and safe to hold across a whole batch
    pub fn snapshot(&self) -> Arc<WeightTable> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Rebuild from an in-memory catalog and swap it in
    pub fn rebuild(&self, products: &[Product]) -> Arc<WeightTable> {
        let table = Arc::new(WeightTable::build(
            products,
            &self.normalizer,
            self.identity_threshold,
        ));

        // Only the pointer swap happens under the lock
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&table),
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                *guard = Arc::clone(&table);
            }
        }

        info!(
            products = table.corpus_size(),
            tokens = table.vocabulary_size(),
            "Token weights rebuilt"
        );
        table
    }

    /// Reload the catalog from the database and rebuild
    pub async fn refresh(&self, pool: &SqlitePool) -> ReconResult<Arc<WeightTable>> {
        let mut conn = pool.acquire().await?;
        let products = load_catalog(&mut conn).await?;
        Ok(self.rebuild(&products))
    }
}
