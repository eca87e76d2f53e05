//! oraculo-recon library interface
//!
//! Entity resolution and reconciliation of scraped product listings against
//! the catalog. The binary is a thin CLI over [`ReconContext`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod workflow;

pub use crate::error::{ReconError, ReconResult};

use crate::config::ReconConfig;
use crate::services::{
    AnomalySentinel, AuditLedger, DealNotifier, ManualResolution, NotificationThrottle, Resolver,
    TokenNormalizer, WeightModel,
};
use crate::workflow::Reconciler;
use chrono::{DateTime, Utc};
use oraculo_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Engine state shared by every entry point
///
/// Owns the injected stores (weight table, throttle map) and the single
/// write lock that serializes batch commits and manual actions.
#[derive(Clone)]
pub struct ReconContext {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub config: Arc<ReconConfig>,
    pub normalizer: Arc<TokenNormalizer>,
    pub weights: Arc<WeightModel>,
    pub resolver: Arc<Resolver>,
    pub sentinel: Arc<AnomalySentinel>,
    pub throttle: Arc<NotificationThrottle>,
    pub write_lock: Arc<Mutex<()>>,
    /// Stop flag checked between records and between sources
    pub cancel: CancellationToken,
    pub startup_time: DateTime<Utc>,
}

impl ReconContext {
    pub fn new(db: SqlitePool, event_bus: EventBus, config: ReconConfig) -> Self {
        let normalizer = Arc::new(TokenNormalizer::new(&config.vocabulary));
        let weights = Arc::new(WeightModel::new(
            Arc::clone(&normalizer),
            config.matching.identity_weight,
        ));
        let resolver = Arc::new(Resolver::new(Arc::clone(&normalizer), config.matching.clone()));
        let sentinel = Arc::new(AnomalySentinel::new(&config.sentinel));

        Self {
            db,
            event_bus,
            config: Arc::new(config),
            normalizer,
            weights,
            resolver,
            sentinel,
            throttle: Arc::new(NotificationThrottle::new()),
            write_lock: Arc::new(Mutex::new(())),
            cancel: CancellationToken::new(),
            startup_time: Utc::now(),
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.db.clone(),
            Arc::clone(&self.resolver),
            Arc::clone(&self.weights),
            Arc::clone(&self.sentinel),
            self.notifier(),
            self.event_bus.clone(),
            self.config.pricing.clone(),
            Arc::clone(&self.write_lock),
            self.cancel.clone(),
        )
    }

    pub fn notifier(&self) -> DealNotifier {
        DealNotifier::new(
            self.event_bus.clone(),
            Arc::clone(&self.throttle),
            self.config.notifications.clone(),
        )
    }

    pub fn ledger(&self) -> AuditLedger {
        AuditLedger::new(self.db.clone(), self.event_bus.clone(), Arc::clone(&self.write_lock))
    }

    pub fn manual(&self) -> ManualResolution {
        ManualResolution::new(
            self.db.clone(),
            Arc::clone(&self.resolver),
            Arc::clone(&self.weights),
            Arc::clone(&self.sentinel),
            Arc::clone(&self.write_lock),
        )
    }

    /// Rebuild the weight table from the stored catalog
    pub async fn refresh_weights(&self) -> ReconResult<Arc<services::WeightTable>> {
        self.weights.refresh(&self.db).await
    }

    pub async fn recompute_price_statistics(&self) -> ReconResult<usize> {
        services::recompute_price_statistics(&self.db, &self.write_lock).await
    }
}
