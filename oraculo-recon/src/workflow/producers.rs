//! Producer gathering
//!
//! Producers (site scrapers, file loaders) run concurrently, each under its
//! own timeout. Their batches are then reconciled one at a time against a
//! single catalog snapshot, so only the fetch phase is parallel.

use crate::error::{ReconError, ReconResult};
use crate::models::ScrapedRecord;
use crate::workflow::reconcile::{BatchResult, CatalogSnapshot, Reconciler};
use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Source of scraped records
#[async_trait]
pub trait RecordProducer: Send + Sync {
    /// Stable name used in logs and reports
    fn name(&self) -> &str;

    /// Fetch one batch; long fetches should watch `cancel`
    async fn fetch(&self, cancel: &CancellationToken) -> anyhow::Result<Vec<ScrapedRecord>>;
}

/// Records read from a JSON array on disk
pub struct JsonFileProducer {
    name: String,
    path: PathBuf,
}

impl JsonFileProducer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Self { name, path }
    }
}

#[async_trait]
impl RecordProducer for JsonFileProducer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _cancel: &CancellationToken) -> anyhow::Result<Vec<ScrapedRecord>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let records = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(records)
    }
}

/// Records fetched from one producer
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: String,
    pub records: Vec<ScrapedRecord>,
}

/// Fetch from every producer concurrently
///
/// Failed or timed-out producers are logged and left out; they never cancel
/// their siblings.
pub async fn gather(
    producers: &[Arc<dyn RecordProducer>],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Vec<SourceBatch> {
    let fetches = producers.iter().map(|producer| async move {
        let name = producer.name().to_string();
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, producer.fetch(cancel)) => Some(result),
        };

        match fetched {
            None => {
                info!(source = %name, "Fetch cancelled");
                None
            }
            Some(Err(_)) => {
                warn!(source = %name, timeout_secs = timeout.as_secs(), "Producer timed out");
                None
            }
            Some(Ok(Err(e))) => {
                error!(source = %name, error = %e, "Producer failed");
                None
            }
            Some(Ok(Ok(records))) => {
                info!(source = %name, records = records.len(), "Producer fetched");
                Some(SourceBatch {
                    source: name,
                    records,
                })
            }
        }
    });

    join_all(fetches).await.into_iter().flatten().collect()
}

/// Outcome for one source in a run
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub result: Option<BatchResult>,
    /// Why the batch was not applied
    pub skipped: Option<String>,
}

/// Gather all producers, then reconcile each batch serially
///
/// An empty batch trips the circuit breaker for that source only. A
/// persistence failure stops the run; earlier sources stay committed.
pub async fn run_sources(
    reconciler: &Reconciler,
    producers: &[Arc<dyn RecordProducer>],
    timeout: Duration,
) -> ReconResult<Vec<SourceReport>> {
    let cancel = reconciler.cancellation_token().clone();
    let batches = gather(producers, timeout, &cancel).await;
    let catalog = CatalogSnapshot::load(reconciler.pool()).await?;
    info!(
        sources = batches.len(),
        products = catalog.len(),
        "Catalog snapshot loaded for run"
    );

    let mut reports = Vec::with_capacity(batches.len());
    for batch in batches {
        if cancel.is_cancelled() {
            info!("Run cancelled between sources");
            break;
        }

        match reconciler.reconcile_with_catalog(&catalog, &batch.records).await {
            Ok(result) => reports.push(SourceReport {
                source: batch.source,
                result: Some(result),
                skipped: None,
            }),
            Err(ReconError::EmptyBatch) => {
                warn!(source = %batch.source, "Source returned no records, circuit breaker engaged");
                reports.push(SourceReport {
                    source: batch.source,
                    result: None,
                    skipped: Some(ReconError::EmptyBatch.to_string()),
                });
            }
            Err(ReconError::Cancelled) => {
                reports.push(SourceReport {
                    source: batch.source,
                    result: None,
                    skipped: Some(ReconError::Cancelled.to_string()),
                });
                break;
            }
            Err(e) => {
                error!(source = %batch.source, error = %e, "Batch rolled back");
                return Err(e);
            }
        }
    }

    Ok(reports)
}
