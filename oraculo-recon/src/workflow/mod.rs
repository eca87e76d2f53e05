//! Batch reconciliation workflow

pub mod price_tracker;
pub mod producers;
pub mod reconcile;
pub mod storage;

pub use producers::{gather, run_sources, JsonFileProducer, RecordProducer, SourceBatch, SourceReport};
pub use reconcile::{BatchResult, CatalogSnapshot, Reconciler, RecordError};
