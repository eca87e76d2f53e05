//! Error types for oraculo-recon
//!
//! Only batch-level and manual-action failures are errors. A listing that
//! fails to match is a normal outcome and is reported through
//! [`RecordIssue`] / [`RejectReason`] values instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for engine operations
pub type ReconResult<T> = std::result::Result<T, ReconError>;

/// Hard failures surfaced to the caller
#[derive(Debug, Error)]
pub enum ReconError {
    /// Database failure; the surrounding transaction was rolled back
    #[error("Persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Empty input batch, refused before touching any state
    #[error("Empty batch: nothing to reconcile, catalog left untouched")]
    EmptyBatch,

    /// Stop flag raised mid-batch; nothing from the batch was committed
    #[error("Reconciliation cancelled")]
    Cancelled,

    /// History entry was already reverted
    #[error("History entry {0} has already been undone")]
    UndoAlreadyApplied(i64),

    /// History entry records an action that cannot be reverted
    #[error("History entry {id} ({action}) cannot be undone")]
    NotUndoable { id: i64, action: String },

    /// A later action on the same listing replaced this entry's outcome
    #[error("History entry {id} was superseded by entry {by}")]
    Superseded { id: i64, by: i64 },

    /// The tables no longer hold what the entry left behind
    #[error("History entry {id} no longer matches stored state: {detail}")]
    StateDiverged { id: i64, detail: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored history snapshot could not be (de)serialized
    #[error("History snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] oraculo_common::Error),
}

/// Why a single catalog candidate was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Both sides carry valid, different EAN-13 codes
    EanMismatch,
    /// A rare catalog token has no counterpart in the listing
    IdentityConflict,
    /// Both sides name a series and the series sets are disjoint
    SeriesConflict,
    /// The catalog names a series the listing never mentions
    SeriesMissing,
    /// Ordinary catalog tokens missing from the listing
    MissingTokens,
    /// Weighted coverage below the acceptance threshold
    InsufficientCoverage,
    /// Nothing left to compare after normalization
    NoTokens,
}

impl RejectReason {
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::EanMismatch => "EAN mismatch",
            RejectReason::IdentityConflict => "Identity conflict",
            RejectReason::SeriesConflict => "Series conflict",
            RejectReason::SeriesMissing => "Series missing",
            RejectReason::MissingTokens => "Missing tokens",
            RejectReason::InsufficientCoverage => "Insufficient coverage",
            RejectReason::NoTokens => "No tokens",
        }
    }
}

/// Per-record conditions reported in a batch result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordIssue {
    /// URL already seen earlier in the same batch
    DuplicateUrl,
    /// Required producer field missing or price not positive
    InvalidRecord,
    /// Matched, but the price was implausible; sent to Purgatory
    AnomalyBlocked,
    /// Several catalog entries matched equally well; sent to Purgatory
    AmbiguousTie,
}
