//! Database operations for oraculo-recon
//!
//! Every function takes a `&mut SqliteConnection` so the same code runs on a
//! pooled connection or inside a batch transaction (`&mut *tx`).

pub mod aliases;
pub mod blacklist;
pub mod history;
pub mod offers;
pub mod pending;
pub mod products;
pub mod snapshots;

use crate::error::{ReconError, ReconResult};
use oraculo_common::Error;
use std::str::FromStr;

/// Parse an enum stored as text
pub(crate) fn parse_column<T>(value: &str) -> ReconResult<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| ReconError::Common(Error::Internal(e)))
}

/// Decode an anomaly flag list stored as a JSON array
pub(crate) fn flags_from_json(value: &str) -> ReconResult<Vec<String>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(value)?)
}

pub(crate) fn flags_to_json(flags: &[String]) -> ReconResult<String> {
    Ok(serde_json::to_string(flags)?)
}
