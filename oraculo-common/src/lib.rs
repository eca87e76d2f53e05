//! # Oraculo Common Library
//!
//! Shared code for the Oraculo reconciliation workspace:
//! - Error type used by the storage and configuration layers
//! - Database bootstrap (schema creation, pragmas, schema version)
//! - Configuration file and data folder discovery
//! - Event bus for reconciliation events
//! - Timestamp helpers for the RFC 3339 text columns

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
