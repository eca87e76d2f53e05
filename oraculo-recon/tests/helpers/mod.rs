//! Test Helper Utilities
//!
//! Shared utilities for testing oraculo-recon

#![allow(dead_code)]

pub mod db_utils;

pub use db_utils::{
    count_rows, create_test_context, create_test_db, drain_events, seed_catalog, set_reference_prices,
};
