//! Audit ledger types

use crate::models::{ScrapedRecord, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Verb recorded by a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    /// Manual match from Purgatory
    Linked,
    /// Automatic match by the resolver
    SmartMatch,
    /// Listing parked for review
    Purgatory,
    /// Sentinel blocked a sighting of an existing offer
    Flagged,
    /// Existing offer changed price
    PriceChanged,
    Unlinked,
    Discarded,
    Purged,
    Relinked,
    /// Compensating entry appended by an undo
    Undone,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Linked => "LINKED",
            HistoryAction::SmartMatch => "SMART_MATCH",
            HistoryAction::Purgatory => "PURGATORY",
            HistoryAction::Flagged => "FLAGGED",
            HistoryAction::PriceChanged => "PRICE_CHANGED",
            HistoryAction::Unlinked => "UNLINKED",
            HistoryAction::Discarded => "DISCARDED",
            HistoryAction::Purged => "PURGED",
            HistoryAction::Relinked => "RELINKED",
            HistoryAction::Undone => "UNDONE",
        }
    }

    /// Whether undo can restore the Purgatory entry this action consumed
    pub fn is_undoable(&self) -> bool {
        matches!(
            self,
            HistoryAction::Linked
                | HistoryAction::SmartMatch
                | HistoryAction::Relinked
                | HistoryAction::Discarded
                | HistoryAction::Purged
        )
    }

    /// Whether this action moved the listing between link, Purgatory and blacklist
    pub fn changes_listing_state(&self) -> bool {
        self.is_undoable() || *self == HistoryAction::Unlinked
    }

    /// Whether this action produced a confirmed link
    pub fn is_link(&self) -> bool {
        matches!(
            self,
            HistoryAction::Linked | HistoryAction::SmartMatch | HistoryAction::Relinked
        )
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "LINKED" => HistoryAction::Linked,
            "SMART_MATCH" => HistoryAction::SmartMatch,
            "PURGATORY" => HistoryAction::Purgatory,
            "FLAGGED" => HistoryAction::Flagged,
            "PRICE_CHANGED" => HistoryAction::PriceChanged,
            "UNLINKED" => HistoryAction::Unlinked,
            "DISCARDED" => HistoryAction::Discarded,
            "PURGED" => HistoryAction::Purged,
            "RELINKED" => HistoryAction::Relinked,
            "UNDONE" => HistoryAction::Undone,
            other => return Err(format!("unknown history action '{}'", other)),
        };
        Ok(action)
    }
}

/// The listing fields needed to rebuild a Purgatory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalRecord {
    pub name: String,
    pub ean: Option<String>,
    pub price: f64,
    pub currency: String,
    pub url: String,
    pub shop: String,
    pub image_url: Option<String>,
    pub source_kind: SourceKind,
}

impl From<&ScrapedRecord> for OriginalRecord {
    fn from(record: &ScrapedRecord) -> Self {
        Self {
            name: record.title.clone(),
            ean: record.ean.clone(),
            price: record.price,
            currency: record.currency.clone(),
            url: record.url.clone(),
            shop: record.shop.clone(),
            image_url: record.image_url.clone(),
            source_kind: record.source_kind,
        }
    }
}

/// A stored ledger entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub action: HistoryAction,
    pub offer_url: String,
    pub product_id: Option<i64>,
    pub product_name: Option<String>,
    pub shop: Option<String>,
    pub price: Option<f64>,
    pub original: Option<OriginalRecord>,
    pub info: Option<String>,
    pub created_at: DateTime<Utc>,
    pub undone_at: Option<DateTime<Utc>>,
    pub reverts_entry_id: Option<i64>,
}

impl HistoryEntry {
    pub fn is_undone(&self) -> bool {
        self.undone_at.is_some()
    }
}
