//! Producer records and the small enums stored alongside them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a listing was found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    #[default]
    Retail,
    #[serde(rename = "Peer-to-Peer", alias = "P2P")]
    PeerToPeer,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Retail => "Retail",
            SourceKind::PeerToPeer => "Peer-to-Peer",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Retail" => Ok(SourceKind::Retail),
            "Peer-to-Peer" | "P2P" => Ok(SourceKind::PeerToPeer),
            other => Err(format!("unknown source kind '{}'", other)),
        }
    }
}

/// Trust level of an offer or pending entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    /// Price checked against a reference and found plausible
    Verified,
    /// No reference price to check against
    Unverified,
    /// Waiting for a human decision
    Pending,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Verified => "Verified",
            ValidationStatus::Unverified => "Unverified",
            ValidationStatus::Pending => "Pending",
        }
    }
}

impl FromStr for ValidationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Verified" => Ok(ValidationStatus::Verified),
            "Unverified" => Ok(ValidationStatus::Unverified),
            "Pending" => Ok(ValidationStatus::Pending),
            other => Err(format!("unknown validation status '{}'", other)),
        }
    }
}

/// One listing as delivered by a producer
///
/// Immutable input unit; only ever persisted inside history snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedRecord {
    pub shop: String,
    pub title: String,
    pub price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub url: String,
    pub is_available: bool,
    #[serde(default)]
    pub ean: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub source_kind: SourceKind,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

fn default_currency() -> String {
    "EUR".to_string()
}

impl ScrapedRecord {
    /// Minimal retail record, available, priced in EUR
    pub fn new(shop: &str, title: &str, price: f64, url: &str) -> Self {
        Self {
            shop: shop.to_string(),
            title: title.to_string(),
            price,
            currency: default_currency(),
            url: url.to_string(),
            is_available: true,
            ean: None,
            image_url: None,
            source_kind: SourceKind::Retail,
            captured_at: None,
        }
    }

    pub fn with_ean(mut self, ean: &str) -> Self {
        self.ean = Some(ean.to_string());
        self
    }

    pub fn with_source_kind(mut self, kind: SourceKind) -> Self {
        self.source_kind = kind;
        self
    }

    /// Check the producer contract: title, url and shop present, price > 0
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("missing title".to_string());
        }
        if self.url.trim().is_empty() {
            return Err("missing url".to_string());
        }
        if self.shop.trim().is_empty() {
            return Err("missing shop".to_string());
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(format!("price must be positive, got {}", self.price));
        }
        Ok(())
    }
}
