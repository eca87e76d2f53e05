//! Engine configuration
//!
//! Loaded from the TOML bootstrap file located by
//! [`oraculo_common::config::resolve_config_path`]. Every section and key is
//! optional; missing values fall back to the defaults below.

use oraculo_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level TOML layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub database_path: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub matching: MatchingConfig,
    pub sentinel: SentinelConfig,
    pub pricing: PricingConfig,
    pub notifications: NotificationConfig,
    pub producers: ProducerConfig,
    pub vocabulary: VocabularyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. `"debug"` or `"oraculo_recon=trace"`
    pub level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum weighted coverage for a name match
    pub accept_threshold: f64,
    /// Minimum normalized Levenshtein similarity for a typo'd token
    pub fuzzy_ratio: f64,
    /// Weight above which a known token is an identity token
    pub identity_weight: f64,
    /// EAN-backed score that ends the catalog scan early
    pub short_circuit_score: f64,
    /// Default confidence for bulk auto-link
    pub auto_link_threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.70,
            fuzzy_ratio: 0.85,
            identity_weight: 5.0,
            short_circuit_score: 0.99,
            auto_link_threshold: 0.90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Largest tolerated relative distance from the reference price
    pub max_deviation: f64,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self { max_deviation: 0.40 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Unchanged prices are re-sampled after this many hours
    pub snapshot_interval_hours: i64,
    /// Undercut of the historical minimum, as a fraction of the historical
    /// maximum, that raises a discount signal
    pub discount_threshold: f64,
    /// Discount at which an alert is marked nuclear
    pub nuclear_threshold: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_hours: 24,
            discount_threshold: 0.20,
            nuclear_threshold: 0.50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub deal_window_minutes: i64,
    pub message_window_minutes: i64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            deal_window_minutes: 120,
            message_window_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Per-producer fetch timeout
    pub fetch_timeout_secs: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self { fetch_timeout_secs: 30 }
    }
}

/// Word lists driving token normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularyConfig {
    /// Product-line words; never dropped as stopwords
    pub series: Vec<String>,
    pub stopwords: Vec<String>,
    /// Alias -> canonical token
    pub synonyms: BTreeMap<String, String>,
}

const DEFAULT_SERIES: &[&str] = &[
    // line-specific
    "origins", "masterverse", "cgi", "netflix", "filmation", "200x", "vintage",
    "commemorative", "turtles", "grayskull", "stranger", "things", "cartoon",
    "collection", "sun", "man", "engineering", "art", "classics", "revelation",
    "revolution", "mondo", "super7",
    // franchise-wide
    "tmnt", "motu", "masters", "universe",
];

const DEFAULT_STOPWORDS: &[&str] = &[
    "mattel", "figure", "figura", "action", "toy", "juguete", "cm", "inch", "wave",
    "deluxe", "collection", "collector", "edicion", "edition", "new", "nuevo", "caja",
    "box", "original", "authentic", "super7", "reaction", "pop", "funko", "vinyl",
    "of", "the", "del", "de", "y", "and", "comprar", "venta", "oferta", "precio",
    "barato", "envio", "gratis",
];

const DEFAULT_SYNONYMS: &[(&str, &str)] = &[
    ("tmnt", "turtles"),
    ("motu", "masters"),
    ("universe", "masters"),
    ("origenes", "origins"),
];

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            series: DEFAULT_SERIES.iter().map(|s| s.to_string()).collect(),
            stopwords: DEFAULT_STOPWORDS.iter().map(|s| s.to_string()).collect(),
            synonyms: DEFAULT_SYNONYMS
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        }
    }
}

impl ReconConfig {
    /// Load from an optional TOML file, then validate
    ///
    /// `None` yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: ReconConfig = match path {
            Some(path) => {
                let config = oraculo_common::config::load_toml(path)?;
                tracing::info!(path = %path.display(), "Loaded configuration");
                config
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                ReconConfig::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make matching or throttling meaningless
    pub fn validate(&self) -> Result<()> {
        let fractions = [
            ("matching.accept_threshold", self.matching.accept_threshold),
            ("matching.fuzzy_ratio", self.matching.fuzzy_ratio),
            ("matching.short_circuit_score", self.matching.short_circuit_score),
            ("matching.auto_link_threshold", self.matching.auto_link_threshold),
            ("sentinel.max_deviation", self.sentinel.max_deviation),
            ("pricing.discount_threshold", self.pricing.discount_threshold),
            ("pricing.nuclear_threshold", self.pricing.nuclear_threshold),
        ];
        for (key, value) in fractions {
            if !(value > 0.0 && value <= 1.0) {
                return Err(Error::Config(format!("{} must be in (0, 1], got {}", key, value)));
            }
        }

        if !(1.0..10.0).contains(&self.matching.identity_weight) {
            return Err(Error::Config(format!(
                "matching.identity_weight must be in [1, 10), got {}",
                self.matching.identity_weight
            )));
        }

        let windows = [
            ("pricing.snapshot_interval_hours", self.pricing.snapshot_interval_hours),
            ("notifications.deal_window_minutes", self.notifications.deal_window_minutes),
            ("notifications.message_window_minutes", self.notifications.message_window_minutes),
        ];
        for (key, value) in windows {
            if value <= 0 {
                return Err(Error::Config(format!("{} must be positive, got {}", key, value)));
            }
        }

        if self.producers.fetch_timeout_secs == 0 {
            return Err(Error::Config("producers.fetch_timeout_secs must be positive".to_string()));
        }

        Ok(())
    }
}
