//! Anomaly Sentinel
//!
//! Price plausibility check applied after a successful name or EAN match.
//! A listing priced too far from the product's reference is held for
//! review even when the resolver is certain about its identity.

use crate::config::SentinelConfig;
use crate::db::products::Product;
use crate::models::{SourceKind, ValidationStatus};
use std::sync::Arc;

/// Flag attached when the listing image does not match the catalog image
pub const VISUAL_MISMATCH_FLAG: &str = "visual_mismatch";

/// Image cross-check hook
///
/// Returns an anomaly flag when the listing image contradicts the product's
/// stored fingerprint.
pub trait VisualVerifier: Send + Sync {
    fn verify(&self, product: &Product, image_url: &str) -> Option<String>;
}

/// Accepts every image
pub struct NoVisualCheck;

impl VisualVerifier for NoVisualCheck {
    fn verify(&self, _product: &Product, _image_url: &str) -> Option<String> {
        None
    }
}

/// Sentinel decision
#[derive(Debug, Clone, PartialEq)]
pub struct SentinelVerdict {
    pub blocked: bool,
    pub status: ValidationStatus,
    pub flags: Vec<String>,
    pub reference_price: Option<f64>,
    pub deviation: Option<f64>,
}

pub struct AnomalySentinel {
    max_deviation: f64,
    visual: Arc<dyn VisualVerifier>,
}

impl AnomalySentinel {
    pub fn new(config: &SentinelConfig) -> Self {
        Self {
            max_deviation: config.max_deviation,
            visual: Arc::new(NoVisualCheck),
        }
    }

    pub fn with_visual_verifier(mut self, visual: Arc<dyn VisualVerifier>) -> Self {
        self.visual = visual;
        self
    }

    /// Source-specific average, then the blended market average
    ///
    /// A zero average means "never computed" and is skipped.
    pub fn reference_price(product: &Product, kind: SourceKind) -> Option<f64> {
        let specific = match kind {
            SourceKind::Retail => product.avg_retail_price,
            SourceKind::PeerToPeer => product.avg_p2p_price,
        };
        [specific, product.avg_market_price]
            .into_iter()
            .find(|price| *price > 0.0)
    }

    /// Marker stored in the anomaly flag list, e.g. `deviation>40%`
    pub fn deviation_flag(&self) -> String {
        format!("deviation>{}%", (self.max_deviation * 100.0).round())
    }

    pub fn validate(
        &self,
        product: &Product,
        price: f64,
        kind: SourceKind,
        image_url: Option<&str>,
    ) -> SentinelVerdict {
        let mut flags = Vec::new();
        let mut blocked = false;

        let reference_price = Self::reference_price(product, kind);
        let deviation = reference_price.map(|reference| (price - reference).abs() / reference);
        if deviation.is_some_and(|d| d > self.max_deviation) {
            blocked = true;
            flags.push(self.deviation_flag());
        }

        if let (Some(url), Some(_)) = (image_url, product.image_hash.as_deref()) {
            if let Some(flag) = self.visual.verify(product, url) {
                flags.push(flag);
            }
        }

        let status = if blocked {
            ValidationStatus::Pending
        } else if reference_price.is_some() {
            ValidationStatus::Verified
        } else {
            ValidationStatus::Unverified
        };

        SentinelVerdict {
            blocked,
            status,
            flags,
            reference_price,
            deviation,
        }
    }
}
