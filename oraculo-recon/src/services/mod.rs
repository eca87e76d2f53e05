pub mod anomaly_sentinel;
pub mod audit_ledger;
pub mod deal_notifier;
pub mod manual_resolution;
pub mod notification_throttle;
pub mod price_statistics;
pub mod resolver;
pub mod token_normalizer;
pub mod weight_model;

pub use anomaly_sentinel::{AnomalySentinel, SentinelVerdict, VisualVerifier};
pub use audit_ledger::{AuditLedger, UndoReport};
pub use deal_notifier::{DealNotifier, DiscountSignal};
pub use manual_resolution::{AutoLinkSummary, ManualResolution};
pub use notification_throttle::NotificationThrottle;
pub use price_statistics::recompute_price_statistics;
pub use resolver::{MatchOutcome, Resolution, Resolver};
pub use token_normalizer::TokenNormalizer;
pub use weight_model::{WeightModel, WeightTable};
