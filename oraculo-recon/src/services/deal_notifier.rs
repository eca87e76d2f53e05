//! Deal and notice dispatch
//!
//! Turns committed discount signals into [`ReconEvent::DealAlert`]s on the
//! event bus, one per product per throttle window.

use crate::config::NotificationConfig;
use crate::services::notification_throttle::{content_key, deal_key, NotificationThrottle};
use chrono::{DateTime, Utc};
use oraculo_common::events::{EventBus, ReconEvent};
use std::sync::Arc;
use tracing::{debug, info};

/// Price drop detected on a linked offer
#[derive(Debug, Clone, PartialEq)]
pub struct DiscountSignal {
    pub product_id: i64,
    pub product_name: String,
    pub shop: String,
    pub url: String,
    pub price: f64,
    pub previous_min: f64,
    pub previous_max: f64,
    /// Undercut of the old minimum as a fraction of the old maximum
    pub discount: f64,
    pub nuclear: bool,
    pub detected_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DealNotifier {
    event_bus: EventBus,
    throttle: Arc<NotificationThrottle>,
    config: NotificationConfig,
}

impl DealNotifier {
    pub fn new(event_bus: EventBus, throttle: Arc<NotificationThrottle>, config: NotificationConfig) -> Self {
        Self {
            event_bus,
            throttle,
            config,
        }
    }

    /// Publish a deal alert unless the product was alerted recently
    ///
    /// Returns whether the alert went out.
    pub fn notify_deal(&self, signal: &DiscountSignal) -> bool {
        let key = deal_key(&signal.product_name);
        if self.throttle.should_throttle(&key, self.config.deal_window_minutes) {
            debug!(product = %signal.product_name, "Deal alert throttled");
            return false;
        }

        info!(
            product = %signal.product_name,
            shop = %signal.shop,
            price = signal.price,
            discount = signal.discount,
            nuclear = signal.nuclear,
            "Deal detected"
        );
        self.event_bus.emit_lossy(ReconEvent::DealAlert {
            product_id: signal.product_id,
            product_name: signal.product_name.clone(),
            shop: signal.shop.clone(),
            url: signal.url.clone(),
            price: signal.price,
            previous_min: signal.previous_min,
            discount: signal.discount,
            nuclear: signal.nuclear,
            timestamp: signal.detected_at,
        });
        true
    }

    /// Publish a free-form notice, deduplicated by content
    pub fn notify_message(&self, message: &str) -> bool {
        let key = content_key(message);
        if self.throttle.should_throttle(&key, self.config.message_window_minutes) {
            return false;
        }
        self.event_bus.emit_lossy(ReconEvent::Notice {
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        true
    }
}
