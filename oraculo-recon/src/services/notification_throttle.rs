//! Notification Throttle
//!
//! Per-key rate limiting for outbound alerts. Keys are chosen by the caller:
//! `deal_<product>` for per-entity limits, `msg_<sha256>` for identical
//! message bodies.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct NotificationThrottle {
    state: Mutex<ThrottleState>,
}

#[derive(Debug, Default)]
struct ThrottleState {
    last_sent: HashMap<String, DateTime<Utc>>,
    /// Longest window any caller has asked for; older entries are dropped
    longest_window_minutes: i64,
}

impl NotificationThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `key` was let through less than `window_minutes` ago
    ///
    /// A call that is let through records the current time; throttled calls
    /// leave the recorded time alone so the window is measured from the last
    /// alert actually sent.
    pub fn should_throttle(&self, key: &str, window_minutes: i64) -> bool {
        self.should_throttle_at(key, window_minutes, Utc::now())
    }

    /// [`should_throttle`](Self::should_throttle) with an explicit clock
    pub fn should_throttle_at(&self, key: &str, window_minutes: i64, now: DateTime<Utc>) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = Duration::minutes(window_minutes);

        if let Some(previous) = state.last_sent.get(key) {
            if now - *previous < window {
                return true;
            }
        }

        state.longest_window_minutes = state.longest_window_minutes.max(window_minutes);
        let horizon = Duration::minutes(state.longest_window_minutes);
        state.last_sent.retain(|_, sent| now - *sent < horizon);
        state.last_sent.insert(key.to_string(), now);
        false
    }

    /// Keys that can still throttle a call
    pub fn tracked_keys(&self) -> usize {
        match self.state.lock() {
            Ok(guard) => guard.last_sent.len(),
            Err(poisoned) => poisoned.into_inner().last_sent.len(),
        }
    }
}

/// Key for per-product deal alerts
pub fn deal_key(product_name: &str) -> String {
    format!("deal_{}", product_name)
}

/// Key for a message body, stable across restarts
pub fn content_key(message: &str) -> String {
    let digest = Sha256::digest(message.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("msg_{}", hex)
}
