//! Reconciliation events and the broadcast bus that carries them
//!
//! The reconciler emits only after a batch commits, so subscribers never see
//! an event for work that was rolled back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events published by the reconciliation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReconEvent {
    /// A batch finished and committed
    BatchReconciled {
        linked: usize,
        updated: usize,
        pending: usize,
        blocked: usize,
        rejected: usize,
        duplicates: usize,
        errors: usize,
        timestamp: DateTime<Utc>,
    },

    /// A linked offer dropped below its historical minimum by at least the
    /// configured discount threshold
    DealAlert {
        product_id: i64,
        product_name: String,
        shop: String,
        url: String,
        price: f64,
        previous_min: f64,
        /// Fraction of the historical maximum (0.35 = 35% off)
        discount: f64,
        /// Discount at or above the "nuclear" threshold
        nuclear: bool,
        timestamp: DateTime<Utc>,
    },

    /// The anomaly sentinel refused to auto-link an offer
    AnomalyBlocked {
        url: String,
        shop: String,
        price: f64,
        reference_price: f64,
        deviation: f64,
        timestamp: DateTime<Utc>,
    },

    /// A ledger entry was reverted
    EntryUndone {
        entry_id: i64,
        action: String,
        offer_url: String,
        timestamp: DateTime<Utc>,
    },

    /// Free-form operator notice (deduplicated by content)
    Notice {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ReconEvent {
    /// Short name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            ReconEvent::BatchReconciled { .. } => "BatchReconciled",
            ReconEvent::DealAlert { .. } => "DealAlert",
            ReconEvent::AnomalyBlocked { .. } => "AnomalyBlocked",
            ReconEvent::EntryUndone { .. } => "EntryUndone",
            ReconEvent::Notice { .. } => "Notice",
        }
    }
}

/// Broadcast bus for [`ReconEvent`]s
///
/// Slow subscribers lose the oldest events once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReconEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ReconEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ReconEvent,
    ) -> Result<usize, broadcast::error::SendError<ReconEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ReconEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            tracing::trace!(kind, "No subscribers for event");
        }
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
