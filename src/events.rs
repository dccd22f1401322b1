//! Notifications crossing from the radio context to the presentation layer.
//!
//! All notifications funnel through one mpsc channel with exactly one
//! consumer: whatever task drains the receiver is the designated UI context.
//! The channel serializes publications from every background task, so the
//! presentation layer never observes interleaved partial updates.

use log::debug;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bluetooth::ConnectionState;

/// Everything the presentation layer can learn from this crate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HubEvent {
    ScanStarted,
    ScanStopped,
    /// A not-yet-connected hub advertised; at most one per address per scan
    /// session.
    HubFound {
        address: String,
        name: String,
        rssi: Option<i16>,
        feature_group: Uuid,
    },
    /// A connection changed externally visible state.
    ConnectionChanged {
        address: String,
        state: ConnectionState,
        /// True exactly when the hub accepts control writes
        available: bool,
    },
    /// The hub is connected but its feature table could not be discovered.
    FeatureDiscoveryIncomplete { address: String },
}

/// Publisher half of the notification channel. Cheap to clone; publishing
/// never blocks.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<HubEvent>,
}

impl EventBus {
    /// Creates the bus and the single receiver the UI context drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HubEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: HubEvent) {
        if self.tx.send(event).is_err() {
            debug!("Notification dropped: presentation listener is gone");
        }
    }
}
