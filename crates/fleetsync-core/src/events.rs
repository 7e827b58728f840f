//! Sync progress and authorization events.
//!
//! Every orchestrated phase reports `started`, any number of `progress`
//! updates and one terminal `succeeded` or `failed` event. An unauthorized
//! cloud response additionally raises [`SyncEvent::AuthorizationFailed`],
//! decoupled from the error returned to the caller, so a UI can prompt for
//! a new login independently of the sync call.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use fleetsync_types::{SensorKey, SyncStatus};

/// A phase of a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Sensor reconciliation, including calibration offsets.
    Sensors,
    /// Per-sensor history backfill.
    History,
    /// Latest-record merge from the dense endpoint.
    Latest,
    /// Application settings merge.
    Settings,
    /// Alert registry replacement.
    Alerts,
    /// Replay of queued requests.
    Pending,
}

impl SyncPhase {
    /// Stable name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Sensors => "sensors",
            SyncPhase::History => "history",
            SyncPhase::Latest => "latest",
            SyncPhase::Settings => "settings",
            SyncPhase::Alerts => "alerts",
            SyncPhase::Pending => "pending",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted while synchronising.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SyncEvent {
    /// A phase started.
    PhaseStarted { phase: SyncPhase },
    /// Partial progress of a phase.
    PhaseProgress {
        phase: SyncPhase,
        completed: usize,
        total: usize,
    },
    /// A phase finished successfully.
    PhaseSucceeded { phase: SyncPhase },
    /// A phase finished with at least one failure.
    PhaseFailed { phase: SyncPhase, error: String },
    /// The sync status of a sensor changed.
    SensorStatus { key: SensorKey, status: SyncStatus },
    /// The cloud rejected the account credentials.
    AuthorizationFailed,
}

/// Sender for sync events.
pub type EventSender = broadcast::Sender<SyncEvent>;

/// Receiver for sync events.
pub type EventReceiver = broadcast::Receiver<SyncEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SyncEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub(crate) fn sensor_status(&self, key: &SensorKey, status: SyncStatus) {
        self.send(SyncEvent::SensorStatus {
            key: key.clone(),
            status,
        });
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_to_subscribers() {
        let dispatcher = EventDispatcher::new(8);
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 1);

        dispatcher.send(SyncEvent::PhaseStarted {
            phase: SyncPhase::Alerts,
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::PhaseStarted {
                phase: SyncPhase::Alerts
            }
        );
    }

    #[test]
    fn test_send_without_receivers_is_silent() {
        let dispatcher = EventDispatcher::default();
        dispatcher.send(SyncEvent::AuthorizationFailed);
        assert_eq!(dispatcher.receiver_count(), 0);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = SyncEvent::PhaseProgress {
            phase: SyncPhase::History,
            completed: 2,
            total: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "phase_progress");
        assert_eq!(json["phase"], "history");
        assert_eq!(json["completed"], 2);
    }
}
