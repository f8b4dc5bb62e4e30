//! Lifecycle event fan-out.
//!
//! Built on [`tokio::sync::broadcast`]: publishing never blocks the manager,
//! each subscriber sees events in publish order, and a subscriber that falls
//! more than one buffer behind loses the oldest events. Lost events are
//! tallied on the subscriber's [`Subscription::dropped`] counter, the
//! diagnostic signal that the subscriber is degraded.

use crate::alarm::{AlarmId, AlarmState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// What happened to an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmEventKind {
    /// The alarm was created and armed.
    Created,
    /// The alarm alerted (fixed instant reached or countdown elapsed).
    Fired,
    /// A running countdown was paused.
    Paused,
    /// A paused or alerting countdown re-entered the counting state.
    Resumed,
    /// The alarm was cancelled.
    Cancelled,
}

/// A lifecycle event published by the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmEvent {
    /// Alarm the event concerns.
    pub id: AlarmId,
    /// What happened.
    pub kind: AlarmEventKind,
    /// State the alarm entered with this event.
    pub state: AlarmState,
    /// Manager clock reading when the event was produced, epoch millis.
    pub at_ms: u64,
}

/// Fan-out bus for [`AlarmEvent`]s.
pub struct EventBus {
    tx: broadcast::Sender<AlarmEvent>,
}

impl EventBus {
    /// Bus whose subscribers each buffer up to `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Start a fresh subscription. May be called any number of times; each
    /// subscription observes events published after it was created.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }

    /// Deliver an event to all current subscribers. Never blocks; with no
    /// subscribers the event is discarded.
    pub(crate) fn publish(&self, event: AlarmEvent) {
        debug!(id = %event.id, kind = ?event.kind, state = %event.state, "publishing alarm event");
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One subscriber's view of the event stream.
pub struct Subscription {
    rx: broadcast::Receiver<AlarmEvent>,
    dropped: u64,
}

impl Subscription {
    /// Receive the next event, waiting until one is published.
    ///
    /// Returns `None` once the bus is gone and the buffer is drained. Events
    /// lost to buffer overflow are skipped and counted in [`dropped`].
    ///
    /// [`dropped`]: Subscription::dropped
    pub async fn recv(&mut self) -> Option<AlarmEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.dropped += missed;
                    warn!(missed, "alarm event subscriber lagging; oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<AlarmEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    self.dropped += missed;
                    warn!(missed, "alarm event subscriber lagging; oldest events dropped");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    /// Total events this subscriber has lost to buffer overflow. Non-zero
    /// means the subscriber is degraded: it fell behind the bus capacity and
    /// the oldest events were dropped rather than blocking the manager.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
