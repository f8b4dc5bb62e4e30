//! Timer engine: one-shot wake-ups scheduled against the clock source.
//!
//! [`TokioTimerEngine`] spawns one task per pending timer. Each task sleeps
//! in bounded slices and re-derives the remaining duration from the
//! [`Clock`] on every slice, so a wall-clock adjustment moves the fire point
//! instead of being baked into a cached countdown. Fires are delivered as
//! [`TimerFire`] messages carrying a programming generation; the manager
//! drops messages with a stale generation, which keeps a fire that races a
//! cancel unobservable after the cancel has returned.

use crate::alarm::AlarmId;
use crate::clock::Clock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default upper bound on a single sleep slice, in milliseconds.
pub const DEFAULT_SLICE_MS: u64 = 500;

/// A wake-up delivered to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFire {
    /// Alarm the wake-up belongs to.
    pub id: AlarmId,
    /// Programming generation the timer was armed with.
    pub generation: u64,
}

/// Handle to one scheduled wake-up.
///
/// Dropping the handle deprograms the timer, so replacing an alarm's handle
/// always cancels the previous one first.
#[derive(Debug)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Deprogram the wake-up. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Schedules one-shot wake-ups. At most one fire is produced per handle,
/// delivered on or after the requested instant, never before.
pub trait TimerEngine: Send + Sync {
    /// Arrange for a [`TimerFire`] at or after `deadline_ms`.
    fn schedule(&self, id: AlarmId, generation: u64, deadline_ms: u64) -> TimerHandle;
}

/// Tokio-backed engine: one task per pending timer.
pub struct TokioTimerEngine {
    clock: Arc<dyn Clock>,
    fire_tx: mpsc::UnboundedSender<TimerFire>,
    slice_ms: u64,
}

impl TokioTimerEngine {
    /// Engine that reads `clock` and delivers fires on `fire_tx`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, fire_tx: mpsc::UnboundedSender<TimerFire>) -> Self {
        Self {
            clock,
            fire_tx,
            slice_ms: DEFAULT_SLICE_MS,
        }
    }

    /// Override the maximum sleep slice. Coarser slices are cheaper; finer
    /// slices react faster to wall-clock adjustments.
    #[must_use]
    pub fn with_slice_ms(mut self, slice_ms: u64) -> Self {
        self.slice_ms = slice_ms.max(1);
        self
    }
}

impl TimerEngine for TokioTimerEngine {
    fn schedule(&self, id: AlarmId, generation: u64, deadline_ms: u64) -> TimerHandle {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let clock = Arc::clone(&self.clock);
        let fire_tx = self.fire_tx.clone();
        let slice_ms = self.slice_ms;

        tokio::spawn(async move {
            loop {
                let now_ms = clock.now_ms();
                if now_ms >= deadline_ms {
                    break;
                }
                let wait_ms = (deadline_ms - now_ms).min(slice_ms);
                tokio::select! {
                    () = task_token.cancelled() => return,
                    () = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
                }
            }
            if task_token.is_cancelled() {
                return;
            }
            debug!(%id, generation, "timer fired");
            let _ = fire_tx.send(TimerFire { id, generation });
        });

        TimerHandle::new(token)
    }
}

/// A timer recorded by [`ManualTimerEngine`].
#[derive(Debug, Clone)]
struct PendingTimer {
    id: AlarmId,
    generation: u64,
    deadline_ms: u64,
    token: CancellationToken,
}

/// Test engine that records pending deadlines instead of sleeping.
///
/// Tests advance a [`ManualClock`](crate::clock::ManualClock) and feed the
/// fires from [`take_due`](ManualTimerEngine::take_due) straight into the
/// manager, making every scenario fully deterministic.
#[derive(Default)]
pub struct ManualTimerEngine {
    pending: Mutex<Vec<PendingTimer>>,
}

impl ManualTimerEngine {
    /// Engine with no pending timers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids and deadlines of all uncancelled timers, soonest first.
    #[must_use]
    pub fn pending(&self) -> Vec<(AlarmId, u64)> {
        let mut entries: Vec<(AlarmId, u64)> = self
            .pending
            .lock()
            .map(|p| {
                p.iter()
                    .filter(|t| !t.token.is_cancelled())
                    .map(|t| (t.id, t.deadline_ms))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by_key(|(_, deadline)| *deadline);
        entries
    }

    /// Remove and return a fire for every uncancelled timer due at `now_ms`,
    /// soonest first. Cancelled timers are purged without firing.
    pub fn take_due(&self, now_ms: u64) -> Vec<TimerFire> {
        let Ok(mut pending) = self.pending.lock() else {
            return Vec::new();
        };
        let mut due = Vec::new();
        pending.retain(|timer| {
            if timer.token.is_cancelled() {
                return false;
            }
            if timer.deadline_ms <= now_ms {
                due.push((timer.deadline_ms, TimerFire {
                    id: timer.id,
                    generation: timer.generation,
                }));
                return false;
            }
            true
        });
        due.sort_by_key(|(deadline, _)| *deadline);
        due.into_iter().map(|(_, fire)| fire).collect()
    }
}

impl TimerEngine for ManualTimerEngine {
    fn schedule(&self, id: AlarmId, generation: u64, deadline_ms: u64) -> TimerHandle {
        let token = CancellationToken::new();
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(PendingTimer {
                id,
                generation,
                deadline_ms,
                token: token.clone(),
            });
        }
        TimerHandle::new(token)
    }
}
