//! Alarm lifecycle manager.
//!
//! Owns the alarm table, drives each alarm's state machine, persists every
//! transition, programs the timer engine, and publishes lifecycle events.
//!
//! # Concurrency
//!
//! Mutating operations are serialized per alarm id: the registry mutex is
//! held only to look up or insert a slot, and each slot carries its own
//! async lock guarding that alarm's transitions and durable write. Timer
//! fires arrive through the same per-slot lock, so a fire can never
//! interleave with a user-initiated transition on the same alarm.
//!
//! Every timer programming bumps the slot's generation counter and fires
//! carry the generation they were armed with, so once `cancel` or `pause`
//! returns, a late fire from the old timer is dropped unobserved.

use crate::alarm::{Alarm, AlarmId, AlarmState, Schedule};
use crate::clock::Clock;
use crate::config::ChimeConfig;
use crate::error::{AlarmError, Result};
use crate::events::{AlarmEvent, AlarmEventKind, EventBus, Subscription};
use crate::gate::{AuthorizationGate, AuthorizationState};
use crate::store::AlarmStore;
use crate::timer::{TimerEngine, TimerFire, TimerHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-alarm cell guarded by the slot's async lock.
struct Cell {
    alarm: Alarm,
    /// Destroyed records (cancelled or acknowledged) keep a hidden cell so
    /// later operations answer `AlreadyTerminal` instead of `NotFound`.
    hidden: bool,
    timer: Option<TimerHandle>,
    generation: u64,
}

impl Cell {
    /// Cancel any outstanding timer and invalidate in-flight fires.
    fn deprogram(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

struct Slot {
    cell: AsyncMutex<Cell>,
}

#[derive(Default)]
struct SlotTable {
    by_id: HashMap<AlarmId, Arc<Slot>>,
    /// Insertion order for `list()`.
    order: Vec<AlarmId>,
}

/// The alarm lifecycle manager.
///
/// Constructed once at process start with injected clock, store, gate, and
/// timer engine, then shared (`Arc`) with every consumer.
pub struct AlarmManager {
    clock: Arc<dyn Clock>,
    store: Arc<dyn AlarmStore>,
    gate: AuthorizationGate,
    timers: Arc<dyn TimerEngine>,
    bus: EventBus,
    slots: Mutex<SlotTable>,
}

impl AlarmManager {
    /// Create a manager over the injected environment.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<dyn AlarmStore>,
        gate: AuthorizationGate,
        timers: Arc<dyn TimerEngine>,
        config: &ChimeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            clock,
            store,
            gate,
            timers,
            bus: EventBus::new(config.event_capacity),
            slots: Mutex::new(SlotTable::default()),
        })
    }

    /// Drive timer fires from `fire_rx` into the manager until the channel
    /// closes. Pair this with a [`TokioTimerEngine`](crate::timer::TokioTimerEngine)
    /// built around the sending half.
    pub fn spawn_fire_loop(
        self: Arc<Self>,
        mut fire_rx: mpsc::UnboundedReceiver<TimerFire>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(fire) = fire_rx.recv().await {
                self.on_timer_fire(fire).await;
            }
            debug!("timer fire channel closed; fire loop exiting");
        })
    }

    /// Request scheduling capability from the external authority.
    pub async fn request_authorization(&self) -> AuthorizationState {
        self.gate.request_authorization().await
    }

    /// Current recorded authorization decision.
    pub fn current_authorization_state(&self) -> AuthorizationState {
        self.gate.current_state()
    }

    /// Start a fresh lifecycle event subscription.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Current clock reading, for computing derived countdown values on
    /// alarms returned by [`list`](Self::list) / [`get`](Self::get).
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Create and arm a new alarm.
    ///
    /// Fails `Unauthorized` without a granted gate, and `InvalidSchedule`
    /// when a fixed instant is not in the future or a countdown pre-alert is
    /// zero; neither failure touches the store.
    pub async fn create(
        &self,
        schedule: Schedule,
        presentation: serde_json::Value,
    ) -> Result<AlarmId> {
        self.gate.require_granted()?;

        let now_ms = self.clock.now_ms();
        match schedule {
            Schedule::Fixed { fire_at_ms } if fire_at_ms <= now_ms => {
                return Err(AlarmError::InvalidSchedule(
                    "fixed instant must be in the future".to_owned(),
                ));
            }
            Schedule::Countdown {
                pre_alert_ms: 0, ..
            } => {
                return Err(AlarmError::InvalidSchedule(
                    "pre-alert duration must be positive".to_owned(),
                ));
            }
            _ => {}
        }

        let id = AlarmId::new();
        let alarm = Alarm::new(id, schedule, presentation, now_ms);
        self.store.put(&alarm)?;

        // The slot must be registered before the timer is armed so a fire
        // can never reach an unknown id.
        let slot = self.insert_slot(alarm);
        let mut cell = slot.cell.lock().await;
        self.program(&mut cell, id);
        info!(%id, schedule = %cell.alarm.schedule, state = %cell.alarm.state, "alarm created");
        self.publish(AlarmEventKind::Created, &cell.alarm, now_ms);
        Ok(id)
    }

    /// Cancel an alarm, deprogramming its timer and destroying its record.
    pub async fn cancel(&self, id: AlarmId) -> Result<()> {
        self.gate.require_granted()?;
        let slot = self.slot(id)?;
        let mut cell = slot.cell.lock().await;
        if cell.alarm.state.is_terminal() {
            return Err(AlarmError::AlreadyTerminal(cell.alarm.state));
        }

        self.store.remove(id)?;
        cell.deprogram();
        let now_ms = self.clock.now_ms();
        cell.alarm.state = AlarmState::Cancelled;
        cell.alarm.last_transition_at_ms = now_ms;
        cell.alarm.fire_at_ms = None;
        cell.alarm.remaining_ms = None;
        cell.hidden = true;
        info!(%id, "alarm cancelled");
        self.publish(AlarmEventKind::Cancelled, &cell.alarm, now_ms);
        Ok(())
    }

    /// Pause a running countdown, freezing its remainder.
    pub async fn pause(&self, id: AlarmId) -> Result<()> {
        self.gate.require_granted()?;
        let slot = self.slot(id)?;
        let mut cell = slot.cell.lock().await;
        if cell.alarm.state.is_terminal() {
            return Err(AlarmError::AlreadyTerminal(cell.alarm.state));
        }
        if cell.alarm.state != AlarmState::Counting {
            return Err(AlarmError::InvalidTransition {
                from: cell.alarm.state,
                op: "pause",
            });
        }

        let now_ms = self.clock.now_ms();
        let remaining_ms = cell
            .alarm
            .fire_at_ms
            .map_or(0, |deadline| deadline.saturating_sub(now_ms));

        let mut updated = cell.alarm.clone();
        updated.state = AlarmState::Paused;
        updated.remaining_ms = Some(remaining_ms);
        updated.fire_at_ms = None;
        updated.last_transition_at_ms = now_ms;
        self.store.put(&updated)?;

        cell.deprogram();
        cell.alarm = updated;
        info!(%id, remaining_ms, "alarm paused");
        self.publish(AlarmEventKind::Paused, &cell.alarm, now_ms);
        Ok(())
    }

    /// Resume a paused countdown for its frozen remainder.
    pub async fn resume(&self, id: AlarmId) -> Result<()> {
        self.gate.require_granted()?;
        let slot = self.slot(id)?;
        let mut cell = slot.cell.lock().await;
        if cell.alarm.state.is_terminal() {
            return Err(AlarmError::AlreadyTerminal(cell.alarm.state));
        }
        if cell.alarm.state != AlarmState::Paused {
            return Err(AlarmError::InvalidTransition {
                from: cell.alarm.state,
                op: "resume",
            });
        }

        let now_ms = self.clock.now_ms();
        let remaining_ms = cell.alarm.remaining_ms.unwrap_or(0);

        let mut updated = cell.alarm.clone();
        updated.state = AlarmState::Counting;
        updated.fire_at_ms = Some(now_ms.saturating_add(remaining_ms));
        updated.remaining_ms = None;
        updated.last_transition_at_ms = now_ms;
        self.store.put(&updated)?;

        cell.alarm = updated;
        self.program(&mut cell, id);
        info!(%id, remaining_ms, "alarm resumed");
        self.publish(AlarmEventKind::Resumed, &cell.alarm, now_ms);
        Ok(())
    }

    /// Re-arm an alerting countdown for its post-alert duration (the alert's
    /// secondary "repeat" action).
    pub async fn repeat(&self, id: AlarmId) -> Result<()> {
        self.gate.require_granted()?;
        let slot = self.slot(id)?;
        let mut cell = slot.cell.lock().await;
        if cell.alarm.state.is_terminal() {
            return Err(AlarmError::AlreadyTerminal(cell.alarm.state));
        }
        if cell.alarm.state != AlarmState::Alerting {
            return Err(AlarmError::InvalidTransition {
                from: cell.alarm.state,
                op: "repeat",
            });
        }
        let Some(post_alert_ms) = cell.alarm.schedule.post_alert_ms() else {
            // The repeat edge only exists when a post-alert phase was
            // configured at creation.
            return Err(AlarmError::InvalidTransition {
                from: cell.alarm.state,
                op: "repeat",
            });
        };

        let now_ms = self.clock.now_ms();
        let mut updated = cell.alarm.clone();
        updated.state = AlarmState::Counting;
        updated.fire_at_ms = Some(now_ms.saturating_add(post_alert_ms));
        updated.last_transition_at_ms = now_ms;
        self.store.put(&updated)?;

        cell.alarm = updated;
        self.program(&mut cell, id);
        info!(%id, post_alert_ms, "alarm repeat armed");
        self.publish(AlarmEventKind::Resumed, &cell.alarm, now_ms);
        Ok(())
    }

    /// Acknowledge a delivered alert (the "stop" action), destroying the
    /// durable record.
    ///
    /// Valid from `Alerting` and from a retained `Fired` alarm; this is the
    /// one path allowed to touch a fired alarm, since fired records are kept
    /// until the caller acknowledges them.
    pub async fn acknowledge(&self, id: AlarmId) -> Result<()> {
        self.gate.require_granted()?;
        let slot = self.slot(id)?;
        let mut cell = slot.cell.lock().await;
        match cell.alarm.state {
            AlarmState::Alerting => {}
            AlarmState::Fired if !cell.hidden => {}
            state if state.is_terminal() => return Err(AlarmError::AlreadyTerminal(state)),
            state => {
                return Err(AlarmError::InvalidTransition {
                    from: state,
                    op: "acknowledge",
                });
            }
        }

        self.store.remove(id)?;
        cell.deprogram();
        let now_ms = self.clock.now_ms();
        cell.alarm.state = AlarmState::Fired;
        cell.alarm.last_transition_at_ms = now_ms;
        cell.alarm.fire_at_ms = None;
        cell.alarm.remaining_ms = None;
        cell.hidden = true;
        info!(%id, "alarm acknowledged");
        Ok(())
    }

    /// Advance an alarm when its timer fires.
    ///
    /// Invoked by the timer engine (through the fire loop). Fires for
    /// unknown ids, stale generations, or settled states are logged and
    /// dropped, never escalated: they are the benign tail of a cancel or
    /// reprogram race.
    pub async fn on_timer_fire(&self, fire: TimerFire) {
        let slot = {
            let table = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            table.by_id.get(&fire.id).cloned()
        };
        let Some(slot) = slot else {
            debug!(id = %fire.id, "timer fire for unknown alarm dropped");
            return;
        };

        let mut cell = slot.cell.lock().await;
        if fire.generation != cell.generation {
            debug!(id = %fire.id, fired = fire.generation, current = cell.generation,
                "stale timer fire dropped");
            return;
        }
        cell.timer = None;

        let next_state = match cell.alarm.state {
            AlarmState::Armed => AlarmState::Fired,
            AlarmState::Counting => AlarmState::Alerting,
            state => {
                debug!(id = %fire.id, %state, "timer fire in settled state dropped");
                return;
            }
        };

        let now_ms = self.clock.now_ms();
        let mut updated = cell.alarm.clone();
        updated.state = next_state;
        updated.last_transition_at_ms = now_ms;
        updated.fire_at_ms = None;
        if let Err(e) = self.store.put(&updated) {
            // Keep alerting in memory; recovery re-derives from the old
            // record if the process dies before a later write succeeds.
            warn!(id = %fire.id, "cannot persist fired alarm: {e}");
        }
        cell.alarm = updated;
        info!(id = %fire.id, state = %next_state, "alarm fired");
        self.publish(AlarmEventKind::Fired, &cell.alarm, now_ms);
    }

    /// Snapshot of all live alarms in insertion order. Always permitted.
    pub async fn list(&self) -> Vec<Alarm> {
        let slots: Vec<Arc<Slot>> = {
            let table = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            table
                .order
                .iter()
                .filter_map(|id| table.by_id.get(id).cloned())
                .collect()
        };

        let mut alarms = Vec::with_capacity(slots.len());
        for slot in slots {
            let cell = slot.cell.lock().await;
            if !cell.hidden {
                alarms.push(cell.alarm.clone());
            }
        }
        alarms
    }

    /// Snapshot of one alarm. Always permitted.
    pub async fn get(&self, id: AlarmId) -> Result<Alarm> {
        let slot = self.slot(id)?;
        let cell = slot.cell.lock().await;
        if cell.hidden {
            return Err(AlarmError::NotFound(id));
        }
        Ok(cell.alarm.clone())
    }

    /// Reconcile persisted records with the current clock at startup.
    ///
    /// Records whose deadline passed while the process was down alert once
    /// (never retroactively re-alert); running countdowns get a fresh timer
    /// for their stored deadline; paused alarms stay paused. The `Fired`
    /// events for missed deadlines are published only after the whole pass
    /// completes. Returns the number of records recovered.
    pub async fn recover(&self) -> Result<usize> {
        let records = self.store.load_all()?;
        let now_ms = self.clock.now_ms();
        let mut missed = Vec::new();
        let mut count = 0_usize;

        for mut alarm in records {
            let id = alarm.id;
            if self.contains(id) {
                debug!(%id, "skipping already-loaded alarm during recovery");
                continue;
            }

            match alarm.state {
                AlarmState::Armed | AlarmState::Counting => {
                    let deadline_ms = alarm.fire_at_ms.unwrap_or(0);
                    if deadline_ms <= now_ms {
                        alarm.state = if alarm.state == AlarmState::Armed {
                            AlarmState::Fired
                        } else {
                            AlarmState::Alerting
                        };
                        alarm.last_transition_at_ms = now_ms;
                        alarm.fire_at_ms = None;
                        if let Err(e) = self.store.put(&alarm) {
                            warn!(%id, "cannot persist recovered alarm state: {e}");
                        }
                        missed.push(alarm.clone());
                        self.insert_slot(alarm);
                    } else {
                        let slot = self.insert_slot(alarm);
                        let mut cell = slot.cell.lock().await;
                        self.program(&mut cell, id);
                    }
                }
                AlarmState::Paused | AlarmState::Alerting | AlarmState::Fired => {
                    // Paused stays paused until an explicit resume; alerting
                    // and retained fired alarms carry no timer.
                    self.insert_slot(alarm);
                }
                AlarmState::Cancelled => {
                    warn!(%id, "dropping stray cancelled record found during recovery");
                    let _ = self.store.remove(id);
                    continue;
                }
            }
            count += 1;
        }

        info!(count, missed = missed.len(), "alarm recovery complete");
        for alarm in missed {
            self.publish(AlarmEventKind::Fired, &alarm, now_ms);
        }
        Ok(count)
    }

    fn slot(&self, id: AlarmId) -> Result<Arc<Slot>> {
        let table = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .by_id
            .get(&id)
            .cloned()
            .ok_or(AlarmError::NotFound(id))
    }

    fn contains(&self, id: AlarmId) -> bool {
        let table = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        table.by_id.contains_key(&id)
    }

    fn insert_slot(&self, alarm: Alarm) -> Arc<Slot> {
        let id = alarm.id;
        let slot = Arc::new(Slot {
            cell: AsyncMutex::new(Cell {
                alarm,
                hidden: false,
                timer: None,
                generation: 0,
            }),
        });
        let mut table = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        table.order.push(id);
        table.by_id.insert(id, Arc::clone(&slot));
        slot
    }

    fn program(&self, cell: &mut Cell, id: AlarmId) {
        let Some(deadline_ms) = cell.alarm.fire_at_ms else {
            return;
        };
        cell.generation += 1;
        debug!(%id, generation = cell.generation, deadline_ms, "programming timer");
        cell.timer = Some(self.timers.schedule(id, cell.generation, deadline_ms));
    }

    fn publish(&self, kind: AlarmEventKind, alarm: &Alarm, at_ms: u64) {
        self.bus.publish(AlarmEvent {
            id: alarm.id,
            kind,
            state: alarm.state,
            at_ms,
        });
    }
}
