//! Alarm data model: ids, schedules, lifecycle states, and the persisted
//! record.
//!
//! The [`Alarm`] struct is both the in-memory entity and the durable record
//! layout; the manager is the only code that mutates its `state`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque unique alarm identifier, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmId(Uuid);

impl AlarmId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AlarmId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AlarmId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// When an alarm should alert.
///
/// Exactly one kind is chosen at creation and never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Alert at an absolute wall-clock instant.
    Fixed {
        /// Epoch millisecond to alert at.
        fire_at_ms: u64,
    },
    /// Alert after a relative countdown from activation.
    Countdown {
        /// Running phase before the first alert, in milliseconds.
        pre_alert_ms: u64,
        /// Optional re-arm phase entered when the alert's secondary
        /// ("repeat") action is invoked, in milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        post_alert_ms: Option<u64>,
    },
}

impl Schedule {
    /// `true` for countdown schedules, which support pause/resume.
    #[must_use]
    pub fn is_countdown(&self) -> bool {
        matches!(self, Self::Countdown { .. })
    }

    /// Post-alert duration, when configured.
    #[must_use]
    pub fn post_alert_ms(&self) -> Option<u64> {
        match self {
            Self::Countdown { post_alert_ms, .. } => *post_alert_ms,
            Self::Fixed { .. } => None,
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed { fire_at_ms } => write!(f, "fixed at {fire_at_ms}"),
            Self::Countdown {
                pre_alert_ms,
                post_alert_ms: Some(post),
            } => write!(f, "countdown {pre_alert_ms}ms (+{post}ms repeat)"),
            Self::Countdown { pre_alert_ms, .. } => write!(f, "countdown {pre_alert_ms}ms"),
        }
    }
}

/// Lifecycle state of an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    /// Fixed alarm waiting for its instant.
    Armed,
    /// Countdown running.
    Counting,
    /// Countdown frozen; no timer armed.
    Paused,
    /// Countdown's pre-alert elapsed; alert presenting.
    Alerting,
    /// Terminal: alert delivered/acknowledged.
    Fired,
    /// Terminal: cancelled by the caller.
    Cancelled,
}

impl AlarmState {
    /// `true` for the terminal states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Fired | Self::Cancelled)
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Armed => "armed",
            Self::Counting => "counting",
            Self::Paused => "paused",
            Self::Alerting => "alerting",
            Self::Fired => "fired",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A scheduled alarm and its lifecycle bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    /// Unique id, immutable.
    pub id: AlarmId,
    /// Schedule kind and parameters, immutable.
    pub schedule: Schedule,
    /// Current lifecycle state; mutated only by the manager.
    pub state: AlarmState,
    /// Opaque display metadata (titles, button labels). Passed through
    /// unchanged, never interpreted by the core.
    #[serde(default)]
    pub presentation: serde_json::Value,
    /// Epoch millisecond of creation.
    pub created_at_ms: u64,
    /// Epoch millisecond of the most recent state transition.
    pub last_transition_at_ms: u64,
    /// Absolute deadline while `Armed` or `Counting`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fire_at_ms: Option<u64>,
    /// Frozen remainder while `Paused`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
}

impl Alarm {
    /// Build a freshly created alarm in its initial state.
    pub(crate) fn new(
        id: AlarmId,
        schedule: Schedule,
        presentation: serde_json::Value,
        now_ms: u64,
    ) -> Self {
        let (state, fire_at_ms) = match schedule {
            Schedule::Fixed { fire_at_ms } => (AlarmState::Armed, fire_at_ms),
            Schedule::Countdown { pre_alert_ms, .. } => {
                (AlarmState::Counting, now_ms.saturating_add(pre_alert_ms))
            }
        };
        Self {
            id,
            schedule,
            state,
            presentation,
            created_at_ms: now_ms,
            last_transition_at_ms: now_ms,
            fire_at_ms: Some(fire_at_ms),
            remaining_ms: None,
        }
    }

    /// Milliseconds until the alarm alerts, recomputed from the clock.
    ///
    /// Returns the frozen remainder while paused and `None` in states with
    /// no pending alert. Never drifts independently of the clock.
    #[must_use]
    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        match self.state {
            AlarmState::Armed | AlarmState::Counting => {
                self.fire_at_ms.map(|d| d.saturating_sub(now_ms))
            }
            AlarmState::Paused => self.remaining_ms,
            AlarmState::Alerting | AlarmState::Fired | AlarmState::Cancelled => None,
        }
    }

    /// Milliseconds the current countdown phase has been running.
    ///
    /// Only meaningful for countdown alarms in `Counting`; time spent paused
    /// is excluded because resuming restarts the transition timestamp.
    #[must_use]
    pub fn elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        if !self.schedule.is_countdown() || self.state != AlarmState::Counting {
            return None;
        }
        Some(now_ms.saturating_sub(self.last_transition_at_ms))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn fresh_fixed_alarm_is_armed_at_its_instant() {
        let alarm = Alarm::new(
            AlarmId::new(),
            Schedule::Fixed { fire_at_ms: 5_000 },
            serde_json::Value::Null,
            1_000,
        );
        assert_eq!(alarm.state, AlarmState::Armed);
        assert_eq!(alarm.fire_at_ms, Some(5_000));
        assert_eq!(alarm.remaining_ms(2_000), Some(3_000));
    }

    #[test]
    fn fresh_countdown_alarm_counts_from_now() {
        let alarm = Alarm::new(
            AlarmId::new(),
            Schedule::Countdown {
                pre_alert_ms: 20_000,
                post_alert_ms: Some(10_000),
            },
            serde_json::Value::Null,
            1_000,
        );
        assert_eq!(alarm.state, AlarmState::Counting);
        assert_eq!(alarm.fire_at_ms, Some(21_000));
        assert_eq!(alarm.remaining_ms(6_000), Some(15_000));
        assert_eq!(alarm.elapsed_ms(6_000), Some(5_000));
    }

    #[test]
    fn remaining_is_none_in_settled_states() {
        let mut alarm = Alarm::new(
            AlarmId::new(),
            Schedule::Fixed { fire_at_ms: 5_000 },
            serde_json::Value::Null,
            1_000,
        );
        alarm.state = AlarmState::Fired;
        assert_eq!(alarm.remaining_ms(2_000), None);
        assert_eq!(alarm.elapsed_ms(2_000), None);
    }

    #[test]
    fn remaining_never_underflows_past_deadline() {
        let alarm = Alarm::new(
            AlarmId::new(),
            Schedule::Fixed { fire_at_ms: 5_000 },
            serde_json::Value::Null,
            1_000,
        );
        assert_eq!(alarm.remaining_ms(9_000), Some(0));
    }

    #[test]
    fn schedule_serde_round_trip() {
        let schedule = Schedule::Countdown {
            pre_alert_ms: 20_000,
            post_alert_ms: Some(10_000),
        };
        let json = serde_json::to_string(&schedule).unwrap();
        let restored: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, schedule);
    }

    #[test]
    fn alarm_record_round_trip_keeps_presentation_opaque() {
        let presentation = serde_json::json!({
            "alert_title": "Time's Up!!",
            "stop_button": { "text": "Stop", "system_image": "stop.fill" },
            "secondary_button": { "text": "Repeat" },
        });
        let alarm = Alarm::new(
            AlarmId::new(),
            Schedule::Countdown {
                pre_alert_ms: 1_000,
                post_alert_ms: None,
            },
            presentation.clone(),
            42,
        );
        let json = serde_json::to_string(&alarm).unwrap();
        let restored: Alarm = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, alarm.id);
        assert_eq!(restored.presentation, presentation);
        assert_eq!(restored.state, AlarmState::Counting);
    }

    #[test]
    fn alarm_id_parses_back_from_display() {
        let id = AlarmId::new();
        let parsed: AlarmId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
