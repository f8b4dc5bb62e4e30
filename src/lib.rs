//! Chime: durable alarm lifecycle management.
//!
//! This crate schedules time-based alarms that move through a small
//! lifecycle (armed → alerting, or counting → paused/resumed → alerting)
//! and fire precisely at wall-clock or relative-duration boundaries, even
//! across process restarts.
//!
//! # Architecture
//!
//! The manager sits between injected environment seams and its consumers:
//! - **Clock source**: wall-clock reads go through [`Clock`] (system or
//!   manual for tests)
//! - **Persistence store**: one durable JSON record per alarm via
//!   [`AlarmStore`]
//! - **Timer engine**: one-shot wake-ups scheduled against the clock via
//!   [`TimerEngine`]
//! - **Authorization gate**: every mutating call requires a granted
//!   [`AuthorizationGate`]
//! - **Event bus**: lifecycle events fan out to subscribers without ever
//!   blocking the manager
//!
//! # Wiring
//!
//! Construct the manager once at process start and share it:
//!
//! ```no_run
//! use std::sync::Arc;
//! use chime::{
//!     AlarmManager, AuthorizationGate, AuthorizationState, ChimeConfig, Clock, FileStore,
//!     Schedule, StaticAuthority, SystemClock, TimerEngine, TokioTimerEngine,
//! };
//!
//! # async fn wire() -> chime::Result<()> {
//! let config = ChimeConfig::load();
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let store = Arc::new(FileStore::new(
//!     config.resolved_state_dir().unwrap_or_else(|| "alarms".into()),
//! ));
//! let gate = AuthorizationGate::new(Box::new(StaticAuthority(AuthorizationState::Granted)));
//!
//! let (fire_tx, fire_rx) = tokio::sync::mpsc::unbounded_channel();
//! let timers: Arc<dyn TimerEngine> = Arc::new(
//!     TokioTimerEngine::new(Arc::clone(&clock), fire_tx).with_slice_ms(config.timer_slice_ms),
//! );
//!
//! let manager = AlarmManager::new(clock, store, gate, timers, &config);
//! manager.recover().await?;
//! let _fire_loop = Arc::clone(&manager).spawn_fire_loop(fire_rx);
//!
//! manager.request_authorization().await;
//! let id = manager
//!     .create(
//!         Schedule::Countdown {
//!             pre_alert_ms: 20_000,
//!             post_alert_ms: Some(10_000),
//!         },
//!         serde_json::json!({ "alert_title": "Time's Up!!" }),
//!     )
//!     .await?;
//! manager.pause(id).await?;
//! # Ok(())
//! # }
//! ```

pub mod alarm;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod manager;
pub mod store;
pub mod timer;

pub use alarm::{Alarm, AlarmId, AlarmState, Schedule};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ChimeConfig;
pub use error::{AlarmError, Result};
pub use events::{AlarmEvent, AlarmEventKind, EventBus, Subscription};
pub use gate::{AuthorityProvider, AuthorizationGate, AuthorizationState, StaticAuthority};
pub use manager::AlarmManager;
pub use store::{AlarmStore, FileStore, MemoryStore};
pub use timer::{ManualTimerEngine, TimerEngine, TimerFire, TimerHandle, TokioTimerEngine};
