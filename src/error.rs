//! Error types for the alarm lifecycle core.

use crate::alarm::{AlarmId, AlarmState};

/// Top-level error type for alarm operations.
#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    /// The authorization gate has not granted scheduling capability.
    #[error("alarm scheduling not authorized")]
    Unauthorized,

    /// No alarm with the given id.
    #[error("alarm {0} not found")]
    NotFound(AlarmId),

    /// Creation parameters were malformed.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The operation is not valid in the alarm's current state.
    #[error("cannot {op} an alarm in state {from}")]
    InvalidTransition {
        /// State the alarm was in when the operation arrived.
        from: AlarmState,
        /// Name of the rejected operation.
        op: &'static str,
    },

    /// The alarm has already reached a terminal state.
    #[error("alarm already terminal ({0})")]
    AlreadyTerminal(AlarmState),

    /// Durable read/write failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AlarmError>;
