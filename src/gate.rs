//! Authorization gate for the alarm scheduling capability.
//!
//! The gate tracks whether the external authority (an OS-level permission
//! prompt, a policy service, a test stub) has granted the process the right
//! to schedule alarms. Every mutating manager operation checks it; read-only
//! operations never do. The consent flow itself lives behind the
//! [`AuthorityProvider`] seam — the core only consumes the decision.

use crate::error::{AlarmError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tracing::info;

/// Whether the external authority has granted scheduling capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationState {
    /// No decision has been requested or recorded yet.
    NotDetermined,
    /// The authority refused the capability.
    Denied,
    /// The authority granted the capability.
    Granted,
}

impl AuthorizationState {
    /// `true` when scheduling is allowed.
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotDetermined => "not_determined",
            Self::Denied => "denied",
            Self::Granted => "granted",
        };
        f.write_str(s)
    }
}

/// External authority that resolves a consent request.
///
/// Implementations drive whatever human-facing consent flow the platform
/// provides. Returning [`AuthorizationState::NotDetermined`] (e.g. the user
/// dismissed the dialog) leaves the gate undetermined so a later request can
/// ask again.
#[async_trait]
pub trait AuthorityProvider: Send + Sync {
    /// Ask the external authority for a decision.
    async fn request_decision(&self) -> AuthorizationState;
}

/// Fixed-decision provider for tests and headless deployments.
pub struct StaticAuthority(pub AuthorizationState);

#[async_trait]
impl AuthorityProvider for StaticAuthority {
    async fn request_decision(&self) -> AuthorizationState {
        self.0
    }
}

/// Tracks the recorded authority decision and gates mutating operations.
pub struct AuthorizationGate {
    provider: Box<dyn AuthorityProvider>,
    state: Mutex<AuthorizationState>,
}

impl AuthorizationGate {
    /// Gate with no recorded decision yet.
    #[must_use]
    pub fn new(provider: Box<dyn AuthorityProvider>) -> Self {
        Self::with_state(provider, AuthorizationState::NotDetermined)
    }

    /// Gate starting from a previously recorded decision.
    #[must_use]
    pub fn with_state(provider: Box<dyn AuthorityProvider>, state: AuthorizationState) -> Self {
        Self {
            provider,
            state: Mutex::new(state),
        }
    }

    /// Current recorded decision.
    pub fn current_state(&self) -> AuthorizationState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(AuthorizationState::Denied)
    }

    /// Request the capability from the external authority.
    ///
    /// Idempotent once a terminal decision is recorded: the provider is only
    /// consulted while the gate is `NotDetermined`.
    pub async fn request_authorization(&self) -> AuthorizationState {
        if self.current_state() != AuthorizationState::NotDetermined {
            return self.current_state();
        }

        let decision = self.provider.request_decision().await;
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return AuthorizationState::Denied,
        };
        // A concurrent request may have settled the gate while the provider
        // was running; the first recorded decision wins.
        if *state == AuthorizationState::NotDetermined
            && decision != AuthorizationState::NotDetermined
        {
            info!(%decision, "alarm authorization decision recorded");
            *state = decision;
        }
        *state
    }

    /// Fail with [`AlarmError::Unauthorized`] unless the gate is granted.
    pub(crate) fn require_granted(&self) -> Result<()> {
        if self.current_state().is_granted() {
            Ok(())
        } else {
            Err(AlarmError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAuthority {
        decision: AuthorizationState,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AuthorityProvider for CountingAuthority {
        async fn request_decision(&self) -> AuthorizationState {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.decision
        }
    }

    #[tokio::test]
    async fn grant_is_sticky_and_provider_consulted_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = AuthorizationGate::new(Box::new(CountingAuthority {
            decision: AuthorizationState::Granted,
            calls: Arc::clone(&calls),
        }));

        assert_eq!(gate.current_state(), AuthorizationState::NotDetermined);
        assert_eq!(
            gate.request_authorization().await,
            AuthorizationState::Granted
        );
        assert_eq!(
            gate.request_authorization().await,
            AuthorizationState::Granted
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(gate.require_granted().is_ok());
    }

    #[tokio::test]
    async fn denial_is_sticky() {
        let gate = AuthorizationGate::new(Box::new(StaticAuthority(AuthorizationState::Denied)));
        assert_eq!(
            gate.request_authorization().await,
            AuthorizationState::Denied
        );
        assert_eq!(
            gate.request_authorization().await,
            AuthorizationState::Denied
        );
        assert!(matches!(
            gate.require_granted(),
            Err(AlarmError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn dismissed_dialog_leaves_gate_undetermined() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = AuthorizationGate::new(Box::new(CountingAuthority {
            decision: AuthorizationState::NotDetermined,
            calls: Arc::clone(&calls),
        }));

        assert_eq!(
            gate.request_authorization().await,
            AuthorizationState::NotDetermined
        );
        assert_eq!(
            gate.request_authorization().await,
            AuthorizationState::NotDetermined
        );
        // Still undetermined, so the provider is asked each time.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn restored_decision_gates_immediately() {
        let gate = AuthorizationGate::with_state(
            Box::new(StaticAuthority(AuthorizationState::Granted)),
            AuthorizationState::Granted,
        );
        assert!(gate.require_granted().is_ok());
    }
}
