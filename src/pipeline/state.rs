//! Session state management

use std::time::Instant;

/// Session state machine
///
/// `Idle → Active → Stopping → Idle`. A session can be started again once it
/// is back to `Idle`; starting while `Active` or `Stopping` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not accepting frames
    Idle,

    /// Accepting frames
    Active {
        /// When the session started
        started_at: Instant,
    },

    /// End of stream signalled, waiting for outputs to finalize
    Stopping,
}

impl SessionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, target),
            (Idle, Active { .. }) | (Active { .. }, Stopping) | (Stopping, Idle)
        )
    }

    fn description(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Active { .. } => "Active",
            SessionState::Stopping => "Stopping",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
