//! Session state management

use std::time::Instant;

/// Streaming session state machine
///
/// State transitions are validated to keep startup and teardown ordered:
/// a session that failed to start never reaches `Running`, and a stopped
/// session can never be restarted (a new session gets fresh state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session created but streaming not yet requested
    Idle,

    /// Sinks are being spawned and threads started
    Initializing,

    /// Session is actively streaming
    Running {
        /// When streaming started
        started_at: Instant,
    },

    /// Teardown in progress (transitioning to Stopped)
    Stopping,

    /// Session has stopped and cannot be restarted
    Stopped,
}

impl SessionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        match (self, target) {
            (Idle, Initializing) => true,

            (Initializing, Running { .. }) => true,
            (Initializing, Stopping) => true, // startup failure aborts

            (Running { .. }, Stopping) => true,

            (Stopping, Stopped) => true,

            (Stopped, _) => false,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Initializing => "Initializing",
            SessionState::Running { .. } => "Running",
            SessionState::Stopping => "Stopping",
            SessionState::Stopped => "Stopped",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Stopping)
    }

    /// Duration since streaming started (if running)
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        if let SessionState::Running { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
