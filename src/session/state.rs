//! Session lifecycle state machine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Plan uploaded, nothing running
    Created,
    /// Engine processes are being launched
    Starting,
    /// Engine processes are alive
    Running,
    /// Caller asked to stop; processes are being terminated
    Stopping,
    /// Caller-initiated stop completed
    Stopped,
    /// Every engine exited cleanly
    Finished,
    /// Launch failed or an engine exited non-zero
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Stopped | SessionStatus::Finished | SessionStatus::Error
        )
    }

    /// Whether the session owns (or is acquiring) engine processes
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::Starting | SessionStatus::Running | SessionStatus::Stopping
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Finished => "finished",
            SessionStatus::Error => "error",
        }
    }

    /// Next state for `event`, or `None` when the transition is not allowed.
    ///
    /// Terminal states accept no events.
    pub fn on(self, event: &SessionEvent) -> Option<SessionStatus> {
        use SessionEvent as E;
        use SessionStatus as S;

        match (self, event) {
            (S::Created, E::Start) => Some(S::Starting),

            (S::Starting, E::Launched) => Some(S::Running),
            (S::Starting | S::Stopping, E::LaunchFailed(_)) => Some(S::Error),
            (S::Starting | S::Running, E::StopRequested) => Some(S::Stopping),
            (S::Starting | S::Running, E::Exited { success: true, .. }) => Some(S::Finished),
            (S::Starting | S::Running, E::Exited { success: false, .. }) => Some(S::Error),

            // A stop raced the launch; the supervisor tears the group down.
            (S::Stopping, E::Launched) => Some(S::Stopping),
            (S::Stopping, E::Exited { .. } | E::StopCompleted) => Some(S::Stopped),

            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events driving [`SessionStatus`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Start request accepted
    Start,
    /// Every engine process was spawned
    Launched,
    /// Spawning failed
    LaunchFailed(String),
    /// The process group exited on its own
    Exited { success: bool, message: String },
    /// Caller asked to stop
    StopRequested,
    /// Processes were terminated after a stop request
    StopCompleted,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Start => "start",
            SessionEvent::Launched => "launch",
            SessionEvent::LaunchFailed(_) => "fail launch of",
            SessionEvent::Exited { .. } => "exit",
            SessionEvent::StopRequested => "stop",
            SessionEvent::StopCompleted => "complete stop of",
        }
    }
}
