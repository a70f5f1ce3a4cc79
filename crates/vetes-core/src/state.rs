//! Task lifecycle states and read views, as defined by the TES control plane.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle state of a task as reported by (and to) the control plane.
///
/// The agent only ever *writes* `Initializing`, `Running`, and the four
/// terminal states; `Queued` and `Canceling` are control-plane intents the
/// agent reacts to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Accepted by the control plane, not yet picked up by any agent.
    #[default]
    Queued,
    /// Picked up; the agent is allocating cluster objects.
    Initializing,
    /// Executors are running (or about to).
    Running,
    /// All executors finished successfully and outputs were staged.
    Complete,
    /// The agent failed the task for infrastructure reasons.
    SystemError,
    /// An executor exited nonzero.
    ExecutorError,
    /// The control plane asked for cancellation; the agent is unwinding.
    Canceling,
    /// Cancellation finished.
    Canceled,
}

impl TaskState {
    /// Returns true for the four states a task can never leave.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Complete | Self::SystemError | Self::ExecutorError | Self::Canceled
        )
    }

    /// The wire representation (`SCREAMING_SNAKE_CASE`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Initializing => "INITIALIZING",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::SystemError => "SYSTEM_ERROR",
            Self::ExecutorError => "EXECUTOR_ERROR",
            Self::Canceling => "CANCELING",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "INITIALIZING" => Ok(Self::Initializing),
            "RUNNING" => Ok(Self::Running),
            "COMPLETE" => Ok(Self::Complete),
            "SYSTEM_ERROR" => Ok(Self::SystemError),
            "EXECUTOR_ERROR" => Ok(Self::ExecutorError),
            "CANCELING" => Ok(Self::Canceling),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(Error::UnknownState {
                value: other.to_owned(),
            }),
        }
    }
}

/// How much of a task the control plane should return on reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskView {
    /// Id and state only.
    Minimal,
    /// Everything except inputs/outputs content and system logs.
    Basic,
    /// The whole task.
    Full,
}

impl TaskView {
    /// The wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "MINIMAL",
            Self::Basic => "BASIC",
            Self::Full => "FULL",
        }
    }
}

impl fmt::Display for TaskView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskView {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MINIMAL" => Ok(Self::Minimal),
            "BASIC" => Ok(Self::Basic),
            "FULL" => Ok(Self::Full),
            other => Err(Error::UnknownView {
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Complete.is_terminal());
        assert!(TaskState::SystemError.is_terminal());
        assert!(TaskState::ExecutorError.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Canceling.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[test]
    fn state_round_trips_through_str() {
        for state in [
            TaskState::Queued,
            TaskState::Initializing,
            TaskState::Running,
            TaskState::Complete,
            TaskState::SystemError,
            TaskState::ExecutorError,
            TaskState::Canceling,
            TaskState::Canceled,
        ] {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
    }

    #[test]
    fn unknown_state_is_rejected() {
        assert!("PAUSED".parse::<TaskState>().is_err());
    }
}
