//! Task lifecycle states and status updates.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CoreError, SlaveId, TaskId};

/// Lifecycle state of a launched task.
///
/// Variants are declared in liveness order, so `Ord` follows
/// `Staging < Starting < Running < Killing < terminal states`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Launch accepted, not yet confirmed on the host.
    Staging,
    /// Host is starting the task.
    Starting,
    /// Task is running.
    Running,
    /// A kill has been requested and not yet confirmed.
    Killing,
    /// Task exited successfully.
    Finished,
    /// Task exited with a failure.
    Failed,
    /// Task was killed.
    Killed,
    /// Task was lost with its host.
    Lost,
    /// Task description was invalid.
    Error,
}

impl TaskState {
    /// All states, in liveness order.
    pub const ALL: [TaskState; 9] = [
        TaskState::Staging,
        TaskState::Starting,
        TaskState::Running,
        TaskState::Killing,
        TaskState::Finished,
        TaskState::Failed,
        TaskState::Killed,
        TaskState::Lost,
        TaskState::Error,
    ];

    /// Map a protocol status code onto a state.
    pub fn from_code(code: i32) -> Result<Self, CoreError> {
        match code {
            0 => Ok(Self::Starting),
            1 => Ok(Self::Running),
            2 => Ok(Self::Finished),
            3 => Ok(Self::Failed),
            4 => Ok(Self::Killed),
            5 => Ok(Self::Lost),
            6 => Ok(Self::Staging),
            7 => Ok(Self::Error),
            8 => Ok(Self::Killing),
            other => Err(CoreError::UnknownTaskState(other)),
        }
    }

    /// Protocol status code of this state.
    pub fn code(self) -> i32 {
        match self {
            Self::Starting => 0,
            Self::Running => 1,
            Self::Finished => 2,
            Self::Failed => 3,
            Self::Killed => 4,
            Self::Lost => 5,
            Self::Staging => 6,
            Self::Error => 7,
            Self::Killing => 8,
        }
    }

    /// Returns true while the task holds the resources it was launched with.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Staging | Self::Starting | Self::Running)
    }

    /// Returns true if the task will not change state again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Failed | Self::Killed | Self::Lost | Self::Error
        )
    }

    /// Returns true for the only successful terminal state.
    pub fn is_success(self) -> bool {
        self == Self::Finished
    }

    /// Protocol name of the state, e.g. `TASK_RUNNING`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Staging => "TASK_STAGING",
            Self::Starting => "TASK_STARTING",
            Self::Running => "TASK_RUNNING",
            Self::Killing => "TASK_KILLING",
            Self::Finished => "TASK_FINISHED",
            Self::Failed => "TASK_FAILED",
            Self::Killed => "TASK_KILLED",
            Self::Lost => "TASK_LOST",
            Self::Error => "TASK_ERROR",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i32> for TaskState {
    type Error = CoreError;

    fn try_from(code: i32) -> Result<Self, CoreError> {
        Self::from_code(code)
    }
}

/// A status update delivered by the cluster manager for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Task the update is about.
    pub task_id: TaskId,

    /// New lifecycle state.
    pub state: TaskState,

    /// Host that reported the update, if known.
    pub slave_id: Option<SlaveId>,

    /// Human readable reason attached by the manager.
    pub message: Option<String>,

    /// Health check result, if the task has one.
    pub healthy: Option<bool>,

    /// Seconds since the epoch at which the update was generated.
    pub timestamp: f64,

    /// Opaque acknowledgement token echoed back to the manager.
    pub uuid: Vec<u8>,
}

impl StatusUpdate {
    /// Create a status update stamped with the current time.
    pub fn new(task_id: TaskId, state: TaskState) -> Self {
        Self {
            task_id,
            state,
            slave_id: None,
            message: None,
            healthy: None,
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            uuid: Vec::new(),
        }
    }

    /// Builder method to set the reporting host.
    pub fn with_slave(mut self, slave_id: SlaveId) -> Self {
        self.slave_id = Some(slave_id);
        self
    }

    /// Builder method to set the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Builder method to set the health check result.
    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = Some(healthy);
        self
    }

    /// Builder method to set the acknowledgement token.
    pub fn with_uuid(mut self, uuid: Vec<u8>) -> Self {
        self.uuid = uuid;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_for_every_state() {
        for state in TaskState::ALL {
            assert_eq!(TaskState::from_code(state.code()).unwrap(), state);
        }
    }

    #[test]
    fn test_protocol_codes() {
        assert_eq!(TaskState::Starting.code(), 0);
        assert_eq!(TaskState::Staging.code(), 6);
        assert_eq!(TaskState::Killing.code(), 8);
        assert!(matches!(
            TaskState::from_code(42),
            Err(CoreError::UnknownTaskState(42))
        ));
    }

    #[test]
    fn test_live_and_terminal_partition() {
        let live: Vec<_> = TaskState::ALL.into_iter().filter(|s| s.is_live()).collect();
        assert_eq!(
            live,
            vec![TaskState::Staging, TaskState::Starting, TaskState::Running]
        );
        assert!(!TaskState::Killing.is_live());
        assert!(!TaskState::Killing.is_terminal());
        assert!(TaskState::Lost.is_terminal());
    }

    #[test]
    fn test_liveness_order() {
        assert!(TaskState::Staging < TaskState::Running);
        assert!(TaskState::Running < TaskState::Killing);
        assert!(TaskState::Killing < TaskState::Finished);
    }
}
