//! Outward task events translated from status updates.

use serde::{Deserialize, Serialize};

use crate::{SlaveId, StatusUpdate, TaskId, TaskState};

/// A status update as seen by consumers of the event feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Task this event belongs to.
    pub task_id: TaskId,
    /// State reported by the manager.
    pub state: TaskState,
    /// Whether the task reached a final state.
    pub terminal: bool,
    /// `Some(true)` for a successful finish, `Some(false)` for any other
    /// terminal state, `None` while the task is still in flight.
    pub success: Option<bool>,
    /// Host that reported the update.
    pub slave_id: Option<SlaveId>,
    /// Manager-provided message.
    pub message: Option<String>,
    /// Unix timestamp (milliseconds) of the update.
    pub timestamp_ms: i64,
    /// Protocol status code the state was decoded from.
    pub raw_code: i32,
}

impl From<&StatusUpdate> for TaskEvent {
    fn from(update: &StatusUpdate) -> Self {
        let terminal = update.state.is_terminal();
        Self {
            task_id: update.task_id.clone(),
            state: update.state,
            terminal,
            success: terminal.then(|| update.state.is_success()),
            slave_id: update.slave_id.clone(),
            message: update.message.clone(),
            timestamp_ms: (update.timestamp * 1000.0) as i64,
            raw_code: update.state.code(),
        }
    }
}
