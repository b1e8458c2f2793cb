//! Scheduler errors.

use thiserror::Error;

use taskproc_core::{CoreError, OfferId};

/// Failures reported by the cluster manager driver. Always fatal to the
/// framework: they are propagated to the owner, never retried here.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Driver connection lost: {0}")]
    ConnectionLost(String),

    #[error("Driver rejected call: {0}")]
    Rejected(String),

    #[error("Driver is not running")]
    NotRunning,
}

/// Outcome of matching one offer that must be handled by declining it.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Offer {offer_id} failed placement constraints for every task")]
    ConstraintFailAllTasks { offer_id: OfferId },
}

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Pending queue is full ({capacity} tasks)")]
    QueueFull { capacity: usize },

    #[error(transparent)]
    InvalidTask(#[from] CoreError),

    #[error("Driver failure: {0}")]
    Driver(#[from] DriverError),

    #[error("Framework is shut down")]
    Frozen,
}
