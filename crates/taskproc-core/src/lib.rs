//! taskproc Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The cluster manager driver
//! - Async runtime specifics
//! - Timers or locking
//!
//! Everything here describes what the scheduler reasons about: resource
//! offers, unlaunched task configs, launch descriptors and lifecycle states.

pub mod error;
pub mod event;
pub mod ids;
pub mod offer;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use event::TaskEvent;
pub use ids::{FrameworkId, OfferId, SlaveId, TaskId};
pub use offer::{Offer, PortRange, Resources};
pub use status::{StatusUpdate, TaskState};
pub use task::{DockerParameter, FrameworkInfo, TaskConfig, TaskInfo, Volume, VolumeMode};
