//! taskproc Scheduler Library
//!
//! Offer-driven framework scheduler: matches pending tasks to resource
//! offers from a cluster manager, supervises their launch, and tracks every
//! task through its lifecycle.

pub mod blacklist;
pub mod config;
pub mod constraint;
pub mod driver;
pub mod error;
pub mod matcher;
pub mod metrics;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod staging;

pub use blacklist::SlaveBlacklist;
pub use config::{SchedulerConfig, StopPolicy};
pub use constraint::{PlacementConstraint, PoolConstraint};
pub use driver::{Filters, MasterInfo, Operation, SchedulerDriver};
pub use error::{DriverError, MatchError, SchedulerError};
pub use matcher::{Packing, ResourceMatcher};
pub use registry::{Outcome, TaskRecord, TaskRegistry};
pub use scheduler::{ExecutionFramework, FrameworkBuilder, OfferReport, StatusCallback, Translator};
pub use staging::StagingSupervisor;
pub use reconcile::ReconciliationGate;
