//! Outbound seam to the cluster manager.
//!
//! Transport and authentication live behind [`SchedulerDriver`]; the
//! framework only ever talks to the manager through these calls.

use async_trait::async_trait;

use taskproc_core::{OfferId, StatusUpdate, TaskId, TaskInfo};

use crate::error::DriverError;

/// Refusal filter attached to a decline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filters {
    /// How long the manager should hold back the declined resources.
    pub refuse_seconds: f64,
}

/// Operation applied to accepted offers.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Launch { task_infos: Vec<TaskInfo> },
}

/// Description of the manager the framework registered with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterInfo {
    pub id: String,
    pub hostname: String,
    pub port: u16,
}

/// Calls the framework makes towards the cluster manager.
#[async_trait]
pub trait SchedulerDriver: Send + Sync {
    async fn accept_offers(
        &self,
        offer_ids: &[OfferId],
        operations: Vec<Operation>,
    ) -> Result<(), DriverError>;

    async fn decline_offer(
        &self,
        offer_id: &OfferId,
        filters: Option<Filters>,
    ) -> Result<(), DriverError>;

    async fn kill_task(&self, task_id: &TaskId) -> Result<(), DriverError>;

    async fn acknowledge_status_update(&self, update: &StatusUpdate) -> Result<(), DriverError>;

    /// Ask the manager to resend the state of `task_ids`; empty means all
    /// tasks it knows for this framework.
    async fn reconcile_tasks(&self, task_ids: &[TaskId]) -> Result<(), DriverError>;

    async fn stop(&self) -> Result<(), DriverError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::Mutex;

    use super::*;

    /// Every call the framework made, in order.
    #[derive(Debug, Clone, PartialEq)]
    pub enum DriverCall {
        Accept {
            offer_ids: Vec<OfferId>,
            operations: Vec<Operation>,
        },
        Decline {
            offer_id: OfferId,
            filters: Option<Filters>,
        },
        Kill(TaskId),
        Acknowledge(TaskId),
        Reconcile(Vec<TaskId>),
        Stop,
    }

    /// Driver that records calls and can be told to fail.
    #[derive(Default)]
    pub struct RecordingDriver {
        calls: Mutex<Vec<DriverCall>>,
        fail_accepts: Mutex<bool>,
    }

    impl RecordingDriver {
        pub fn failing_accepts() -> Self {
            let driver = Self::default();
            *driver.fail_accepts.lock().unwrap() = true;
            driver
        }

        pub fn calls(&self) -> Vec<DriverCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn launched(&self) -> Vec<TaskInfo> {
            self.calls()
                .into_iter()
                .flat_map(|call| match call {
                    DriverCall::Accept { operations, .. } => operations
                        .into_iter()
                        .flat_map(|Operation::Launch { task_infos }| task_infos)
                        .collect(),
                    _ => Vec::new(),
                })
                .collect()
        }

        pub fn declines(&self) -> Vec<(OfferId, Option<Filters>)> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    DriverCall::Decline { offer_id, filters } => Some((offer_id, filters)),
                    _ => None,
                })
                .collect()
        }

        pub fn kills(&self) -> Vec<TaskId> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    DriverCall::Kill(id) => Some(id),
                    _ => None,
                })
                .collect()
        }

        pub fn stops(&self) -> usize {
            self.calls()
                .iter()
                .filter(|call| matches!(call, DriverCall::Stop))
                .count()
        }

        fn record(&self, call: DriverCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl SchedulerDriver for RecordingDriver {
        async fn accept_offers(
            &self,
            offer_ids: &[OfferId],
            operations: Vec<Operation>,
        ) -> Result<(), DriverError> {
            if *self.fail_accepts.lock().unwrap() {
                return Err(DriverError::ConnectionLost("master went away".to_string()));
            }
            self.record(DriverCall::Accept {
                offer_ids: offer_ids.to_vec(),
                operations,
            });
            Ok(())
        }

        async fn decline_offer(
            &self,
            offer_id: &OfferId,
            filters: Option<Filters>,
        ) -> Result<(), DriverError> {
            self.record(DriverCall::Decline {
                offer_id: offer_id.clone(),
                filters,
            });
            Ok(())
        }

        async fn kill_task(&self, task_id: &TaskId) -> Result<(), DriverError> {
            self.record(DriverCall::Kill(task_id.clone()));
            Ok(())
        }

        async fn acknowledge_status_update(
            &self,
            update: &StatusUpdate,
        ) -> Result<(), DriverError> {
            self.record(DriverCall::Acknowledge(update.task_id.clone()));
            Ok(())
        }

        async fn reconcile_tasks(&self, task_ids: &[TaskId]) -> Result<(), DriverError> {
            self.record(DriverCall::Reconcile(task_ids.to_vec()));
            Ok(())
        }

        async fn stop(&self) -> Result<(), DriverError> {
            self.record(DriverCall::Stop);
            Ok(())
        }
    }
}
