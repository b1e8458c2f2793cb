//! Greedy packing of pending tasks into a single offer.

use std::collections::BTreeSet;
use std::sync::Arc;

use taskproc_core::{Offer, TaskConfig, TaskId, TaskInfo};

use crate::constraint::PlacementConstraint;
use crate::error::MatchError;

/// Resources of an offer not yet handed out in the current pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Remaining {
    pub cpus: f64,
    pub mem: f64,
    pub disk: f64,
    pub ports: BTreeSet<u16>,
}

impl Remaining {
    fn of(offer: &Offer) -> Self {
        Self {
            cpus: offer.resources.cpus,
            mem: offer.resources.mem,
            disk: offer.resources.disk,
            ports: offer.resources.port_set(),
        }
    }

    /// At least one free port is required for any task, plus as many as
    /// the task asks for.
    fn fits(&self, task: &TaskConfig) -> bool {
        let ports_needed = usize::try_from(task.ports).unwrap_or(usize::MAX).max(1);
        self.cpus >= task.cpus
            && self.mem >= task.mem
            && self.disk >= task.disk
            && self.ports.len() >= ports_needed
    }

    fn take(&mut self, task: &TaskConfig) -> Vec<u16> {
        self.cpus -= task.cpus;
        self.mem -= task.mem;
        self.disk -= task.disk;

        let mut assigned = Vec::with_capacity(task.ports as usize);
        for _ in 0..task.ports {
            match self.ports.pop_first() {
                Some(port) => assigned.push(port),
                None => break,
            }
        }
        assigned
    }
}

/// Tasks admitted into one offer.
#[derive(Debug, Clone)]
pub struct Packing {
    /// Launch descriptors, in queue order.
    pub tasks: Vec<TaskInfo>,
    /// Number of queue entries the packing consumed from the head.
    pub consumed: usize,
    /// What is left of the offer.
    pub remaining: Remaining,
}

/// Packs pending tasks into offers.
#[derive(Clone)]
pub struct ResourceMatcher {
    constraint: Arc<dyn PlacementConstraint>,
}

impl ResourceMatcher {
    pub fn new(constraint: Arc<dyn PlacementConstraint>) -> Self {
        Self { constraint }
    }

    /// Admit tasks from the head of `pending` while they fit.
    ///
    /// Stops at the first task that does not fit or is rejected by the
    /// placement constraint; later tasks are never tried ahead of it.
    /// Fails with [`MatchError::ConstraintFailAllTasks`] when every task
    /// considered was rejected by the constraint rather than by size.
    pub fn match_offer<'a>(
        &self,
        offer: &Offer,
        pending: impl IntoIterator<Item = &'a TaskConfig>,
    ) -> Result<Packing, MatchError> {
        let mut remaining = Remaining::of(offer);
        let mut tasks = Vec::new();
        let mut considered = 0usize;
        let mut failed_constraints = 0usize;

        for task in pending {
            considered += 1;

            if !remaining.fits(task) {
                break;
            }
            if !self.constraint.admits(offer, task) {
                failed_constraints += 1;
                break;
            }

            let host_ports = remaining.take(task);
            let task_id = TaskId::generate(&task.name);
            tasks.push(TaskInfo::from_config(
                task,
                task_id,
                offer.slave_id.clone(),
                host_ports,
            ));
        }

        if considered > 0 && failed_constraints == considered {
            return Err(MatchError::ConstraintFailAllTasks {
                offer_id: offer.id.clone(),
            });
        }

        Ok(Packing {
            consumed: tasks.len(),
            tasks,
            remaining,
        })
    }
}
