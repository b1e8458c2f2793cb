//! Authoritative record of every launched task.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use taskproc_core::{Offer, SlaveId, StatusUpdate, TaskId, TaskState};

/// How many outcomes of garbage-collected tasks are remembered for late
/// `wait` calls.
pub const REAPED_OUTCOMES_KEPT: usize = 1000;

/// Final result of a task, as seen by `wait_for`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn of(state: TaskState) -> Self {
        if state.is_success() {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// Bookkeeping kept for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    /// Current lifecycle state.
    pub state: TaskState,

    /// Offer the task was placed on. Absent for tasks first seen through a
    /// status update.
    pub offer: Option<Offer>,

    /// Last health check result.
    pub is_healthy: bool,

    /// Whether the task is being moved off its host. Set through
    /// [`TaskRegistry::set_draining`].
    pub is_draining: bool,

    /// Whether the next `gc` drops this record.
    pub marked_for_removal: bool,

    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    fn new(state: TaskState, offer: Option<Offer>) -> Self {
        Self {
            state,
            offer,
            is_healthy: false,
            is_draining: false,
            marked_for_removal: false,
            updated_at: Utc::now(),
        }
    }

    /// Host the task was placed on.
    pub fn slave_id(&self) -> Option<&SlaveId> {
        self.offer.as_ref().map(|o| &o.slave_id)
    }
}

struct Entry {
    record: TaskRecord,
    staging_timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<TaskId, Entry>,
    waiters: HashMap<TaskId, Vec<oneshot::Sender<Outcome>>>,
    /// Outcomes of dropped records, oldest first in `reaped_order`.
    reaped: HashMap<TaskId, Outcome>,
    reaped_order: VecDeque<TaskId>,
}

impl RegistryState {
    fn resolve_waiters(&mut self, task_id: &TaskId, outcome: Outcome) {
        if let Some(waiters) = self.waiters.remove(task_id) {
            for waiter in waiters {
                // The waiter may have given up; nothing to do then.
                let _ = waiter.send(outcome);
            }
        }
    }

    fn remember_reaped(&mut self, task_id: TaskId, outcome: Outcome) {
        if self.reaped.insert(task_id.clone(), outcome).is_none() {
            self.reaped_order.push_back(task_id);
        }
        while self.reaped_order.len() > REAPED_OUTCOMES_KEPT {
            if let Some(oldest) = self.reaped_order.pop_front() {
                self.reaped.remove(&oldest);
            }
        }
    }

    fn upsert(&mut self, task_id: &TaskId, state: TaskState) -> bool {
        if self.entries.contains_key(task_id) {
            return false;
        }
        self.entries.insert(
            task_id.clone(),
            Entry {
                record: TaskRecord::new(state, None),
                staging_timer: None,
            },
        );
        true
    }

    fn set_state(&mut self, task_id: &TaskId, state: TaskState, reap: bool) -> Option<TaskState> {
        let entry = self.entries.get_mut(task_id)?;
        let previous = std::mem::replace(&mut entry.record.state, state);
        entry.record.updated_at = Utc::now();

        if state != TaskState::Staging {
            if let Some(timer) = entry.staging_timer.take() {
                timer.abort();
                debug!(task_id = %task_id, state = %state, "Disarmed staging timer");
            }
        }

        if state.is_terminal() {
            if reap {
                entry.record.marked_for_removal = true;
            }
            self.resolve_waiters(task_id, Outcome::of(state));
        }

        Some(previous)
    }
}

/// Map from task id to its record, guarded by its own lock.
///
/// The lock is taken per call and never held across a driver call.
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
    reap_terminal: bool,
}

impl TaskRegistry {
    /// Create an empty registry. With `reap_terminal`, records are marked
    /// for removal as soon as they reach a terminal state.
    pub fn new(reap_terminal: bool) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            reap_terminal,
        }
    }

    /// Record a task launched on `offer` in `Staging`, arming its staging
    /// timer with `arm`. The timer is spawned under the registry lock so it
    /// cannot claim the record before it exists.
    ///
    /// Returns false and arms nothing if the id is already known.
    pub(crate) async fn insert_launched<F>(&self, task_id: TaskId, offer: &Offer, arm: F) -> bool
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut state = self.state.lock().await;
        if state.entries.contains_key(&task_id) {
            return false;
        }
        state.entries.insert(
            task_id,
            Entry {
                record: TaskRecord::new(TaskState::Staging, Some(offer.clone())),
                staging_timer: Some(arm()),
            },
        );
        true
    }

    /// Insert a record in `state` unless one exists. Returns whether it was
    /// created.
    pub async fn upsert(&self, task_id: &TaskId, state: TaskState) -> bool {
        self.state.lock().await.upsert(task_id, state)
    }

    /// Move a task to `state`, returning the previous state.
    ///
    /// Leaving `Staging` disarms the staging timer; reaching a terminal
    /// state resolves every `wait_for` on the task.
    pub async fn set_state(&self, task_id: &TaskId, state: TaskState) -> Option<TaskState> {
        self.state
            .lock()
            .await
            .set_state(task_id, state, self.reap_terminal)
    }

    /// Apply a status update atomically: upsert, set state, record health,
    /// then garbage-collect. Returns the previous state if the task was
    /// already known.
    pub async fn apply_status(&self, update: &StatusUpdate) -> Option<TaskState> {
        let mut state = self.state.lock().await;
        let created = state.upsert(&update.task_id, update.state);
        let previous = state.set_state(&update.task_id, update.state, self.reap_terminal);

        if let Some(healthy) = update.healthy {
            if let Some(entry) = state.entries.get_mut(&update.task_id) {
                entry.record.is_healthy = healthy;
            }
        }

        let removed = Self::gc_locked(&mut state);
        if removed > 0 {
            trace!(removed, "Garbage collected task records");
        }

        if created {
            None
        } else {
            previous
        }
    }

    /// Flag a task as being killed, unless it already reached a terminal
    /// state. Returns whether the state changed.
    pub async fn mark_killing(&self, task_id: &TaskId) -> bool {
        let mut state = self.state.lock().await;
        let in_flight = state
            .entries
            .get(task_id)
            .is_some_and(|e| !e.record.state.is_terminal());
        if in_flight {
            state.set_state(task_id, TaskState::Killing, self.reap_terminal);
        }
        in_flight
    }

    /// Take the staging timer of a task still in `Staging` and return the
    /// host it was placed on. Called by the timer itself when it fires;
    /// `None` means the timer was already disarmed and must not act.
    pub(crate) async fn claim_staging_timeout(&self, task_id: &TaskId) -> Option<SlaveId> {
        let mut state = self.state.lock().await;
        let entry = state.entries.get_mut(task_id)?;
        if entry.record.state != TaskState::Staging {
            return None;
        }
        entry.staging_timer.take()?;
        entry.record.slave_id().cloned()
    }

    pub async fn get(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.state
            .lock()
            .await
            .entries
            .get(task_id)
            .map(|e| e.record.clone())
    }

    /// Whether a staging timer is currently armed for the task.
    pub async fn has_staging_timer(&self, task_id: &TaskId) -> bool {
        self.state
            .lock()
            .await
            .entries
            .get(task_id)
            .is_some_and(|e| e.staging_timer.is_some())
    }

    /// Mark a record so the next `gc` drops it. Returns false for unknown ids.
    pub async fn mark_for_removal(&self, task_id: &TaskId) -> bool {
        match self.state.lock().await.entries.get_mut(task_id) {
            Some(entry) => {
                entry.record.marked_for_removal = true;
                true
            }
            None => false,
        }
    }

    /// Drop every record marked for removal. Returns how many were dropped.
    pub async fn gc(&self) -> usize {
        Self::gc_locked(&mut *self.state.lock().await)
    }

    /// Drops marked records, remembering their outcome. A record dropped
    /// before reaching a terminal state counts as a failure.
    fn gc_locked(state: &mut RegistryState) -> usize {
        let marked: Vec<_> = state
            .entries
            .iter()
            .filter(|(_, e)| e.record.marked_for_removal)
            .map(|(id, _)| id.clone())
            .collect();

        for task_id in &marked {
            let Some(mut entry) = state.entries.remove(task_id) else {
                continue;
            };
            if let Some(timer) = entry.staging_timer.take() {
                timer.abort();
            }
            let outcome = Outcome::of(entry.record.state);
            state.resolve_waiters(task_id, outcome);
            state.remember_reaped(task_id.clone(), outcome);
        }
        marked.len()
    }

    /// Ids of tasks in a live state, sorted.
    pub async fn live_task_ids(&self) -> Vec<TaskId> {
        let state = self.state.lock().await;
        let mut ids: Vec<_> = state
            .entries
            .iter()
            .filter(|(_, e)| e.record.state.is_live())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Live tasks launched for the logical name `name`, sorted.
    pub async fn live_tasks_named(&self, name: &str) -> Vec<TaskId> {
        self.live_task_ids()
            .await
            .into_iter()
            .filter(|id| id.belongs_to(name))
            .collect()
    }

    /// Live tasks launched for any other logical name than `name`, sorted.
    pub async fn live_tasks_not_named(&self, name: &str) -> Vec<TaskId> {
        self.live_task_ids()
            .await
            .into_iter()
            .filter(|id| !id.belongs_to(name))
            .collect()
    }

    /// True when no recorded task is live or being killed.
    pub async fn is_settled(&self) -> bool {
        let state = self.state.lock().await;
        state
            .entries
            .values()
            .all(|e| e.record.state.is_terminal())
    }

    /// Register interest in the final outcome of a task.
    ///
    /// Resolves immediately if the task is already terminal, or if its
    /// record was garbage-collected recently enough for its outcome to be
    /// remembered.
    pub async fn wait(&self, task_id: &TaskId) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().await;

        let known = match state.entries.get(task_id) {
            Some(entry) if entry.record.state.is_terminal() => {
                Some(Outcome::of(entry.record.state))
            }
            Some(_) => None,
            None => state.reaped.get(task_id).copied(),
        };
        match known {
            Some(outcome) => {
                let _ = tx.send(outcome);
            }
            None => state.waiters.entry(task_id.clone()).or_default().push(tx),
        }
        rx
    }

    /// Flag whether a task is being drained. Returns false for unknown ids.
    pub async fn set_draining(&self, task_id: &TaskId, draining: bool) -> bool {
        match self.state.lock().await.entries.get_mut(task_id) {
            Some(entry) => {
                entry.record.is_draining = draining;
                entry.record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Number of records per lifecycle state; every state is present.
    pub async fn counts_by_state(&self) -> BTreeMap<TaskState, usize> {
        let mut counts: BTreeMap<_, _> = TaskState::ALL.into_iter().map(|s| (s, 0)).collect();
        for entry in self.state.lock().await.entries.values() {
            *counts.entry(entry.record.state).or_default() += 1;
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }
}
