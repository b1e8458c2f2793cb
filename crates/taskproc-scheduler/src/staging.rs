//! Deadline timers for tasks stuck in staging.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use taskproc_core::{Offer, TaskId};

use crate::blacklist::SlaveBlacklist;
use crate::driver::SchedulerDriver;
use crate::registry::TaskRegistry;

/// Arms one staging deadline per launched task.
///
/// When a deadline passes while the task is still staging, the host it was
/// placed on is blacklisted and the task is killed. The timer handle lives
/// in the task's registry record; firing and disarming both go through the
/// registry lock, so exactly one of them wins.
#[derive(Clone)]
pub struct StagingSupervisor {
    timeout: Duration,
    registry: Arc<TaskRegistry>,
    blacklist: SlaveBlacklist,
    driver: Arc<dyn SchedulerDriver>,
}

impl StagingSupervisor {
    pub fn new(
        timeout: Duration,
        registry: Arc<TaskRegistry>,
        blacklist: SlaveBlacklist,
        driver: Arc<dyn SchedulerDriver>,
    ) -> Self {
        Self {
            timeout,
            registry,
            blacklist,
            driver,
        }
    }

    /// Record a task launched on `offer` as staging and arm its deadline.
    ///
    /// Returns false if the task id was already recorded.
    pub async fn arm(&self, task_id: &TaskId, offer: &Offer) -> bool {
        let this = self.clone();
        let timer_task_id = task_id.clone();

        self.registry
            .insert_launched(task_id.clone(), offer, move || {
                tokio::spawn(async move {
                    tokio::time::sleep(this.timeout).await;
                    this.expire(&timer_task_id).await;
                })
            })
            .await
    }

    async fn expire(&self, task_id: &TaskId) {
        let Some(slave_id) = self.registry.claim_staging_timeout(task_id).await else {
            return;
        };

        error!(
            task_id = %task_id,
            name = task_id.name(),
            slave_id = %slave_id,
            timeout_secs = self.timeout.as_secs_f64(),
            "Task stuck launching, assuming it failed. Killing task."
        );

        self.blacklist.blacklist(&slave_id).await;

        if let Err(e) = self.driver.kill_task(task_id).await {
            warn!(task_id = %task_id, error = %e, "Failed to kill task stuck in staging");
        }
        self.registry.mark_killing(task_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::RecordingDriver;
    use taskproc_core::{Resources, SlaveId, TaskState};

    struct Fixture {
        supervisor: StagingSupervisor,
        registry: Arc<TaskRegistry>,
        blacklist: SlaveBlacklist,
        driver: Arc<RecordingDriver>,
    }

    fn fixture(timeout_secs: u64) -> Fixture {
        let registry = Arc::new(TaskRegistry::new(false));
        let blacklist = SlaveBlacklist::new(Duration::from_secs(3600));
        let driver = Arc::new(RecordingDriver::default());
        let supervisor = StagingSupervisor::new(
            Duration::from_secs(timeout_secs),
            registry.clone(),
            blacklist.clone(),
            driver.clone(),
        );
        Fixture {
            supervisor,
            registry,
            blacklist,
            driver,
        }
    }

    fn offer() -> Offer {
        Offer::new("o1", "slave-1", "host-1", Resources::new(1.0, 512.0, 0.0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_before_deadline_cancels_timer() {
        let f = fixture(10);
        let id = TaskId::new("job.1");
        assert!(f.supervisor.arm(&id, &offer()).await);

        tokio::time::sleep(Duration::from_secs(3)).await;
        f.registry.set_state(&id, TaskState::Running).await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(f.driver.kills().is_empty());
        assert!(!f.blacklist.is_blacklisted(&SlaveId::new("slave-1")).await);
        assert_eq!(f.registry.get(&id).await.unwrap().state, TaskState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_kills_and_blacklists() {
        let f = fixture(10);
        let id = TaskId::new("job.1");
        f.supervisor.arm(&id, &offer()).await;

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(f.driver.kills().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.driver.kills(), vec![id.clone()]);
        assert!(f.blacklist.is_blacklisted(&SlaveId::new("slave-1")).await);
        assert_eq!(f.registry.get(&id).await.unwrap().state, TaskState::Killing);
        assert!(!f.registry.has_staging_timer(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_after_firing_does_not_fire_again() {
        let f = fixture(10);
        let id = TaskId::new("job.1");
        f.supervisor.arm(&id, &offer()).await;

        tokio::time::sleep(Duration::from_secs(11)).await;
        f.registry.set_state(&id, TaskState::Killed).await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(f.driver.kills().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_racing_updates_fire_at_most_once() {
        let f = fixture(10);
        let ids: Vec<_> = (0..20).map(|i| TaskId::new(format!("job.{i}"))).collect();
        for id in &ids {
            f.supervisor.arm(id, &offer()).await;
        }

        // Half of the tasks report running right at the deadline.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let mut updates = Vec::new();
        for id in ids.iter().step_by(2) {
            let registry = f.registry.clone();
            let id = id.clone();
            updates.push(tokio::spawn(async move {
                registry.set_state(&id, TaskState::Running).await;
            }));
        }
        for update in updates {
            update.await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let kills = f.driver.kills();
        for id in &ids {
            let killed = kills.iter().filter(|k| *k == id).count();
            assert!(killed <= 1, "{id} killed {killed} times");
            if killed == 0 {
                let state = f.registry.get(id).await.unwrap().state;
                assert_eq!(state, TaskState::Running, "{id} was neither disarmed nor killed");
            }
        }
        // The odd tasks never reported and must have been remediated.
        for id in ids.iter().skip(1).step_by(2) {
            assert!(kills.contains(id));
        }
    }
}
