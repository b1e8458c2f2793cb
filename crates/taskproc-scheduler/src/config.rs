//! Scheduler configuration.

use std::time::Duration;

use taskproc_core::FrameworkInfo;

/// When the framework asks the driver to stop on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopPolicy {
    /// Keep running until shut down from outside.
    #[default]
    Never,
    /// Stop once the pending queue is empty, something was launched and no
    /// recorded task is live or being killed (one-shot runs).
    WhenDrained,
}

/// Scheduler configuration. Fixed at construction, never reloaded.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Framework name registered with the cluster manager.
    pub name: String,

    /// How long a launched task may stay in staging before it is killed.
    pub staging_timeout: Duration,

    /// Grace period after (re)registration during which offers are declined.
    pub reconcile_backoff: Duration,

    /// How long a host stays blacklisted.
    pub blacklist_timeout: Duration,

    /// Refusal filter sent when an offer fails constraints for every task.
    pub decline_refuse_seconds: f64,

    /// Maximum number of pending tasks.
    pub queue_capacity: usize,

    /// Capacity of the outward event channel.
    pub event_buffer: usize,

    /// Report the tasks that would launch instead of launching them.
    pub dry_run: bool,

    /// Pool applied to tasks that do not name one.
    pub pool: Option<String>,

    pub stop_policy: StopPolicy,

    /// Mark records for removal as soon as they reach a terminal state.
    pub reap_terminal_tasks: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "taskproc".to_string(),
            staging_timeout: Duration::from_secs(240),
            reconcile_backoff: Duration::from_secs(1),
            blacklist_timeout: Duration::from_secs(3600),
            decline_refuse_seconds: 60.0,
            queue_capacity: 1000,
            event_buffer: 1000,
            dry_run: false,
            pool: None,
            stop_policy: StopPolicy::Never,
            reap_terminal_tasks: false,
        }
    }
}

impl SchedulerConfig {
    /// Create a config with defaults for the given framework name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_staging_timeout(mut self, timeout: Duration) -> Self {
        self.staging_timeout = timeout;
        self
    }

    pub fn with_reconcile_backoff(mut self, backoff: Duration) -> Self {
        self.reconcile_backoff = backoff;
        self
    }

    pub fn with_blacklist_timeout(mut self, timeout: Duration) -> Self {
        self.blacklist_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn with_stop_policy(mut self, policy: StopPolicy) -> Self {
        self.stop_policy = policy;
        self
    }

    pub fn with_reap_terminal_tasks(mut self, reap: bool) -> Self {
        self.reap_terminal_tasks = reap;
        self
    }

    /// Registration payload for the cluster manager.
    pub fn framework_info(&self) -> FrameworkInfo {
        FrameworkInfo::new(self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.blacklist_timeout, Duration::from_secs(3600));
        assert_eq!(config.decline_refuse_seconds, 60.0);
        assert_eq!(config.stop_policy, StopPolicy::Never);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_framework_info() {
        let info = SchedulerConfig::new("remote-run").framework_info();
        assert_eq!(info.name, "remote-run");
        assert_eq!(info.user, "");
        assert!(info.checkpoint);
    }
}
