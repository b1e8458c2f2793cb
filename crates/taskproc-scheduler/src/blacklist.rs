//! Hosts temporarily excluded from scheduling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use taskproc_core::SlaveId;

#[derive(Default)]
struct Entries {
    /// Blacklisted hosts, each with the generation of the insert that
    /// scheduled its pending expiry.
    slaves: HashMap<SlaveId, u64>,
    next_generation: u64,
}

/// Set of blacklisted hosts with timed expiry.
///
/// Cheap to clone; clones share the same set. The lock is only held for
/// the insert or remove itself.
#[derive(Clone)]
pub struct SlaveBlacklist {
    entries: Arc<Mutex<Entries>>,
    timeout: Duration,
}

impl SlaveBlacklist {
    /// Create an empty blacklist whose entries expire after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries::default())),
            timeout,
        }
    }

    /// Blacklist a host and schedule its expiry.
    ///
    /// Returns false if the host was already blacklisted, in which case the
    /// pending expiry is left untouched.
    pub async fn blacklist(&self, slave_id: &SlaveId) -> bool {
        let generation = {
            let mut entries = self.entries.lock().await;
            if entries.slaves.contains_key(slave_id) {
                return false;
            }
            entries.next_generation += 1;
            let generation = entries.next_generation;
            entries.slaves.insert(slave_id.clone(), generation);
            generation
        };

        debug!(slave_id = %slave_id, timeout_secs = self.timeout.as_secs(), "Blacklisting slave");

        let this = self.clone();
        let slave_id = slave_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.timeout).await;
            this.expire_generation(&slave_id, generation).await;
        });
        true
    }

    /// Remove a host from the blacklist. No-op if it is not present.
    pub async fn expire(&self, slave_id: &SlaveId) -> bool {
        let removed = self.entries.lock().await.slaves.remove(slave_id).is_some();
        if removed {
            debug!(slave_id = %slave_id, "Unblacklisting slave");
        }
        removed
    }

    /// Expiry fired by a timer: only removes the entry the timer was
    /// scheduled for, not a later re-blacklisting of the same host.
    async fn expire_generation(&self, slave_id: &SlaveId, generation: u64) {
        let mut entries = self.entries.lock().await;
        if entries.slaves.get(slave_id) == Some(&generation) {
            entries.slaves.remove(slave_id);
            debug!(slave_id = %slave_id, "Unblacklisting slave");
        }
    }

    pub async fn is_blacklisted(&self, slave_id: &SlaveId) -> bool {
        self.entries.lock().await.slaves.contains_key(slave_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.slaves.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.slaves.is_empty()
    }

    /// Currently blacklisted hosts, sorted.
    pub async fn snapshot(&self) -> Vec<SlaveId> {
        let mut slaves: Vec<_> = self.entries.lock().await.slaves.keys().cloned().collect();
        slaves.sort();
        slaves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn test_blacklisted_until_expiry() {
        let blacklist = SlaveBlacklist::new(HOUR);
        let slave = SlaveId::new("slave-1");

        assert!(blacklist.blacklist(&slave).await);
        assert!(blacklist.is_blacklisted(&slave).await);

        tokio::time::sleep(HOUR - Duration::from_secs(1)).await;
        assert!(blacklist.is_blacklisted(&slave).await);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!blacklist.is_blacklisted(&slave).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_blacklist_does_not_reset_expiry() {
        let blacklist = SlaveBlacklist::new(HOUR);
        let slave = SlaveId::new("slave-1");

        assert!(blacklist.blacklist(&slave).await);
        tokio::time::sleep(Duration::from_secs(1800)).await;
        assert!(!blacklist.blacklist(&slave).await);
        assert_eq!(blacklist.len().await, 1);

        // Expires an hour after the first insert, not the second.
        tokio::time::sleep(Duration::from_secs(1801)).await;
        assert!(!blacklist.is_blacklisted(&slave).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reblacklist_after_manual_expire_keeps_full_timeout() {
        let blacklist = SlaveBlacklist::new(HOUR);
        let slave = SlaveId::new("slave-1");

        assert!(blacklist.blacklist(&slave).await);
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(blacklist.expire(&slave).await);

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(blacklist.blacklist(&slave).await);

        // The first timer fires at t=3600 and must leave the new entry alone.
        tokio::time::sleep(Duration::from_secs(3500)).await;
        assert!(blacklist.is_blacklisted(&slave).await);

        // The second one expires it at t=3800.
        tokio::time::sleep(Duration::from_secs(101)).await;
        assert!(!blacklist.is_blacklisted(&slave).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_is_noop_for_unknown_host() {
        let blacklist = SlaveBlacklist::new(HOUR);
        assert!(!blacklist.expire(&SlaveId::new("nobody")).await);
        assert!(blacklist.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_is_sorted() {
        let blacklist = SlaveBlacklist::new(HOUR);
        blacklist.blacklist(&SlaveId::new("b")).await;
        blacklist.blacklist(&SlaveId::new("a")).await;

        assert_eq!(
            blacklist.snapshot().await,
            vec![SlaveId::new("a"), SlaveId::new("b")]
        );
    }
}
