//! Offer gate held closed while reconciliation settles.

use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// Keeps offers from being used for `backoff` after each (re)registration,
/// so tasks the manager still tracks from before are not launched twice.
///
/// Closed until the first registration.
pub struct ReconciliationGate {
    backoff: Duration,
    started_at: RwLock<Option<Instant>>,
}

impl ReconciliationGate {
    pub fn new(backoff: Duration) -> Self {
        Self {
            backoff,
            started_at: RwLock::new(None),
        }
    }

    /// Start (or restart) the reconciliation window now.
    pub async fn start(&self) {
        *self.started_at.write().await = Some(Instant::now());
    }

    /// Whether offers may be matched.
    pub async fn is_open(&self) -> bool {
        match *self.started_at.read().await {
            Some(started_at) => started_at.elapsed() >= self.backoff,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_closed_before_registration() {
        let gate = ReconciliationGate::new(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!gate.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_backoff() {
        let gate = ReconciliationGate::new(Duration::from_secs(5));
        gate.start().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!gate.is_open().await);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(gate.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_closes_gate_again() {
        let gate = ReconciliationGate::new(Duration::from_secs(5));
        gate.start().await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(gate.is_open().await);

        gate.start().await;
        assert!(!gate.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_backoff_opens_immediately() {
        let gate = ReconciliationGate::new(Duration::ZERO);
        gate.start().await;
        assert!(gate.is_open().await);
    }
}
