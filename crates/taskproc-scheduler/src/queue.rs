//! Bounded FIFO of tasks waiting for an offer.

use std::collections::VecDeque;

use tokio::sync::{Mutex, MutexGuard};

use taskproc_core::TaskConfig;

use crate::error::SchedulerError;

/// Pending tasks in arrival order.
///
/// Producers push at the tail; the offer path inspects the head under the
/// queue lock and drains only what it admitted, so an unfit task stays at
/// the head for the next offer.
pub struct PendingQueue {
    capacity: usize,
    tasks: Mutex<VecDeque<TaskConfig>>,
}

impl PendingQueue {
    /// Create an empty queue holding at most `capacity` tasks.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a task. Fails instead of waiting when the queue is full.
    pub async fn push(&self, task: TaskConfig) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.len() >= self.capacity {
            return Err(SchedulerError::QueueFull {
                capacity: self.capacity,
            });
        }
        tasks.push_back(task);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lock the queue for matching. Must not be held across a driver call.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, VecDeque<TaskConfig>> {
        self.tasks.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str) -> TaskConfig {
        TaskConfig::new(name, "busybox", "true", 0.1, 16.0)
    }

    #[tokio::test]
    async fn test_push_keeps_fifo_order() {
        let queue = PendingQueue::new(10);
        queue.push(task("a")).await.unwrap();
        queue.push(task("b")).await.unwrap();

        let names: Vec<_> = queue.lock().await.iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_push_fails_at_capacity() {
        let queue = PendingQueue::new(1);
        queue.push(task("a")).await.unwrap();

        let err = queue.push(task("b")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::QueueFull { capacity: 1 }));
        assert_eq!(queue.len().await, 1);
    }
}
