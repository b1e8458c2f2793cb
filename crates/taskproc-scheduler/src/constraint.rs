//! Placement constraints evaluated per offer and task.

use taskproc_core::{Offer, TaskConfig};

/// Decides whether a task may be placed on the host behind an offer.
pub trait PlacementConstraint: Send + Sync {
    fn admits(&self, offer: &Offer, task: &TaskConfig) -> bool;
}

impl<F> PlacementConstraint for F
where
    F: Fn(&Offer, &TaskConfig) -> bool + Send + Sync,
{
    fn admits(&self, offer: &Offer, task: &TaskConfig) -> bool {
        self(offer, task)
    }
}

/// Places tasks only on hosts advertising the task's pool.
///
/// Tasks without a pool fall back to `default_pool`; with neither set every
/// host is admitted. A host with no `pool` attribute is in no pool.
#[derive(Debug, Clone, Default)]
pub struct PoolConstraint {
    default_pool: Option<String>,
}

impl PoolConstraint {
    pub fn new(default_pool: Option<String>) -> Self {
        Self { default_pool }
    }
}

impl PlacementConstraint for PoolConstraint {
    fn admits(&self, offer: &Offer, task: &TaskConfig) -> bool {
        match task.pool.as_deref().or(self.default_pool.as_deref()) {
            Some(pool) => offer.pool() == Some(pool),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskproc_core::Resources;

    fn offer() -> Offer {
        Offer::new("o1", "s1", "host-1", Resources::new(1.0, 1024.0, 0.0))
    }

    #[test]
    fn test_no_pool_admits_everything() {
        let constraint = PoolConstraint::default();
        let task = TaskConfig::new("a", "img", "true", 0.1, 1.0);
        assert!(constraint.admits(&offer(), &task));
    }

    #[test]
    fn test_task_pool_must_match_host() {
        let constraint = PoolConstraint::default();
        let task = TaskConfig::new("a", "img", "true", 0.1, 1.0).with_pool("batch");

        assert!(!constraint.admits(&offer(), &task));
        assert!(!constraint.admits(&offer().with_attribute("pool", "default"), &task));
        assert!(constraint.admits(&offer().with_attribute("pool", "batch"), &task));
    }

    #[test]
    fn test_default_pool_applies_to_unpinned_tasks() {
        let constraint = PoolConstraint::new(Some("default".to_string()));
        let task = TaskConfig::new("a", "img", "true", 0.1, 1.0);

        assert!(constraint.admits(&offer().with_attribute("pool", "default"), &task));
        assert!(!constraint.admits(&offer(), &task));
    }

    #[test]
    fn test_closure_constraint() {
        let constraint = |offer: &Offer, _: &TaskConfig| offer.hostname != "host-1";
        let task = TaskConfig::new("a", "img", "true", 0.1, 1.0);
        assert!(!constraint.admits(&offer(), &task));
    }
}
