//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Separator between a task's logical name and its random suffix.
pub const TASK_ID_SEPARATOR: char = '.';

/// Defines a string-backed identifier handed to us by the cluster manager.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the inner string reference.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Identifier of a launched task, `<name>.<random-hex>`.
    TaskId
);

string_id!(
    /// Identifier of a resource offer.
    OfferId
);

string_id!(
    /// Identifier of the host (agent) an offer comes from.
    SlaveId
);

string_id!(
    /// Identifier the cluster manager assigns on registration.
    FrameworkId
);

impl TaskId {
    /// Generate a fresh id for a task with the given logical name.
    ///
    /// The random suffix makes ids unique even when the same name is
    /// relaunched.
    pub fn generate(name: &str) -> Self {
        Self(format!(
            "{}{}{}",
            name,
            TASK_ID_SEPARATOR,
            Uuid::new_v4().simple()
        ))
    }

    /// Logical name part of the id (everything before the last separator).
    pub fn name(&self) -> &str {
        self.0
            .rsplit_once(TASK_ID_SEPARATOR)
            .map_or(self.0.as_str(), |(name, _)| name)
    }

    /// Whether this id was generated for the given logical name.
    pub fn belongs_to(&self, name: &str) -> bool {
        self.0
            .strip_prefix(name)
            .is_some_and(|rest| rest.starts_with(TASK_ID_SEPARATOR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_task_id_generate_unique_for_same_name() {
        let ids: HashSet<TaskId> = (0..100).map(|_| TaskId::generate("batch")).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_task_id_format() {
        let id = TaskId::generate("worker");
        let (name, suffix) = id.as_str().split_once('.').unwrap();
        assert_eq!(name, "worker");
        assert_eq!(suffix.len(), 32);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_task_id_name_and_prefix() {
        let id = TaskId::new("web-canary.0123abcd");
        assert_eq!(id.name(), "web-canary");
        assert!(id.belongs_to("web-canary"));
        assert!(!id.belongs_to("web"));
    }

    #[test]
    fn test_id_display() {
        let id = SlaveId::new("slave-1");
        assert_eq!(format!("{}", id), "slave-1");
    }
}
