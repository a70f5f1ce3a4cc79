//! Strongly-typed identifier for control-plane tasks.
//!
//! Task ids are minted by the control plane and opaque to the agent; the
//! newtype exists so a task id cannot be confused with a pod or job name at
//! compile time. All per-task cluster object names are derived from it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A unique identifier for a TES task, assigned by the control plane.
///
/// The id doubles as the name of the task's local record object, and every
/// other per-task object name is a suffix of it (`<id>-pvc`,
/// `<id>-inputs-filer`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps a control-plane task id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
