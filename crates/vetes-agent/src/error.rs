//! Error types and reconcile outcomes for the agent.

use std::time::Duration;

/// The result type used throughout vetes-agent.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in agent operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An object was not found in the cluster or the local store.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// The object kind (`configobject`, `job`, `pvc`, ...).
        kind: &'static str,
        /// The object name.
        name: String,
    },

    /// An object with the same name already exists.
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// The object kind.
        kind: &'static str,
        /// The object name.
        name: String,
    },

    /// The control plane rejected an update as a bad request.
    ///
    /// On task-log updates this specifically signals a time conflict (an
    /// executor end time not yet filled in); callers requeue and retry.
    #[error("control plane rejected request: {message}")]
    BadRequest {
        /// Response body or status text.
        message: String,
    },

    /// A control-plane call failed.
    #[error("control plane error: {message}")]
    ControlPlane {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A cluster API call failed.
    #[error("cluster error: {message}")]
    Cluster {
        /// Description of the failure.
        message: String,
    },

    /// A filesystem operation failed (offload files, task logs).
    #[error("io error: {message}")]
    Io {
        /// Description of the failure.
        message: String,
        /// The underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// Invalid configuration detected at startup.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the failure.
        message: String,
    },

    /// Several errors from one batch operation.
    #[error("multiple errors: {}", messages.join("; "))]
    Aggregate {
        /// The individual error messages.
        messages: Vec<String>,
    },
}

impl Error {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Creates an already-exists error.
    #[must_use]
    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Creates a control-plane error without a source.
    #[must_use]
    pub fn control_plane(message: impl Into<String>) -> Self {
        Self::ControlPlane {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a cluster error.
    #[must_use]
    pub fn cluster(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an io error.
    #[must_use]
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Folds a batch of errors into one; `None` when the batch is empty.
    #[must_use]
    pub fn aggregate(errors: Vec<Self>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.into_iter().next(),
            _ => Some(Self::Aggregate {
                messages: errors.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is an already-exists error.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns true if this is a control-plane bad-request error.
    #[must_use]
    pub const fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest { .. })
    }
}

/// Outcome of one reconciliation pass.
///
/// Mirrors the controller contract: a pass either finishes (and the next
/// event re-enters it), or asks to be re-dispatched after a delay. Errors
/// travel separately as `Err(_)` and are requeued with back-off by the
/// engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reconcile {
    /// Re-dispatch the same request after this delay.
    pub requeue_after: Option<Duration>,
}

impl Reconcile {
    /// The pass is finished; wait for the next event.
    #[must_use]
    pub const fn done() -> Self {
        Self {
            requeue_after: None,
        }
    }

    /// Re-dispatch after `delay`.
    #[must_use]
    pub const fn after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }

    /// Returns true if no requeue was requested.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.requeue_after.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_helpers() {
        let err = Error::not_found("job", "task-1-ex-00");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("task-1-ex-00"));
    }

    #[test]
    fn aggregate_folds() {
        assert!(Error::aggregate(vec![]).is_none());

        let single = Error::aggregate(vec![Error::cluster("boom")]).unwrap();
        assert!(matches!(single, Error::Cluster { .. }));

        let many = Error::aggregate(vec![Error::cluster("a"), Error::cluster("b")]).unwrap();
        assert!(many.to_string().contains("a"));
        assert!(many.to_string().contains("b"));
    }

    #[test]
    fn reconcile_outcomes() {
        assert!(Reconcile::done().is_done());
        let requeue = Reconcile::after(Duration::from_secs(1));
        assert!(!requeue.is_done());
        assert_eq!(requeue.requeue_after, Some(Duration::from_secs(1)));
    }
}
