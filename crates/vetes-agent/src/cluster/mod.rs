//! Cluster API abstraction.
//!
//! The agent never talks to a concrete cluster directly; everything goes
//! through [`ClusterApi`]. The in-memory implementation
//! ([`memory::InMemoryCluster`]) carries the cluster's create/delete
//! semantics (already-exists, not-found, finalizers, deletion timestamps)
//! and powers the test suite; production backends translate the same calls
//! onto the real cluster API.
//!
//! ## Semantics implementations must honor
//!
//! - `create_*` fails with an already-exists error when the name is taken.
//! - `get_*`/`delete_*` fail with not-found when the object is absent.
//! - Deleting an object that still carries finalizers marks it as deleting
//!   (deletion timestamp set) instead of removing it; it disappears when the
//!   last finalizer is removed.
//! - Every mutation emits a [`ClusterEvent`] to watchers.

pub mod memory;
pub mod objects;

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

use crate::error::Result;
pub use objects::{
    BatchJob, ConfigObject, Container, ContainerState, ContainerStatus, CsiVolumeSource, EnvVar,
    JobCondition, JobConditionType, JobPhase, JobSpec, JobStatus, KeyToPath, NodeAffinity,
    ObjectMeta, PersistentVolume, PersistentVolumeClaim, Pod, PodEventRecord, PodPhase, PodStatus,
    PodTemplate, PvSpec, PvcSpec, ResourceRequirements, RestartPolicy, Secret, SecretRef, Volume,
    VolumeMount, VolumeSource,
};

/// The kinds of objects the agent manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Local task record object.
    ConfigObject,
    /// Batch job (stager or executor).
    Job,
    /// Pod stamped out by a job.
    Pod,
    /// Per-task or shared-mount claim.
    Pvc,
    /// Shared-mount volume.
    Pv,
    /// Credential secret.
    Secret,
}

impl ObjectKind {
    /// Lowercase kind name used in errors and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigObject => "configobject",
            Self::Job => "job",
            Self::Pod => "pod",
            Self::Pvc => "pvc",
            Self::Pv => "pv",
            Self::Secret => "secret",
        }
    }
}

/// A change notification from the cluster.
///
/// Carries just enough for event routing: the reconcile engine maps events
/// to task or pod requests via the `task-id` label.
#[derive(Debug, Clone)]
pub struct ClusterEvent {
    /// Kind of the changed object.
    pub kind: ObjectKind,
    /// Name of the changed object.
    pub name: String,
    /// Labels of the changed object at event time.
    pub labels: BTreeMap<String, String>,
}

/// Typed cluster operations the agent composes tasks from.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync`; the reconciler calls them from many worker
/// tasks concurrently.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    // --- Config objects (local task records) ---

    /// Creates a config object; fails if the name is taken.
    async fn create_config_object(&self, object: ConfigObject) -> Result<()>;

    /// Gets a config object by name.
    async fn get_config_object(&self, name: &str) -> Result<ConfigObject>;

    /// Sets a single annotation on a config object.
    async fn annotate_config_object(&self, name: &str, key: &str, value: &str) -> Result<()>;

    /// Deletes a config object (finalizer semantics apply).
    async fn delete_config_object(&self, name: &str) -> Result<()>;

    // --- Batch jobs ---

    /// Creates a job; fails if the name is taken.
    async fn create_job(&self, job: BatchJob) -> Result<()>;

    /// Gets a job by name.
    async fn get_job(&self, name: &str) -> Result<BatchJob>;

    /// Stops a job by setting its active deadline to zero.
    async fn stop_job(&self, name: &str) -> Result<()>;

    /// Deletes a job (finalizer semantics apply).
    async fn delete_job(&self, name: &str) -> Result<()>;

    // --- Volumes ---

    /// Creates a claim; fails if the name is taken.
    async fn create_pvc(&self, pvc: PersistentVolumeClaim) -> Result<()>;

    /// Gets a claim by name.
    async fn get_pvc(&self, name: &str) -> Result<PersistentVolumeClaim>;

    /// Deletes a claim (finalizer semantics apply).
    async fn delete_pvc(&self, name: &str) -> Result<()>;

    /// Creates a volume; fails if the name is taken.
    async fn create_pv(&self, pv: PersistentVolume) -> Result<()>;

    /// Gets a volume by name.
    async fn get_pv(&self, name: &str) -> Result<PersistentVolume>;

    /// Deletes a volume (finalizer semantics apply).
    async fn delete_pv(&self, name: &str) -> Result<()>;

    // --- Secrets ---

    /// Creates a secret; fails if the name is taken.
    async fn create_secret(&self, secret: Secret) -> Result<()>;

    /// Gets a secret by name.
    async fn get_secret(&self, name: &str) -> Result<Secret>;

    /// Replaces the data body of an existing secret.
    async fn update_secret_data(&self, name: &str, data: BTreeMap<String, String>) -> Result<()>;

    /// Deletes a secret (finalizer semantics apply).
    async fn delete_secret(&self, name: &str) -> Result<()>;

    // --- Pods ---

    /// Gets a pod by name.
    async fn get_pod(&self, name: &str) -> Result<Pod>;

    /// Lists pods matching all the given labels.
    async fn list_pods(&self, selector: &[(&str, &str)]) -> Result<Vec<Pod>>;

    /// Requests deletion of all pods matching the given labels.
    async fn delete_pods(&self, selector: &[(&str, &str)]) -> Result<()>;

    /// Adds a finalizer to a pod if not already present.
    async fn add_pod_finalizer(&self, name: &str, finalizer: &str) -> Result<()>;

    /// Reads the (single) container log of a pod, if available.
    async fn pod_logs(&self, name: &str) -> Result<Option<String>>;

    /// Lists recorded lifecycle events for a pod.
    async fn pod_events(&self, name: &str) -> Result<Vec<PodEventRecord>>;

    // --- Cross-kind ---

    /// Removes a finalizer from an object if present; completes a pending
    /// deletion when the last finalizer goes away. Missing objects are fine.
    async fn remove_finalizer(&self, kind: ObjectKind, name: &str, finalizer: &str) -> Result<()>;

    /// Subscribes to change notifications.
    fn watch(&self) -> broadcast::Receiver<ClusterEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_kind_names() {
        assert_eq!(ObjectKind::ConfigObject.as_str(), "configobject");
        assert_eq!(ObjectKind::Pvc.as_str(), "pvc");
        assert_eq!(ObjectKind::Secret.as_str(), "secret");
    }
}
