//! Typed model of the cluster objects the agent composes.
//!
//! Only the fields the agent reads or writes are modeled. The shapes follow
//! the cluster's native objects closely enough that a production
//! [`ClusterApi`](super::ClusterApi) backend is a mechanical translation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata common to every cluster object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object name, unique per kind within the agent's namespace.
    pub name: String,
    /// Labels, used for selection and event routing.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations, used as a small-value side channel.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Finalizers blocking deletion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    /// Set once deletion has been requested; the object lingers while
    /// finalizers remain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Creates metadata with just a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a label (builder style).
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds an annotation (builder style).
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Adds a finalizer (builder style).
    #[must_use]
    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizers.push(finalizer.into());
        self
    }

    /// Looks up a label value.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Looks up an annotation value.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Returns true once deletion has been requested.
    #[must_use]
    pub const fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Returns true if the given labels all match.
    #[must_use]
    pub fn matches_labels(&self, selector: &[(&str, &str)]) -> bool {
        selector
            .iter()
            .all(|(key, value)| self.label(key) == Some(*value))
    }
}

/// A small configuration object with a data body and annotation side channel.
///
/// The agent uses one per task as the durable local record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigObject {
    /// Object metadata.
    pub meta: ObjectMeta,
    /// Data body, keyed by entry name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

/// A secret holding credential material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secret {
    /// Object metadata.
    pub meta: ObjectMeta,
    /// Secret payload.
    pub data: BTreeMap<String, String>,
}

/// An environment variable on a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

impl EnvVar {
    /// Creates an environment variable.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Maps a data key of a secret or config object to a file path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyToPath {
    /// Source data key.
    pub key: String,
    /// Relative target path.
    pub path: String,
}

/// Where a pod volume gets its content from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeSource {
    /// A persistent volume claim.
    Pvc {
        /// Claim name.
        claim_name: String,
        /// Mount the claim read-only.
        read_only: bool,
    },
    /// A secret projected as files.
    Secret {
        /// Secret name.
        secret_name: String,
        /// Keys to project.
        items: Vec<KeyToPath>,
        /// Tolerate a missing secret.
        optional: bool,
    },
    /// A config object projected as files.
    ConfigObject {
        /// Config object name.
        name: String,
        /// Keys to project.
        items: Vec<KeyToPath>,
        /// Tolerate a missing object.
        optional: bool,
    },
    /// The pod's own annotations exposed via the downward API.
    DownwardApiAnnotations {
        /// File name inside the volume.
        path: String,
    },
}

/// A pod volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name, referenced by mounts.
    pub name: String,
    /// Content source.
    pub source: VolumeSource,
}

/// A container's reference to a pod volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Volume name.
    pub name: String,
    /// Mount path inside the container.
    pub mount_path: String,
    /// Sub-path within the volume, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// Requested and limited resource quantities, as quantity strings
/// (`"500m"`, `"2Gi"`, `"1"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Scheduling requests by resource name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    /// Hard limits by resource name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

/// A single container in a pod template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Entrypoint override; empty means the image default.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Working directory override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Environment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Resource requests and limits.
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Volume mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    /// Run as root (executors need it to write task workspaces).
    #[serde(default)]
    pub run_as_root: bool,
    /// Always pull the image instead of using a cached one.
    #[serde(default)]
    pub image_pull_always: bool,
}

impl Container {
    /// Creates a container with a name and image, everything else default.
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            resources: ResourceRequirements::default(),
            volume_mounts: Vec::new(),
            run_as_root: false,
            image_pull_always: false,
        }
    }
}

/// Required node affinity on a single label key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAffinity {
    /// Node label key.
    pub key: String,
    /// Accepted values.
    pub values: Vec<String>,
}

/// Restart behavior of a pod's containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    /// Restart on failure or exit.
    #[default]
    Always,
    /// Never restart; batch jobs rely on their retry budget instead.
    Never,
}

/// The pod a batch job stamps out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTemplate {
    /// Labels applied to stamped pods.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations applied to stamped pods.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Containers (the agent always uses exactly one).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
    /// Pod volumes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    /// Image pull secret names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
    /// Required node affinity, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_affinity: Option<NodeAffinity>,
    /// Restart behavior of stamped pods.
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    /// Expose cluster service env vars to the pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_service_links: Option<bool>,
    /// Mount the namespace service-account token into the pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automount_service_account_token: Option<bool>,
}

/// Aggregate condition of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobConditionType {
    /// The job finished successfully.
    Complete,
    /// The job exhausted its retries or was stopped.
    Failed,
}

/// One entry of a job's status conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCondition {
    /// Condition type.
    pub condition: JobConditionType,
    /// Whether the condition currently holds.
    pub status: bool,
    /// Optional human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Observed status of a batch job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Status conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<JobCondition>,
}

/// Coarse phase derived from job conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// No terminal condition yet.
    Running,
    /// A true `Failed` condition is present.
    Failed,
    /// A true `Complete` condition is present.
    Complete,
}

/// Spec of a batch job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Pod retry budget before the job fails.
    pub backoff_limit: u32,
    /// Wall-clock bound; `Some(0)` stops the job immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
    /// Pod template.
    pub template: PodTemplate,
}

/// A batch job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Object metadata.
    pub meta: ObjectMeta,
    /// Desired state.
    pub spec: JobSpec,
    /// Observed state.
    #[serde(default)]
    pub status: JobStatus,
}

impl BatchJob {
    /// Derives the coarse phase from status conditions.
    #[must_use]
    pub fn phase(&self) -> JobPhase {
        for condition in &self.status.conditions {
            if !condition.status {
                continue;
            }
            match condition.condition {
                JobConditionType::Failed => return JobPhase::Failed,
                JobConditionType::Complete => return JobPhase::Complete,
            }
        }
        JobPhase::Running
    }

    /// Returns true once the job has a terminal condition.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.phase() != JobPhase::Running
    }
}

/// State of a pod's (single) container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// Waiting to start (image pull, scheduling).
    Waiting {
        /// Machine-readable reason, e.g. `ImagePullBackOff`.
        reason: String,
    },
    /// Running.
    Running {
        /// When the container started.
        started_at: Option<DateTime<Utc>>,
    },
    /// Exited.
    Terminated {
        /// When the container started.
        started_at: Option<DateTime<Utc>>,
        /// When the container exited.
        finished_at: Option<DateTime<Utc>>,
        /// Process exit code.
        exit_code: i32,
        /// Machine-readable reason.
        reason: String,
        /// Human-readable message.
        message: String,
    },
}

/// Status of one container in a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Current state.
    pub state: ContainerState,
}

/// Pod lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    /// Accepted, containers not all running.
    Pending,
    /// At least one container running.
    Running,
    /// All containers exited zero.
    Succeeded,
    /// A container exited nonzero or the pod was stopped.
    Failed,
}

/// Observed status of a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    /// Lifecycle phase.
    pub phase: PodPhase,
    /// When the pod was scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Per-container states.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_statuses: Vec<ContainerStatus>,
}

impl Default for PodStatus {
    fn default() -> Self {
        Self {
            phase: PodPhase::Pending,
            start_time: None,
            container_statuses: Vec::new(),
        }
    }
}

/// A pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    /// Object metadata.
    pub meta: ObjectMeta,
    /// Observed status.
    #[serde(default)]
    pub status: PodStatus,
}

/// Spec of a persistent volume claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvcSpec {
    /// Requested storage quantity string (`"30Gi"`).
    pub storage: String,
    /// Storage class, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    /// Pre-bound volume name, for statically provisioned claims.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
}

/// A persistent volume claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentVolumeClaim {
    /// Object metadata.
    pub meta: ObjectMeta,
    /// Desired state.
    pub spec: PvcSpec,
}

/// Reference to a secret from a persistent volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    /// Secret name.
    pub name: String,
    /// Secret namespace.
    pub namespace: String,
}

/// CSI source of a persistent volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiVolumeSource {
    /// CSI driver name.
    pub driver: String,
    /// Driver-scoped volume handle.
    pub volume_handle: String,
    /// Secret used when publishing the volume on a node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_publish_secret: Option<SecretRef>,
    /// Secret used when staging the volume on a node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_stage_secret: Option<SecretRef>,
    /// Driver attributes (bucket, path, endpoint, FUSE pod sizing).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volume_attributes: BTreeMap<String, String>,
}

/// Spec of a persistent volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvSpec {
    /// Capacity quantity string.
    pub storage: String,
    /// CSI backing.
    pub csi: CsiVolumeSource,
}

/// A persistent volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentVolume {
    /// Object metadata.
    pub meta: ObjectMeta,
    /// Desired state.
    pub spec: PvSpec,
}

/// A recorded lifecycle event attached to a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodEventRecord {
    /// Pod the event concerns.
    pub pod_name: String,
    /// Machine-readable reason, e.g. `Failed`.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_builder_and_lookups() {
        let meta = ObjectMeta::named("task-1-pvc")
            .with_label("task-id", "task-1")
            .with_annotation("stage", "3")
            .with_finalizer("vetes-agent/task");
        assert_eq!(meta.label("task-id"), Some("task-1"));
        assert_eq!(meta.annotation("stage"), Some("3"));
        assert!(!meta.is_deleting());
        assert!(meta.matches_labels(&[("task-id", "task-1")]));
        assert!(!meta.matches_labels(&[("task-id", "task-2")]));
    }

    #[test]
    fn job_phase_from_conditions() {
        let mut job = BatchJob::default();
        assert_eq!(job.phase(), JobPhase::Running);

        job.status.conditions.push(JobCondition {
            condition: JobConditionType::Complete,
            status: false,
            message: None,
        });
        assert_eq!(job.phase(), JobPhase::Running);

        job.status.conditions.push(JobCondition {
            condition: JobConditionType::Failed,
            status: true,
            message: Some("backoff limit exceeded".into()),
        });
        assert_eq!(job.phase(), JobPhase::Failed);
        assert!(job.is_finished());
    }
}
