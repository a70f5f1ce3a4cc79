//! Stable names the agent stamps onto cluster objects.
//!
//! Everything here is part of the agent's external contract: the control
//! plane, the staging containers, and operators all key off these strings.
//! Renaming any of them is a breaking change.

/// Label carrying the owning task id on every object the agent creates.
pub const LABEL_TASK_ID: &str = "task-id";

/// Label carrying the object role: `executor`, `inputs-filer`, `outputs-filer`.
pub const LABEL_TYPE: &str = "type";

/// Label carrying the executor index on executor jobs and pods.
pub const LABEL_EXECUTOR_NO: &str = "executor-no";

/// Label the job controller stamps on pods with their parent job name.
pub const LABEL_JOB_NAME: &str = "job-name";

/// Label marking objects owned by this agent (shared-mount secrets).
pub const LABEL_MANAGED_BY: &str = "managed-by";

/// Value of [`LABEL_MANAGED_BY`] for objects this agent owns.
pub const MANAGED_BY_VALUE: &str = "vetes-k8s-agent";

/// Label carrying the backing bucket on shared-mount PVs and PVCs.
pub const LABEL_BUCKET_NAME: &str = "bucket-name";

/// Identity labels copied from task metadata onto executor pods.
pub const LABEL_ACCOUNT_ID: &str = "account-id";
/// See [`LABEL_ACCOUNT_ID`].
pub const LABEL_USER_ID: &str = "user-id";
/// See [`LABEL_ACCOUNT_ID`].
pub const LABEL_SUBMISSION_ID: &str = "submission-id";
/// See [`LABEL_ACCOUNT_ID`].
pub const LABEL_RUN_ID: &str = "run-id";

/// Annotation carrying the terminal state a task should be stopped with.
pub const ANNO_STOP: &str = "stop";

/// Annotation carrying the coarse stage counter on the task record.
pub const ANNO_STAGE: &str = "stage";

/// Annotation carrying the composite executor stage on the task record.
pub const ANNO_EXECUTOR_STAGE: &str = "executor-stage";

/// Annotation carrying the display name of the task on executor objects.
pub const ANNO_TASK_NAME: &str = "tes-task-name";

/// Annotations carrying the inline inputs/outputs manifest on stager pods.
pub const ANNO_TASK_INPUTS: &str = "task-inputs";
/// See [`ANNO_TASK_INPUTS`].
pub const ANNO_TASK_OUTPUTS: &str = "task-outputs";
/// Annotation carrying the offloaded manifest path on stager pods.
pub const ANNO_TASK_INPUTS_REF: &str = "task-inputs-ref";
/// See [`ANNO_TASK_INPUTS_REF`].
pub const ANNO_TASK_OUTPUTS_REF: &str = "task-outputs-ref";

// Spelling of "volcegine" matches the metering consumer and must not change.
/// Annotation carrying the JSON-encoded metering resource map on executor pods.
pub const ANNO_METERING_RESOURCE: &str = "pod.bioos.volcegine.com/metering-resource";
/// Annotation carrying the metering user tag on executor pods.
pub const ANNO_METERING_USER_INFO: &str = "pod.bioos.volcegine.com/metering-user-info";

/// Finalizer blocking deletion of task-owned objects while the reconciler
/// still owes work for them.
pub const FINALIZER_TASK: &str = "vetes-agent/task";

/// Finalizer keeping an executor pod alive until its end time is reported.
pub const FINALIZER_EXECUTOR_TIME: &str = "vetes-agent/executor-time";

/// Node label the GPU type affinity selects on.
pub const GPU_NAME_AFFINITY_KEY: &str = "machine.cluster.vke.volcengine.com/gpu-name";

/// Extended resource name for GPU requests.
pub const NVIDIA_GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Object role values used with [`LABEL_TYPE`].
pub const EXECUTOR_TYPE: &str = "executor";
/// Suffix appended to a stager mode to form its [`LABEL_TYPE`] value.
pub const FILER_TYPE_SUFFIX: &str = "-filer";

/// Environment variables understood by the staging containers.
pub mod env {
    /// Path of the downward-API file exposing pod annotations.
    pub const POD_INFO_ANNOTATIONS_FILE: &str = "POD_INFO_ANNOTATIONS_FILE";
    /// Offload backend type (`pvc`).
    pub const OFFLOAD_TYPE: &str = "OFFLOAD_TYPE";
    /// Claim name carrying offloaded manifests.
    pub const OFFLOAD_PVC_NAME: &str = "OFFLOAD_PVC_NAME";
    /// Base path of offloaded manifests inside the stager.
    pub const OFFLOAD_PATH: &str = "OFFLOAD_PATH";
    /// Host-side base path in transfer mode.
    pub const HOST_BASE_PATH: &str = "HOST_BASE_PATH";
    /// Container-side base path in transfer mode.
    pub const CONTAINER_BASE_PATH: &str = "CONTAINER_BASE_PATH";
    /// Shared credentials file for object-storage access.
    pub const AWS_SHARED_CREDENTIALS_FILE: &str = "AWS_SHARED_CREDENTIALS_FILE";
    /// Expiry timestamp file companion to the credentials file.
    pub const AWS_CREDENTIALS_EXPIRED_TIME_FILE: &str = "AWS_CREDENTIALS_EXPIRED_TIME_FILE";
    /// SDK configuration file for object-storage access.
    pub const S3SDK_CONFIG_FILE: &str = "S3SDK_CONFIG_FILE";
    /// Set to `true` when bucket-backed inputs are mounted rather than staged.
    pub const IS_MOUNTED: &str = "IS_MOUNTED";
    /// Auth passport forwarded from the task metadata.
    pub const AAI_PASSPORT: &str = "AAI_PASSPORT";
}

/// Stager operating modes; also the stager container's first argument.
pub const INPUTS_MODE: &str = "inputs";
/// See [`INPUTS_MODE`].
pub const OUTPUTS_MODE: &str = "outputs";

/// Acceleration engine selector: no acceleration.
pub const NULL_ACCELERATE_TYPE: &str = "null";
/// Acceleration engine selector: shared bucket mounts.
pub const MOUNT_BUCKET_ACCELERATE_TYPE: &str = "mount-bucket";

/// Offload backend selector: shared persistent volume claim.
pub const PVC_OFFLOAD_TYPE: &str = "pvc";

/// Object-storage flavor selectors for stager credential wiring.
pub const OBJECT_STORAGE_TYPE: &str = "object";
/// See [`OBJECT_STORAGE_TYPE`].
pub const S3_STORAGE_TYPE: &str = "s3";

/// Manifests larger than this many bytes are offloaded instead of inlined
/// (100 KiB).
pub const OFFLOAD_THRESHOLD: usize = 102_400;

/// Page size the syncer requests from the control plane.
pub const MAXIMUM_PAGE_SIZE: u32 = 2048;
/// Default control-plane page size, for callers that do not override it.
pub const DEFAULT_PAGE_SIZE: u32 = 256;

/// Mount point prefix for shared bucket mounts inside task pods.
#[must_use]
pub fn bucket_mount_path(bucket: &str) -> String {
    format!("/tos-data/{bucket}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_mount_path_is_prefixed() {
        assert_eq!(bucket_mount_path("genomes"), "/tos-data/genomes");
    }
}
