//! Wire models for the task-service API.
//!
//! Field names follow the service's JSON (snake_case, RFC 3339 timestamps).
//! These are distinct from the local record types in [`crate::record`]; the
//! syncer converts between the two.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vetes_core::{TaskId, TaskState, TaskView};

/// Compute requirements as reported by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// Requested CPU cores.
    #[serde(default)]
    pub cpu_cores: u32,
    /// Requested memory, GB.
    #[serde(default)]
    pub ram_gb: f64,
    /// Requested scratch disk, GB.
    #[serde(default)]
    pub disk_gb: f64,
    /// Requested GPU, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuResource>,
}

/// A GPU request on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuResource {
    /// GPU model selector.
    #[serde(rename = "type")]
    pub gpu_type: String,
    /// Number of devices.
    pub count: f64,
}

/// One executor of the task pipeline on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Executor {
    /// Image reference.
    pub image: String,
    /// Command argv.
    pub command: Vec<String>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Stdin path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    /// Stdout path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Stderr path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Environment map.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub env: std::collections::BTreeMap<String, String>,
}

/// A file to stage in before execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    /// Source URL (`s3://bucket/key`) or, after acceleration rewrite, a
    /// filesystem path under the shared mount prefix.
    pub url: String,
    /// Target path inside the task workspace.
    pub path: String,
}

/// A file to stage out after execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Destination URL.
    pub url: String,
    /// Source path inside the task workspace.
    pub path: String,
}

/// Per-bucket credentials on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalBucketAuthInfo {
    /// Bucket name.
    #[serde(default)]
    pub bucket: String,
    /// Access key id.
    #[serde(default)]
    pub ak: String,
    /// Secret key.
    #[serde(default)]
    pub sk: String,
}

/// Bucket access classification on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketsAuthInfo {
    /// Buckets readable with default credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_only: Vec<String>,
    /// Buckets writable with default credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_write: Vec<String>,
    /// Buckets requiring their own credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external: Vec<ExternalBucketAuthInfo>,
}

/// Submission metadata on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BioosInfoMeta {
    /// Auth passport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aai_passport: Option<String>,
    /// Opt-in flag for bucket-mount acceleration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_bucket: Option<bool>,
    /// Per-bucket credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets_auth_info: Option<BucketsAuthInfo>,
}

/// Account/submission identity on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BioosInfo {
    /// Owning account.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_id: String,
    /// Submitting user.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    /// Submission id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub submission_id: String,
    /// Workflow run id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run_id: String,
    /// Extra metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<BioosInfoMeta>,
}

/// Timing and log record of one executor attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorLog {
    /// Identifier of the attempt (the pod name).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// When the executor started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the executor finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Per-cluster task log entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskLog {
    /// Cluster that produced this entry.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_id: String,
    /// When the cluster started working on the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the cluster finished the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Executor logs indexed by executor position; each position holds the
    /// attempts recorded for that executor.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<Vec<ExecutorLog>>,
    /// Free-form system log blobs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_logs: Vec<String>,
}

/// A task on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task id.
    pub id: TaskId,
    /// Display name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Lifecycle state.
    #[serde(default = "default_state")]
    pub state: TaskState,
    /// Cluster the task is assigned to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_id: String,
    /// Compute requirements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    /// Executor pipeline.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub executors: Vec<Executor>,
    /// Files to stage in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<TaskInput>,
    /// Files to stage out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<TaskOutput>,
    /// Extra task-level mount paths.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Submission identity and metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bioos_info: Option<BioosInfo>,
    /// Per-cluster log entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<TaskLog>,
}

const fn default_state() -> TaskState {
    TaskState::Queued
}

impl Task {
    /// Finds this cluster's log entry, if present.
    #[must_use]
    pub fn matched_log(&self, cluster_id: &str) -> Option<&TaskLog> {
        self.logs.iter().find(|log| log.cluster_id == cluster_id)
    }
}

/// Parameters of a task list call.
#[derive(Debug, Clone)]
pub struct ListTasksRequest {
    /// Only tasks in these states.
    pub state: Vec<TaskState>,
    /// Only tasks assigned to this cluster.
    pub cluster_id: String,
    /// Requested view.
    pub view: TaskView,
    /// Page size.
    pub page_size: u32,
    /// Continuation token from the previous page.
    pub page_token: Option<String>,
}

/// One page of a task list.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListTasksResponse {
    /// The page of tasks.
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Token of the next page; absent on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Body of a task update (state change and/or log append).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    /// New state, if changing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,
    /// Log entries to merge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<TaskLog>,
}

/// Available GPU devices by model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuCapacity {
    /// Device counts by model.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub gpu: std::collections::BTreeMap<String, f64>,
}

/// Cluster capacity report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    /// Schedulable node count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Total CPU cores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,
    /// Total memory, GB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_gb: Option<f64>,
    /// Total disk, GB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<f64>,
    /// GPU availability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_capacity: Option<GpuCapacity>,
}

/// Per-task scheduling limits of the cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum CPU cores per task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,
    /// Maximum memory per task, GB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_gb: Option<f64>,
    /// Maximum GPU devices per task by model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_limit: Option<GpuCapacity>,
}

/// Cluster heartbeat body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterUpdate {
    /// Cluster id (path parameter, not serialized in the body).
    #[serde(skip)]
    pub id: String,
    /// Capacity section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Capacity>,
    /// Limits section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_deserializes_with_defaults() {
        let task: Task = serde_json::from_str(r#"{"id":"task-1"}"#).unwrap();
        assert_eq!(task.id.as_str(), "task-1");
        assert_eq!(task.state, TaskState::Queued);
        assert!(task.inputs.is_empty());
    }

    #[test]
    fn matched_log_finds_cluster_entry() {
        let task = Task {
            id: TaskId::new("task-1"),
            logs: vec![
                TaskLog {
                    cluster_id: "other".into(),
                    ..TaskLog::default()
                },
                TaskLog {
                    cluster_id: "mine".into(),
                    ..TaskLog::default()
                },
            ],
            ..Task::default()
        };
        assert!(task.matched_log("mine").is_some());
        assert!(task.matched_log("nope").is_none());
    }

    #[test]
    fn update_serializes_sparse() {
        let update = TaskUpdate {
            state: Some(TaskState::Running),
            logs: Vec::new(),
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"state":"RUNNING"}"#);
    }
}
