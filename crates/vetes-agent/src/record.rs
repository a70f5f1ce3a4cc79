//! The per-task record persisted in the local store.
//!
//! This is the agent's authoritative view of one task: everything the
//! reconciler needs to build cluster objects without re-fetching the full
//! task from the control plane. The body is serialized as YAML into the
//! record's config object; stage counters live outside the body as
//! annotations so each counter write is a single patch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use vetes_core::{TaskId, TaskState};

/// Compute requirements of a task.
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

/// A GPU request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuResource {
    /// GPU model selector.
    #[serde(rename = "type")]
    pub gpu_type: String,
    /// Number of devices.
    pub count: f64,
}

/// One step of the task's sequential container pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSpec {
    /// Image reference.
    pub image: String,
    /// Command argv.
    pub command: Vec<String>,
    /// Working directory, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Stdin file path relative to the task workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    /// Stdout file path relative to the task workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Stderr file path relative to the task workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Environment map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Per-bucket credentials supplied with the task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalBucketAuth {
    /// Bucket name.
    pub bucket: String,
    /// Access key id.
    pub ak: String,
    /// Secret key.
    pub sk: String,
}

/// Bucket access classification for the task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketsAuthInfo {
    /// Buckets readable with the default credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_only: Vec<String>,
    /// Buckets writable with the default credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_write: Vec<String>,
    /// Buckets requiring their own credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external: Vec<ExternalBucketAuth>,
}

/// Submission metadata attached to a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BioosInfoMeta {
    /// Auth passport forwarded to stagers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aai_passport: Option<String>,
    /// Opt-in flag for bucket-mount acceleration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_bucket: Option<bool>,
    /// Per-bucket credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets_auth_info: Option<BucketsAuthInfo>,
}

/// Account/submission identity of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BioosInfo {
    /// Owning account.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_id: String,
    /// Submitting user.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    /// Submission this task belongs to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub submission_id: String,
    /// Workflow run this task belongs to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run_id: String,
    /// Extra metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<BioosInfoMeta>,
}

impl BioosInfo {
    /// Returns the per-bucket credentials, if any.
    #[must_use]
    pub fn external_auth(&self) -> &[ExternalBucketAuth] {
        self.meta
            .as_ref()
            .and_then(|meta| meta.buckets_auth_info.as_ref())
            .map_or(&[], |auth| auth.external.as_slice())
    }

    /// Returns true if the task opted into bucket-mount acceleration.
    #[must_use]
    pub fn wants_mount(&self) -> bool {
        self.meta
            .as_ref()
            .and_then(|meta| meta.mount_bucket)
            .unwrap_or(false)
    }
}

/// The record body stored per task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task id.
    pub id: TaskId,
    /// Display name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Compute requirements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    /// Ordered executor pipeline.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub executors: Vec<ExecutorSpec>,
    /// Submission identity and metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bioos_info: Option<BioosInfo>,
    /// Extra task-level mount paths inside the workspace volume.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Inline inputs manifest JSON, when under the offload threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs_json: Option<String>,
    /// Inline outputs manifest JSON, when under the offload threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs_json: Option<String>,
    /// Path of the offloaded inputs manifest, when over the threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs_ref: Option<String>,
    /// Path of the offloaded outputs manifest, when over the threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs_ref: Option<String>,
    /// Shared-mount names this task attached to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accelerate_names: Vec<String>,
}

impl TaskRecord {
    /// Returns true if an inputs stager must run for this task.
    #[must_use]
    pub fn has_inputs(&self) -> bool {
        self.inputs_json.is_some() || self.inputs_ref.is_some()
    }

    /// Returns true if an outputs stager must run for this task.
    #[must_use]
    pub fn has_outputs(&self) -> bool {
        self.outputs_json.is_some() || self.outputs_ref.is_some()
    }

    /// Returns true if a manifest was offloaded to the shared volume.
    #[must_use]
    pub fn has_offloaded_manifest(&self) -> bool {
        self.inputs_ref.is_some() || self.outputs_ref.is_some()
    }

    /// Returns true if the task needs a scratch volume claim (any staging
    /// or any extra mount path).
    #[must_use]
    pub fn needs_workspace(&self) -> bool {
        self.has_inputs() || self.has_outputs() || !self.volumes.is_empty()
    }
}

/// A record plus its stage counters, as read from the local store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskEntry {
    /// The record body.
    pub record: TaskRecord,
    /// Terminal state to stop the task with, once set.
    pub stop: Option<TaskState>,
    /// Coarse stage counter, unset until the reconciler first touches the
    /// task.
    pub stage: Option<i32>,
    /// Composite executor stage counter.
    pub executor_stage: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_predicates() {
        let mut record = TaskRecord {
            id: TaskId::new("task-1"),
            ..TaskRecord::default()
        };
        assert!(!record.has_inputs());
        assert!(!record.needs_workspace());

        record.inputs_json = Some(r#"{"inputs":[]}"#.into());
        assert!(record.has_inputs());
        assert!(record.needs_workspace());
        assert!(!record.has_offloaded_manifest());

        record.inputs_json = None;
        record.outputs_ref = Some("/offload/task-1/outputs.json".into());
        assert!(record.has_outputs());
        assert!(record.has_offloaded_manifest());
    }

    #[test]
    fn workspace_needed_for_bare_volumes() {
        let record = TaskRecord {
            id: TaskId::new("task-1"),
            volumes: vec!["/scratch".into()],
            ..TaskRecord::default()
        };
        assert!(record.needs_workspace());
    }

    #[test]
    fn record_round_trips_through_yaml() {
        let record = TaskRecord {
            id: TaskId::new("task-1"),
            name: "hello".into(),
            resources: Some(Resources {
                cpu_cores: 2,
                ram_gb: 4.0,
                disk_gb: 20.0,
                gpu: Some(GpuResource {
                    gpu_type: "a100".into(),
                    count: 1.0,
                }),
            }),
            executors: vec![ExecutorSpec {
                image: "ubuntu:22.04".into(),
                command: vec!["echo".into(), "hi".into()],
                ..ExecutorSpec::default()
            }],
            ..TaskRecord::default()
        };
        let yaml = serde_yaml::to_string(&record).unwrap();
        let parsed: TaskRecord = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn wants_mount_defaults_to_false() {
        let info = BioosInfo::default();
        assert!(!info.wants_mount());

        let info = BioosInfo {
            meta: Some(BioosInfoMeta {
                mount_bucket: Some(true),
                ..BioosInfoMeta::default()
            }),
            ..BioosInfo::default()
        };
        assert!(info.wants_mount());
    }
}
