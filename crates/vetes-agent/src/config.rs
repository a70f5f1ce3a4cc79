//! Agent configuration.
//!
//! Configuration is loaded from one YAML or JSON file (selected with
//! `--config`), then overridden from the environment: every leaf key has an
//! env name formed by joining its path with `_` and uppercasing, prefixed
//! with `VETES_` (the `::`-delimited key `syncer::period` becomes
//! `VETES_SYNCER_PERIOD`). A handful of flags override on top of that.
//!
//! All validation happens at startup; the agent refuses to run on the first
//! invalid option.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vetes_core::names::{
    MOUNT_BUCKET_ACCELERATE_TYPE, NULL_ACCELERATE_TYPE, OBJECT_STORAGE_TYPE, PVC_OFFLOAD_TYPE,
    S3_STORAGE_TYPE,
};

use crate::error::{Error, Result};

/// Serializes durations as whole seconds in config files.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Environment prefix for config overrides.
const ENV_PREFIX: &str = "VETES";

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Namespace the agent operates in.
    pub namespace: String,
    /// Logging options.
    pub log: LogOptions,
    /// Cluster identity and capacity reporting.
    pub cluster: ClusterOptions,
    /// Control-plane client options.
    pub tes: TesClientOptions,
    /// Syncer options.
    pub syncer: SyncerOptions,
    /// Reconciler options.
    pub reconciler: ReconcilerOptions,
    /// Manifest offload options.
    pub offload: OffloadOptions,
    /// Acceleration options.
    pub accelerate: AccelerateOptions,
    /// Task runner options (stagers, executors, task logs).
    pub runner: RunnerOptions,
    /// Leader election participation.
    pub leader_election: LeaderElectionOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            namespace: "vetes".into(),
            log: LogOptions::default(),
            cluster: ClusterOptions::default(),
            tes: TesClientOptions::default(),
            syncer: SyncerOptions::default(),
            reconciler: ReconcilerOptions::default(),
            offload: OffloadOptions::default(),
            accelerate: AccelerateOptions::default(),
            runner: RunnerOptions::default(),
            leader_election: LeaderElectionOptions::default(),
        }
    }
}

/// Logging options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    /// `pretty` or `json`.
    pub format: String,
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            format: "pretty".into(),
            level: "info".into(),
        }
    }
}

/// Cluster identity and capacity heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    /// This cluster's id at the control plane.
    pub id: String,
    /// Path of the YAML file describing capacity and limits.
    pub config_path: String,
    /// Heartbeat period, seconds.
    #[serde(with = "duration_secs")]
    pub report_period: Duration,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            id: String::new(),
            config_path: String::new(),
            report_period: Duration::from_secs(60),
        }
    }
}

/// Control-plane client options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TesClientOptions {
    /// Base URL of the task service.
    pub endpoint: String,
    /// Per-request timeout, seconds.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for TesClientOptions {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Syncer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncerOptions {
    /// Tick period, seconds.
    #[serde(with = "duration_secs")]
    pub period: Duration,
    /// Bounded worker-pool size per tick.
    pub concurrency: usize,
}

impl Default for SyncerOptions {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(30),
            concurrency: 10,
        }
    }
}

/// Reconciler options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerOptions {
    /// Concurrent reconciliations.
    pub concurrency: usize,
    /// Initial watch sync timeout, seconds.
    #[serde(with = "duration_secs")]
    pub sync_timeout: Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            sync_timeout: Duration::from_secs(60),
        }
    }
}

/// Manifest offload options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadOptions {
    /// Offload backend; only `pvc` is supported.
    #[serde(rename = "type")]
    pub offload_type: String,
    /// PVC backend options.
    pub pvc: PvcOffloadOptions,
}

impl Default for OffloadOptions {
    fn default() -> Self {
        Self {
            offload_type: PVC_OFFLOAD_TYPE.into(),
            pvc: PvcOffloadOptions::default(),
        }
    }
}

/// Options of the PVC offload backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PvcOffloadOptions {
    /// Claim shared between the agent and the stagers.
    pub pvc_name: String,
    /// Base directory the claim is mounted at, absolute.
    pub path: String,
}

impl Default for PvcOffloadOptions {
    fn default() -> Self {
        Self {
            pvc_name: String::new(),
            path: "/offload".into(),
        }
    }
}

/// Acceleration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelerateOptions {
    /// Engine selector: `null` or `mount-bucket`.
    #[serde(rename = "type")]
    pub accelerate_type: String,
    /// Bucket-mount engine options.
    pub mount_bucket: MountBucketOptions,
}

impl Default for AccelerateOptions {
    fn default() -> Self {
        Self {
            accelerate_type: NULL_ACCELERATE_TYPE.into(),
            mount_bucket: MountBucketOptions::default(),
        }
    }
}

/// Options of the bucket-mount acceleration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountBucketOptions {
    /// Object-storage endpoint URL handed to the CSI driver.
    pub endpoint_url: String,
    /// CSI driver backing the shared mounts.
    pub csi_driver: String,
    /// At most this many buckets are mounted per task.
    pub bucket_num_per_task: usize,
    /// Periodic sweep interval, seconds.
    #[serde(with = "duration_secs")]
    pub clean_period: Duration,
    /// Default-credential secret for cluster-shared mounts.
    pub static_secret: StaticSecretOptions,
    /// FUSE pod sizing handed to the CSI driver.
    pub fuse_pod_resources: FusePodResources,
    /// Extra driver arguments, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_args: Option<String>,
}

impl Default for MountBucketOptions {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            csi_driver: "tos.csi.volcengine.com".into(),
            bucket_num_per_task: 10,
            clean_period: Duration::from_secs(600),
            static_secret: StaticSecretOptions::default(),
            fuse_pod_resources: FusePodResources::default(),
            additional_args: None,
        }
    }
}

/// A statically provisioned credential secret.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticSecretOptions {
    /// Whether the secret is available.
    pub enable: bool,
    /// Secret name.
    pub name: String,
}

/// One cpu/memory pair for FUSE pod sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusePodResource {
    /// CPU quantity string.
    pub cpu: String,
    /// Memory quantity string.
    pub memory: String,
}

impl Default for FusePodResource {
    fn default() -> Self {
        Self {
            cpu: String::new(),
            memory: String::new(),
        }
    }
}

/// FUSE pod requests and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusePodResources {
    /// Scheduling requests.
    pub requests: FusePodResource,
    /// Hard limits.
    pub limits: FusePodResource,
}

impl Default for FusePodResources {
    fn default() -> Self {
        Self {
            requests: FusePodResource {
                cpu: "100m".into(),
                memory: "200Mi".into(),
            },
            limits: FusePodResource {
                cpu: "2".into(),
                memory: "8Gi".into(),
            },
        }
    }
}

/// Object-storage staging options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Whether stagers get credential wiring.
    pub enable: bool,
    /// Storage flavor: `object` or `s3`.
    #[serde(rename = "type")]
    pub storage_type: String,
    /// Static credential secret mounted into stagers.
    pub static_secret_name: String,
    /// SDK config object mounted into stagers.
    pub sdk_config_name: String,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            enable: true,
            storage_type: OBJECT_STORAGE_TYPE.into(),
            static_secret_name: String::new(),
            sdk_config_name: String::new(),
        }
    }
}

/// Stager image options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilerImageOptions {
    /// Stager image reference.
    pub image: String,
    /// Image pull secret, if needed.
    pub image_pull_secret_name: String,
}

/// Requests/limits maps of quantity strings keyed by resource name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesOptions {
    /// Hard limits.
    pub limits: BTreeMap<String, String>,
    /// Scheduling requests.
    pub requests: BTreeMap<String, String>,
}

impl Default for ResourcesOptions {
    fn default() -> Self {
        let mut limits = BTreeMap::new();
        limits.insert("cpu".into(), "1".into());
        limits.insert("memory".into(), "2Gi".into());
        let mut requests = BTreeMap::new();
        requests.insert("cpu".into(), "500m".into());
        requests.insert("memory".into(), "1Gi".into());
        Self { limits, requests }
    }
}

/// Task log options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskLogOptions {
    /// Directory task log files are written under.
    pub output_dir: String,
    /// Claim carrying the log directory, mounted into stagers.
    pub pvc_name: String,
    /// Log level passed to stagers.
    pub filer_log_level: String,
}

impl Default for TaskLogOptions {
    fn default() -> Self {
        Self {
            output_dir: "/app/log".into(),
            pvc_name: String::new(),
            filer_log_level: "info".into(),
        }
    }
}

/// Host/container transfer mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferOptions {
    /// Whether transfer mode is on.
    pub enable: bool,
    /// Host-side base path.
    pub wes_base_path: String,
    /// Container-side base path.
    pub tes_base_path: String,
    /// Claim mounted at the container-side base path.
    pub pvc_name: String,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            enable: false,
            wes_base_path: "/data".into(),
            tes_base_path: "/transfer".into(),
            pvc_name: String::new(),
        }
    }
}

/// Options of the task runner (builders and watchers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerOptions {
    /// Object-storage staging.
    pub storage: StorageOptions,
    /// Image pull secret for executor pods.
    pub executor_image_pull_secret_name: String,
    /// Workspace mount point inside task pods, absolute, trailing slash.
    pub executor_base_path: String,
    /// Stager image.
    pub filer_image: FilerImageOptions,
    /// Stager pod resources.
    pub filer_resources: ResourcesOptions,
    /// Storage class of per-task scratch claims.
    pub storage_class: String,
    /// Executor job retry budget.
    pub executor_retries: u32,
    /// Stager job retry budget.
    pub filer_retries: u32,
    /// Requeue interval while watching a pending pod, seconds.
    #[serde(with = "duration_secs")]
    pub pod_poll_interval: Duration,
    /// Image-pull stall timeout, seconds.
    #[serde(with = "duration_secs")]
    pub pod_image_pull_backoff_timeout: Duration,
    /// Extra labels for stager pods.
    pub filer_pod_labels: BTreeMap<String, String>,
    /// Extra annotations for stager pods.
    pub filer_pod_annotations: BTreeMap<String, String>,
    /// Extra env for stager pods (names uppercased).
    pub filer_pod_env: BTreeMap<String, String>,
    /// Extra labels for executor pods.
    pub executor_pod_labels: BTreeMap<String, String>,
    /// Extra annotations for executor pods.
    pub executor_pod_annotations: BTreeMap<String, String>,
    /// Extra env for executor pods (names uppercased).
    pub executor_pod_env: BTreeMap<String, String>,
    /// Task log handling.
    pub task_log: TaskLogOptions,
    /// Transfer mode.
    pub transfer: TransferOptions,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            storage: StorageOptions::default(),
            executor_image_pull_secret_name: String::new(),
            executor_base_path: "/cromwell-executions/".into(),
            filer_image: FilerImageOptions::default(),
            filer_resources: ResourcesOptions::default(),
            storage_class: "ebs-ssd".into(),
            executor_retries: 2,
            filer_retries: 2,
            pod_poll_interval: Duration::from_secs(60),
            pod_image_pull_backoff_timeout: Duration::from_secs(600),
            filer_pod_labels: BTreeMap::new(),
            filer_pod_annotations: BTreeMap::new(),
            filer_pod_env: BTreeMap::new(),
            executor_pod_labels: BTreeMap::new(),
            executor_pod_annotations: BTreeMap::new(),
            executor_pod_env: BTreeMap::new(),
            task_log: TaskLogOptions::default(),
            transfer: TransferOptions::default(),
        }
    }
}

/// Leader election participation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderElectionOptions {
    /// When false, the agent behaves as a permanent leader.
    pub enable: bool,
}

impl Default for LeaderElectionOptions {
    fn default() -> Self {
        Self { enable: false }
    }
}

impl AgentConfig {
    /// Loads configuration from a YAML or JSON file, then applies
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("failed to read config {}", path.display()), e))?;
        let mut value: serde_json::Value = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&raw)
                .map_err(|e| Error::configuration(format!("invalid JSON config: {e}")))?
        } else {
            serde_yaml::from_str(&raw)
                .map_err(|e| Error::configuration(format!("invalid YAML config: {e}")))?
        };

        apply_env_overrides(&mut value, ENV_PREFIX, &mut Vec::new())?;

        serde_json::from_value(value)
            .map_err(|e| Error::configuration(format!("invalid config: {e}")))
    }

    /// Validates the whole tree, failing fast on the first bad option.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::configuration("namespace must be set"));
        }
        match self.log.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(Error::configuration(format!("invalid log format: {other}")));
            }
        }
        if self.cluster.id.is_empty() {
            return Err(Error::configuration("cluster id must be set"));
        }
        if self.cluster.config_path.is_empty() {
            return Err(Error::configuration("cluster config path must be set"));
        }
        if self.tes.endpoint.is_empty() {
            return Err(Error::configuration("tes endpoint must be set"));
        }
        let url = reqwest::Url::parse(&self.tes.endpoint)
            .map_err(|e| Error::configuration(format!("invalid tes endpoint: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::configuration(format!(
                "invalid tes endpoint scheme: {}",
                url.scheme()
            )));
        }
        if self.syncer.concurrency == 0 {
            return Err(Error::configuration("syncer concurrency must be greater than 0"));
        }
        if self.reconciler.concurrency == 0 {
            return Err(Error::configuration(
                "reconciler concurrency must be greater than 0",
            ));
        }

        self.validate_offload()?;
        self.validate_accelerate()?;
        self.validate_runner()
    }

    fn validate_offload(&self) -> Result<()> {
        match self.offload.offload_type.as_str() {
            PVC_OFFLOAD_TYPE => {}
            other => {
                return Err(Error::configuration(format!("unsupported offload type: {other}")));
            }
        }
        if self.offload.pvc.pvc_name.is_empty() {
            return Err(Error::configuration("offload pvc name must be set"));
        }
        crate::offload::validate_base(Path::new(&self.offload.pvc.path))
    }

    fn validate_accelerate(&self) -> Result<()> {
        match self.accelerate.accelerate_type.as_str() {
            NULL_ACCELERATE_TYPE => Ok(()),
            MOUNT_BUCKET_ACCELERATE_TYPE => {
                let options = &self.accelerate.mount_bucket;
                let url = reqwest::Url::parse(&options.endpoint_url)
                    .map_err(|e| Error::configuration(format!("invalid mount endpoint url: {e}")))?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(Error::configuration(format!(
                        "invalid mount endpoint url scheme: {}",
                        url.scheme()
                    )));
                }
                if options.csi_driver.is_empty() {
                    return Err(Error::configuration("mount csi driver must be set"));
                }
                if options.bucket_num_per_task == 0 {
                    return Err(Error::configuration(
                        "bucket_num_per_task must be greater than 0",
                    ));
                }
                if options.clean_period < Duration::from_secs(1) {
                    return Err(Error::configuration("mount clean period must be at least 1s"));
                }
                if options.static_secret.enable && options.static_secret.name.is_empty() {
                    return Err(Error::configuration("empty static mount secret name"));
                }
                Ok(())
            }
            other => Err(Error::configuration(format!(
                "unsupported accelerate type: {other}"
            ))),
        }
    }

    fn validate_runner(&self) -> Result<()> {
        let runner = &self.runner;
        if runner.storage.enable {
            match runner.storage.storage_type.as_str() {
                OBJECT_STORAGE_TYPE | S3_STORAGE_TYPE => {}
                other => {
                    return Err(Error::configuration(format!("invalid storage type: {other}")));
                }
            }
            if runner.storage.static_secret_name.is_empty() {
                return Err(Error::configuration("storage static_secret_name must be set"));
            }
            if runner.storage.sdk_config_name.is_empty() {
                return Err(Error::configuration("storage sdk_config_name must be set"));
            }
        }

        if !runner.executor_base_path.starts_with('/') {
            return Err(Error::configuration(format!(
                "executor_base_path {} should be an absolute path",
                runner.executor_base_path
            )));
        }
        if !runner.executor_base_path.ends_with('/') {
            return Err(Error::configuration(format!(
                "executor_base_path {} should end with a slash",
                runner.executor_base_path
            )));
        }
        if runner.filer_image.image.is_empty() {
            return Err(Error::configuration("filer image must be set"));
        }
        for quantity in runner
            .filer_resources
            .limits
            .values()
            .chain(runner.filer_resources.requests.values())
        {
            if !is_quantity(quantity) {
                return Err(Error::configuration(format!(
                    "filer resources value {quantity} is not a valid quantity"
                )));
            }
        }
        if runner.storage_class.is_empty() {
            return Err(Error::configuration("storage class must be set"));
        }
        if runner.pod_poll_interval.is_zero() {
            return Err(Error::configuration("pod_poll_interval must be greater than 0"));
        }
        if runner.pod_image_pull_backoff_timeout.is_zero() {
            return Err(Error::configuration(
                "pod_image_pull_backoff_timeout must be greater than 0",
            ));
        }

        let log_dir = Path::new(&runner.task_log.output_dir);
        let stat = std::fs::metadata(log_dir)
            .map_err(|e| Error::io(format!("invalid task log output dir {}", log_dir.display()), e))?;
        if !stat.is_dir() {
            return Err(Error::configuration("task log output dir is not a directory"));
        }
        if runner.task_log.pvc_name.is_empty() {
            return Err(Error::configuration("task log pvc name must be set"));
        }
        match runner.task_log.filer_log_level.to_lowercase().as_str() {
            "debug" | "info" | "warn" | "error" | "panic" | "fatal" => {}
            other => {
                return Err(Error::configuration(format!("invalid filer log level: {other}")));
            }
        }

        if runner.transfer.enable {
            if !runner.transfer.wes_base_path.starts_with('/') {
                return Err(Error::configuration(
                    "transfer wes_base_path must be an absolute path",
                ));
            }
            if !runner.transfer.tes_base_path.starts_with('/') {
                return Err(Error::configuration(
                    "transfer tes_base_path must be an absolute path",
                ));
            }
            if runner.transfer.wes_base_path == runner.transfer.tes_base_path {
                return Err(Error::configuration(
                    "transfer wes_base_path and tes_base_path must differ",
                ));
            }
            if runner.transfer.pvc_name.is_empty() {
                return Err(Error::configuration("transfer pvc name must be set"));
            }
        }
        Ok(())
    }
}

/// Walks every leaf of `value`, replacing it from the environment when a
/// variable named `<prefix>_<PATH_JOINED_BY_UNDERSCORE>` is set. Values are
/// parsed with the type of the existing leaf.
fn apply_env_overrides(
    value: &mut serde_json::Value,
    prefix: &str,
    path: &mut Vec<String>,
) -> Result<()> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                path.push(key.clone());
                apply_env_overrides(child, prefix, path)?;
                path.pop();
            }
            Ok(())
        }
        leaf => {
            let env_name = std::iter::once(prefix.to_owned())
                .chain(path.iter().map(|segment| segment.to_uppercase()))
                .collect::<Vec<_>>()
                .join("_");
            let Ok(raw) = std::env::var(&env_name) else {
                return Ok(());
            };
            *leaf = parse_as(leaf, &raw).ok_or_else(|| {
                Error::configuration(format!(
                    "env override {env_name}={raw} does not match the type of {}",
                    path.join("::")
                ))
            })?;
            Ok(())
        }
    }
}

fn parse_as(existing: &serde_json::Value, raw: &str) -> Option<serde_json::Value> {
    match existing {
        serde_json::Value::Bool(_) => raw.parse::<bool>().ok().map(serde_json::Value::Bool),
        serde_json::Value::Number(_) => serde_json::from_str::<serde_json::Number>(raw)
            .ok()
            .map(serde_json::Value::Number),
        _ => Some(serde_json::Value::String(raw.to_owned())),
    }
}

/// Accepts quantity strings like `500m`, `2`, `1.5`, `2Gi`, `200Mi`.
fn is_quantity(value: &str) -> bool {
    let trimmed = value
        .strip_suffix("Ki")
        .or_else(|| value.strip_suffix("Mi"))
        .or_else(|| value.strip_suffix("Gi"))
        .or_else(|| value.strip_suffix("Ti"))
        .or_else(|| value.strip_suffix('m'))
        .or_else(|| value.strip_suffix('k'))
        .or_else(|| value.strip_suffix('M'))
        .or_else(|| value.strip_suffix('G'))
        .or_else(|| value.strip_suffix('T'))
        .unwrap_or(value);
    !trimmed.is_empty() && trimmed.parse::<f64>().is_ok()
}
