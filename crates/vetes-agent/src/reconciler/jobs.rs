//! Builders for the per-task cluster objects.
//!
//! Object names are derived from the task id and never configured:
//! `<taskId>-pvc`, `<taskId>-inputs-filer`, `<taskId>-outputs-filer`,
//! `<taskId>-ex-NN`.

use std::collections::BTreeMap;

use vetes_core::names::{
    env, ANNO_METERING_RESOURCE, ANNO_METERING_USER_INFO, ANNO_TASK_INPUTS, ANNO_TASK_INPUTS_REF,
    ANNO_TASK_NAME, ANNO_TASK_OUTPUTS, ANNO_TASK_OUTPUTS_REF, EXECUTOR_TYPE, FILER_TYPE_SUFFIX,
    GPU_NAME_AFFINITY_KEY, INPUTS_MODE, LABEL_ACCOUNT_ID, LABEL_EXECUTOR_NO, LABEL_RUN_ID,
    LABEL_SUBMISSION_ID, LABEL_TASK_ID, LABEL_TYPE, LABEL_USER_ID, NVIDIA_GPU_RESOURCE,
    OUTPUTS_MODE,
};
use vetes_core::TaskId;

use super::runner::TaskRunner;
use crate::cluster::{
    BatchJob, Container, EnvVar, JobSpec, KeyToPath, NodeAffinity, ObjectMeta, PodTemplate,
    ResourceRequirements, RestartPolicy, Volume, VolumeMount, VolumeSource,
};
use crate::record::{BioosInfo, ExecutorSpec, Resources, TaskRecord};

const TASK_VOLUME_NAME: &str = "task-volume";
const LOG_VOLUME_NAME: &str = "log-volume";
const TRANSFER_VOLUME_NAME: &str = "transfer-volume";
const WORKSPACE_SUB_PATH: &str = "dir-base";

/// Name of the task's scratch claim.
#[must_use]
pub fn pvc_name(task_id: &TaskId) -> String {
    format!("{task_id}-pvc")
}

/// Name of the task's inputs-stager job.
#[must_use]
pub fn inputs_filer_job_name(task_id: &TaskId) -> String {
    format!("{task_id}-inputs-filer")
}

/// Name of the task's outputs-stager job.
#[must_use]
pub fn outputs_filer_job_name(task_id: &TaskId) -> String {
    format!("{task_id}-outputs-filer")
}

/// Name of one executor job (two-digit index).
#[must_use]
pub fn executor_job_name(task_id: &TaskId, index: usize) -> String {
    format!("{task_id}-ex-{index:02}")
}

/// Formats a GB count as a Gi quantity string (`4` -> `4Gi`, `2.5` -> `2.5Gi`).
#[must_use]
pub fn gib_quantity(gb: f64) -> String {
    format!("{gb}Gi")
}

/// Stager operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilerMode {
    Inputs,
    Outputs,
}

impl FilerMode {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Inputs => INPUTS_MODE,
            Self::Outputs => OUTPUTS_MODE,
        }
    }

    fn type_label(self) -> String {
        format!("{}{FILER_TYPE_SUFFIX}", self.as_str())
    }
}

impl TaskRunner {
    /// Builds the inputs-stager job for a task.
    #[must_use]
    pub(super) fn build_inputs_filer_job(&self, record: &TaskRecord) -> BatchJob {
        self.build_filer_job(record, FilerMode::Inputs)
    }

    /// Builds the outputs-stager job for a task.
    #[must_use]
    pub(super) fn build_outputs_filer_job(&self, record: &TaskRecord) -> BatchJob {
        self.build_filer_job(record, FilerMode::Outputs)
    }

    fn build_filer_job(&self, record: &TaskRecord, mode: FilerMode) -> BatchJob {
        let name = match mode {
            FilerMode::Inputs => inputs_filer_job_name(&record.id),
            FilerMode::Outputs => outputs_filer_job_name(&record.id),
        };
        let labels: BTreeMap<String, String> = [
            (LABEL_TASK_ID.to_owned(), record.id.to_string()),
            (LABEL_TYPE.to_owned(), mode.type_label()),
        ]
        .into();

        let mut container = Container::new(&name, &self.options.filer_image.image);
        container.args = vec![mode.as_str().to_owned()];
        container.image_pull_always = true;
        container.resources = ResourceRequirements {
            requests: self.options.filer_resources.requests.clone(),
            limits: self.options.filer_resources.limits.clone(),
        };

        let mut template = PodTemplate {
            labels: labels.clone(),
            containers: vec![container],
            restart_policy: RestartPolicy::Never,
            ..PodTemplate::default()
        };
        if !self.options.filer_image.image_pull_secret_name.is_empty() {
            template
                .image_pull_secrets
                .push(self.options.filer_image.image_pull_secret_name.clone());
        }

        self.add_task_volume_mount(&mut template, record);
        self.add_filer_manifest(&mut template, record, mode);
        match mode {
            FilerMode::Inputs => self.accelerator.modify_inputs_filer(&mut template, record),
            FilerMode::Outputs => self.accelerator.modify_outputs_filer(&mut template, record),
        }
        self.add_filer_log_mount(&mut template, &record.id);
        if self.options.transfer.enable {
            self.add_transfer_env(&mut template);
            self.add_transfer_mount(&mut template, false);
        }
        if self.options.storage.enable {
            self.add_filer_storage_mounts(&mut template);
        }
        if let Some(passport) = record
            .bioos_info
            .as_ref()
            .and_then(|info| info.meta.as_ref())
            .and_then(|meta| meta.aai_passport.as_deref())
        {
            push_env(&mut template, EnvVar::new(env::AAI_PASSPORT, passport));
        }

        for (key, value) in &self.options.filer_pod_labels {
            template.labels.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.options.filer_pod_annotations {
            template.annotations.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.options.filer_pod_env {
            push_env(&mut template, EnvVar::new(key.to_uppercase(), value));
        }

        BatchJob {
            meta: ObjectMeta {
                name,
                labels,
                ..ObjectMeta::default()
            },
            spec: JobSpec {
                backoff_limit: self.options.filer_retries,
                active_deadline_seconds: None,
                template,
            },
            ..BatchJob::default()
        }
    }

    /// Builds the executor job at the given index.
    #[must_use]
    pub(super) fn build_executor_job(&self, record: &TaskRecord, index: usize) -> BatchJob {
        let name = executor_job_name(&record.id, index);
        let executor = &record.executors[index];
        let labels: BTreeMap<String, String> = [
            (LABEL_TASK_ID.to_owned(), record.id.to_string()),
            (LABEL_TYPE.to_owned(), EXECUTOR_TYPE.to_owned()),
            (LABEL_EXECUTOR_NO.to_owned(), index.to_string()),
        ]
        .into();
        let annotations: BTreeMap<String, String> =
            [(ANNO_TASK_NAME.to_owned(), record.name.clone())].into();

        let mut container = Container::new(&name, &executor.image);
        container.command = commands_with_stream_redirects(executor);
        container.working_dir = executor.workdir.clone();
        container.run_as_root = true;
        container.image_pull_always = true;
        for (key, value) in &executor.env {
            container.env.push(EnvVar::new(key, value));
        }

        let mut template = PodTemplate {
            labels: labels.clone(),
            annotations: annotations.clone(),
            containers: vec![container],
            restart_policy: RestartPolicy::Never,
            enable_service_links: Some(false),
            automount_service_account_token: Some(false),
            ..PodTemplate::default()
        };
        if !self.options.executor_image_pull_secret_name.is_empty() {
            template
                .image_pull_secrets
                .push(self.options.executor_image_pull_secret_name.clone());
        }
        for (key, value) in &self.options.executor_pod_env {
            push_env(&mut template, EnvVar::new(key.to_uppercase(), value));
        }
        add_identity_labels(&mut template, record.bioos_info.as_ref());
        add_metering_info(&mut template, record);
        if record.needs_workspace() {
            self.add_task_volume_mount(&mut template, record);
            self.accelerator.modify_executor(&mut template, record);
        }
        if self.options.transfer.enable {
            self.add_transfer_mount(&mut template, true);
        }
        for (key, value) in &self.options.executor_pod_labels {
            template.labels.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.options.executor_pod_annotations {
            template.annotations.insert(key.clone(), value.clone());
        }
        if let Some(resources) = &record.resources {
            add_resources(&mut template, resources);
            if let Some(gpu) = &resources.gpu {
                set_gpu_type_affinity(&mut template, &gpu.gpu_type);
            }
        }

        BatchJob {
            meta: ObjectMeta {
                name,
                labels,
                annotations,
                ..ObjectMeta::default()
            },
            spec: JobSpec {
                backoff_limit: self.options.executor_retries,
                active_deadline_seconds: None,
                template,
            },
            ..BatchJob::default()
        }
    }

    /// Mounts the task's scratch claim: the workspace at the executor base
    /// path plus one mount per extra task volume.
    fn add_task_volume_mount(&self, template: &mut PodTemplate, record: &TaskRecord) {
        let base = self.options.executor_base_path.trim_end_matches('/');
        for container in &mut template.containers {
            container.volume_mounts.push(VolumeMount {
                name: TASK_VOLUME_NAME.to_owned(),
                mount_path: base.to_owned(),
                sub_path: Some(WORKSPACE_SUB_PATH.to_owned()),
                read_only: false,
            });
            for (index, volume_path) in record.volumes.iter().enumerate() {
                container.volume_mounts.push(VolumeMount {
                    name: TASK_VOLUME_NAME.to_owned(),
                    mount_path: volume_path.clone(),
                    sub_path: Some(format!("dir{index}")),
                    read_only: false,
                });
            }
        }
        template.volumes.push(Volume {
            name: TASK_VOLUME_NAME.to_owned(),
            source: VolumeSource::Pvc {
                claim_name: pvc_name(&record.id),
                read_only: false,
            },
        });
    }

    /// Carries the manifest to the stager: inline as an annotation, or as a
    /// path reference plus the offload mount. Either way the stager reads
    /// its own annotations through the downward API.
    fn add_filer_manifest(&self, template: &mut PodTemplate, record: &TaskRecord, mode: FilerMode) {
        match mode {
            FilerMode::Inputs => {
                if let Some(inputs_json) = &record.inputs_json {
                    template
                        .annotations
                        .insert(ANNO_TASK_INPUTS.to_owned(), inputs_json.clone());
                } else if let Some(inputs_ref) = &record.inputs_ref {
                    template
                        .annotations
                        .insert(ANNO_TASK_INPUTS_REF.to_owned(), inputs_ref.clone());
                    self.offload.modify_inputs_filer(&record.id, template);
                }
            }
            FilerMode::Outputs => {
                if let Some(outputs_json) = &record.outputs_json {
                    template
                        .annotations
                        .insert(ANNO_TASK_OUTPUTS.to_owned(), outputs_json.clone());
                } else if let Some(outputs_ref) = &record.outputs_ref {
                    template
                        .annotations
                        .insert(ANNO_TASK_OUTPUTS_REF.to_owned(), outputs_ref.clone());
                    self.offload.modify_outputs_filer(&record.id, template);
                }
            }
        }
        push_env(
            template,
            EnvVar::new(env::POD_INFO_ANNOTATIONS_FILE, "/podinfo/annotations"),
        );
        for container in &mut template.containers {
            container.volume_mounts.push(VolumeMount {
                name: "podinfo".to_owned(),
                mount_path: "/podinfo".to_owned(),
                sub_path: None,
                read_only: true,
            });
        }
        template.volumes.push(Volume {
            name: "podinfo".to_owned(),
            source: VolumeSource::DownwardApiAnnotations {
                path: "annotations".to_owned(),
            },
        });
    }

    /// Mounts the task's log directory and points the stager's logging at it.
    fn add_filer_log_mount(&self, template: &mut PodTemplate, task_id: &TaskId) {
        let log_dir = format!(
            "{}/{task_id}",
            self.options.task_log.output_dir.trim_end_matches('/')
        );
        for container in &mut template.containers {
            container.args.extend([
                "--log-level".to_owned(),
                self.options.task_log.filer_log_level.clone(),
                "--log-file".to_owned(),
                format!("{log_dir}/app.log"),
            ]);
            container.volume_mounts.push(VolumeMount {
                name: LOG_VOLUME_NAME.to_owned(),
                mount_path: log_dir.clone(),
                sub_path: Some(task_id.to_string()),
                read_only: false,
            });
        }
        template.volumes.push(Volume {
            name: LOG_VOLUME_NAME.to_owned(),
            source: VolumeSource::Pvc {
                claim_name: self.options.task_log.pvc_name.clone(),
                read_only: false,
            },
        });
    }

    fn add_transfer_env(&self, template: &mut PodTemplate) {
        push_env(
            template,
            EnvVar::new(env::HOST_BASE_PATH, &self.options.transfer.wes_base_path),
        );
        push_env(
            template,
            EnvVar::new(env::CONTAINER_BASE_PATH, &self.options.transfer.tes_base_path),
        );
    }

    fn add_transfer_mount(&self, template: &mut PodTemplate, read_only: bool) {
        for container in &mut template.containers {
            container.volume_mounts.push(VolumeMount {
                name: TRANSFER_VOLUME_NAME.to_owned(),
                mount_path: self.options.transfer.tes_base_path.clone(),
                sub_path: None,
                read_only: false,
            });
        }
        template.volumes.push(Volume {
            name: TRANSFER_VOLUME_NAME.to_owned(),
            source: VolumeSource::Pvc {
                claim_name: self.options.transfer.pvc_name.clone(),
                read_only,
            },
        });
    }

    /// Wires object-storage credentials and SDK config into a stager.
    fn add_filer_storage_mounts(&self, template: &mut PodTemplate) {
        push_env(
            template,
            EnvVar::new(env::AWS_SHARED_CREDENTIALS_FILE, "/aws/credentials"),
        );
        push_env(
            template,
            EnvVar::new(env::AWS_CREDENTIALS_EXPIRED_TIME_FILE, "/aws/expiredTime"),
        );
        for container in &mut template.containers {
            container.volume_mounts.push(VolumeMount {
                name: "storage-secret".to_owned(),
                mount_path: "/aws".to_owned(),
                sub_path: None,
                read_only: true,
            });
        }
        template.volumes.push(Volume {
            name: "storage-secret".to_owned(),
            source: VolumeSource::Secret {
                secret_name: self.options.storage.static_secret_name.clone(),
                items: vec![
                    KeyToPath {
                        key: "credentials".to_owned(),
                        path: "credentials".to_owned(),
                    },
                    KeyToPath {
                        key: "expiredTime".to_owned(),
                        path: "expiredTime".to_owned(),
                    },
                ],
                optional: true,
            },
        });

        push_env(template, EnvVar::new(env::S3SDK_CONFIG_FILE, "/s3sdk/config"));
        for container in &mut template.containers {
            container.volume_mounts.push(VolumeMount {
                name: "sdk-config".to_owned(),
                mount_path: "/s3sdk".to_owned(),
                sub_path: None,
                read_only: true,
            });
        }
        template.volumes.push(Volume {
            name: "sdk-config".to_owned(),
            source: VolumeSource::ConfigObject {
                name: self.options.storage.sdk_config_name.clone(),
                items: vec![KeyToPath {
                    key: "config".to_owned(),
                    path: "config".to_owned(),
                }],
                optional: true,
            },
        });
    }
}

fn push_env(template: &mut PodTemplate, var: EnvVar) {
    for container in &mut template.containers {
        container.env.push(var.clone());
    }
}

fn add_identity_labels(template: &mut PodTemplate, info: Option<&BioosInfo>) {
    let Some(info) = info else {
        return;
    };
    if !info.account_id.is_empty() {
        template
            .labels
            .insert(LABEL_ACCOUNT_ID.to_owned(), info.account_id.clone());
    }
    if !info.user_id.is_empty() {
        template.labels.insert(LABEL_USER_ID.to_owned(), info.user_id.clone());
    }
    if !info.submission_id.is_empty() {
        template
            .labels
            .insert(LABEL_SUBMISSION_ID.to_owned(), info.submission_id.clone());
    }
    if !info.run_id.is_empty() {
        template.labels.insert(LABEL_RUN_ID.to_owned(), info.run_id.clone());
    }
}

/// Stamps the metering annotations: the user tag and the JSON-encoded
/// resource request.
fn add_metering_info(template: &mut PodTemplate, record: &TaskRecord) {
    let Some(info) = &record.bioos_info else {
        return;
    };
    if info.account_id.is_empty() {
        return;
    }
    let Some(resources) = &record.resources else {
        return;
    };

    let mut user_info = info.account_id.clone();
    if !info.user_id.is_empty() {
        user_info.push('-');
        user_info.push_str(&info.user_id);
    }
    template
        .annotations
        .insert(ANNO_METERING_USER_INFO.to_owned(), user_info);

    let mut resource_map = BTreeMap::new();
    resource_map.insert("cpu".to_owned(), resources.cpu_cores.to_string());
    resource_map.insert("memory".to_owned(), gib_quantity(resources.ram_gb));
    resource_map.insert("storage".to_owned(), gib_quantity(resources.disk_gb));
    if let Some(gpu) = &resources.gpu {
        if gpu.count > 0.0 && !gpu.gpu_type.is_empty() {
            let mut gpu_map = BTreeMap::new();
            gpu_map.insert(gpu.gpu_type.clone(), gpu.count.to_string());
            match serde_json::to_string(&gpu_map) {
                Ok(encoded) => {
                    resource_map.insert("gpu".to_owned(), encoded);
                }
                Err(err) => {
                    tracing::error!(task = %record.id, %err, "task gpu resource json marshal error");
                }
            }
        }
    }
    match serde_json::to_string(&resource_map) {
        Ok(encoded) => {
            template
                .annotations
                .insert(ANNO_METERING_RESOURCE.to_owned(), encoded);
        }
        Err(err) => {
            tracing::error!(task = %record.id, %err, "task resources json marshal error");
        }
    }
}

fn add_resources(template: &mut PodTemplate, resources: &Resources) {
    let cpu = resources.cpu_cores.to_string();
    let memory = gib_quantity(resources.ram_gb);
    for container in &mut template.containers {
        container.resources.requests.insert("cpu".to_owned(), cpu.clone());
        container
            .resources
            .requests
            .insert("memory".to_owned(), memory.clone());
        container.resources.limits.insert("cpu".to_owned(), cpu.clone());
        container
            .resources
            .limits
            .insert("memory".to_owned(), memory.clone());
        if let Some(gpu) = &resources.gpu {
            let count = gpu.count.to_string();
            container
                .resources
                .requests
                .insert(NVIDIA_GPU_RESOURCE.to_owned(), count.clone());
            container
                .resources
                .limits
                .insert(NVIDIA_GPU_RESOURCE.to_owned(), count);
        }
    }
}

fn set_gpu_type_affinity(template: &mut PodTemplate, gpu_type: &str) {
    if gpu_type.is_empty() {
        return;
    }
    template.node_affinity = Some(NodeAffinity {
        key: GPU_NAME_AFFINITY_KEY.to_owned(),
        values: vec![gpu_type.to_owned()],
    });
}

/// Characters that force an argument into single quotes when the command is
/// rewritten through `/bin/sh -c`.
const SPECIAL_CHARS: &[char] = &[
    ' ', '!', '"', '#', '$', '&', '\'', '(', ')', '*', ';', '<', '>', '?', '[', '\\', '`', '{',
    '|', '~', '\t', '\n',
];

/// Wraps an executor command for stream redirection.
///
/// Without stdin/stdout/stderr the original argv is used verbatim. With any
/// of them, the argv is joined into one `/bin/sh -c` command line with the
/// redirections appended; arguments containing shell-special characters are
/// single-quoted, embedded single quotes escaped as `'"'"'`.
#[must_use]
pub fn commands_with_stream_redirects(executor: &ExecutorSpec) -> Vec<String> {
    if executor.stdin.is_none() && executor.stdout.is_none() && executor.stderr.is_none() {
        return executor.command.clone();
    }

    let mut parts: Vec<String> = Vec::with_capacity(executor.command.len() + 6);
    for argument in &executor.command {
        if argument.contains(SPECIAL_CHARS) {
            let escaped = argument.replace('\'', r#"'"'"'"#);
            parts.push(format!("'{escaped}'"));
        } else {
            parts.push(argument.clone());
        }
    }
    if let Some(stdin) = &executor.stdin {
        parts.push("<".to_owned());
        parts.push(stdin.clone());
    }
    if let Some(stdout) = &executor.stdout {
        parts.push(">".to_owned());
        parts.push(stdout.clone());
    }
    if let Some(stderr) = &executor.stderr {
        parts.push("2>".to_owned());
        parts.push(stderr.clone());
    }

    vec!["/bin/sh".to_owned(), "-c".to_owned(), parts.join(" ")]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_names() {
        let id = TaskId::new("task-1");
        assert_eq!(pvc_name(&id), "task-1-pvc");
        assert_eq!(inputs_filer_job_name(&id), "task-1-inputs-filer");
        assert_eq!(outputs_filer_job_name(&id), "task-1-outputs-filer");
        assert_eq!(executor_job_name(&id, 0), "task-1-ex-00");
        assert_eq!(executor_job_name(&id, 11), "task-1-ex-11");
    }

    #[test]
    fn gib_quantities() {
        assert_eq!(gib_quantity(4.0), "4Gi");
        assert_eq!(gib_quantity(2.5), "2.5Gi");
        assert_eq!(gib_quantity(0.0), "0Gi");
    }

    #[test]
    fn plain_command_passes_through() {
        let executor = ExecutorSpec {
            command: vec!["echo".into(), "hi there".into()],
            ..ExecutorSpec::default()
        };
        assert_eq!(
            commands_with_stream_redirects(&executor),
            vec!["echo".to_owned(), "hi there".to_owned()]
        );
    }

    #[test]
    fn stdout_redirect_wraps_and_quotes() {
        let executor = ExecutorSpec {
            command: vec!["echo".into(), "hi there".into()],
            stdout: Some("/out".into()),
            ..ExecutorSpec::default()
        };
        assert_eq!(
            commands_with_stream_redirects(&executor),
            vec![
                "/bin/sh".to_owned(),
                "-c".to_owned(),
                "echo 'hi there' > /out".to_owned()
            ]
        );
    }

    #[test]
    fn embedded_single_quote_is_escaped() {
        let executor = ExecutorSpec {
            command: vec!["a'b".into()],
            stdout: Some("/out".into()),
            ..ExecutorSpec::default()
        };
        assert_eq!(
            commands_with_stream_redirects(&executor)[2],
            r#"'a'"'"'b' > /out"#
        );
    }

    #[test]
    fn all_three_streams_in_order() {
        let executor = ExecutorSpec {
            command: vec!["cat".into()],
            stdin: Some("/in".into()),
            stdout: Some("/out".into()),
            stderr: Some("/err".into()),
            ..ExecutorSpec::default()
        };
        assert_eq!(
            commands_with_stream_redirects(&executor)[2],
            "cat < /in > /out 2> /err"
        );
    }

    #[test]
    fn metering_annotations() {
        let record = TaskRecord {
            id: TaskId::new("task-1"),
            resources: Some(Resources {
                cpu_cores: 4,
                ram_gb: 8.0,
                disk_gb: 40.0,
                gpu: Some(crate::record::GpuResource {
                    gpu_type: "a100".into(),
                    count: 1.0,
                }),
            }),
            bioos_info: Some(BioosInfo {
                account_id: "acct".into(),
                user_id: "user".into(),
                ..BioosInfo::default()
            }),
            ..TaskRecord::default()
        };
        let mut template = PodTemplate::default();
        add_metering_info(&mut template, &record);

        assert_eq!(
            template.annotations.get(ANNO_METERING_USER_INFO).map(String::as_str),
            Some("acct-user")
        );
        let resource_json = template.annotations.get(ANNO_METERING_RESOURCE).unwrap();
        let decoded: BTreeMap<String, String> = serde_json::from_str(resource_json).unwrap();
        assert_eq!(decoded.get("cpu").map(String::as_str), Some("4"));
        assert_eq!(decoded.get("memory").map(String::as_str), Some("8Gi"));
        assert_eq!(decoded.get("storage").map(String::as_str), Some("40Gi"));
        let gpu: BTreeMap<String, String> =
            serde_json::from_str(decoded.get("gpu").unwrap()).unwrap();
        assert_eq!(gpu.get("a100").map(String::as_str), Some("1"));
    }

    #[test]
    fn gpu_affinity_requires_a_type() {
        let mut template = PodTemplate::default();
        set_gpu_type_affinity(&mut template, "");
        assert!(template.node_affinity.is_none());

        set_gpu_type_affinity(&mut template, "a100");
        let affinity = template.node_affinity.unwrap();
        assert_eq!(affinity.key, GPU_NAME_AFFINITY_KEY);
        assert_eq!(affinity.values, vec!["a100".to_owned()]);
    }
}
