//! Control-plane work synchronization.
//!
//! Each tick lists the tasks assigned to this cluster in `QUEUED` or
//! `CANCELING` state and dispatches every task id to a bounded worker pool.
//! Queued tasks are materialized into the local store (after URL rewriting,
//! credential embedding, and manifest offload); canceling tasks get their
//! local stop marker set, or are reported canceled directly when the agent
//! never allocated anything for them.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use metrics::counter;

use vetes_core::names::{MAXIMUM_PAGE_SIZE, OFFLOAD_THRESHOLD};
use vetes_core::{TaskId, TaskState, TaskView};

use crate::accelerate::Accelerator;
use crate::error::Result;
use crate::metrics::names::TASKS_SYNCED_TOTAL;
use crate::offload::OffloadHelper;
use crate::record::{
    BioosInfo, BioosInfoMeta, BucketsAuthInfo, ExecutorSpec, ExternalBucketAuth, GpuResource,
    Resources, TaskRecord,
};
use crate::store::LocalStore;
use crate::tes::models::{self, ListTasksRequest, Task, TaskUpdate};
use crate::tes::TaskService;

/// Materializes control-plane work into the local store.
pub struct Syncer {
    service: Arc<dyn TaskService>,
    store: LocalStore,
    offload: Arc<dyn OffloadHelper>,
    accelerator: Arc<dyn Accelerator>,
    cluster_id: String,
    concurrency: usize,
    offload_threshold: usize,
}

impl Syncer {
    /// Creates a syncer.
    #[must_use]
    pub fn new(
        service: Arc<dyn TaskService>,
        store: LocalStore,
        offload: Arc<dyn OffloadHelper>,
        accelerator: Arc<dyn Accelerator>,
        cluster_id: &str,
        concurrency: usize,
    ) -> Self {
        Self {
            service,
            store,
            offload,
            accelerator,
            cluster_id: cluster_id.to_owned(),
            concurrency,
            offload_threshold: OFFLOAD_THRESHOLD,
        }
    }

    /// Overrides the offload threshold (test support).
    #[must_use]
    pub fn with_offload_threshold(mut self, threshold: usize) -> Self {
        self.offload_threshold = threshold;
        self
    }

    /// Runs one tick: list, then sync every task through the bounded pool.
    pub async fn sync_tasks(&self) -> Result<()> {
        let tasks = self.list_tasks().await?;

        futures::stream::iter(tasks)
            .for_each_concurrent(self.concurrency, |task| async move {
                if let Err(err) = self.sync_task(&task.id, task.state).await {
                    tracing::error!(task = %task.id, %err, "failed to sync task");
                }
            })
            .await;
        Ok(())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        let mut page_token = None;
        loop {
            let response = self
                .service
                .list_tasks(&ListTasksRequest {
                    state: vec![TaskState::Queued, TaskState::Canceling],
                    cluster_id: self.cluster_id.clone(),
                    view: TaskView::Minimal,
                    page_size: MAXIMUM_PAGE_SIZE,
                    page_token,
                })
                .await?;
            tasks.extend(response.tasks);
            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(tasks)
    }

    async fn sync_task(&self, task_id: &TaskId, state: TaskState) -> Result<()> {
        match state {
            TaskState::Queued => self.sync_queued(task_id).await,
            TaskState::Canceling => self.sync_canceling(task_id).await,
            _ => Ok(()),
        }
    }

    async fn sync_queued(&self, task_id: &TaskId) -> Result<()> {
        match self.store.get_task(task_id).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let mut task = self.service.get_task(task_id, TaskView::Full).await?;
        let accelerate_names = self.accelerator.modify_sync_task(&mut task).await?;

        let mut record = task_to_record(&task);
        record.accelerate_names = accelerate_names;

        let result = self.materialize(&task, &mut record).await;
        if result.is_err() && record.has_offloaded_manifest() {
            self.offload.delete_offload_file(task_id);
        }
        result
    }

    /// Embeds credentials, resolves the manifests against the offload
    /// threshold, and stores the record.
    async fn materialize(&self, task: &Task, record: &mut TaskRecord) -> Result<()> {
        let mut task = task.clone();
        let external_auth = external_auth_by_bucket(&task);
        if !external_auth.is_empty() {
            for input in &mut task.inputs {
                input.url = embed_credentials(&input.url, &external_auth);
            }
            for output in &mut task.outputs {
                output.url = embed_credentials(&output.url, &external_auth);
            }
        }

        if !task.inputs.is_empty() {
            // the wrapper object matches what the stagers parse
            let inputs_json = serde_json::to_string(&serde_json::json!({"inputs": task.inputs}))
                .map_err(|e| {
                    crate::error::Error::serialization(format!("failed to marshal inputs: {e}"))
                })?;
            if inputs_json.len() <= self.offload_threshold {
                record.inputs_json = Some(inputs_json);
            } else {
                record.inputs_ref =
                    Some(self.offload.offload_inputs(&record.id, inputs_json.as_bytes())?);
            }
        }

        if !task.outputs.is_empty() {
            let outputs_json = serde_json::to_string(&serde_json::json!({"outputs": task.outputs}))
                .map_err(|e| {
                    crate::error::Error::serialization(format!("failed to marshal outputs: {e}"))
                })?;
            if outputs_json.len() <= self.offload_threshold {
                record.outputs_json = Some(outputs_json);
            } else {
                record.outputs_ref =
                    Some(self.offload.offload_outputs(&record.id, outputs_json.as_bytes())?);
            }
        }

        self.store.store_task(record).await?;
        counter!(TASKS_SYNCED_TOTAL).increment(1);
        Ok(())
    }

    async fn sync_canceling(&self, task_id: &TaskId) -> Result<()> {
        match self.store.get_task(task_id).await {
            Ok(entry) => {
                if entry.stop.is_some() {
                    return Ok(());
                }
                self.store.stop_task(task_id, TaskState::Canceled).await
            }
            Err(err) if err.is_not_found() => {
                // nothing was ever allocated here; report directly
                self.service
                    .update_task(
                        task_id,
                        &TaskUpdate {
                            state: Some(TaskState::Canceled),
                            logs: Vec::new(),
                        },
                    )
                    .await
            }
            Err(err) => Err(err),
        }
    }
}

fn external_auth_by_bucket(task: &Task) -> HashMap<String, (String, String)> {
    task.bioos_info
        .as_ref()
        .and_then(|info| info.meta.as_ref())
        .and_then(|meta| meta.buckets_auth_info.as_ref())
        .map(|auth| {
            auth.external
                .iter()
                .map(|e| (e.bucket.clone(), (e.ak.clone(), e.sk.clone())))
                .collect()
        })
        .unwrap_or_default()
}

/// Writes bucket credentials into the user-info part of an `s3://` URL.
/// Anything that is not an `s3://` URL of a credentialed bucket passes
/// through unchanged.
fn embed_credentials(url: &str, auth: &HashMap<String, (String, String)>) -> String {
    let Ok(mut parsed) = reqwest::Url::parse(url) else {
        return url.to_owned();
    };
    if parsed.scheme() != "s3" {
        return url.to_owned();
    }
    let Some(bucket) = parsed.host_str().map(str::to_owned) else {
        return url.to_owned();
    };
    let Some((ak, sk)) = auth.get(&bucket) else {
        return url.to_owned();
    };
    if parsed.set_username(ak).is_err() || parsed.set_password(Some(sk)).is_err() {
        return url.to_owned();
    }
    parsed.to_string()
}

/// Maps the over-the-wire task shape to the local record.
fn task_to_record(task: &Task) -> TaskRecord {
    TaskRecord {
        id: task.id.clone(),
        name: task.name.clone(),
        resources: task.resources.as_ref().map(resources_to_record),
        executors: task.executors.iter().map(executor_to_record).collect(),
        bioos_info: task.bioos_info.as_ref().map(bioos_info_to_record),
        volumes: task.volumes.clone(),
        ..TaskRecord::default()
    }
}

fn resources_to_record(resources: &models::Resources) -> Resources {
    Resources {
        cpu_cores: resources.cpu_cores,
        ram_gb: resources.ram_gb,
        disk_gb: resources.disk_gb,
        gpu: resources.gpu.as_ref().map(|gpu| GpuResource {
            gpu_type: gpu.gpu_type.clone(),
            count: gpu.count,
        }),
    }
}

fn executor_to_record(executor: &models::Executor) -> ExecutorSpec {
    ExecutorSpec {
        image: executor.image.clone(),
        command: executor.command.clone(),
        workdir: executor.workdir.clone(),
        stdin: executor.stdin.clone(),
        stdout: executor.stdout.clone(),
        stderr: executor.stderr.clone(),
        env: executor.env.clone(),
    }
}

fn bioos_info_to_record(info: &models::BioosInfo) -> BioosInfo {
    BioosInfo {
        account_id: info.account_id.clone(),
        user_id: info.user_id.clone(),
        submission_id: info.submission_id.clone(),
        run_id: info.run_id.clone(),
        meta: info.meta.as_ref().map(|meta| BioosInfoMeta {
            aai_passport: meta.aai_passport.clone(),
            mount_bucket: meta.mount_bucket,
            buckets_auth_info: meta.buckets_auth_info.as_ref().map(|auth| BucketsAuthInfo {
                read_only: auth.read_only.clone(),
                read_write: auth.read_write.clone(),
                external: auth
                    .external
                    .iter()
                    .map(|e| ExternalBucketAuth {
                        bucket: e.bucket.clone(),
                        ak: e.ak.clone(),
                        sk: e.sk.clone(),
                    })
                    .collect(),
            }),
        }),
    }
}
