//! The per-task stage machine.
//!
//! [`TaskRunner::process_task`] is re-entered on every change to the task's
//! record or any of its jobs, and advances the task exactly one stage per
//! pass. Entry is guarded by a per-task set so at most one pass progresses
//! a given task at any moment; a busy task requeues after a short delay.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};

use vetes_core::names::{FINALIZER_TASK, LABEL_JOB_NAME, LABEL_TASK_ID};
use vetes_core::{TaskId, TaskState, TaskView};

use super::jobs::{executor_job_name, inputs_filer_job_name, outputs_filer_job_name, pvc_name};
use super::stage::{
    ExecutorStage, ExecutorStatus, STAGE_EXECUTORS_FINISHED, STAGE_EXECUTORS_TO_CREATE,
    STAGE_INIT, STAGE_INITIALIZING, STAGE_INPUTS_FILER_CREATED, STAGE_INPUTS_FILER_FINISHED,
    STAGE_INPUTS_FILER_TO_CREATE, STAGE_OUTPUTS_FILER_CREATED, STAGE_OUTPUTS_FILER_FINISHED,
    STAGE_OUTPUTS_FILER_TO_CREATE, STAGE_PVC_CREATED, STAGE_PVC_TO_CREATE, STAGE_RUNNING,
};
use crate::accelerate::Accelerator;
use crate::cluster::{BatchJob, ClusterApi, ContainerState, JobPhase, ObjectKind, PodPhase};
use crate::config::RunnerOptions;
use crate::error::{Reconcile, Result};
use crate::filelog::{remove_task_log_dir, TaskLogger};
use crate::metrics::labels::STATE;
use crate::metrics::names::{TASKS_FINISHED_TOTAL, TASKS_PROCESSING};
use crate::offload::OffloadHelper;
use crate::record::TaskEntry;
use crate::store::LocalStore;
use crate::tes::models::{Task, TaskLog, TaskUpdate};
use crate::tes::TaskService;

/// Requeue delay when another pass holds the task.
pub(crate) const TRY_PROCESS_LATENCY: Duration = Duration::from_secs(1);
/// Requeue delay while waiting for a finished job's pods to disappear.
pub(crate) const WAIT_POD_DELETED: Duration = Duration::from_secs(5);
/// Requeue delay after a control-plane time conflict.
pub(crate) const WAIT_UPDATE_TIME_CONFLICT: Duration = Duration::from_secs(1);
/// Grace before deleting a finished job's pods; the job controller can
/// briefly recreate pods for a finished job.
pub(crate) const POD_DELETE_GRACE: Duration = Duration::from_millis(100);

/// Drives tasks through their stage machine.
pub struct TaskRunner {
    pub(super) service: Arc<dyn TaskService>,
    pub(super) store: LocalStore,
    pub(super) offload: Arc<dyn OffloadHelper>,
    pub(super) accelerator: Arc<dyn Accelerator>,
    pub(super) cluster: Arc<dyn ClusterApi>,
    pub(super) cluster_id: String,
    pub(super) options: RunnerOptions,
    processing: Mutex<HashSet<TaskId>>,
}

/// Releases the per-task slot on drop.
pub(super) struct ProcessingGuard<'a> {
    runner: &'a TaskRunner,
    task_id: TaskId,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        let mut processing = self
            .runner
            .processing
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        processing.remove(&self.task_id);
        gauge!(TASKS_PROCESSING).decrement(1.0);
    }
}

impl TaskRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        service: Arc<dyn TaskService>,
        store: LocalStore,
        offload: Arc<dyn OffloadHelper>,
        accelerator: Arc<dyn Accelerator>,
        cluster: Arc<dyn ClusterApi>,
        cluster_id: &str,
        options: RunnerOptions,
    ) -> Self {
        Self {
            service,
            store,
            offload,
            accelerator,
            cluster,
            cluster_id: cluster_id.to_owned(),
            options,
            processing: Mutex::new(HashSet::new()),
        }
    }

    /// Claims the per-task slot; `None` when another pass holds it.
    pub(super) fn try_process(&self, task_id: &TaskId) -> Option<ProcessingGuard<'_>> {
        let mut processing = self
            .processing
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !processing.insert(task_id.clone()) {
            return None;
        }
        gauge!(TASKS_PROCESSING).increment(1.0);
        Some(ProcessingGuard {
            runner: self,
            task_id: task_id.clone(),
        })
    }

    pub(super) fn task_logger(&self, task_id: &TaskId) -> TaskLogger {
        TaskLogger::new(Path::new(&self.options.task_log.output_dir), task_id.as_str())
    }

    /// One reconciliation pass for a task.
    pub async fn process_task(&self, task_id: &TaskId) -> Result<Reconcile> {
        let Some(_guard) = self.try_process(task_id) else {
            return Ok(Reconcile::after(TRY_PROCESS_LATENCY));
        };
        let logger = self.task_logger(task_id);

        let task = self.service.get_task(task_id, TaskView::Basic).await?;
        if task.cluster_id != self.cluster_id {
            return Ok(Reconcile::done());
        }

        match task.state {
            TaskState::Canceling => {
                logger.info("stop task because cancel task");
                self.stop_and_clean(&logger, &task, TaskState::Canceled).await
            }
            state if state.is_terminal() => self.stop_and_clean(&logger, &task, state).await,
            _ => self.run_task(&logger, &task).await,
        }
    }

    async fn run_task(&self, logger: &TaskLogger, task: &Task) -> Result<Reconcile> {
        let entry = self.store.get_task(&task.id).await?;
        if let Some(stop) = entry.stop {
            return self.stop_and_clean(logger, task, stop).await;
        }

        let accel = self.accelerator.on_process_task(&entry.record).await?;
        if !accel.is_done() {
            return Ok(accel);
        }

        let Some(current_stage) = entry.stage else {
            self.store.record_stage(&task.id, STAGE_INIT).await?;
            return Ok(Reconcile::done());
        };

        match current_stage {
            s if s < STAGE_INITIALIZING => self.do_initializing(logger, task).await,
            s if s < STAGE_PVC_CREATED => self.do_create_pvc(logger, &entry).await,
            s if s < STAGE_INPUTS_FILER_CREATED => self.do_create_inputs_filer(logger, &entry).await,
            s if s < STAGE_INPUTS_FILER_FINISHED => {
                self.do_watch_inputs_filer(logger, task, &entry).await
            }
            s if s < STAGE_RUNNING => self.do_running(logger, task).await,
            s if s < STAGE_EXECUTORS_FINISHED => self.do_executors(logger, task, &entry).await,
            s if s < STAGE_OUTPUTS_FILER_CREATED => {
                self.do_create_outputs_filer(logger, &entry).await
            }
            s if s < STAGE_OUTPUTS_FILER_FINISHED => {
                self.do_watch_outputs_filer(logger, task, &entry).await
            }
            _ => self.do_complete(logger, task, &entry).await,
        }
    }

    async fn do_initializing(&self, logger: &TaskLogger, task: &Task) -> Result<Reconcile> {
        let update = TaskUpdate {
            state: Some(TaskState::Initializing),
            logs: self.initializing_logs(task),
        };
        self.service.update_task(&task.id, &update).await?;
        logger.info("start task: Initializing");
        self.store.record_stage(&task.id, STAGE_INITIALIZING).await?;
        Ok(Reconcile::done())
    }

    /// A start-time entry for this cluster, unless one is already recorded.
    fn initializing_logs(&self, task: &Task) -> Vec<TaskLog> {
        if let Some(matched) = task.matched_log(&self.cluster_id) {
            if matched.start_time.is_some() {
                return Vec::new();
            }
        }
        vec![TaskLog {
            cluster_id: self.cluster_id.clone(),
            start_time: Some(Utc::now()),
            ..TaskLog::default()
        }]
    }

    async fn do_create_pvc(&self, logger: &TaskLogger, entry: &TaskEntry) -> Result<Reconcile> {
        if entry.record.needs_workspace() {
            self.create_task_pvc(logger, &entry.record).await?;
        }
        self.store.record_stage(&entry.record.id, STAGE_PVC_CREATED).await?;
        Ok(Reconcile::done())
    }

    async fn do_create_inputs_filer(
        &self,
        logger: &TaskLogger,
        entry: &TaskEntry,
    ) -> Result<Reconcile> {
        if entry.record.has_inputs() {
            let job = self.build_inputs_filer_job(&entry.record);
            self.create_job(logger, job).await?;
        }
        self.store
            .record_stage(&entry.record.id, STAGE_INPUTS_FILER_CREATED)
            .await?;
        Ok(Reconcile::done())
    }

    async fn do_watch_inputs_filer(
        &self,
        logger: &TaskLogger,
        task: &Task,
        entry: &TaskEntry,
    ) -> Result<Reconcile> {
        if entry.record.has_inputs() {
            let job_name = inputs_filer_job_name(&entry.record.id);
            let job = self.cluster.get_job(&job_name).await?;
            match job.phase() {
                JobPhase::Running => return Ok(Reconcile::done()),
                JobPhase::Failed => {
                    logger.error(&format!("stop task because job {job_name} failed"));
                    self.record_job_failed_message(logger, &job_name).await?;
                    return self.stop_and_clean(logger, task, TaskState::SystemError).await;
                }
                JobPhase::Complete => {
                    if !self.delete_job_pods(logger, &job_name).await? {
                        return Ok(Reconcile::after(WAIT_POD_DELETED));
                    }
                }
            }
        }
        self.store
            .record_stage(&entry.record.id, STAGE_INPUTS_FILER_FINISHED)
            .await?;
        Ok(Reconcile::done())
    }

    async fn do_running(&self, logger: &TaskLogger, task: &Task) -> Result<Reconcile> {
        let update = TaskUpdate {
            state: Some(TaskState::Running),
            logs: Vec::new(),
        };
        self.service.update_task(&task.id, &update).await?;
        logger.info("start task: Running");
        self.store.record_stage(&task.id, STAGE_RUNNING).await?;
        Ok(Reconcile::done())
    }

    async fn do_executors(
        &self,
        logger: &TaskLogger,
        task: &Task,
        entry: &TaskEntry,
    ) -> Result<Reconcile> {
        let Some(raw_stage) = entry.executor_stage else {
            self.store
                .record_executor_stage(
                    &task.id,
                    ExecutorStage::new(0, ExecutorStatus::ToCreate).value(),
                )
                .await?;
            return Ok(Reconcile::done());
        };
        let stage = ExecutorStage::from_value(raw_stage);
        let max_index = entry.record.executors.len() as i32 - 1;

        match stage.status {
            ExecutorStatus::ToCreate => self.do_create_executor(logger, entry, stage.index).await,
            ExecutorStatus::Created => self.do_watch_executor(logger, &task.id, stage.index).await,
            ExecutorStatus::Success if stage.index < max_index => {
                self.store
                    .record_executor_stage(
                        &task.id,
                        ExecutorStage::new(stage.index + 1, ExecutorStatus::ToCreate).value(),
                    )
                    .await?;
                Ok(Reconcile::done())
            }
            _ => {
                match stage.status {
                    ExecutorStatus::Success => logger.info("finished all executors: Success"),
                    ExecutorStatus::Failed => logger.info("finished all executors: Failed"),
                    _ => {}
                }
                self.store.record_stage(&task.id, STAGE_EXECUTORS_FINISHED).await?;
                Ok(Reconcile::done())
            }
        }
    }

    async fn do_create_executor(
        &self,
        logger: &TaskLogger,
        entry: &TaskEntry,
        index: i32,
    ) -> Result<Reconcile> {
        let job = self.build_executor_job(&entry.record, index as usize);
        self.create_job(logger, job).await?;
        self.store
            .record_executor_stage(
                &entry.record.id,
                ExecutorStage::new(index, ExecutorStatus::Created).value(),
            )
            .await?;
        Ok(Reconcile::done())
    }

    async fn do_watch_executor(
        &self,
        logger: &TaskLogger,
        task_id: &TaskId,
        index: i32,
    ) -> Result<Reconcile> {
        let job_name = executor_job_name(task_id, index as usize);
        let job = self.cluster.get_job(&job_name).await?;
        let status = match job.phase() {
            JobPhase::Running => return Ok(Reconcile::done()),
            JobPhase::Failed => {
                logger.error(&format!("executor job {job_name} failed"));
                self.record_job_failed_message(logger, &job_name).await?;
                ExecutorStatus::Failed
            }
            JobPhase::Complete => ExecutorStatus::Success,
        };
        if !self.delete_job_pods(logger, &job_name).await? {
            return Ok(Reconcile::after(WAIT_POD_DELETED));
        }
        self.store
            .record_executor_stage(task_id, ExecutorStage::new(index, status).value())
            .await?;
        Ok(Reconcile::done())
    }

    async fn do_create_outputs_filer(
        &self,
        logger: &TaskLogger,
        entry: &TaskEntry,
    ) -> Result<Reconcile> {
        if entry.record.has_outputs() {
            let job = self.build_outputs_filer_job(&entry.record);
            self.create_job(logger, job).await?;
        }
        self.store
            .record_stage(&entry.record.id, STAGE_OUTPUTS_FILER_CREATED)
            .await?;
        Ok(Reconcile::done())
    }

    async fn do_watch_outputs_filer(
        &self,
        logger: &TaskLogger,
        task: &Task,
        entry: &TaskEntry,
    ) -> Result<Reconcile> {
        if entry.record.has_outputs() {
            let job_name = outputs_filer_job_name(&entry.record.id);
            let job = self.cluster.get_job(&job_name).await?;
            match job.phase() {
                JobPhase::Running => return Ok(Reconcile::done()),
                JobPhase::Failed => {
                    logger.error(&format!("stop task because job {job_name} failed"));
                    self.record_job_failed_message(logger, &job_name).await?;
                    return self.stop_and_clean(logger, task, TaskState::SystemError).await;
                }
                JobPhase::Complete => {
                    if !self.delete_job_pods(logger, &job_name).await? {
                        return Ok(Reconcile::after(WAIT_POD_DELETED));
                    }
                }
            }
        }
        self.store
            .record_stage(&entry.record.id, STAGE_OUTPUTS_FILER_FINISHED)
            .await?;
        Ok(Reconcile::done())
    }

    async fn do_complete(
        &self,
        logger: &TaskLogger,
        task: &Task,
        entry: &TaskEntry,
    ) -> Result<Reconcile> {
        let executors_success = match entry.executor_stage {
            Some(raw) => ExecutorStage::from_value(raw).status == ExecutorStatus::Success,
            None => {
                logger.error(&format!("task {} has no executor stage", task.id));
                false
            }
        };
        let finish_state = if executors_success {
            TaskState::Complete
        } else {
            TaskState::ExecutorError
        };
        self.stop_and_clean(logger, task, finish_state).await
    }

    /// Tears the task down and reports its terminal state. Idempotent;
    /// re-entered until every step has succeeded once.
    pub(super) async fn stop_and_clean(
        &self,
        logger: &TaskLogger,
        task: &Task,
        state: TaskState,
    ) -> Result<Reconcile> {
        let entry = match self.store.get_task(&task.id).await {
            Ok(entry) => entry,
            Err(err) if err.is_not_found() => return Ok(Reconcile::done()),
            Err(err) => return Err(err),
        };
        if entry.stop.is_none() {
            self.store.stop_task(&task.id, state).await?;
        }
        let current_stage = entry.stage.unwrap_or(STAGE_INIT);

        // tear down in reverse order of creation
        if current_stage >= STAGE_OUTPUTS_FILER_TO_CREATE && entry.record.has_outputs() {
            self.delete_job(logger, &outputs_filer_job_name(&task.id)).await?;
        }
        if current_stage >= STAGE_EXECUTORS_TO_CREATE {
            if let Some(raw) = entry.executor_stage {
                let last_index = ExecutorStage::from_value(raw).index;
                for index in 0..=last_index {
                    self.delete_job(logger, &executor_job_name(&task.id, index as usize))
                        .await?;
                }
            }
        }
        if current_stage >= STAGE_INPUTS_FILER_TO_CREATE && entry.record.has_inputs() {
            self.delete_job(logger, &inputs_filer_job_name(&task.id)).await?;
        }
        if current_stage >= STAGE_PVC_TO_CREATE && entry.record.needs_workspace() {
            self.delete_task_pvc(logger, &pvc_name(&task.id)).await?;
        }

        let message = logger.content().unwrap_or_default();
        let mut update = TaskUpdate {
            state: None,
            logs: self.finish_logs(task, message),
        };
        if task.state != state {
            update.state = Some(state);
        }
        match self.service.update_task(&task.id, &update).await {
            Ok(()) => {}
            Err(err) if err.is_bad_request() => {
                tracing::warn!(task = %task.id, %err, "bad request for update task, maybe because executor end_time not filled");
                return Ok(Reconcile::after(WAIT_UPDATE_TIME_CONFLICT));
            }
            Err(err) => return Err(err),
        }

        if entry.record.has_offloaded_manifest() {
            self.offload.delete_offload_file(&task.id);
        }
        remove_task_log_dir(Path::new(&self.options.task_log.output_dir), task.id.as_str());
        self.accelerator.on_finish_task(&entry.record).await?;
        match self.store.delete_task(&task.id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        counter!(TASKS_FINISHED_TOTAL, STATE => state.as_str()).increment(1);
        Ok(Reconcile::done())
    }

    /// The final log entry: the whole task log file as a system log, plus
    /// whichever of start/end time the control plane does not have yet.
    fn finish_logs(&self, task: &Task, message: String) -> Vec<TaskLog> {
        let message = if message.is_empty() {
            "<empty>".to_owned()
        } else {
            message
        };
        let mut entry = TaskLog {
            cluster_id: self.cluster_id.clone(),
            system_logs: vec![message],
            ..TaskLog::default()
        };

        let now = Utc::now();
        match task.matched_log(&self.cluster_id) {
            None => {
                entry.start_time = Some(now);
                entry.end_time = Some(now);
            }
            Some(matched) if matched.start_time.is_none() => {
                entry.start_time = Some(now);
                entry.end_time = Some(now);
            }
            Some(matched) if matched.end_time.is_none() => {
                entry.end_time = Some(now);
            }
            Some(_) => {}
        }
        vec![entry]
    }

    // --- Cluster object helpers ------------------------------------------

    pub(super) async fn create_job(&self, logger: &TaskLogger, mut job: BatchJob) -> Result<()> {
        job.meta.finalizers.push(FINALIZER_TASK.to_owned());
        let name = job.meta.name.clone();
        match self.cluster.create_job(job).await {
            Ok(()) => {
                logger.info(&format!("created job {name}"));
                Ok(())
            }
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub(super) async fn delete_job(&self, logger: &TaskLogger, job_name: &str) -> Result<()> {
        match self.cluster.get_job(job_name).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        }
        self.cluster
            .remove_finalizer(ObjectKind::Job, job_name, FINALIZER_TASK)
            .await?;
        match self.cluster.delete_job(job_name).await {
            Ok(()) => {
                logger.info(&format!("deleted job {job_name}"));
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Stops a job by zeroing its active deadline.
    pub(super) async fn stop_job(&self, logger: &TaskLogger, job_name: &str) -> Result<()> {
        match self.cluster.stop_job(job_name).await {
            Ok(()) => {
                logger.info(&format!("stopped job {job_name}"));
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Deletes a finished job's pods; true once none remain.
    pub(super) async fn delete_job_pods(
        &self,
        logger: &TaskLogger,
        job_name: &str,
    ) -> Result<bool> {
        // a finished job's controller may still stamp out one more pod
        // (kubernetes#109902); give it a moment before deleting
        tokio::time::sleep(POD_DELETE_GRACE).await;

        let selector = [(LABEL_JOB_NAME, job_name)];
        self.cluster.delete_pods(&selector).await?;
        let pods = self.cluster.list_pods(&selector).await?;
        if pods.is_empty() {
            logger.info(&format!("deleted pods of job {job_name}"));
            return Ok(true);
        }
        Ok(false)
    }

    /// Captures the failure message of a failed job's pods into the task log.
    pub(super) async fn record_job_failed_message(
        &self,
        logger: &TaskLogger,
        job_name: &str,
    ) -> Result<()> {
        let pods = self.cluster.list_pods(&[(LABEL_JOB_NAME, job_name)]).await?;
        for pod in pods {
            if pod.status.phase != PodPhase::Failed {
                continue;
            }
            for status in &pod.status.container_statuses {
                if let ContainerState::Terminated {
                    exit_code,
                    reason,
                    message,
                    ..
                } = &status.state
                {
                    if *exit_code != 0 {
                        logger.error(&format!(
                            "pod {} of job {job_name} failed with exitCode[{exit_code}], reason[{reason}] and message: {message}",
                            pod.meta.name
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    async fn create_task_pvc(
        &self,
        logger: &TaskLogger,
        record: &crate::record::TaskRecord,
    ) -> Result<()> {
        let disk_gb = record.resources.as_ref().map_or(0.0, |r| r.disk_gb);
        let pvc = crate::cluster::PersistentVolumeClaim {
            meta: crate::cluster::ObjectMeta::named(pvc_name(&record.id))
                .with_label(LABEL_TASK_ID, record.id.as_str())
                .with_finalizer(FINALIZER_TASK),
            spec: crate::cluster::PvcSpec {
                storage: super::jobs::gib_quantity(disk_gb),
                storage_class: Some(self.options.storage_class.clone()),
                volume_name: None,
            },
        };
        let name = pvc.meta.name.clone();
        match self.cluster.create_pvc(pvc).await {
            Ok(()) => {
                logger.info(&format!("created pvc {name}"));
                Ok(())
            }
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn delete_task_pvc(&self, logger: &TaskLogger, name: &str) -> Result<()> {
        match self.cluster.get_pvc(name).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        }
        self.cluster
            .remove_finalizer(ObjectKind::Pvc, name, FINALIZER_TASK)
            .await?;
        match self.cluster.delete_pvc(name).await {
            Ok(()) => {
                logger.info(&format!("deleted pvc {name}"));
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Removes task log directories whose record no longer exists. Log files
    /// can outlive their task after repeated reconciles or a mounted pod
    /// terminating slowly.
    pub async fn clean_task_log_files(&self) {
        let output_dir = Path::new(&self.options.task_log.output_dir);
        let entries = match std::fs::read_dir(output_dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(%err, "failed to list task log files");
                return;
            }
        };
        for dir_entry in entries.flatten() {
            let Ok(file_type) = dir_entry.file_type() else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let task_id = TaskId::new(dir_entry.file_name().to_string_lossy().into_owned());
            match self.store.get_task(&task_id).await {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    remove_task_log_dir(output_dir, task_id.as_str());
                }
                Err(err) => {
                    tracing::warn!(task = %task_id, %err, "failed to get task from local store");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerate::NullAccelerator;
    use crate::cluster::memory::InMemoryCluster;
    use crate::offload::PvcOffload;
    use crate::tes::memory::InMemoryTaskService;

    fn runner(dir: &Path) -> (Arc<InMemoryCluster>, Arc<InMemoryTaskService>, TaskRunner) {
        let cluster = Arc::new(InMemoryCluster::new());
        let service = Arc::new(InMemoryTaskService::new());
        let store = LocalStore::new(cluster.clone());
        let mut options = RunnerOptions::default();
        options.task_log.output_dir = dir.to_string_lossy().into_owned();
        options.filer_image.image = "filer:latest".into();
        let runner = TaskRunner::new(
            service.clone(),
            store,
            Arc::new(PvcOffload::new("offload-pvc", dir)),
            Arc::new(NullAccelerator),
            cluster.clone(),
            "cluster-01",
            options,
        );
        (cluster, service, runner)
    }

    #[tokio::test]
    async fn busy_task_requeues() {
        let dir = tempfile::tempdir().unwrap();
        let (_, service, runner) = runner(dir.path());
        service.put_task(Task {
            id: TaskId::new("task-1"),
            state: TaskState::Queued,
            cluster_id: "cluster-01".into(),
            ..Task::default()
        });

        let id = TaskId::new("task-1");
        let _guard = runner.try_process(&id).unwrap();
        let result = runner.process_task(&id).await.unwrap();
        assert_eq!(result.requeue_after, Some(TRY_PROCESS_LATENCY));
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (_, _, runner) = runner(dir.path());
        let id = TaskId::new("task-1");
        {
            let _guard = runner.try_process(&id).unwrap();
            assert!(runner.try_process(&id).is_none());
        }
        assert!(runner.try_process(&id).is_some());
    }

    #[tokio::test]
    async fn foreign_cluster_task_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (_, service, runner) = runner(dir.path());
        service.put_task(Task {
            id: TaskId::new("task-1"),
            state: TaskState::Queued,
            cluster_id: "someone-else".into(),
            ..Task::default()
        });

        let result = runner.process_task(&TaskId::new("task-1")).await.unwrap();
        assert!(result.is_done());
    }

    #[tokio::test]
    async fn clean_task_log_files_spares_live_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let (cluster, _, runner) = runner(dir.path());

        std::fs::create_dir_all(dir.path().join("task-gone")).unwrap();
        std::fs::create_dir_all(dir.path().join("task-live")).unwrap();
        std::fs::write(dir.path().join("app.log"), "x").unwrap();

        let store = LocalStore::new(cluster);
        store
            .store_task(&crate::record::TaskRecord {
                id: TaskId::new("task-live"),
                ..crate::record::TaskRecord::default()
            })
            .await
            .unwrap();

        runner.clean_task_log_files().await;

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["app.log".to_owned(), "task-live".to_owned()]);
    }
}
