//! Pod observation: executor timing and image-pull stalls.
//!
//! Pod events never advance the task stage machine; they only report
//! executor start/end times to the control plane and stop jobs whose pods
//! cannot pull their image.

use std::time::Duration;

use chrono::{DateTime, Utc};

use vetes_core::names::{
    EXECUTOR_TYPE, FINALIZER_EXECUTOR_TIME, LABEL_EXECUTOR_NO, LABEL_JOB_NAME, LABEL_TASK_ID,
    LABEL_TYPE,
};
use vetes_core::{TaskId, TaskView};

use super::runner::{TaskRunner, TRY_PROCESS_LATENCY, WAIT_UPDATE_TIME_CONFLICT};
use crate::cluster::{ContainerState, ObjectKind, Pod, PodPhase};
use crate::error::{Reconcile, Result};
use crate::filelog::TaskLogger;
use crate::tes::models::{ExecutorLog, TaskLog, TaskUpdate};

/// A running pod stuck in deletion longer than this gets its deletion
/// timestamp taken as the executor end time.
const STUCK_DELETION_HORIZON: Duration = Duration::from_secs(60);

impl TaskRunner {
    /// One observation pass for a pod.
    pub async fn process_pod(&self, pod_name: &str) -> Result<Reconcile> {
        let pod = match self.cluster.get_pod(pod_name).await {
            Ok(pod) => pod,
            Err(err) if err.is_not_found() => return Ok(Reconcile::done()),
            Err(err) => return Err(err),
        };
        let Some(task_id) = pod.meta.label(LABEL_TASK_ID).map(TaskId::from) else {
            return Ok(Reconcile::done());
        };
        let Some(_guard) = self.try_process(&task_id) else {
            return Ok(Reconcile::after(TRY_PROCESS_LATENCY));
        };
        let logger = self.task_logger(&task_id);

        self.record_executor_pod_log(&logger, &pod).await;

        let timing = self.process_executor_time(&task_id, &pod).await?;
        let stall = self.process_image_pull_backoff(&logger, &pod).await?;
        Ok(merge(timing, stall))
    }

    /// Executors normally log nothing; if a pod ended unexpectedly its
    /// container log is worth keeping.
    async fn record_executor_pod_log(&self, logger: &TaskLogger, pod: &Pod) {
        if pod.meta.label(LABEL_TYPE) != Some(EXECUTOR_TYPE) {
            return;
        }
        if pod.status.phase != PodPhase::Failed && pod.status.phase != PodPhase::Succeeded {
            return;
        }
        match self.cluster.pod_logs(&pod.meta.name).await {
            Ok(Some(content)) if !content.is_empty() => {
                logger.info(&format!("executor pod {} logs:\n{content}", pod.meta.name));
            }
            Ok(_) => {}
            Err(err) => {
                logger.error(&format!(
                    "failed to get executor pod {} logs: {err}",
                    pod.meta.name
                ));
            }
        }
    }

    async fn process_executor_time(&self, task_id: &TaskId, pod: &Pod) -> Result<Reconcile> {
        if pod.meta.label(LABEL_TYPE) != Some(EXECUTOR_TYPE) {
            return Ok(Reconcile::done());
        }
        let Some(executor_no) = pod
            .meta
            .label(LABEL_EXECUTOR_NO)
            .and_then(|raw| raw.parse::<usize>().ok())
        else {
            tracing::warn!(pod = %pod.meta.name, "invalid executor number label");
            return Ok(Reconcile::done());
        };

        let (start_time, end_time) = executor_time(pod, Utc::now());
        if start_time.is_none() && end_time.is_none() {
            return Ok(Reconcile::done());
        }

        let task = self.service.get_task(task_id, TaskView::Basic).await?;
        if task.cluster_id != self.cluster_id {
            return Ok(Reconcile::done());
        }

        if start_time.is_some() && end_time.is_none() {
            // no new finalizers can be added to a deleting pod; if deletion
            // wedges, the deletion timestamp becomes the end time on a later
            // pass, so check back
            if pod.meta.is_deleting() {
                return Ok(Reconcile::after(STUCK_DELETION_HORIZON));
            }
            self.cluster
                .add_pod_finalizer(&pod.meta.name, FINALIZER_EXECUTOR_TIME)
                .await?;
        }

        let logs =
            self.executor_time_logs(&task, executor_no, &pod.meta.name, start_time, end_time);
        let update = TaskUpdate { state: None, logs };
        match self.service.update_task(task_id, &update).await {
            Ok(()) => {}
            Err(err) if err.is_bad_request() => {
                tracing::warn!(task = %task_id, %err, "bad request for update task, maybe because time conflict");
                return Ok(Reconcile::after(WAIT_UPDATE_TIME_CONFLICT));
            }
            Err(err) => return Err(err),
        }

        if end_time.is_some() {
            self.cluster
                .remove_finalizer(ObjectKind::Pod, &pod.meta.name, FINALIZER_EXECUTOR_TIME)
                .await?;
        }
        Ok(Reconcile::done())
    }

    /// Builds the one-entry task-log patch for an executor timing update,
    /// leaving to the control plane whatever it already knows.
    fn executor_time_logs(
        &self,
        task: &crate::tes::models::Task,
        executor_no: usize,
        pod_name: &str,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Vec<TaskLog> {
        let mut logs = vec![Vec::new(); executor_no + 1];
        logs[executor_no] = vec![ExecutorLog {
            id: pod_name.to_owned(),
            start_time: None,
            end_time: None,
        }];
        let mut entry = TaskLog {
            cluster_id: self.cluster_id.clone(),
            logs,
            ..TaskLog::default()
        };

        let matched_log = task.matched_log(&self.cluster_id);
        if matched_log.map_or(true, |log| log.start_time.is_none()) {
            entry.start_time = start_time;
        }

        let matched_executor = matched_log
            .and_then(|log| log.logs.get(executor_no))
            .and_then(|attempts| attempts.iter().find(|attempt| attempt.id == pod_name));

        let slot = &mut entry.logs[executor_no][0];
        match matched_executor {
            None => {
                slot.start_time = start_time;
                slot.end_time = end_time;
                // never report an end before the start
                if let (Some(start), Some(end)) = (start_time, end_time) {
                    if end < start {
                        slot.end_time = Some(start);
                    }
                }
            }
            Some(existing) if existing.start_time.is_some() => {
                if existing.end_time.is_none() {
                    slot.end_time = end_time;
                    if let (Some(start), Some(end)) = (existing.start_time, end_time) {
                        if end < start {
                            slot.end_time = Some(start);
                        }
                    }
                }
            }
            Some(_) => {
                slot.start_time = start_time;
                slot.end_time = end_time;
                if let (Some(start), Some(end)) = (start_time, end_time) {
                    if end < start {
                        slot.end_time = Some(start);
                    }
                }
            }
        }

        vec![entry]
    }

    async fn process_image_pull_backoff(
        &self,
        logger: &TaskLogger,
        pod: &Pod,
    ) -> Result<Reconcile> {
        let Some(job_name) = pod.meta.label(LABEL_JOB_NAME) else {
            return Ok(Reconcile::done());
        };
        let job = match self.cluster.get_job(job_name).await {
            Ok(job) => job,
            Err(err) if err.is_not_found() => return Ok(Reconcile::done()),
            Err(err) => return Err(err),
        };
        if job.is_finished() {
            return Ok(Reconcile::done());
        }
        if pod.status.phase != PodPhase::Pending {
            return Ok(Reconcile::done());
        }
        if !self.image_pull_backoff_timed_out(pod) {
            return Ok(Reconcile::after(self.options.pod_poll_interval));
        }
        self.log_image_pull_backoff_reason(logger, pod).await;
        self.stop_job(logger, job_name).await?;
        Ok(Reconcile::done())
    }

    fn image_pull_backoff_timed_out(&self, pod: &Pod) -> bool {
        let Some(start_time) = pod.status.start_time else {
            return false;
        };
        let age = Utc::now().signed_duration_since(start_time);
        let timeout = chrono::Duration::from_std(self.options.pod_image_pull_backoff_timeout)
            .unwrap_or(chrono::Duration::zero());
        age > timeout && image_pull_backoff(pod)
    }

    async fn log_image_pull_backoff_reason(&self, logger: &TaskLogger, pod: &Pod) {
        let events = match self.cluster.pod_events(&pod.meta.name).await {
            Ok(events) => events,
            Err(err) => {
                logger.error(&format!("ImagePullBackOff: failed to list events of pod: {err}"));
                return;
            }
        };
        for event in events {
            if event.reason == "Failed" && event.message.starts_with("Failed to pull image") {
                logger.error(&format!("ImagePullBackOff: {}", event.message));
                return;
            }
        }
        logger.error("ImagePullBackOff: no related events");
    }
}

fn image_pull_backoff(pod: &Pod) -> bool {
    pod.status.container_statuses.iter().any(|status| {
        matches!(&status.state, ContainerState::Waiting { reason } if reason == "ImagePullBackOff")
    })
}

fn merge(first: Reconcile, second: Reconcile) -> Reconcile {
    match (first.requeue_after, second.requeue_after) {
        (Some(a), Some(b)) => Reconcile::after(a.min(b)),
        (Some(a), None) => Reconcile::after(a),
        (None, Some(b)) => Reconcile::after(b),
        (None, None) => Reconcile::done(),
    }
}

/// Derives executor start/end times from a pod.
///
/// Container state is authoritative when present; pods that died without
/// container timestamps fall back to the pod start time or `now`. A running
/// pod wedged in deletion for over a minute takes its deletion timestamp as
/// the end.
fn executor_time(pod: &Pod, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let mut start_time = None;
    let mut end_time = None;

    if let Some(status) = pod.status.container_statuses.first() {
        match &status.state {
            ContainerState::Running { started_at } => {
                start_time = *started_at;
            }
            ContainerState::Terminated {
                started_at,
                finished_at,
                ..
            } => {
                start_time = *started_at;
                end_time = Some(finished_at.unwrap_or(now));
                if start_time.is_none() {
                    start_time = end_time;
                }
            }
            ContainerState::Waiting { .. } => {}
        }
    }

    match pod.status.phase {
        PodPhase::Failed | PodPhase::Succeeded => {
            if start_time.is_none() {
                start_time = Some(pod.status.start_time.unwrap_or(now));
            }
            if end_time.is_none() {
                end_time = Some(now);
            }
        }
        PodPhase::Running => {
            if start_time.is_some() && end_time.is_none() {
                if let Some(deleted_at) = pod.meta.deletion_timestamp {
                    let stuck = chrono::Duration::from_std(STUCK_DELETION_HORIZON)
                        .unwrap_or(chrono::Duration::zero());
                    if deleted_at + stuck < now {
                        end_time = Some(deleted_at);
                    }
                }
            }
        }
        PodPhase::Pending => {}
    }

    (start_time, end_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ContainerStatus, ObjectMeta, PodStatus};
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, hour, minute, 0).unwrap()
    }

    fn pod_with(state: ContainerState, phase: PodPhase) -> Pod {
        Pod {
            meta: ObjectMeta::named("task-1-ex-00-abcde"),
            status: PodStatus {
                phase,
                start_time: None,
                container_statuses: vec![ContainerStatus { state }],
            },
        }
    }

    #[test]
    fn running_container_yields_start_only() {
        let pod = pod_with(
            ContainerState::Running {
                started_at: Some(at(8, 0)),
            },
            PodPhase::Running,
        );
        let (start, end) = executor_time(&pod, at(9, 0));
        assert_eq!(start, Some(at(8, 0)));
        assert_eq!(end, None);
    }

    #[test]
    fn terminated_container_yields_both() {
        let pod = pod_with(
            ContainerState::Terminated {
                started_at: Some(at(8, 0)),
                finished_at: Some(at(8, 30)),
                exit_code: 0,
                reason: "Completed".into(),
                message: String::new(),
            },
            PodPhase::Succeeded,
        );
        let (start, end) = executor_time(&pod, at(9, 0));
        assert_eq!(start, Some(at(8, 0)));
        assert_eq!(end, Some(at(8, 30)));
    }

    #[test]
    fn terminated_without_finish_uses_now() {
        let pod = pod_with(
            ContainerState::Terminated {
                started_at: Some(at(8, 0)),
                finished_at: None,
                exit_code: 1,
                reason: "Error".into(),
                message: String::new(),
            },
            PodPhase::Failed,
        );
        let (start, end) = executor_time(&pod, at(9, 0));
        assert_eq!(start, Some(at(8, 0)));
        assert_eq!(end, Some(at(9, 0)));
    }

    #[test]
    fn dead_pod_without_container_times_falls_back() {
        let mut pod = pod_with(ContainerState::Waiting { reason: "x".into() }, PodPhase::Failed);
        pod.status.container_statuses.clear();
        pod.status.start_time = Some(at(7, 0));
        let (start, end) = executor_time(&pod, at(9, 0));
        assert_eq!(start, Some(at(7, 0)));
        assert_eq!(end, Some(at(9, 0)));
    }

    #[test]
    fn stuck_deleting_running_pod_ends_at_deletion() {
        let mut pod = pod_with(
            ContainerState::Running {
                started_at: Some(at(8, 0)),
            },
            PodPhase::Running,
        );
        pod.meta.deletion_timestamp = Some(at(8, 30));
        let (start, end) = executor_time(&pod, at(8, 45));
        assert_eq!(start, Some(at(8, 0)));
        assert_eq!(end, Some(at(8, 30)));

        // not yet past the horizon
        pod.meta.deletion_timestamp = Some(at(8, 45));
        let (_, end) = executor_time(&pod, at(8, 45));
        assert_eq!(end, None);
    }

    #[test]
    fn image_pull_backoff_detection() {
        let pod = pod_with(
            ContainerState::Waiting {
                reason: "ImagePullBackOff".into(),
            },
            PodPhase::Pending,
        );
        assert!(image_pull_backoff(&pod));

        let pod = pod_with(
            ContainerState::Waiting {
                reason: "ContainerCreating".into(),
            },
            PodPhase::Pending,
        );
        assert!(!image_pull_backoff(&pod));
    }

    #[test]
    fn merge_prefers_the_sooner_requeue() {
        assert!(merge(Reconcile::done(), Reconcile::done()).is_done());
        assert_eq!(
            merge(
                Reconcile::after(Duration::from_secs(5)),
                Reconcile::after(Duration::from_secs(1))
            )
            .requeue_after,
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            merge(Reconcile::done(), Reconcile::after(Duration::from_secs(9))).requeue_after,
            Some(Duration::from_secs(9))
        );
    }
}
