//! Event-driven task reconciliation.
//!
//! The engine watches the cluster, maps object changes to requests (a task
//! record or job change re-enters the task stage machine; a pod change
//! enters the pod observer), and dispatches requests to a bounded worker
//! pool. Requests targeting a busy task are turned into short requeues by
//! the per-task guard inside [`runner::TaskRunner`]; errored requests
//! requeue with capped exponential back-off.

pub mod jobs;
pub mod pods;
pub mod runner;
pub mod stage;

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;

use vetes_core::names::LABEL_TASK_ID;
use vetes_core::TaskId;

use crate::cluster::{ClusterApi, ClusterEvent, ObjectKind};
use crate::error::Result;
use crate::metrics::labels::{OUTCOME, OUTCOME_ERROR, OUTCOME_OK, OUTCOME_REQUEUE};
use crate::metrics::names::RECONCILE_TOTAL;
use runner::TaskRunner;

const ERROR_BACKOFF_BASE: Duration = Duration::from_millis(500);
const ERROR_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// A unit of reconciliation work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Run the task stage machine.
    Task(TaskId),
    /// Run the pod observer.
    Pod(String),
}

#[derive(Debug, Clone)]
struct QueueItem {
    request: Request,
    attempt: u32,
}

/// Maps a cluster event to a reconcile request, if it concerns a task.
fn map_event(event: &ClusterEvent) -> Option<Request> {
    match event.kind {
        ObjectKind::Pod => {
            if !event.labels.contains_key(LABEL_TASK_ID) {
                return None;
            }
            Some(Request::Pod(event.name.clone()))
        }
        ObjectKind::ConfigObject | ObjectKind::Job => event
            .labels
            .get(LABEL_TASK_ID)
            .map(|task_id| Request::Task(TaskId::new(task_id))),
        ObjectKind::Pvc | ObjectKind::Pv | ObjectKind::Secret => None,
    }
}

fn error_backoff(attempt: u32) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.min(16));
    ERROR_BACKOFF_BASE.saturating_mul(factor).min(ERROR_BACKOFF_MAX)
}

/// The reconcile engine.
pub struct ReconcileEngine {
    runner: Arc<TaskRunner>,
    cluster: Arc<dyn ClusterApi>,
    concurrency: usize,
}

impl ReconcileEngine {
    /// Creates an engine with the given worker-pool size.
    #[must_use]
    pub fn new(runner: Arc<TaskRunner>, cluster: Arc<dyn ClusterApi>, concurrency: usize) -> Self {
        Self {
            runner,
            cluster,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs the engine until aborted.
    pub async fn run(self) {
        let (tx, rx) = mpsc::unbounded_channel::<QueueItem>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut watch = self.cluster.watch();
        let event_tx = tx.clone();
        let mapper = tokio::spawn(async move {
            loop {
                match watch.recv().await {
                    Ok(event) => {
                        if let Some(request) = map_event(&event) {
                            let _ = event_tx.send(QueueItem {
                                request,
                                attempt: 0,
                            });
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "reconcile event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        let mut workers = tokio::task::JoinSet::new();
        for _ in 0..self.concurrency {
            let rx = Arc::clone(&rx);
            let tx = tx.clone();
            let runner = Arc::clone(&self.runner);
            workers.spawn(async move {
                loop {
                    let item = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(item) = item else {
                        return;
                    };
                    Self::handle(&runner, &tx, item).await;
                }
            });
        }

        while workers.join_next().await.is_some() {}
        mapper.abort();
    }

    async fn handle(
        runner: &Arc<TaskRunner>,
        tx: &mpsc::UnboundedSender<QueueItem>,
        item: QueueItem,
    ) {
        let result = Self::dispatch(runner, &item.request).await;
        match result {
            Ok(outcome) => {
                if let Some(delay) = outcome.requeue_after {
                    counter!(RECONCILE_TOTAL, OUTCOME => OUTCOME_REQUEUE).increment(1);
                    Self::requeue(tx, item.request, 0, delay);
                } else {
                    counter!(RECONCILE_TOTAL, OUTCOME => OUTCOME_OK).increment(1);
                }
            }
            Err(err) => {
                counter!(RECONCILE_TOTAL, OUTCOME => OUTCOME_ERROR).increment(1);
                let delay = error_backoff(item.attempt);
                tracing::error!(request = ?item.request, attempt = item.attempt, %err, "reconcile failed");
                Self::requeue(tx, item.request, item.attempt + 1, delay);
            }
        }
    }

    async fn dispatch(runner: &Arc<TaskRunner>, request: &Request) -> Result<crate::error::Reconcile> {
        match request {
            Request::Task(task_id) => runner.process_task(task_id).await,
            Request::Pod(pod_name) => runner.process_pod(pod_name).await,
        }
    }

    fn requeue(
        tx: &mpsc::UnboundedSender<QueueItem>,
        request: Request,
        attempt: u32,
        delay: Duration,
    ) {
        let tx = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(QueueItem { request, attempt });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn event(kind: ObjectKind, name: &str, task_id: Option<&str>) -> ClusterEvent {
        let mut labels = BTreeMap::new();
        if let Some(task_id) = task_id {
            labels.insert(LABEL_TASK_ID.to_owned(), task_id.to_owned());
        }
        ClusterEvent {
            kind,
            name: name.to_owned(),
            labels,
        }
    }

    #[test]
    fn task_labeled_objects_map_to_task_requests() {
        let mapped = map_event(&event(ObjectKind::Job, "task-1-ex-00", Some("task-1")));
        assert_eq!(mapped, Some(Request::Task(TaskId::new("task-1"))));

        let mapped = map_event(&event(ObjectKind::ConfigObject, "task-1", Some("task-1")));
        assert_eq!(mapped, Some(Request::Task(TaskId::new("task-1"))));
    }

    #[test]
    fn pods_map_to_pod_requests() {
        let mapped = map_event(&event(ObjectKind::Pod, "task-1-ex-00-abcde", Some("task-1")));
        assert_eq!(mapped, Some(Request::Pod("task-1-ex-00-abcde".to_owned())));
    }

    #[test]
    fn unlabeled_and_volume_events_are_ignored() {
        assert!(map_event(&event(ObjectKind::Job, "other-job", None)).is_none());
        assert!(map_event(&event(ObjectKind::Pod, "other-pod", None)).is_none());
        assert!(map_event(&event(ObjectKind::Pvc, "workflow-b", Some("task-1"))).is_none());
        assert!(map_event(&event(ObjectKind::Secret, "sub1-x", Some("task-1"))).is_none());
    }

    #[test]
    fn error_backoff_is_capped() {
        assert_eq!(error_backoff(0), Duration::from_millis(500));
        assert_eq!(error_backoff(1), Duration::from_secs(1));
        assert_eq!(error_backoff(3), Duration::from_secs(4));
        assert_eq!(error_backoff(10), ERROR_BACKOFF_MAX);
        assert_eq!(error_backoff(u32::MAX), ERROR_BACKOFF_MAX);
    }
}
