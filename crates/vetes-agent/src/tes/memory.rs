//! In-memory task service for tests and local development.
//!
//! Holds tasks in a map and applies updates with the control plane's merge
//! semantics: state replaces, log entries merge by cluster id, executor logs
//! merge by position and attempt id, and times only fill in when absent.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use vetes_core::{TaskId, TaskView};

use super::models::{
    ClusterUpdate, ExecutorLog, ListTasksRequest, ListTasksResponse, Task, TaskLog, TaskUpdate,
};
use super::TaskService;
use crate::error::{Error, Result};

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    updates: Vec<(TaskId, TaskUpdate)>,
    cluster_updates: Vec<ClusterUpdate>,
    bad_requests_remaining: u32,
}

/// In-memory [`TaskService`] implementation.
#[derive(Default)]
pub struct InMemoryTaskService {
    inner: Mutex<Inner>,
}

impl InMemoryTaskService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a task.
    pub fn put_task(&self, task: Task) {
        self.lock().tasks.insert(task.id.clone(), task);
    }

    /// Snapshot of a task, if present.
    #[must_use]
    pub fn task_snapshot(&self, task_id: &TaskId) -> Option<Task> {
        self.lock().tasks.get(task_id).cloned()
    }

    /// All updates received so far, in order.
    #[must_use]
    pub fn recorded_updates(&self) -> Vec<(TaskId, TaskUpdate)> {
        self.lock().updates.clone()
    }

    /// All cluster heartbeats received so far, in order.
    #[must_use]
    pub fn recorded_cluster_updates(&self) -> Vec<ClusterUpdate> {
        self.lock().cluster_updates.clone()
    }

    /// Makes the next `count` task updates fail with a bad-request error,
    /// simulating a time conflict.
    pub fn fail_updates_with_bad_request(&self, count: u32) {
        self.lock().bad_requests_remaining = count;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn merge_executor_logs(target: &mut TaskLog, incoming: &TaskLog) {
        if target.logs.len() < incoming.logs.len() {
            target.logs.resize(incoming.logs.len(), Vec::new());
        }
        for (index, attempts) in incoming.logs.iter().enumerate() {
            for attempt in attempts {
                let slot = &mut target.logs[index];
                if let Some(existing) = slot.iter_mut().find(|e| e.id == attempt.id) {
                    if existing.start_time.is_none() {
                        existing.start_time = attempt.start_time;
                    }
                    if existing.end_time.is_none() {
                        existing.end_time = attempt.end_time;
                    }
                } else {
                    slot.push(ExecutorLog {
                        id: attempt.id.clone(),
                        start_time: attempt.start_time,
                        end_time: attempt.end_time,
                    });
                }
            }
        }
    }

    fn merge_log(task: &mut Task, incoming: &TaskLog) {
        if let Some(existing) = task
            .logs
            .iter_mut()
            .find(|log| log.cluster_id == incoming.cluster_id)
        {
            if existing.start_time.is_none() {
                existing.start_time = incoming.start_time;
            }
            if existing.end_time.is_none() {
                existing.end_time = incoming.end_time;
            }
            existing.system_logs.extend(incoming.system_logs.iter().cloned());
            Self::merge_executor_logs(existing, incoming);
        } else {
            task.logs.push(incoming.clone());
        }
    }
}

#[async_trait]
impl TaskService for InMemoryTaskService {
    async fn list_tasks(&self, request: &ListTasksRequest) -> Result<ListTasksResponse> {
        let inner = self.lock();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|task| task.cluster_id == request.cluster_id)
            .filter(|task| request.state.contains(&task.state))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(ListTasksResponse {
            tasks,
            next_page_token: None,
        })
    }

    async fn get_task(&self, task_id: &TaskId, _view: TaskView) -> Result<Task> {
        self.lock()
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| Error::not_found("task", task_id.as_str()))
    }

    async fn update_task(&self, task_id: &TaskId, update: &TaskUpdate) -> Result<()> {
        let mut inner = self.lock();
        if inner.bad_requests_remaining > 0 {
            inner.bad_requests_remaining -= 1;
            return Err(Error::BadRequest {
                message: "executor end_time not filled".into(),
            });
        }
        inner.updates.push((task_id.clone(), update.clone()));
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return Err(Error::not_found("task", task_id.as_str()));
        };
        if let Some(state) = update.state {
            task.state = state;
        }
        // split borrow: clone logs first, then merge
        let incoming = update.logs.clone();
        for log in &incoming {
            Self::merge_log(task, log);
        }
        Ok(())
    }

    async fn put_cluster(&self, update: &ClusterUpdate) -> Result<()> {
        self.lock().cluster_updates.push(update.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use vetes_core::TaskState;

    fn queued_task(id: &str, cluster: &str) -> Task {
        Task {
            id: TaskId::new(id),
            state: TaskState::Queued,
            cluster_id: cluster.into(),
            ..Task::default()
        }
    }

    #[tokio::test]
    async fn list_filters_by_cluster_and_state() {
        let service = InMemoryTaskService::new();
        service.put_task(queued_task("a", "c1"));
        service.put_task(queued_task("b", "c2"));
        let mut done = queued_task("c", "c1");
        done.state = TaskState::Complete;
        service.put_task(done);

        let response = service
            .list_tasks(&ListTasksRequest {
                state: vec![TaskState::Queued, TaskState::Canceling],
                cluster_id: "c1".into(),
                view: TaskView::Minimal,
                page_size: 256,
                page_token: None,
            })
            .await
            .unwrap();
        assert_eq!(response.tasks.len(), 1);
        assert_eq!(response.tasks[0].id.as_str(), "a");
    }

    #[tokio::test]
    async fn update_merges_logs_fill_if_absent() {
        let service = InMemoryTaskService::new();
        service.put_task(queued_task("a", "c1"));
        let id = TaskId::new("a");
        let t0 = Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap();

        service
            .update_task(
                &id,
                &TaskUpdate {
                    state: Some(TaskState::Initializing),
                    logs: vec![TaskLog {
                        cluster_id: "c1".into(),
                        start_time: Some(t0),
                        ..TaskLog::default()
                    }],
                },
            )
            .await
            .unwrap();

        // a later start time must not overwrite the recorded one
        service
            .update_task(
                &id,
                &TaskUpdate {
                    state: None,
                    logs: vec![TaskLog {
                        cluster_id: "c1".into(),
                        start_time: Some(t1),
                        end_time: Some(t1),
                        ..TaskLog::default()
                    }],
                },
            )
            .await
            .unwrap();

        let task = service.task_snapshot(&id).unwrap();
        assert_eq!(task.state, TaskState::Initializing);
        let log = task.matched_log("c1").unwrap();
        assert_eq!(log.start_time, Some(t0));
        assert_eq!(log.end_time, Some(t1));
    }

    #[tokio::test]
    async fn bad_request_injection() {
        let service = InMemoryTaskService::new();
        service.put_task(queued_task("a", "c1"));
        service.fail_updates_with_bad_request(1);

        let id = TaskId::new("a");
        let err = service.update_task(&id, &TaskUpdate::default()).await.unwrap_err();
        assert!(err.is_bad_request());
        service.update_task(&id, &TaskUpdate::default()).await.unwrap();
    }
}
