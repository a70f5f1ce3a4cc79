//! Control-plane client seam.
//!
//! The agent consumes the task service through the [`TaskService`] trait:
//! the paginated work list, task reads at a chosen view, task state/log
//! updates, and the cluster capacity heartbeat. The HTTP implementation
//! lives in [`http`]; tests use [`memory::InMemoryTaskService`].
//!
//! Bad-request responses on task updates are surfaced as
//! [`Error::BadRequest`](crate::error::Error) because the reconciler treats
//! them as a time-conflict signal and retries shortly after.

pub mod http;
pub mod memory;
pub mod models;

use async_trait::async_trait;

use vetes_core::{TaskId, TaskView};

use crate::error::Result;
use models::{ClusterUpdate, ListTasksRequest, ListTasksResponse, Task, TaskUpdate};

/// Operations the agent performs against the task-service control plane.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Lists tasks, one page at a time.
    async fn list_tasks(&self, request: &ListTasksRequest) -> Result<ListTasksResponse>;

    /// Fetches one task at the given view.
    async fn get_task(&self, task_id: &TaskId, view: TaskView) -> Result<Task>;

    /// Updates a task's state and/or appends task logs.
    async fn update_task(&self, task_id: &TaskId, update: &TaskUpdate) -> Result<()>;

    /// Reports cluster capacity and limits.
    async fn put_cluster(&self, update: &ClusterUpdate) -> Result<()>;
}
