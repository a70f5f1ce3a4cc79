//! HTTP implementation of the control-plane client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use vetes_core::{TaskId, TaskView};

use super::models::{ClusterUpdate, ListTasksRequest, ListTasksResponse, Task, TaskUpdate};
use super::TaskService;
use crate::config::TesClientOptions;
use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Task-service client speaking HTTP/JSON to the control plane.
pub struct HttpTaskService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTaskService {
    /// Builds a client for the configured endpoint.
    pub fn new(options: &TesClientOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(options.timeout)
            .build()
            .map_err(|e| Error::control_plane(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: options.endpoint.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }

    /// Collects the query pairs for a list call. Split out for testability.
    fn list_query(request: &ListTasksRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("cluster_id", request.cluster_id.clone()),
            ("view", request.view.as_str().to_owned()),
            ("page_size", request.page_size.to_string()),
        ];
        for state in &request.state {
            query.push(("state", state.as_str().to_owned()));
        }
        if let Some(token) = &request.page_token {
            query.push(("page_token", token.clone()));
        }
        query
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(Error::not_found("task", what)),
            StatusCode::BAD_REQUEST => Err(Error::BadRequest { message: body }),
            _ => Err(Error::control_plane(format!(
                "{what} failed (status={status}): {body}"
            ))),
        }
    }
}

#[async_trait]
impl TaskService for HttpTaskService {
    async fn list_tasks(&self, request: &ListTasksRequest) -> Result<ListTasksResponse> {
        let response = self
            .client
            .get(self.url("/tasks"))
            .query(&Self::list_query(request))
            .send()
            .await
            .map_err(|e| Error::control_plane(format!("list tasks request failed: {e}")))?;
        let response = Self::check(response, "list tasks").await?;
        response
            .json()
            .await
            .map_err(|e| Error::control_plane(format!("failed to decode task list: {e}")))
    }

    async fn get_task(&self, task_id: &TaskId, view: TaskView) -> Result<Task> {
        let response = self
            .client
            .get(self.url(&format!("/tasks/{task_id}")))
            .query(&[("view", view.as_str())])
            .send()
            .await
            .map_err(|e| Error::control_plane(format!("get task request failed: {e}")))?;
        let response = Self::check(response, task_id.as_str()).await?;
        response
            .json()
            .await
            .map_err(|e| Error::control_plane(format!("failed to decode task {task_id}: {e}")))
    }

    async fn update_task(&self, task_id: &TaskId, update: &TaskUpdate) -> Result<()> {
        let response = self
            .client
            .patch(self.url(&format!("/tasks/{task_id}")))
            .json(update)
            .send()
            .await
            .map_err(|e| Error::control_plane(format!("update task request failed: {e}")))?;
        Self::check(response, task_id.as_str()).await?;
        Ok(())
    }

    async fn put_cluster(&self, update: &ClusterUpdate) -> Result<()> {
        let response = self
            .client
            .put(self.url(&format!("/clusters/{}", update.id)))
            .json(update)
            .send()
            .await
            .map_err(|e| Error::control_plane(format!("put cluster request failed: {e}")))?;
        Self::check(response, &update.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vetes_core::TaskState;

    #[test]
    fn list_query_carries_repeated_states() {
        let request = ListTasksRequest {
            state: vec![TaskState::Queued, TaskState::Canceling],
            cluster_id: "cluster-01".into(),
            view: TaskView::Minimal,
            page_size: 2048,
            page_token: Some("next".into()),
        };
        let query = HttpTaskService::list_query(&request);
        let states: Vec<_> = query
            .iter()
            .filter(|(k, _)| *k == "state")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(states, vec!["QUEUED", "CANCELING"]);
        assert!(query.contains(&("cluster_id", "cluster-01".to_owned())));
        assert!(query.contains(&("view", "MINIMAL".to_owned())));
        assert!(query.contains(&("page_size", "2048".to_owned())));
        assert!(query.contains(&("page_token", "next".to_owned())));
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let service = HttpTaskService::new(&TesClientOptions {
            endpoint: "http://vetes-api:8080/".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(service.url("/tasks"), "http://vetes-api:8080/tasks");
    }
}
