//! Task descriptor client
//!
//! Fetches `info.json` for a task over HTTP. Tasks that are done move to the
//! archive; an empty body or a 404 on the live URL falls back to the archive
//! URL.

use std::time::Duration;

use crate::config::{defaults, urls};
use crate::error::TaskError;
use crate::task::info::TaskInfo;
use crate::task::queue::RemoteQueue;

/// HTTP client for task descriptors
#[derive(Debug, Clone)]
pub struct TaskClient {
    /// HTTP client
    client: reqwest::Client,
    /// Base URL, without trailing slash
    base_url: String,
}

impl TaskClient {
    /// Create a client for the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(defaults::HTTP_TIMEOUT_SECS))
                .user_agent(concat!("gear-rebuild/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch a task descriptor
    ///
    /// A descriptor that cannot be parsed, or that is found nowhere, is
    /// reported and treated as an empty task.
    pub async fn fetch(&self, task_no: u64) -> Result<TaskInfo, TaskError> {
        let body = match self.fetch_body(&urls::task_info_path(task_no)).await? {
            Some(body) => Some(body),
            None => {
                tracing::debug!(task = task_no, "task not live, trying the archive");
                self.fetch_body(&urls::archived_task_info_path(task_no))
                    .await?
            }
        };

        let Some(body) = body else {
            tracing::warn!("Task {task_no} has no descriptor, treating it as empty");
            return Ok(TaskInfo::default());
        };

        Ok(TaskInfo::parse(&body).unwrap_or_else(|e| {
            tracing::warn!("Task {task_no} descriptor is not valid JSON ({e}), treating it as empty");
            TaskInfo::default()
        }))
    }

    /// Fetch a task and build its queue view
    pub async fn fetch_queue(
        &self,
        task_no: u64,
        gitery_host: &str,
    ) -> Result<RemoteQueue, TaskError> {
        let info = self.fetch(task_no).await?;
        let queue = RemoteQueue::from_info(task_no, &info, gitery_host);
        tracing::info!(
            task = task_no,
            subtasks = queue.occupied().len(),
            repo = queue.repo().unwrap_or("-"),
            "fetched task"
        );
        Ok(queue)
    }

    async fn fetch_body(&self, path: &str) -> Result<Option<String>, TaskError> {
        let url = format!("{}{path}", self.base_url);
        let fetch_error = |e: &dyn std::fmt::Display| TaskError::Fetch {
            url: url.clone(),
            error: e.to_string(),
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| fetch_error(&e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(fetch_error(&format!("HTTP {}", response.status())));
        }

        let body = response.text().await.map_err(|e| fetch_error(&e))?;
        Ok((!body.trim().is_empty()).then_some(body))
    }
}
