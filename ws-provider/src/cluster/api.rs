use super::{RunTaskRequest, TaskApi, TaskDescription};
use crate::error::{ProviderError, Result};
use crate::http::{check, join_url};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// JSON client for the task control plane.
///
/// Routes:
/// `POST /clusters/{cluster}/tasks`, `GET /clusters/{cluster}/tasks/{task}`,
/// `POST /clusters/{cluster}/tasks/{task}/stop`, `GET /network-interfaces/{id}`.
#[derive(Debug, Clone)]
pub struct HttpTaskApi {
    client: Client,
    base: Url,
}

#[derive(Deserialize)]
struct RunTaskResponse {
    task_id: String,
}

#[derive(Deserialize)]
struct InterfaceResponse {
    #[serde(default)]
    private_ip_address: Option<String>,
}

#[derive(Serialize)]
struct StopTaskBody<'a> {
    reason: &'a str,
}

impl HttpTaskApi {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| ProviderError::Config(format!("invalid task API URL {base_url}: {e}")))?;
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, base })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        join_url(&self.base, segments)
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn run_task(&self, request: &RunTaskRequest) -> Result<String> {
        let url = self.url(&["clusters", &request.cluster, "tasks"])?;
        let response = self.client.post(url).json(request).send().await?;
        let body: RunTaskResponse = check(response).await?.json().await?;
        Ok(body.task_id)
    }

    async fn describe_task(&self, cluster: &str, task_id: &str) -> Result<Option<TaskDescription>> {
        let url = self.url(&["clusters", cluster, "tasks", task_id])?;
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response).await?.json().await?))
    }

    async fn interface_address(&self, interface_id: &str) -> Result<Option<String>> {
        let url = self.url(&["network-interfaces", interface_id])?;
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: InterfaceResponse = check(response).await?.json().await?;
        Ok(body.private_ip_address)
    }

    async fn stop_task(&self, cluster: &str, task_id: &str, reason: &str) -> Result<bool> {
        let url = self.url(&["clusters", cluster, "tasks", task_id, "stop"])?;
        let response = self
            .client
            .post(url)
            .json(&StopTaskBody { reason })
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(%task_id, "Task already gone");
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }
}
