//! Managed cluster task backend.
//!
//! Workloads run as tasks on a container cluster with a virtual network
//! attachment. The launch returns before the attachment exists, so the
//! backend exposes an [`AttachmentProbe`] and the orchestrator resolves the
//! address through the [`crate::EndpointResolver`].

mod api;

pub use api::HttpTaskApi;

use crate::endpoint::LaunchHandle;
use crate::error::{ProviderError, Result};
use crate::kind::BackendKind;
use crate::resolver::AttachmentProbe;
use crate::{BackendAdapter, LaunchRequest, Launched, TerminateOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Attachment detail carrying the network interface id.
pub const NETWORK_INTERFACE_DETAIL: &str = "networkInterfaceId";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterConfig {
    pub cluster: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    /// Container inside the task definition that receives the overrides.
    pub container_name: String,
    pub assign_public_ip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTaskRequest {
    pub cluster: String,
    pub task_definition: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub assign_public_ip: bool,
    pub container_name: String,
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDetail {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttachment {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub details: Vec<AttachmentDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub task_id: String,
    #[serde(default)]
    pub last_status: String,
    #[serde(default)]
    pub attachments: Vec<TaskAttachment>,
}

impl TaskDescription {
    /// Network interface id from the first attachment that reports one.
    pub fn network_interface(&self) -> Option<&str> {
        self.attachments
            .iter()
            .flat_map(|a| a.details.iter())
            .find(|d| d.name == NETWORK_INTERFACE_DETAIL && !d.value.is_empty())
            .map(|d| d.value.as_str())
    }
}

/// Task control-plane operations the backend depends on.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Start a task and return its identifier.
    async fn run_task(&self, request: &RunTaskRequest) -> Result<String>;

    /// `None` when the control plane does not know the task.
    async fn describe_task(&self, cluster: &str, task_id: &str) -> Result<Option<TaskDescription>>;

    /// Private address of a network interface, `None` when unknown.
    async fn interface_address(&self, interface_id: &str) -> Result<Option<String>>;

    /// Returns `false` when the task was already gone.
    async fn stop_task(&self, cluster: &str, task_id: &str, reason: &str) -> Result<bool>;
}

#[derive(Clone)]
pub struct ClusterTaskBackend {
    api: Arc<dyn TaskApi>,
    config: ClusterConfig,
}

impl ClusterTaskBackend {
    pub fn new(api: Arc<dyn TaskApi>, config: ClusterConfig) -> Self {
        Self { api, config }
    }

    fn run_request(&self, request: &LaunchRequest) -> RunTaskRequest {
        let mut environment = BTreeMap::new();
        environment.insert("USER_ID".to_string(), request.owner_id.clone());
        environment.insert("INSTANCE_ID".to_string(), request.instance_id.clone());
        environment.insert(
            "DATA_PATH".to_string(),
            request.data_path.display().to_string(),
        );
        environment.insert("WORKSPACE_KIND".to_string(), request.kind.to_string());

        RunTaskRequest {
            cluster: self.config.cluster.clone(),
            task_definition: request.profile.image.clone(),
            subnets: self.config.subnets.clone(),
            security_groups: self.config.security_groups.clone(),
            assign_public_ip: self.config.assign_public_ip,
            container_name: self.config.container_name.clone(),
            environment,
        }
    }
}

#[async_trait]
impl BackendAdapter for ClusterTaskBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ClusterTask
    }

    #[instrument(
        skip(self, request),
        fields(instance_id = %request.instance_id, kind = %request.kind)
    )]
    async fn launch(&self, request: &LaunchRequest) -> Result<Launched> {
        if request.profile.image.is_empty() {
            return Err(ProviderError::Provision(format!(
                "no task definition configured for {}",
                request.kind
            )));
        }

        let task_id = self
            .api
            .run_task(&self.run_request(request))
            .await
            .map_err(|e| match e {
                ProviderError::Provision(_) => e,
                other => ProviderError::Provision(other.to_string()),
            })?;

        info!(%task_id, cluster = %self.config.cluster, "Cluster task launched");

        Ok(Launched {
            handle: LaunchHandle::single(BackendKind::ClusterTask, task_id),
            endpoint: None,
        })
    }

    #[instrument(skip(self), fields(task = ?handle.primary()))]
    async fn terminate(&self, handle: &LaunchHandle) -> Result<TerminateOutcome> {
        let Some(task_id) = handle.primary() else {
            return Ok(TerminateOutcome::AlreadyGone);
        };

        let stopped = self
            .api
            .stop_task(&self.config.cluster, task_id, "Stopped by workspace manager")
            .await
            .map_err(|e| ProviderError::Terminate(e.to_string()))?;

        Ok(if stopped {
            TerminateOutcome::Terminated
        } else {
            TerminateOutcome::AlreadyGone
        })
    }

    fn attachment_probe(&self) -> Option<&dyn AttachmentProbe> {
        Some(self)
    }
}

#[async_trait]
impl AttachmentProbe for ClusterTaskBackend {
    async fn find_attachment(&self, handle: &LaunchHandle) -> Result<Option<String>> {
        let task_id = handle
            .primary()
            .ok_or_else(|| ProviderError::EndpointResolution("empty launch handle".to_string()))?;

        let description = self.api.describe_task(&self.config.cluster, task_id).await?;
        Ok(description.and_then(|d| d.network_interface().map(str::to_string)))
    }

    async fn resolve_address(&self, attachment: &str) -> Result<String> {
        self.api
            .interface_address(attachment)
            .await?
            .ok_or_else(|| {
                ProviderError::EndpointResolution(format!(
                    "network interface {attachment} not found"
                ))
            })
    }
}
