//! Backend adapter abstraction for workspace workloads.
//!
//! Every execution environment (local containers, cluster tasks, managed
//! cloud accounts) implements [`BackendAdapter`]. The orchestrator only ever
//! talks to this trait, so adding an environment means adding an adapter.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub mod account;
pub mod cluster;
pub mod endpoint;
pub mod error;
mod http;
pub mod kind;
pub mod registry;
pub mod resolver;

#[cfg(feature = "docker")]
pub mod docker;

#[cfg(feature = "test-helpers")]
pub mod mock;

pub use endpoint::{Endpoint, LaunchHandle};
pub use error::{ProviderError, Result};
pub use kind::{BackendKind, WorkspaceKind};
pub use registry::{ContainerSpec, KindProfile, KindRegistry, MountSpec};
pub use resolver::{AttachmentProbe, EndpointResolver, RetryPolicy};

/// Everything an adapter needs to start one instance's workload.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub instance_id: String,
    pub owner_id: String,
    pub kind: WorkspaceKind,
    pub data_path: PathBuf,
    pub profile: KindProfile,
}

/// Result of a successful launch.
#[derive(Debug, Clone)]
pub struct Launched {
    pub handle: LaunchHandle,
    /// Present when the adapter knows the address right away. When absent the
    /// caller resolves it through [`BackendAdapter::attachment_probe`].
    pub endpoint: Option<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateOutcome {
    Terminated,
    /// The backend no longer knows the workload.
    AlreadyGone,
    /// Best-effort cleanup gave up; nothing is left for the caller to do.
    Abandoned(String),
}

#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Start the workload. Must not leave anything running when it fails.
    async fn launch(&self, request: &LaunchRequest) -> Result<Launched>;

    /// Stop the workload. Unknown or already terminated handles report
    /// [`TerminateOutcome::AlreadyGone`] rather than an error.
    async fn terminate(&self, handle: &LaunchHandle) -> Result<TerminateOutcome>;

    /// Remove anything a `launch` of `request` that was cut off may have
    /// left running. Backends whose launches cannot be interrupted midway
    /// have nothing to do.
    async fn discard(&self, _request: &LaunchRequest) -> Result<()> {
        Ok(())
    }

    /// Lookups used to discover the endpoint when `launch` could not.
    fn attachment_probe(&self) -> Option<&dyn AttachmentProbe> {
        None
    }
}

/// The adapters available to an orchestrator, keyed by backend kind.
#[derive(Clone, Default)]
pub struct BackendSet {
    adapters: HashMap<BackendKind, Arc<dyn BackendAdapter>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn insert(&mut self, adapter: Arc<dyn BackendAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.adapters.keys().copied().collect()
    }
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSet")
            .field("kinds", &self.kinds())
            .finish()
    }
}
