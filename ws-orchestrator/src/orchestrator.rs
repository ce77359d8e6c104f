//! Lifecycle operations over the instance store and backend adapters.
//!
//! `start`, `stop` and `reclaim` hold the instance's lock from the first read
//! to the last write, so at most one of them is in flight per instance no
//! matter who calls. `heartbeat`, `get` and `list` are lock-free.

use crate::clock::{Clock, SystemClock};
use crate::error::{OrchestratorError, Result};
use crate::instance::{Instance, InstanceStatus, NewInstance, ReclaimReason};
use crate::lock::LockTable;
use crate::store::{Expected, InstanceStore};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use ws_provider::{
    BackendAdapter, BackendSet, Endpoint, EndpointResolver, KindRegistry, LaunchHandle,
    LaunchRequest, ProviderError, TerminateOutcome, WorkspaceKind,
};

/// The verified identity behind a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Owner(String),
    /// Background work such as the sweeper; may act on any instance.
    System,
}

impl Principal {
    pub fn owner(id: impl Into<String>) -> Self {
        Principal::Owner(id.into())
    }

    fn can_access(&self, owner_id: &str) -> bool {
        match self {
            Principal::Owner(id) => id == owner_id,
            Principal::System => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Instance data lives under `<data_root>/<owner>/<instance>/<kind>`.
    pub data_root: PathBuf,
    /// Deadline for each launch or terminate call.
    pub operation_timeout: Duration,
    pub default_ttl: Duration,
    pub max_ttl: Duration,
    pub idle_limit: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("/var/lib/ws/instances"),
            operation_timeout: Duration::from_secs(120),
            default_ttl: Duration::from_secs(4 * 3600),
            max_ttl: Duration::from_secs(24 * 3600),
            idle_limit: Duration::from_secs(3600),
        }
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

pub struct InstanceOrchestrator {
    store: Arc<dyn InstanceStore>,
    registry: KindRegistry,
    backends: BackendSet,
    resolver: EndpointResolver,
    clock: Arc<dyn Clock>,
    locks: LockTable,
    settings: OrchestratorSettings,
}

impl std::fmt::Debug for InstanceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceOrchestrator")
            .field("backends", &self.backends)
            .field("resolver", &self.resolver)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl InstanceOrchestrator {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        registry: KindRegistry,
        backends: BackendSet,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            registry,
            backends,
            resolver: EndpointResolver::default(),
            clock: Arc::new(SystemClock),
            locks: LockTable::new(),
            settings,
        }
    }

    pub fn with_resolver(mut self, resolver: EndpointResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn InstanceStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create a stopped instance for the principal.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        principal: &Principal,
        kind: WorkspaceKind,
        ttl: Option<Duration>,
    ) -> Result<Instance> {
        let Principal::Owner(owner_id) = principal else {
            return Err(OrchestratorError::InvalidInput(
                "instances must be created on behalf of an owner".to_string(),
            ));
        };
        if owner_id.is_empty() || owner_id.contains(['/', '\\']) || owner_id.starts_with('.') {
            return Err(OrchestratorError::InvalidInput(format!(
                "owner id {owner_id:?} cannot be used in a data path"
            )));
        }

        let ttl = ttl.unwrap_or(self.settings.default_ttl);
        if ttl.is_zero() || ttl > self.settings.max_ttl {
            return Err(OrchestratorError::InvalidInput(format!(
                "ttl must be between 1s and {}s",
                self.settings.max_ttl.as_secs()
            )));
        }
        if self.registry.profile(kind).is_none() {
            return Err(OrchestratorError::InvalidInput(format!(
                "workspace kind {kind} is not configured"
            )));
        }

        let id = Uuid::new_v4().to_string();
        let data_path = self
            .settings
            .data_root
            .join(owner_id)
            .join(&id)
            .join(kind.as_str());

        let instance = Instance::create(
            NewInstance {
                id,
                owner_id: owner_id.clone(),
                kind,
                data_path,
                ttl: chrono_duration(ttl),
            },
            self.clock.now(),
        );
        self.store.insert(&instance).await?;

        info!(instance_id = %instance.id, %kind, "Instance created");
        Ok(instance)
    }

    pub async fn get(&self, principal: &Principal, id: &str) -> Result<Instance> {
        let instance = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        if !principal.can_access(&instance.owner_id) {
            return Err(OrchestratorError::Forbidden(id.to_string()));
        }
        Ok(instance)
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<Instance>> {
        self.store.list_by_owner(owner_id).await
    }

    /// Launch the instance's workload and wait for its endpoint.
    ///
    /// Anything but a stopped instance is returned unchanged, except one in
    /// `Error`, which must be stopped (reset) before it can start again.
    #[instrument(skip(self, principal))]
    pub async fn start(&self, principal: &Principal, id: &str) -> Result<Instance> {
        let _guard = self.locks.acquire(id).await;
        let instance = self.get(principal, id).await?;

        match instance.status {
            InstanceStatus::Stopped => {}
            InstanceStatus::Error => {
                return Err(OrchestratorError::InstanceFailed {
                    id: id.to_string(),
                    reason: instance
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "unknown failure".to_string()),
                });
            }
            status => {
                debug!(%status, "Start ignored");
                return Ok(instance);
            }
        }

        let (request, adapter) = self.launch_plan(&instance)?;

        let starting = instance.clone().begin_start(self.clock.now())?;
        let starting = self.persist(&instance, starting).await?;

        let launched = match self.bounded("launch", adapter.launch(&request)).await {
            Ok(launched) => launched,
            Err(e) => {
                if matches!(e, ProviderError::Timeout { .. }) {
                    // The launch was dropped midway and never rolled back.
                    if let Err(cleanup) = self.bounded("discard", adapter.discard(&request)).await {
                        warn!(error = %cleanup, "Could not discard interrupted launch");
                    }
                }
                let err = match e {
                    ProviderError::Provision(msg) => OrchestratorError::Provision(msg),
                    other => OrchestratorError::Provision(other.to_string()),
                };
                warn!(error = %err, "Launch failed");
                self.record_failure(&starting, &err).await;
                return Err(err);
            }
        };

        let handle = launched.handle;
        let (starting, endpoint) = match launched.endpoint {
            Some(endpoint) => (starting, Ok(endpoint)),
            None => {
                // Keep the handle on record while the address is discovered.
                let with_handle = starting.clone().attach_handle(handle.clone(), self.clock.now())?;
                match self.persist(&starting, with_handle).await {
                    Ok(persisted) => {
                        let port = request.profile.port;
                        let endpoint = self.resolve_endpoint(&*adapter, &handle, port).await;
                        (persisted, endpoint)
                    }
                    Err(e) => (starting, Err(e)),
                }
            }
        };

        self.finish_start(starting, adapter, handle, endpoint).await
    }

    fn launch_plan(&self, instance: &Instance) -> Result<(LaunchRequest, Arc<dyn BackendAdapter>)> {
        let profile = self.registry.profile(instance.kind).ok_or_else(|| {
            OrchestratorError::Provision(format!("no profile for workspace kind {}", instance.kind))
        })?;
        let adapter = self.backends.get(profile.backend).ok_or_else(|| {
            OrchestratorError::Provision(format!("backend {} is not configured", profile.backend))
        })?;

        let request = LaunchRequest {
            instance_id: instance.id.clone(),
            owner_id: instance.owner_id.clone(),
            kind: instance.kind,
            data_path: instance.data_path.clone(),
            profile: profile.clone(),
        };
        Ok((request, adapter))
    }

    async fn resolve_endpoint(
        &self,
        adapter: &dyn BackendAdapter,
        handle: &LaunchHandle,
        port: u16,
    ) -> Result<Endpoint> {
        let probe = adapter.attachment_probe().ok_or_else(|| {
            OrchestratorError::EndpointResolution(format!(
                "{} backend returned no endpoint and cannot be probed",
                adapter.kind()
            ))
        })?;

        Ok(self.resolver.resolve(probe, handle, port).await?)
    }

    async fn finish_start(
        &self,
        starting: Instance,
        adapter: Arc<dyn BackendAdapter>,
        handle: LaunchHandle,
        endpoint: Result<Endpoint>,
    ) -> Result<Instance> {
        let endpoint = match endpoint {
            Ok(endpoint) => endpoint,
            Err(err) => {
                warn!(error = %err, "Workload unreachable, terminating it");
                self.abandon(&*adapter, &handle).await;
                self.record_failure(&starting, &err).await;
                return Err(err);
            }
        };

        let running = starting
            .clone()
            .complete_start(handle.clone(), endpoint, self.clock.now())?;
        match self.persist(&starting, running).await {
            Ok(running) => {
                info!(instance_id = %running.id, "Instance running");
                Ok(running)
            }
            Err(err) => {
                error!(error = %err, "Could not record running instance, terminating workload");
                self.abandon(&*adapter, &handle).await;
                self.record_failure(&starting, &err).await;
                Err(err)
            }
        }
    }

    /// Terminate the workload and return the instance to `Stopped`.
    ///
    /// Stopping a stopped instance is a no-op; stopping one in `Error` resets it.
    #[instrument(skip(self, principal))]
    pub async fn stop(&self, principal: &Principal, id: &str) -> Result<Instance> {
        let _guard = self.locks.acquire(id).await;
        let instance = self.get(principal, id).await?;
        self.stop_locked(instance).await
    }

    async fn stop_locked(&self, instance: Instance) -> Result<Instance> {
        let now = self.clock.now();
        let stopping = match instance.status {
            InstanceStatus::Stopped => return Ok(instance),
            InstanceStatus::Error => {
                let reset = instance.clone().complete_stop(now)?;
                let reset = self.persist(&instance, reset).await?;
                info!(instance_id = %reset.id, "Instance reset from error");
                return Ok(reset);
            }
            // Left over from an interrupted stop; carry on from here.
            InstanceStatus::Stopping => instance,
            InstanceStatus::Running | InstanceStatus::Starting | InstanceStatus::Expired => {
                let stopping = instance.clone().begin_stop(now)?;
                self.persist(&instance, stopping).await?
            }
        };

        if let Some(handle) = stopping.launch_handle.clone() {
            if let Err(err) = self.terminate(&handle).await {
                error!(instance_id = %stopping.id, error = %err, "Terminate failed");
                self.record_failure(&stopping, &err).await;
                return Err(err);
            }
        }

        let stopped = stopping.clone().complete_stop(self.clock.now())?;
        let stopped = self.persist(&stopping, stopped).await?;
        info!(instance_id = %stopped.id, "Instance stopped");
        Ok(stopped)
    }

    async fn terminate(&self, handle: &LaunchHandle) -> Result<()> {
        let Some(adapter) = self.backends.get(handle.backend) else {
            warn!(
                backend = %handle.backend,
                "No adapter for launch handle, treating workload as gone"
            );
            return Ok(());
        };

        match self.bounded("terminate", adapter.terminate(handle)).await {
            Ok(TerminateOutcome::Terminated) => Ok(()),
            Ok(TerminateOutcome::AlreadyGone) => {
                info!(resources = ?handle.resources, "Workload already gone");
                Ok(())
            }
            Ok(TerminateOutcome::Abandoned(reason)) => {
                warn!(resources = ?handle.resources, %reason, "Terminate abandoned");
                Ok(())
            }
            Err(e) => Err(OrchestratorError::Backend(e.to_string())),
        }
    }

    /// Best-effort cleanup of a workload the instance will not keep.
    async fn abandon(&self, adapter: &dyn BackendAdapter, handle: &LaunchHandle) {
        match self.bounded("terminate", adapter.terminate(handle)).await {
            Ok(outcome) => debug!(?outcome, "Abandoned workload terminated"),
            Err(e) => warn!(
                resources = ?handle.resources,
                error = %e,
                "Could not terminate abandoned workload"
            ),
        }
    }

    /// Record activity on a running instance. Dropped silently otherwise.
    pub async fn heartbeat(&self, principal: &Principal, id: &str) -> Result<()> {
        let instance = self.get(principal, id).await?;
        if instance.status != InstanceStatus::Running {
            debug!(instance_id = %id, status = %instance.status, "Heartbeat ignored");
            return Ok(());
        }

        if !self.store.touch(id, self.clock.now()).await? {
            debug!(instance_id = %id, "Heartbeat lost the race with a stop");
        }
        Ok(())
    }

    /// Instances the sweeper should look at.
    pub async fn list_reclaimable(&self) -> Result<Vec<Instance>> {
        let now = self.clock.now();
        let idle_cutoff = now - chrono_duration(self.settings.idle_limit);
        self.store.list_expired(now, idle_cutoff).await
    }

    /// Stop an instance on behalf of the sweeper if it is still eligible once
    /// its lock is held. Returns the reason when it was reclaimed.
    #[instrument(skip(self))]
    pub async fn reclaim(&self, id: &str) -> Result<Option<ReclaimReason>> {
        let _guard = self.locks.acquire(id).await;
        let Some(instance) = self.store.get(id).await? else {
            return Ok(None);
        };

        let now = self.clock.now();
        let Some(reason) = instance.reclaim_reason(now, chrono_duration(self.settings.idle_limit))
        else {
            return Ok(None);
        };

        info!(instance_id = %id, %reason, "Reclaiming instance");
        let instance = if instance.status == InstanceStatus::Running {
            let expired = instance.clone().expire(now)?;
            self.persist(&instance, expired).await?
        } else {
            instance
        };

        self.stop_locked(instance).await?;
        Ok(Some(reason))
    }

    /// Drop lock entries nobody holds.
    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }

    async fn persist(&self, current: &Instance, next: Instance) -> Result<Instance> {
        self.store
            .compare_and_swap(Expected::of(current), &next)
            .await?
            .ok_or_else(|| OrchestratorError::Conflict(next.id.clone()))
    }

    async fn record_failure(&self, current: &Instance, err: &OrchestratorError) {
        let failed = current.clone().fail(err.to_string(), self.clock.now());
        if let Err(e) = self.persist(current, failed).await {
            error!(instance_id = %current.id, error = %e, "Could not record instance failure");
        }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = ws_provider::Result<T>>,
    ) -> ws_provider::Result<T> {
        let deadline = self.settings.operation_timeout;
        tokio::time::timeout(deadline, call)
            .await
            .unwrap_or_else(|_| {
                Err(ProviderError::Timeout {
                    operation: operation.to_string(),
                    after: deadline,
                })
            })
    }
}
