//! Local container backend driven through the Docker CLI.
//!
//! Each container of a profile becomes `ws_<suffix>_<instance>`, published on
//! a host port Docker picks. The instance data path is bind-mounted so state
//! survives a stop/start cycle.

mod command;

pub use command::DockerCommand;

use crate::endpoint::{Endpoint, LaunchHandle};
use crate::error::{ProviderError, Result};
use crate::kind::BackendKind;
use crate::registry::{container_name, ContainerSpec};
use crate::{BackendAdapter, LaunchRequest, Launched, TerminateOutcome};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub docker_bin: PathBuf,
    /// User-defined network shared by multi-container workloads.
    pub network: Option<String>,
    /// Interface published ports bind to.
    pub publish_interface: String,
    /// Address the router uses to reach published ports.
    pub host_address: String,
    pub restart_policy: Option<String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            docker_bin: PathBuf::from("docker"),
            network: None,
            publish_interface: "127.0.0.1".to_string(),
            host_address: "127.0.0.1".to_string(),
            restart_policy: Some("unless-stopped".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalBackend {
    config: LocalConfig,
}

impl LocalBackend {
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }

    fn docker(&self) -> DockerCommand {
        DockerCommand::new(&self.config.docker_bin)
    }

    fn run_args(&self, spec: &ContainerSpec, request: &LaunchRequest) -> Vec<String> {
        let id = &request.instance_id;
        let mut args = vec![
            "-d".to_string(),
            "--name".to_string(),
            spec.container_name(id),
            "--label".to_string(),
            format!("ws.instance={id}"),
            "--label".to_string(),
            format!("ws.owner={}", request.owner_id),
        ];

        if let Some(network) = &self.config.network {
            args.extend(["--network".to_string(), network.clone()]);
        }
        if let Some(policy) = &self.config.restart_policy {
            args.extend(["--restart".to_string(), policy.clone()]);
        }
        if let Some(port) = spec.port {
            args.extend([
                "-p".to_string(),
                format!("{}::{port}", self.config.publish_interface),
            ]);
        }
        if let Some(mount) = &spec.mount {
            let host = mount_source(&request.data_path, mount.subdir.as_deref());
            args.extend([
                "-v".to_string(),
                format!("{}:{}", host.display(), mount.target),
            ]);
        }
        for (key, value) in &spec.env {
            args.extend(["-e".to_string(), format!("{key}={}", render_env(value, id))]);
        }

        args.push(spec.image.clone());
        args
    }

    async fn run_container(&self, spec: &ContainerSpec, request: &LaunchRequest) -> Result<()> {
        if let Some(mount) = &spec.mount {
            let host = mount_source(&request.data_path, mount.subdir.as_deref());
            tokio::fs::create_dir_all(&host).await?;
        }

        self.docker()
            .subcommand("run")
            .args(self.run_args(spec, request))
            .execute_with_output()
            .await?;

        Ok(())
    }

    /// Host port Docker assigned to `container_port`.
    async fn published_port(&self, container: &str, container_port: u16) -> Result<u16> {
        let output = self
            .docker()
            .subcommand("port")
            .arg(container)
            .arg(container_port.to_string())
            .execute_with_output()
            .await?;

        parse_published_port(&output).ok_or_else(|| {
            ProviderError::CommandFailed(format!(
                "unexpected `docker port` output for {container}: {output:?}"
            ))
        })
    }

    /// Remove containers, returning how many Docker did not know about.
    async fn remove_containers(&self, names: &[String]) -> Result<usize> {
        let mut missing = 0;
        let mut failures = Vec::new();

        for name in names.iter().rev() {
            let output = self
                .docker()
                .subcommand("rm")
                .arg("-f")
                .arg(name)
                .execute_raw()
                .await?;

            if output.status.success() {
                continue;
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such container") {
                missing += 1;
            } else {
                failures.push(format!("{name}: {}", stderr.trim()));
            }
        }

        if failures.is_empty() {
            Ok(missing)
        } else {
            Err(ProviderError::Terminate(failures.join("; ")))
        }
    }

    async fn launch_containers(
        &self,
        request: &LaunchRequest,
        started: &mut Vec<String>,
    ) -> Result<Endpoint> {
        let mut primary = None;
        let mut services = BTreeMap::new();

        for spec in request.profile.containers() {
            // Recorded before `run`: a failed run may still have created the container.
            let name = spec.container_name(&request.instance_id);
            started.push(name.clone());
            self.run_container(&spec, request).await?;

            if let Some(port) = spec.port {
                let host_port = self.published_port(&name, port).await?;
                match &spec.service {
                    Some(service) => {
                        services.insert(service.clone(), host_port);
                    }
                    None => primary = Some(host_port),
                }
            }
        }

        let port = primary.ok_or_else(|| {
            ProviderError::Config(format!("{}: no primary port published", request.kind))
        })?;

        Ok(Endpoint::Network {
            address: self.config.host_address.clone(),
            port,
            services,
        })
    }
}

#[async_trait]
impl BackendAdapter for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    #[instrument(
        skip(self, request),
        fields(instance_id = %request.instance_id, kind = %request.kind)
    )]
    async fn launch(&self, request: &LaunchRequest) -> Result<Launched> {
        tokio::fs::create_dir_all(&request.data_path)
            .await
            .map_err(|e| {
                ProviderError::Provision(format!(
                    "cannot create data path {}: {e}",
                    request.data_path.display()
                ))
            })?;

        // Names are fixed per instance; leftovers of an interrupted launch would conflict.
        let names = container_names(request);
        let missing = self
            .remove_containers(&names)
            .await
            .map_err(|e| ProviderError::Provision(e.to_string()))?;
        if missing < names.len() {
            warn!(removed = names.len() - missing, "Removed containers left by an earlier launch");
        }

        let mut started = Vec::new();
        match self.launch_containers(request, &mut started).await {
            Ok(endpoint) => {
                info!(containers = ?started, "Local workload running");
                Ok(Launched {
                    handle: LaunchHandle::new(BackendKind::Local, started),
                    endpoint: Some(endpoint),
                })
            }
            Err(e) => {
                if !started.is_empty() {
                    if let Err(cleanup) = self.remove_containers(&started).await {
                        warn!(error = %cleanup, "Cleanup after failed launch was incomplete");
                    }
                }
                Err(ProviderError::Provision(e.to_string()))
            }
        }
    }

    #[instrument(skip(self, request), fields(instance_id = %request.instance_id))]
    async fn discard(&self, request: &LaunchRequest) -> Result<()> {
        let names = container_names(request);
        let missing = self.remove_containers(&names).await?;
        debug!(removed = names.len() - missing, "Discarded interrupted launch");
        Ok(())
    }

    #[instrument(skip(self), fields(containers = ?handle.resources))]
    async fn terminate(&self, handle: &LaunchHandle) -> Result<TerminateOutcome> {
        if handle.resources.is_empty() {
            return Ok(TerminateOutcome::AlreadyGone);
        }

        let missing = self.remove_containers(&handle.resources).await?;
        if missing == handle.resources.len() {
            Ok(TerminateOutcome::AlreadyGone)
        } else {
            Ok(TerminateOutcome::Terminated)
        }
    }
}

fn container_names(request: &LaunchRequest) -> Vec<String> {
    request
        .profile
        .containers()
        .iter()
        .map(|spec| spec.container_name(&request.instance_id))
        .collect()
}

fn mount_source(data_path: &Path, subdir: Option<&str>) -> PathBuf {
    match subdir {
        Some(sub) => data_path.join(sub),
        None => data_path.to_path_buf(),
    }
}

/// Expand `{instance}` and `{container:<suffix>}` placeholders.
fn render_env(value: &str, instance_id: &str) -> String {
    const MARKER: &str = "{container:";

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find(MARKER) {
        out.push_str(&rest[..start]);
        let after = &rest[start + MARKER.len()..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&container_name(&after[..end], instance_id));
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    out.replace("{instance}", instance_id)
}

/// `docker port` prints one `host:port` line per address family.
fn parse_published_port(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit(':').next())
        .find_map(|port| port.parse().ok())
}
