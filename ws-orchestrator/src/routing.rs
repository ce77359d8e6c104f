//! Resolution of a routing target to the live endpoint behind it.

use crate::error::{OrchestratorError, Result};
use crate::instance::InstanceStatus;
use crate::orchestrator::{InstanceOrchestrator, Principal};
use ws_provider::Endpoint;

/// `<instance id>` or `<instance id>:<service>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTarget<'a> {
    pub instance_id: &'a str,
    pub service: Option<&'a str>,
}

impl<'a> RouteTarget<'a> {
    pub fn parse(target: &'a str) -> Result<Self> {
        let (instance_id, service) = match target.split_once(':') {
            Some((id, service)) => (id, Some(service)),
            None => (target, None),
        };

        if instance_id.is_empty() || service.is_some_and(str::is_empty) {
            return Err(OrchestratorError::InvalidInput(format!(
                "malformed routing target {target:?}"
            )));
        }
        Ok(Self {
            instance_id,
            service,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Forward the request to this socket.
    Proxy { address: String, port: u16 },
    /// Send the client to a pre-authenticated URL.
    Redirect { url: String },
}

impl InstanceOrchestrator {
    /// Where traffic for `target` should go right now.
    pub async fn route(&self, principal: &Principal, target: &str) -> Result<Route> {
        let target = RouteTarget::parse(target)?;
        let instance = self.get(principal, target.instance_id).await?;

        if instance.status != InstanceStatus::Running {
            return Err(OrchestratorError::Unavailable(format!(
                "{} is {}",
                instance.id, instance.status
            )));
        }
        let Some(endpoint) = instance.endpoint else {
            return Err(OrchestratorError::Unavailable(format!(
                "{} has no endpoint",
                instance.id
            )));
        };

        match endpoint {
            Endpoint::AccessUrl { url, expires_at } => {
                if let Some(service) = target.service {
                    return Err(OrchestratorError::NotFound(format!(
                        "{}:{service}",
                        instance.id
                    )));
                }
                if self.now() >= expires_at {
                    return Err(OrchestratorError::Unavailable(format!(
                        "{} access URL expired",
                        instance.id
                    )));
                }
                Ok(Route::Redirect { url })
            }
            network => network
                .socket_for(target.service)
                .map(|(address, port)| Route::Proxy { address, port })
                .ok_or_else(|| {
                    OrchestratorError::NotFound(format!(
                        "{}:{}",
                        instance.id,
                        target.service.unwrap_or_default()
                    ))
                }),
        }
    }
}
