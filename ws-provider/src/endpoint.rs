use crate::kind::BackendKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a running workload can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Endpoint {
    /// A host/port pair, plus any named secondary services on the same host.
    Network {
        address: String,
        port: u16,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        services: BTreeMap<String, u16>,
    },
    /// A pre-authenticated URL that stops working at `expires_at`.
    AccessUrl {
        url: String,
        expires_at: DateTime<Utc>,
    },
}

impl Endpoint {
    pub fn network(address: impl Into<String>, port: u16) -> Self {
        Endpoint::Network {
            address: address.into(),
            port,
            services: BTreeMap::new(),
        }
    }

    /// Expiry of an access URL; network endpoints never expire on their own.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Endpoint::Network { .. } => None,
            Endpoint::AccessUrl { expires_at, .. } => Some(*expires_at),
        }
    }

    /// Resolve the socket address for the primary port or a named service.
    pub fn socket_for(&self, service: Option<&str>) -> Option<(String, u16)> {
        match self {
            Endpoint::Network {
                address,
                port,
                services,
            } => match service {
                None => Some((address.clone(), *port)),
                Some(name) => services.get(name).map(|p| (address.clone(), *p)),
            },
            Endpoint::AccessUrl { .. } => None,
        }
    }
}

/// Backend-specific reference needed to terminate a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchHandle {
    pub backend: BackendKind,
    /// Container names, a task identifier or an account reference.
    pub resources: Vec<String>,
}

impl LaunchHandle {
    pub fn new(backend: BackendKind, resources: Vec<String>) -> Self {
        Self { backend, resources }
    }

    pub fn single(backend: BackendKind, resource: impl Into<String>) -> Self {
        Self::new(backend, vec![resource.into()])
    }

    /// First resource, which is the task or account id for remote backends.
    pub fn primary(&self) -> Option<&str> {
        self.resources.first().map(String::as_str)
    }
}
