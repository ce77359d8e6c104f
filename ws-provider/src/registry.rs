//! Static mapping from workspace kind to the image, ports and backend used to run it.
//!
//! The built-in table covers every [`WorkspaceKind`]; deployments can override
//! individual entries with a YAML file keyed by kind name.

use crate::error::{ProviderError, Result};
use crate::kind::{BackendKind, WorkspaceKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Host directory mapped into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Sub-directory of the instance data path; the data path itself when absent.
    #[serde(default)]
    pub subdir: Option<String>,
    pub target: String,
}

/// One container of a locally launched workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container names are `ws_<suffix>_<instance id>`.
    pub suffix: String,
    pub image: String,
    /// Container port to publish on a dynamically assigned host port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Named service for a published port. The unnamed published port is the
    /// workload's primary endpoint.
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub mount: Option<MountSpec>,
    /// Values may use `{instance}` and `{container:<suffix>}` placeholders.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ContainerSpec {
    pub fn container_name(&self, instance_id: &str) -> String {
        container_name(&self.suffix, instance_id)
    }

    pub fn is_primary(&self) -> bool {
        self.port.is_some() && self.service.is_none()
    }
}

pub fn container_name(suffix: &str, instance_id: &str) -> String {
    format!("ws_{suffix}_{instance_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindProfile {
    pub backend: BackendKind,
    /// Container image, or task definition name for cluster tasks.
    #[serde(default)]
    pub image: String,
    /// Port the primary HTTP service listens on inside the workload.
    #[serde(default)]
    pub port: u16,
    /// Explicit container layout for local launches. When empty a single
    /// container is derived from `image` and `port`.
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
}

impl KindProfile {
    fn single(backend: BackendKind, image: &str, port: u16) -> Self {
        Self {
            backend,
            image: image.to_string(),
            port,
            containers: Vec::new(),
        }
    }

    /// Containers to launch for this profile, in start order.
    pub fn containers(&self) -> Vec<ContainerSpec> {
        if !self.containers.is_empty() {
            return self.containers.clone();
        }

        vec![ContainerSpec {
            suffix: "main".to_string(),
            image: self.image.clone(),
            port: Some(self.port),
            service: None,
            mount: Some(MountSpec {
                subdir: None,
                target: "/data".to_string(),
            }),
            env: BTreeMap::new(),
        }]
    }

    fn validate(&self, kind: WorkspaceKind) -> Result<()> {
        match self.backend {
            BackendKind::Local => {
                let primaries = self.containers().iter().filter(|c| c.is_primary()).count();
                if primaries != 1 {
                    return Err(ProviderError::Config(format!(
                        "{kind}: local profiles need exactly one unnamed published port, \
                         found {primaries}"
                    )));
                }
                if self.containers().iter().any(|c| c.image.is_empty()) {
                    return Err(ProviderError::Config(format!("{kind}: container image missing")));
                }
            }
            BackendKind::ClusterTask => {
                if self.image.is_empty() || self.port == 0 {
                    return Err(ProviderError::Config(format!(
                        "{kind}: cluster profiles need a task definition and port"
                    )));
                }
            }
            BackendKind::ManagedAccount => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindRegistry {
    profiles: BTreeMap<WorkspaceKind, KindProfile>,
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::defaults()
    }
}

impl KindRegistry {
    pub fn defaults() -> Self {
        let mut profiles = BTreeMap::new();

        profiles.insert(
            WorkspaceKind::Editor,
            KindProfile::single(BackendKind::Local, "vscode_embedding:latest", 8443),
        );
        profiles.insert(
            WorkspaceKind::Notebook,
            KindProfile::single(BackendKind::Local, "jupyter_embedding:latest", 8888),
        );
        profiles.insert(
            WorkspaceKind::FlowBuilder,
            KindProfile::single(BackendKind::Local, "langflowai/langflow:latest", 7860),
        );
        profiles.insert(WorkspaceKind::RelationalDb, relational_db_profile());
        profiles.insert(WorkspaceKind::VectorDb, vector_db_profile());
        profiles.insert(
            WorkspaceKind::CloudAccount,
            KindProfile::single(BackendKind::ManagedAccount, "", 0),
        );

        Self { profiles }
    }

    /// Defaults with the entries from a YAML document layered on top.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let overrides: BTreeMap<WorkspaceKind, KindProfile> = serde_yaml_ng::from_str(yaml)?;
        let mut registry = Self::defaults();
        for (kind, profile) in overrides {
            profile.validate(kind)?;
            registry.profiles.insert(kind, profile);
        }
        Ok(registry)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn profile(&self, kind: WorkspaceKind) -> Option<&KindProfile> {
        self.profiles.get(&kind)
    }

    pub fn insert(&mut self, kind: WorkspaceKind, profile: KindProfile) -> Result<()> {
        profile.validate(kind)?;
        self.profiles.insert(kind, profile);
        Ok(())
    }
}

fn relational_db_profile() -> KindProfile {
    let mut db_env = BTreeMap::new();
    db_env.insert("MYSQL_ROOT_PASSWORD".to_string(), "workspace".to_string());
    db_env.insert("MYSQL_DATABASE".to_string(), "workspace".to_string());

    let mut admin_env = BTreeMap::new();
    admin_env.insert(
        "ADMINER_DEFAULT_SERVER".to_string(),
        "{container:mysql}".to_string(),
    );

    KindProfile {
        backend: BackendKind::Local,
        image: "mysql:8.0".to_string(),
        port: 8080,
        containers: vec![
            ContainerSpec {
                suffix: "mysql".to_string(),
                image: "mysql:8.0".to_string(),
                port: None,
                service: None,
                mount: Some(MountSpec {
                    subdir: Some("mysql".to_string()),
                    target: "/var/lib/mysql".to_string(),
                }),
                env: db_env,
            },
            ContainerSpec {
                suffix: "mysql_adminer".to_string(),
                image: "adminer".to_string(),
                port: Some(8080),
                service: None,
                mount: None,
                env: admin_env,
            },
        ],
    }
}

fn vector_db_profile() -> KindProfile {
    let mut db_env = BTreeMap::new();
    for (key, value) in [
        ("AUTHENTICATION_ANONYMOUS_ACCESS_ENABLED", "true"),
        ("PERSISTENCE_DATA_PATH", "/var/lib/weaviate"),
        ("DEFAULT_VECTORIZER_MODULE", "none"),
        ("AUTOSCHEMA_ENABLED", "true"),
        ("QUERY_DEFAULTS_LIMIT", "25"),
        ("CLUSTER_HOSTNAME", "{container:weaviate}"),
    ] {
        db_env.insert(key.to_string(), value.to_string());
    }

    let mut console_env = BTreeMap::new();
    console_env.insert(
        "WEAVIATE_URL".to_string(),
        "http://{container:weaviate}:8080".to_string(),
    );

    KindProfile {
        backend: BackendKind::Local,
        image: "semitechnologies/weaviate:1.24.4".to_string(),
        port: 80,
        containers: vec![
            ContainerSpec {
                suffix: "weaviate".to_string(),
                image: "semitechnologies/weaviate:1.24.4".to_string(),
                port: Some(8080),
                service: Some("api".to_string()),
                mount: Some(MountSpec {
                    subdir: Some("weaviate".to_string()),
                    target: "/var/lib/weaviate".to_string(),
                }),
                env: db_env,
            },
            ContainerSpec {
                suffix: "weaviate_console".to_string(),
                image: "semitechnologies/weaviate-console".to_string(),
                port: Some(80),
                service: None,
                mount: None,
                env: console_env,
            },
        ],
    }
}
