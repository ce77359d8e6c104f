use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of workload an instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceKind {
    Editor,
    Notebook,
    FlowBuilder,
    RelationalDb,
    VectorDb,
    CloudAccount,
}

impl WorkspaceKind {
    pub const ALL: [WorkspaceKind; 6] = [
        WorkspaceKind::Editor,
        WorkspaceKind::Notebook,
        WorkspaceKind::FlowBuilder,
        WorkspaceKind::RelationalDb,
        WorkspaceKind::VectorDb,
        WorkspaceKind::CloudAccount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceKind::Editor => "editor",
            WorkspaceKind::Notebook => "notebook",
            WorkspaceKind::FlowBuilder => "flow_builder",
            WorkspaceKind::RelationalDb => "relational_db",
            WorkspaceKind::VectorDb => "vector_db",
            WorkspaceKind::CloudAccount => "cloud_account",
        }
    }
}

impl fmt::Display for WorkspaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkspaceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkspaceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown workspace kind: {s}"))
    }
}

/// Execution environment a workload is launched into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    ClusterTask,
    ManagedAccount,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::ClusterTask => "cluster_task",
            BackendKind::ManagedAccount => "managed_account",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
