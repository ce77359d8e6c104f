//! The instance record and its lifecycle transitions.
//!
//! Transitions are pure: they take an instance by value and return the next
//! one, or a [`TransitionError`] when the move is not legal from the current
//! status. Persisting the result is the orchestrator's job.
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!               |           |          |
//!               v           v          v
//!             Error      Expired     Error
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use ws_provider::{Endpoint, LaunchHandle, WorkspaceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum InstanceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Expired,
    Error,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Expired => "expired",
            InstanceStatus::Error => "error",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An illegal lifecycle move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: InstanceStatus,
    pub action: &'static str,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {} an instance that is {}", self.action, self.from)
    }
}

impl std::error::Error for TransitionError {}

/// Why the sweeper may reclaim a running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimReason {
    TtlExpired,
    Idle,
    AccessExpired,
    /// Marked expired by an earlier sweep that did not finish the stop.
    Interrupted,
}

impl fmt::Display for ReclaimReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReclaimReason::TtlExpired => "ttl deadline passed",
            ReclaimReason::Idle => "idle limit exceeded",
            ReclaimReason::AccessExpired => "access URL expired",
            ReclaimReason::Interrupted => "previous reclaim interrupted",
        })
    }
}

/// Fields fixed when an instance is created.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub id: String,
    pub owner_id: String,
    pub kind: WorkspaceKind,
    pub data_path: PathBuf,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub owner_id: String,
    pub kind: WorkspaceKind,
    pub data_path: PathBuf,
    pub status: InstanceStatus,
    pub endpoint: Option<Endpoint>,
    /// Kept through `Stopping` and `Expired` so the workload can still be terminated.
    pub launch_handle: Option<LaunchHandle>,
    pub last_active_at: DateTime<Utc>,
    pub ttl_deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every lifecycle write.
    pub revision: i64,
    pub last_error: Option<String>,
}

impl Instance {
    pub fn create(spec: NewInstance, now: DateTime<Utc>) -> Self {
        Self {
            id: spec.id,
            owner_id: spec.owner_id,
            kind: spec.kind,
            data_path: spec.data_path,
            status: InstanceStatus::Stopped,
            endpoint: None,
            launch_handle: None,
            last_active_at: now,
            ttl_deadline: now + spec.ttl,
            created_at: now,
            updated_at: now,
            revision: 0,
            last_error: None,
        }
    }

    fn reject<T>(&self, action: &'static str) -> Result<T, TransitionError> {
        Err(TransitionError {
            from: self.status,
            action,
        })
    }

    fn moved(mut self, status: InstanceStatus, now: DateTime<Utc>) -> Self {
        self.status = status;
        self.updated_at = now;
        self
    }

    pub fn begin_start(self, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        match self.status {
            InstanceStatus::Stopped => Ok(self.moved(InstanceStatus::Starting, now)),
            _ => self.reject("start"),
        }
    }

    /// Record the handle of a launched workload whose endpoint is still unknown.
    pub fn attach_handle(
        mut self,
        handle: LaunchHandle,
        now: DateTime<Utc>,
    ) -> Result<Self, TransitionError> {
        if self.status != InstanceStatus::Starting {
            return self.reject("attach a launch handle to");
        }
        self.launch_handle = Some(handle);
        self.updated_at = now;
        Ok(self)
    }

    pub fn complete_start(
        mut self,
        handle: LaunchHandle,
        endpoint: Endpoint,
        now: DateTime<Utc>,
    ) -> Result<Self, TransitionError> {
        if self.status != InstanceStatus::Starting {
            return self.reject("complete start of");
        }
        self.launch_handle = Some(handle);
        self.endpoint = Some(endpoint);
        self.last_active_at = now;
        self.last_error = None;
        Ok(self.moved(InstanceStatus::Running, now))
    }

    pub fn begin_stop(mut self, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        match self.status {
            InstanceStatus::Running | InstanceStatus::Starting | InstanceStatus::Expired => {
                self.endpoint = None;
                Ok(self.moved(InstanceStatus::Stopping, now))
            }
            _ => self.reject("stop"),
        }
    }

    /// Finish a stop. Also the reset path out of `Error`.
    pub fn complete_stop(mut self, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        match self.status {
            InstanceStatus::Stopping | InstanceStatus::Error => {
                self.endpoint = None;
                self.launch_handle = None;
                Ok(self.moved(InstanceStatus::Stopped, now))
            }
            _ => self.reject("complete stop of"),
        }
    }

    pub fn fail(mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        self.endpoint = None;
        self.launch_handle = None;
        self.last_error = Some(reason.into());
        self.moved(InstanceStatus::Error, now)
    }

    /// Mark a running instance for reclamation. The endpoint stops routing at once.
    pub fn expire(mut self, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        if self.status != InstanceStatus::Running {
            return self.reject("expire");
        }
        self.endpoint = None;
        Ok(self.moved(InstanceStatus::Expired, now))
    }

    /// Record activity. Only running instances are affected.
    pub fn touch(mut self, now: DateTime<Utc>) -> Self {
        if self.status == InstanceStatus::Running && now > self.last_active_at {
            self.last_active_at = now;
        }
        self
    }

    pub fn reclaim_reason(
        &self,
        now: DateTime<Utc>,
        idle_limit: Duration,
    ) -> Option<ReclaimReason> {
        match self.status {
            InstanceStatus::Expired => Some(ReclaimReason::Interrupted),
            InstanceStatus::Running => {
                if now > self.ttl_deadline {
                    Some(ReclaimReason::TtlExpired)
                } else if now - self.last_active_at > idle_limit {
                    Some(ReclaimReason::Idle)
                } else if self
                    .endpoint
                    .as_ref()
                    .and_then(Endpoint::expires_at)
                    .is_some_and(|at| now >= at)
                {
                    Some(ReclaimReason::AccessExpired)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Endpoint and handle presence agree with the status.
    pub fn is_consistent(&self) -> bool {
        let endpoint = self.endpoint.is_some();
        let handle = self.launch_handle.is_some();
        match self.status {
            InstanceStatus::Running => endpoint && handle,
            InstanceStatus::Stopped | InstanceStatus::Error => !endpoint && !handle,
            InstanceStatus::Starting | InstanceStatus::Stopping | InstanceStatus::Expired => {
                !endpoint
            }
        }
    }
}
