//! Workspace instance lifecycle.
//!
//! Holds the instance state machine, the record store, the lifecycle
//! orchestrator with its per-instance locking, the reconciliation sweeper and
//! route resolution. It is consumed by the ws-api HTTP service but has no
//! HTTP dependencies of its own.

pub mod clock;
pub mod db;
pub mod error;
pub mod instance;
pub mod lock;
pub mod orchestrator;
pub mod routing;
pub mod store;
pub mod sweeper;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{OrchestratorError, Result};
pub use instance::{Instance, InstanceStatus, ReclaimReason};
pub use orchestrator::{InstanceOrchestrator, OrchestratorSettings, Principal};
pub use routing::{Route, RouteTarget};
pub use store::{InstanceStore, MemoryStore, SqliteStore};
pub use sweeper::{SweepReport, Sweeper};
