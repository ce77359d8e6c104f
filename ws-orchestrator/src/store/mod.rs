//! Record store for instances.
//!
//! The store is the single source of truth. Lifecycle writes go through
//! [`InstanceStore::compare_and_swap`]; heartbeats use the narrower
//! [`InstanceStore::touch`] so they can never resurrect a stopped record.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::instance::{Instance, InstanceStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The record version a lifecycle write was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub status: InstanceStatus,
    pub revision: i64,
}

impl Expected {
    pub fn of(instance: &Instance) -> Self {
        Self {
            status: instance.status,
            revision: instance.revision,
        }
    }
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Instance>>;

    /// Newest first.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Instance>>;

    /// Running instances past their TTL deadline, idle since before
    /// `idle_cutoff`, or holding an expired access URL, plus any left in
    /// `Expired` by an interrupted reclaim.
    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        idle_cutoff: DateTime<Utc>,
    ) -> Result<Vec<Instance>>;

    async fn insert(&self, instance: &Instance) -> Result<()>;

    /// Replace the record if it still matches `expected`. Returns the stored
    /// instance with its revision bumped, or `None` when the record moved on.
    async fn compare_and_swap(
        &self,
        expected: Expected,
        instance: &Instance,
    ) -> Result<Option<Instance>>;

    /// Advance `last_active_at` of a running instance. Returns `false` when the
    /// instance is missing or not running.
    async fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Cheap availability probe.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
