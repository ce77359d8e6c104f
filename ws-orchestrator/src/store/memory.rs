use super::{Expected, InstanceStore};
use crate::error::{OrchestratorError, Result};
use crate::instance::{Instance, InstanceStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    instances: RwLock<HashMap<String, Instance>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Instance>> {
        Ok(self.instances.read().await.get(id).cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Instance>> {
        let mut owned: Vec<Instance> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(owned)
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        idle_cutoff: DateTime<Utc>,
    ) -> Result<Vec<Instance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .filter(|i| match i.status {
                InstanceStatus::Expired => true,
                InstanceStatus::Running => {
                    i.ttl_deadline < now
                        || i.last_active_at < idle_cutoff
                        || i
                            .endpoint
                            .as_ref()
                            .and_then(|e| e.expires_at())
                            .is_some_and(|at| at <= now)
                }
                _ => false,
            })
            .cloned()
            .collect())
    }

    async fn insert(&self, instance: &Instance) -> Result<()> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Err(OrchestratorError::Conflict(instance.id.clone()));
        }
        instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        expected: Expected,
        instance: &Instance,
    ) -> Result<Option<Instance>> {
        let mut instances = self.instances.write().await;
        let Some(current) = instances.get_mut(&instance.id) else {
            return Ok(None);
        };
        if Expected::of(current) != expected {
            return Ok(None);
        }

        let mut stored = instance.clone();
        stored.revision = expected.revision + 1;
        stored.last_active_at = stored.last_active_at.max(current.last_active_at);
        *current = stored.clone();
        Ok(Some(stored))
    }

    async fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(id) {
            Some(instance) if instance.status == InstanceStatus::Running => {
                if at > instance.last_active_at {
                    instance.last_active_at = at;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
