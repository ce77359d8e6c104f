use super::{Expected, InstanceStore};
use crate::error::{OrchestratorError, Result};
use crate::instance::{Instance, InstanceStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use tracing::instrument;
use ws_provider::{Endpoint, LaunchHandle};

/// SQLite-backed store. Timestamps are unix milliseconds; the endpoint and
/// launch handle are JSON text.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

#[async_trait]
impl InstanceStore for SqliteStore {
    async fn get(&self, id: &str) -> Result<Option<Instance>> {
        sqlx::query_as::<_, InstanceRow>("SELECT * FROM instances WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Instance::try_from)
            .transpose()
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Instance>> {
        let rows = sqlx::query_as::<_, InstanceRow>(
            "SELECT * FROM instances WHERE owner_id = ? ORDER BY created_at DESC, id ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Instance::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        idle_cutoff: DateTime<Utc>,
    ) -> Result<Vec<Instance>> {
        let now = now.timestamp_millis();
        let rows = sqlx::query_as::<_, InstanceRow>(
            r#"
            SELECT * FROM instances
            WHERE status = 'expired'
               OR (status = 'running' AND (
                       ttl_deadline < ?
                    OR last_active_at < ?
                    OR (endpoint_expires_at IS NOT NULL AND endpoint_expires_at <= ?)))
            ORDER BY ttl_deadline ASC
            "#,
        )
        .bind(now)
        .bind(idle_cutoff.timestamp_millis())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Instance::try_from).collect()
    }

    #[instrument(skip(self, instance), fields(instance_id = %instance.id))]
    async fn insert(&self, instance: &Instance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instances (id, owner_id, workspace_kind, data_path, status, endpoint,
                endpoint_expires_at, launch_handle, last_active_at, ttl_deadline, created_at,
                updated_at, revision, last_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.owner_id)
        .bind(instance.kind.as_str())
        .bind(instance.data_path.to_string_lossy().into_owned())
        .bind(instance.status)
        .bind(to_json(instance.endpoint.as_ref())?)
        .bind(endpoint_expiry(instance))
        .bind(to_json(instance.launch_handle.as_ref())?)
        .bind(instance.last_active_at.timestamp_millis())
        .bind(instance.ttl_deadline.timestamp_millis())
        .bind(instance.created_at.timestamp_millis())
        .bind(instance.updated_at.timestamp_millis())
        .bind(instance.revision)
        .bind(&instance.last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(
        skip(self, instance),
        fields(instance_id = %instance.id, status = %instance.status)
    )]
    async fn compare_and_swap(
        &self,
        expected: Expected,
        instance: &Instance,
    ) -> Result<Option<Instance>> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET status = ?, endpoint = ?, endpoint_expires_at = ?, launch_handle = ?,
                last_active_at = MAX(last_active_at, ?), updated_at = ?, last_error = ?,
                revision = revision + 1
            WHERE id = ? AND status = ? AND revision = ?
            "#,
        )
        .bind(instance.status)
        .bind(to_json(instance.endpoint.as_ref())?)
        .bind(endpoint_expiry(instance))
        .bind(to_json(instance.launch_handle.as_ref())?)
        .bind(instance.last_active_at.timestamp_millis())
        .bind(instance.updated_at.timestamp_millis())
        .bind(&instance.last_error)
        .bind(&instance.id)
        .bind(expected.status)
        .bind(expected.revision)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(&instance.id).await
    }

    async fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE instances SET last_active_at = MAX(last_active_at, ?)
             WHERE id = ? AND status = ?",
        )
        .bind(at.timestamp_millis())
        .bind(id)
        .bind(InstanceStatus::Running)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn endpoint_expiry(instance: &Instance) -> Option<i64> {
    instance
        .endpoint
        .as_ref()
        .and_then(Endpoint::expires_at)
        .map(|at| at.timestamp_millis())
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: String,
    owner_id: String,
    workspace_kind: String,
    data_path: String,
    status: InstanceStatus,
    endpoint: Option<String>,
    launch_handle: Option<String>,
    last_active_at: i64,
    ttl_deadline: i64,
    created_at: i64,
    updated_at: i64,
    revision: i64,
    last_error: Option<String>,
}

fn timestamp(id: &str, millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        OrchestratorError::InvalidInput(format!("instance {id}: timestamp {millis} out of range"))
    })
}

impl TryFrom<InstanceRow> for Instance {
    type Error = OrchestratorError;

    fn try_from(row: InstanceRow) -> Result<Self> {
        let kind = row.workspace_kind.parse().map_err(|e: String| {
            OrchestratorError::InvalidInput(format!("instance {}: {e}", row.id))
        })?;
        let endpoint: Option<Endpoint> = row
            .endpoint
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let launch_handle: Option<LaunchHandle> = row
            .launch_handle
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Self {
            last_active_at: timestamp(&row.id, row.last_active_at)?,
            ttl_deadline: timestamp(&row.id, row.ttl_deadline)?,
            created_at: timestamp(&row.id, row.created_at)?,
            updated_at: timestamp(&row.id, row.updated_at)?,
            id: row.id,
            owner_id: row.owner_id,
            kind,
            data_path: PathBuf::from(row.data_path),
            status: row.status,
            endpoint,
            launch_handle,
            revision: row.revision,
            last_error: row.last_error,
        })
    }
}
