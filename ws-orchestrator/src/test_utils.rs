use crate::clock::ManualClock;
use crate::db::{create_memory_pool, run_migrations};
use crate::orchestrator::{InstanceOrchestrator, OrchestratorSettings};
use crate::store::SqliteStore;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use ws_provider::mock::MockBackend;
use ws_provider::{BackendKind, BackendSet, EndpointResolver, KindRegistry, RetryPolicy};

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    let pool = create_memory_pool()
        .await
        .expect("Failed to create in-memory database");

    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Where every harness clock starts.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

/// Everything a lifecycle test needs, wired to a manual clock.
pub struct TestHarness {
    pub orchestrator: Arc<InstanceOrchestrator>,
    pub clock: Arc<ManualClock>,
    pub pool: SqlitePool,
}

/// Orchestrator over an in-memory database with a single backend registered.
pub async fn harness(backend: Arc<MockBackend>) -> TestHarness {
    harness_with(BackendSet::new().with(backend), OrchestratorSettings::default()).await
}

pub async fn harness_with(backends: BackendSet, settings: OrchestratorSettings) -> TestHarness {
    let pool = create_test_db().await;
    let clock = Arc::new(ManualClock::new(epoch()));

    let orchestrator = InstanceOrchestrator::new(
        Arc::new(SqliteStore::new(pool.clone())),
        KindRegistry::defaults(),
        backends,
        OrchestratorSettings {
            data_root: std::env::temp_dir().join("ws-orchestrator-tests"),
            ..settings
        },
    )
    .with_resolver(EndpointResolver::new(RetryPolicy::fixed(
        3,
        Duration::from_millis(5),
    )))
    .with_clock(clock.clone());

    TestHarness {
        orchestrator: Arc::new(orchestrator),
        clock,
        pool,
    }
}

/// A local mock backend serving `127.0.0.1:8080`.
pub fn local_mock() -> Arc<MockBackend> {
    Arc::new(MockBackend::new(BackendKind::Local))
}
