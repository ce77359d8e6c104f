use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use ws_api::{create_app, start_janitor_task, Config};
use ws_logging::{init_subscriber, LogSettings};
use ws_orchestrator::db::{backup_database, create_pool, run_migrations};
use ws_orchestrator::{InstanceOrchestrator, SqliteStore};
use ws_provider::account::{AccountConfig, HttpAccountApi, ManagedAccountBackend};
use ws_provider::cluster::{ClusterConfig, ClusterTaskBackend, HttpTaskApi};
use ws_provider::docker::{LocalBackend, LocalConfig};
use ws_provider::{BackendSet, EndpointResolver, KindRegistry};

/// Per-request timeout for control-plane HTTP calls.
const CONTROL_PLANE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_subscriber(&LogSettings::from_env());

    info!("Starting ws-api service...");

    let config = Config::from_env();
    info!(
        "Configuration loaded: bind_addr={}, db_path={}",
        config.bind_addr,
        config.db_path.display()
    );

    // Backup before migrations
    if let Some(backup_path) = backup_database(&config.db_path)? {
        info!("Database backed up to: {}", backup_path.display());
    }

    let pool = create_pool(&config.db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    let registry = match &config.registry_file {
        Some(path) => KindRegistry::from_file(path)
            .with_context(|| format!("loading kind registry {}", path.display()))?,
        None => KindRegistry::defaults(),
    };
    let backends = build_backends(&config)?;
    info!(backends = ?backends.kinds(), "Backends configured");

    let orchestrator = Arc::new(
        InstanceOrchestrator::new(
            Arc::new(SqliteStore::new(pool)),
            registry,
            backends,
            config.orchestrator_settings(),
        )
        .with_resolver(EndpointResolver::new(config.retry_policy())),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let janitor = tokio::spawn(start_janitor_task(
        orchestrator.clone(),
        config.sweep_interval(),
        shutdown_rx,
    ));

    let app = create_app(orchestrator);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped, waiting for janitor");
    let _ = shutdown_tx.send(true);
    janitor.await?;

    Ok(())
}

fn build_backends(config: &Config) -> Result<BackendSet> {
    let mut backends = BackendSet::new().with(Arc::new(LocalBackend::new(LocalConfig {
        docker_bin: config.local.docker_bin.clone(),
        network: config.local.network.clone(),
        host_address: config.local.host_address.clone(),
        ..LocalConfig::default()
    })));

    if let Some(url) = &config.cluster.api_url {
        let api = HttpTaskApi::new(url, CONTROL_PLANE_TIMEOUT)?;
        backends.insert(Arc::new(ClusterTaskBackend::new(
            Arc::new(api),
            ClusterConfig {
                cluster: config.cluster.cluster.clone(),
                subnets: config.cluster.subnets.clone(),
                security_groups: config.cluster.security_groups.clone(),
                container_name: config.cluster.container_name.clone(),
                assign_public_ip: false,
            },
        )));
    }

    if let Some(url) = &config.account.api_url {
        let api = HttpAccountApi::new(url, CONTROL_PLANE_TIMEOUT)?;
        backends.insert(Arc::new(ManagedAccountBackend::new(
            Arc::new(api),
            AccountConfig {
                session_lifetime: Duration::from_secs(config.account.session_lifetime_secs),
                ..AccountConfig::default()
            },
        )));
    }

    Ok(backends)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
