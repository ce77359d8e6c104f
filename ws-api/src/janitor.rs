use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};
use ws_orchestrator::{InstanceOrchestrator, Sweeper};

/// Runs the reconciliation sweep every `period` until `shutdown` flips to true.
pub async fn start_janitor_task(
    orchestrator: Arc<InstanceOrchestrator>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let sweeper = Sweeper::new(orchestrator);
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Janitor task running (sweeps every {} seconds)",
        period.as_secs()
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match sweeper.sweep_once().await {
            Ok(Some(report)) => debug!(?report, "Sweep complete"),
            Ok(None) => {}
            Err(e) => error!("Janitor sweep failed: {}", e),
        }
    }

    info!("Janitor task stopped");
}
