//! Reconciliation pass that reclaims idle and expired instances.

use crate::error::Result;
use crate::orchestrator::InstanceOrchestrator;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub reclaimed: usize,
    /// No longer eligible once locked, e.g. a heartbeat landed in between.
    pub spared: usize,
    pub failed: usize,
}

/// Drives reclamation through the orchestrator so sweeps share its locking.
#[derive(Debug)]
pub struct Sweeper {
    orchestrator: Arc<InstanceOrchestrator>,
    in_flight: Mutex<()>,
}

impl Sweeper {
    pub fn new(orchestrator: Arc<InstanceOrchestrator>) -> Self {
        Self {
            orchestrator,
            in_flight: Mutex::new(()),
        }
    }

    /// Run one sweep. Returns `None` when another sweep is still running.
    ///
    /// Per-instance failures are logged and counted; only a failure to list
    /// candidates aborts the sweep.
    pub async fn sweep_once(&self) -> Result<Option<SweepReport>> {
        let Ok(_running) = self.in_flight.try_lock() else {
            info!("Previous sweep still running, skipping");
            return Ok(None);
        };

        let candidates = self.orchestrator.list_reclaimable().await?;
        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };

        for instance in candidates {
            match self.orchestrator.reclaim(&instance.id).await {
                Ok(Some(_)) => report.reclaimed += 1,
                Ok(None) => report.spared += 1,
                Err(e) => {
                    error!(instance_id = %instance.id, error = %e, "Failed to reclaim instance");
                    report.failed += 1;
                }
            }
        }

        let pruned = self.orchestrator.prune_locks();
        if report.examined > 0 {
            info!(
                examined = report.examined,
                reclaimed = report.reclaimed,
                spared = report.spared,
                failed = report.failed,
                pruned_locks = pruned,
                "Sweep finished"
            );
        }

        Ok(Some(report))
    }
}
