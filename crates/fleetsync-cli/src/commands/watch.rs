//! Watch command implementation.
//!
//! Runs a sync cycle on every tick until Ctrl-C. A tick that fires while the
//! previous cycle is still running is skipped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fleetsync_core::{SyncError, SyncOrchestrator};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use crate::config::Config;

use super::{open_orchestrator, spawn_event_logger};

pub async fn cmd_watch(config: &Config, interval_secs: u64) -> Result<()> {
    let orchestrator = Arc::new(open_orchestrator(config)?);
    let _logger = spawn_event_logger(&orchestrator);

    let mut ticker = interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut running: Option<JoinHandle<()>> = None;
    let mut cycles: u64 = 0;

    info!("Syncing every {}s, press Ctrl-C to stop", interval_secs);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                eprintln!("Stopping after {} cycles.", cycles);
                break;
            }
            _ = ticker.tick() => {
                if running.as_ref().is_some_and(|task| !task.is_finished()) {
                    warn!("Previous sync still running, skipping this tick");
                    continue;
                }
                cycles += 1;
                running = Some(tokio::spawn(run_cycle(orchestrator.clone(), cycles)));
            }
        }
    }

    if let Some(task) = running
        && !task.is_finished()
    {
        info!("Waiting for the running cycle to finish");
        let _ = task.await;
    }
    Ok(())
}

async fn run_cycle(orchestrator: Arc<SyncOrchestrator>, cycle: u64) {
    match orchestrator.sync_all().await {
        Ok(report) => {
            let failures = report.failures();
            if failures.is_empty() {
                info!(
                    "Cycle {}: {} records, {} sensor changes",
                    cycle,
                    report.records_synced(),
                    report.sensors.mutations()
                );
            } else {
                for (label, err) in &failures {
                    warn!("Cycle {}: {}: {}", cycle, label, err);
                }
            }
        }
        Err(SyncError::QueueIsAlreadySyncing) => {
            warn!("Cycle {}: a sync is already running", cycle);
        }
        Err(e) => error!("Cycle {} failed: {}", cycle, e),
    }
}
