//! Command implementations for the CLI.

mod config;
mod pending;
mod status;
mod sync;
mod watch;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use fleetsync_core::{
    DiskPictureCache, HttpCloudClient, SqliteLocalStore, SyncContext, SyncEvent, SyncOrchestrator,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, TOKEN_ENV};

pub use config::cmd_config;
pub use pending::cmd_pending;
pub use status::cmd_status;
pub use sync::cmd_sync;
pub use watch::cmd_watch;

/// Wire the cloud client, store and picture cache described by `config`.
pub(crate) fn open_orchestrator(config: &Config) -> Result<SyncOrchestrator> {
    let Some(token) = config.api_token() else {
        bail!(
            "No API token configured. Set cloud.api_token in {} or the {} environment variable",
            Config::default_path().display(),
            TOKEN_ENV
        );
    };

    let cloud = HttpCloudClient::new(&config.cloud.base_url, token)
        .context("Failed to create cloud client")?;
    let store = SqliteLocalStore::open(&config.storage.path).with_context(|| {
        format!("Failed to open database: {}", config.storage.path.display())
    })?;

    let mut ctx =
        SyncContext::new(Arc::new(cloud), Arc::new(store)).with_config(config.sync.clone());
    if let Some(dir) = &config.storage.pictures_dir {
        let pictures = DiskPictureCache::new(dir)
            .with_context(|| format!("Failed to prepare picture cache: {}", dir.display()))?;
        ctx = ctx.with_pictures(Arc::new(pictures));
    }

    Ok(SyncOrchestrator::new(ctx))
}

/// Forward sync events to the log until the channel closes.
pub(crate) fn spawn_event_logger(orchestrator: &SyncOrchestrator) -> JoinHandle<()> {
    let mut rx = orchestrator.events().subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Event logger skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::PhaseStarted { phase } => debug!("{} started", phase),
        SyncEvent::PhaseProgress {
            phase,
            completed,
            total,
        } => info!("{}: {}/{}", phase, completed, total),
        SyncEvent::PhaseSucceeded { phase } => debug!("{} finished", phase),
        SyncEvent::PhaseFailed { phase, error } => warn!("{} failed: {}", phase, error),
        SyncEvent::SensorStatus { key, status } => debug!("{} is {}", key, status),
        SyncEvent::AuthorizationFailed => {
            warn!("The cloud rejected the API token; update it and sync again")
        }
        _ => {}
    }
}
