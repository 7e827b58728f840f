//! Sync command - run one full sync cycle.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{FormatOptions, format_report_json, format_report_text};

use super::{open_orchestrator, spawn_event_logger};

/// Execute the sync command.
///
/// Fails when the cycle cannot start or reconciliation fails. Failures of
/// later phases are reported but do not fail the command.
pub async fn cmd_sync(config: &Config, format: OutputFormat, opts: &FormatOptions) -> Result<()> {
    let orchestrator = open_orchestrator(config)?;
    let logger = spawn_event_logger(&orchestrator);

    let result = orchestrator.sync_all().await;
    drop(orchestrator);
    // Let the logger drain what the run emitted.
    let _ = tokio::time::timeout(Duration::from_millis(250), logger).await;

    let report = result.context("Sync failed")?;
    let failures = report.failures().len();
    if failures == 0 {
        info!("Sync complete: {} records", report.records_synced());
    } else {
        warn!("Sync finished with {} failures", failures);
    }

    let content = match format {
        OutputFormat::Json => format_report_json(&report)?,
        OutputFormat::Text => format_report_text(&report, opts),
    };
    print!("{}", content);
    if format == OutputFormat::Json {
        println!();
    }
    Ok(())
}
