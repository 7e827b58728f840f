//! Pending command - replay the request queue without a full sync.

use anyhow::{Context, Result};

use crate::config::Config;

use super::open_orchestrator;

pub async fn cmd_pending(config: &Config, quiet: bool) -> Result<()> {
    let orchestrator = open_orchestrator(config)?;
    let outcome = orchestrator
        .execute_pending()
        .await
        .context("Failed to replay queued requests")?;

    if outcome.submitted == 0 && outcome.remaining == 0 {
        if !quiet {
            println!("No queued requests");
        }
        return Ok(());
    }

    println!("Submitted: {}", outcome.submitted);
    if outcome.failed > 0 {
        println!("Failed:    {}", outcome.failed);
    }
    println!("Remaining: {}", outcome.remaining);
    Ok(())
}
