//! Status command - list local sensors with their sync state.

use std::collections::HashMap;

use anyhow::{Context, Result};
use fleetsync_store::Store;

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{FormatOptions, SensorStatusRow, format_status_json, format_status_text};

pub fn cmd_status(config: &Config, format: OutputFormat, opts: &FormatOptions) -> Result<()> {
    let store = Store::open(&config.storage.path).with_context(|| {
        format!("Failed to open database: {}", config.storage.path.display())
    })?;

    let rows = collect_rows(&store)?;
    let content = match format {
        OutputFormat::Json => format_status_json(&rows)? + "\n",
        OutputFormat::Text => format_status_text(&rows, opts),
    };
    print!("{}", content);
    Ok(())
}

fn collect_rows(store: &Store) -> Result<Vec<SensorStatusRow>> {
    let states: HashMap<_, _> = store
        .list_sync_states()
        .context("Failed to read sync state")?
        .into_iter()
        .map(|state| (state.key.clone(), state))
        .collect();

    let mut rows = Vec::new();
    for sensor in store.list_sensors().context("Failed to list sensors")? {
        let Some(key) = sensor.key() else {
            continue;
        };
        let records = store.count_records(Some(&key))?;
        rows.push(SensorStatusRow::new(&sensor, key.clone(), states.get(&key), records));
    }
    Ok(rows)
}
