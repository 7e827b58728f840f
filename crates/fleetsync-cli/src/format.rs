//! Output formatting for sync reports and sensor status.

use std::fmt::Write as _;

use anyhow::Result;
use fleetsync_core::SyncReport;
use fleetsync_core::types::{Sensor, SensorKey, SyncState, SyncStatus};
use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Formatting options shared by all commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    pub no_color: bool,
}

/// One row of the `status` listing.
#[derive(Debug, Clone, Serialize)]
pub struct SensorStatusRow {
    pub key: String,
    pub name: String,
    pub claimed: bool,
    pub cloud: bool,
    pub status: SyncStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sync: Option<OffsetDateTime>,
    pub records: u64,
}

impl SensorStatusRow {
    pub fn new(sensor: &Sensor, key: SensorKey, state: Option<&SyncState>, records: u64) -> Self {
        Self {
            key: key.to_string(),
            name: sensor.name.clone(),
            claimed: sensor.is_claimed,
            cloud: sensor.is_cloud_sensor,
            status: state.map(|s| s.status).unwrap_or_default(),
            last_sync: state.and_then(|s| s.last_sync_date),
            records,
        }
    }
}

fn keys(keys: &[SensorKey]) -> Vec<String> {
    keys.iter().map(ToString::to_string).collect()
}

fn timestamp(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}

fn colored_status(status: SyncStatus, no_color: bool) -> String {
    let label = format!("{:<8}", status.as_str());
    if no_color {
        return label;
    }
    match status {
        SyncStatus::Complete => label.green().to_string(),
        SyncStatus::Syncing => label.cyan().to_string(),
        SyncStatus::Error => label.red().to_string(),
        SyncStatus::Idle => label.dimmed().to_string(),
    }
}

/// Human-readable sync report.
pub fn format_report_text(report: &SyncReport, opts: &FormatOptions) -> String {
    let mut out = String::new();
    let sensors = &report.sensors;
    let elapsed = report.finished_at - report.started_at;

    let _ = writeln!(
        out,
        "Sync {} finished in {:.1}s",
        report.run_id,
        elapsed.as_seconds_f64()
    );
    let _ = writeln!(
        out,
        "Sensors:  {} created, {} updated, {} unclaimed, {} deleted, {} unchanged",
        sensors.created.len(),
        sensors.updated.len(),
        sensors.unclaimed.len(),
        sensors.deleted.len(),
        sensors.unchanged.len()
    );
    let _ = writeln!(
        out,
        "History:  {} records from {} sensors",
        report.records_synced(),
        report.history.len()
    );
    if let Ok(latest) = &report.latest {
        let _ = writeln!(out, "Latest:   {} updated", latest.accepted());
    }
    if let Ok(settings) = &report.settings {
        if settings.is_empty() {
            let _ = writeln!(out, "Settings: unchanged");
        } else {
            let _ = writeln!(out, "Settings: {}", settings.join(", "));
        }
    }
    if let Ok(alerts) = &report.alerts {
        let _ = writeln!(out, "Alerts:   {} sensors updated", alerts);
    }
    if let Ok(pending) = &report.pending {
        let _ = writeln!(
            out,
            "Pending:  {} submitted, {} remaining",
            pending.submitted, pending.remaining
        );
    }

    let failures = report.failures();
    if !failures.is_empty() {
        let header = format!("{} failures:", failures.len());
        if opts.no_color {
            let _ = writeln!(out, "{}", header);
        } else {
            let _ = writeln!(out, "{}", header.red().bold());
        }
        for (label, err) in failures {
            let _ = writeln!(out, "  {}: {}", label, err);
        }
    }

    out
}

/// Machine-readable sync report.
pub fn format_report_json(report: &SyncReport) -> Result<String> {
    let sensors = &report.sensors;

    let history: serde_json::Map<String, serde_json::Value> = report
        .history
        .iter()
        .map(|(key, result)| {
            let value = match result {
                Ok(records) => json!({ "records": records.len() }),
                Err(err) => json!({ "error": err.to_string() }),
            };
            (key.to_string(), value)
        })
        .collect();

    let failures: Vec<_> = report
        .failures()
        .into_iter()
        .map(|(label, err)| json!({ "source": label, "error": err.to_string() }))
        .collect();

    let value = json!({
        "run_id": report.run_id.to_string(),
        "started_at": timestamp(report.started_at),
        "finished_at": timestamp(report.finished_at),
        "sensors": {
            "created": keys(&sensors.created),
            "updated": keys(&sensors.updated),
            "unclaimed": keys(&sensors.unclaimed),
            "deleted": keys(&sensors.deleted),
            "unchanged": sensors.unchanged.len(),
        },
        "history": history,
        "records_synced": report.records_synced(),
        "latest_updated": report.latest.as_ref().ok().map(|l| l.accepted()),
        "settings_changed": report.settings.as_ref().ok(),
        "alerts_updated": report.alerts.as_ref().ok(),
        "pending": report.pending.as_ref().ok().map(|p| json!({
            "submitted": p.submitted,
            "failed": p.failed,
            "remaining": p.remaining,
        })),
        "failures": failures,
        "success": report.is_complete_success(),
    });

    Ok(serde_json::to_string_pretty(&value)?)
}

/// Table of sensors with their sync state.
pub fn format_status_text(rows: &[SensorStatusRow], opts: &FormatOptions) -> String {
    if rows.is_empty() {
        return "No sensors in the local database.\n".to_string();
    }

    let name_width = rows
        .iter()
        .map(|r| r.name.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<17}  {:<name_width$}  {:<8}  {:>8}  LAST SYNC",
        "SENSOR", "NAME", "STATUS", "RECORDS"
    );
    for row in rows {
        let mut name = row.name.clone();
        if !row.claimed {
            name.push('*');
        }
        let last_sync = row
            .last_sync
            .map(timestamp)
            .unwrap_or_else(|| "never".to_string());
        let _ = writeln!(
            out,
            "{:<17}  {:<name_width$}  {}  {:>8}  {}",
            row.key,
            name,
            colored_status(row.status, opts.no_color),
            row.records,
            last_sync
        );
    }
    if rows.iter().any(|r| !r.claimed) {
        let _ = writeln!(out, "* not claimed on the cloud");
    }
    out
}

pub fn format_status_json(rows: &[SensorStatusRow]) -> Result<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}
