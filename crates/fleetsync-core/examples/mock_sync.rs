//! Run a sync cycle against the in-memory mock cloud.
//!
//! Run with: `cargo run --example mock_sync -p fleetsync-core`

use std::sync::Arc;

use fleetsync_core::types::{MacId, Record};
use fleetsync_core::{
    CloudSensor, MockCloudClient, SqliteLocalStore, SyncContext, SyncEvent, SyncOrchestrator,
};
use time::{Duration, OffsetDateTime};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleetsync_core=info".parse()?),
        )
        .init();

    let sauna = MacId::parse("aa:bb:cc:dd:ee:01")?;
    let cellar = MacId::parse("aa:bb:cc:dd:ee:02")?;
    let start = OffsetDateTime::now_utc() - Duration::hours(6);

    let cloud = MockCloudClient::builder()
        .sensor(CloudSensor::new(sauna.clone(), "Sauna"))
        .sensor(CloudSensor::new(cellar.clone(), "Cellar"))
        .records(&sauna, readings(&sauna, start, 12, 80.0))
        .records(&cellar, readings(&cellar, start, 24, 9.5))
        .build();

    let store = SqliteLocalStore::open_in_memory()?;
    let orchestrator = SyncOrchestrator::new(SyncContext::new(Arc::new(cloud), Arc::new(store)));

    let mut events = orchestrator.events().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let SyncEvent::PhaseProgress {
                phase,
                completed,
                total,
            } = event
            {
                println!("  {}: {}/{}", phase, completed, total);
            }
        }
    });

    println!("Syncing...");
    let report = orchestrator.sync_all().await?;
    drop(orchestrator);
    printer.await?;

    println!("Created {} sensors", report.sensors.created.len());
    println!("Stored {} history records", report.records_synced());
    for (label, err) in report.failures() {
        println!("  failed {}: {}", label, err);
    }

    Ok(())
}

fn readings(mac_id: &MacId, start: OffsetDateTime, n: i64, base: f64) -> Vec<Record> {
    (0..n)
        .map(|i| {
            let mut record = Record::for_mac(mac_id.clone(), start + Duration::minutes(15 * i));
            record.temperature = Some(base + (i % 4) as f64 * 0.5);
            record
        })
        .collect()
}
