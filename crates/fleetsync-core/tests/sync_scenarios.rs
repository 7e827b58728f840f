//! End-to-end sync scenarios against the mock cloud and an in-memory store.
//!
//! Run with: `cargo test --package fleetsync-core --test sync_scenarios`

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use fleetsync_core::local::{RecordRepository, SensorRepository, SyncStateStore};
use fleetsync_core::{
    CloudSensor, CloudSettings, MockCloudClient, SqliteLocalStore, SyncConfig, SyncContext,
    SyncError, SyncEvent, SyncOrchestrator,
};
use fleetsync_core::types::{AppSettings, Luid, MacId, Record, Sensor, SensorKey, SyncStatus};

fn mac(n: u8) -> MacId {
    MacId::parse(&format!("AA:BB:CC:DD:EE:{n:02X}")).unwrap()
}

/// Whole seconds, so timestamps survive millisecond storage unchanged.
fn t0() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc() - time::Duration::days(2);
    now.replace_nanosecond(0).unwrap()
}

fn history(mac_id: &MacId, start: OffsetDateTime, n: i64) -> Vec<Record> {
    (0..n)
        .map(|i| {
            let mut record = Record::for_mac(mac_id.clone(), start + time::Duration::minutes(5 * i));
            record.temperature = Some(20.0 + i as f64 / 10.0);
            record
        })
        .collect()
}

struct Fleet {
    orchestrator: SyncOrchestrator,
    cloud: Arc<MockCloudClient>,
    store: Arc<SqliteLocalStore>,
}

fn fleet(cloud: MockCloudClient, config: SyncConfig) -> Fleet {
    let cloud = Arc::new(cloud);
    let store = Arc::new(SqliteLocalStore::open_in_memory().unwrap());
    let ctx = SyncContext::new(cloud.clone(), store.clone()).with_config(config);
    Fleet {
        orchestrator: SyncOrchestrator::new(ctx),
        cloud,
        store,
    }
}

#[tokio::test]
async fn fresh_install_creates_sensors_and_history() {
    let start = t0();
    let cloud = MockCloudClient::builder()
        .sensor(CloudSensor::new(mac(1), "Sauna"))
        .sensor(CloudSensor::new(mac(2), "Cellar"))
        .records(&mac(1), history(&mac(1), start, 4))
        .records(&mac(2), history(&mac(2), start, 6))
        .build();
    let f = fleet(cloud, SyncConfig::default());

    let report = f.orchestrator.sync_all().await.unwrap();
    assert!(report.is_complete_success(), "{:?}", report.failures());
    assert_eq!(report.sensors.created.len(), 2);
    assert_eq!(report.records_synced(), 10);

    assert_eq!(f.store.read_all().await.unwrap().len(), 2);
    for (n, count) in [(1, 4), (2, 6)] {
        let key = SensorKey::from(&mac(n));
        let state = f.store.read_sync_state(&key).await.unwrap().unwrap();
        assert_eq!(state.status, SyncStatus::Complete);
        assert!(state.last_sync_date.is_some());

        let stored = f.store.lock().await.count_records(Some(&key)).unwrap();
        assert_eq!(stored, count);
    }
}

#[tokio::test]
async fn cloud_sensor_removed_from_cloud_is_deleted() {
    let cloud = MockCloudClient::builder()
        .sensor(CloudSensor::new(mac(1), "Sauna"))
        .sensor(CloudSensor::new(mac(2), "Cellar"))
        .build();
    let f = fleet(cloud, SyncConfig::default());
    f.orchestrator.sync_all().await.unwrap();

    f.cloud.remove_sensor(&mac(2)).await;
    let report = f.orchestrator.sync_all().await.unwrap();

    assert_eq!(report.sensors.deleted, vec![SensorKey::from(&mac(2))]);
    let remaining = f.store.read_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].mac_id, Some(mac(1)));
}

#[tokio::test]
async fn locally_known_sensor_is_unclaimed_not_deleted() {
    let cloud = MockCloudClient::new();
    let f = fleet(cloud, SyncConfig::default());
    let paired = Sensor {
        luid: Some(Luid::new("ble-1")),
        ..CloudSensor::new(mac(1), "Attic").to_sensor()
    };
    f.store.create_sensor(&paired).await.unwrap();

    let report = f.orchestrator.sync_all().await.unwrap();
    assert_eq!(report.sensors.unclaimed, vec![SensorKey::from(&mac(1))]);

    let stored = &f.store.read_all().await.unwrap()[0];
    assert!(!stored.is_claimed);
    assert!(!stored.is_cloud_sensor);
}

#[tokio::test]
async fn cloud_mode_overwrites_newer_local_latest() {
    let start = t0();
    let mut cloud_latest = Record::for_mac(mac(1), start);
    cloud_latest.temperature = Some(18.0);

    let cloud = MockCloudClient::builder()
        .sensor(CloudSensor::new(mac(1), "Owned"))
        .latest(&mac(1), cloud_latest)
        .settings(CloudSettings {
            cloud_mode_enabled: Some(true),
            ..Default::default()
        })
        .build();
    let f = fleet(cloud, SyncConfig::default());

    let settings = AppSettings {
        cloud_mode_enabled: true,
        ..Default::default()
    };
    f.store.lock().await.save_app_settings(&settings).unwrap();
    let mut local_latest = Record::for_mac(mac(1), start + time::Duration::hours(1));
    local_latest.temperature = Some(25.0);
    f.store.write_latest(&local_latest).await.unwrap();

    let report = f.orchestrator.sync_all().await.unwrap();
    assert_eq!(report.latest.as_ref().unwrap().accepted(), 1);

    let latest = f
        .store
        .read_latest(&SensorKey::from(&mac(1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.date, start);
    assert_eq!(latest.temperature, Some(18.0));
}

#[tokio::test]
async fn one_failing_sensor_does_not_affect_others() {
    let start = t0();
    let cloud = MockCloudClient::builder()
        .sensor(CloudSensor::new(mac(1), "A"))
        .sensor(CloudSensor::new(mac(2), "B"))
        .records(&mac(1), history(&mac(1), start, 3))
        .records(&mac(2), history(&mac(2), start, 3))
        .build();
    cloud.fail_records_for(&mac(1)).await;
    let f = fleet(cloud, SyncConfig::default());

    let report = f.orchestrator.sync_all().await.unwrap();
    assert!(!report.is_complete_success());

    let a = SensorKey::from(&mac(1));
    let b = SensorKey::from(&mac(2));
    assert!(report.history[&a].is_err());
    assert_eq!(report.history[&b].as_ref().unwrap().len(), 3);

    let state_a = f.store.read_sync_state(&a).await.unwrap().unwrap();
    let state_b = f.store.read_sync_state(&b).await.unwrap().unwrap();
    assert_eq!(state_a.status, SyncStatus::Error);
    assert!(state_a.last_sync_date.is_none());
    assert_eq!(state_b.status, SyncStatus::Complete);
    assert_eq!(
        state_b.last_sync_date,
        Some(start + time::Duration::minutes(10))
    );

    let labels: Vec<String> = report.failures().into_iter().map(|(l, _)| l).collect();
    assert_eq!(labels, vec![format!("history/{a}")]);
}

#[tokio::test]
async fn history_downloads_respect_queue_capacity() {
    let start = t0();
    let mut builder = MockCloudClient::builder().latency(Duration::from_millis(30));
    for n in 1..=6 {
        builder = builder
            .sensor(CloudSensor::new(mac(n), format!("S{n}")))
            .records(&mac(n), history(&mac(n), start, 2));
    }
    let f = fleet(builder.build(), SyncConfig::default());

    let report = f.orchestrator.sync_all().await.unwrap();
    assert!(report.is_complete_success());
    assert_eq!(f.cloud.record_load_count(), 6);
    let peak = f.cloud.peak_concurrent_record_loads();
    assert!(peak <= 3, "peak concurrency {peak}");
    assert!(peak >= 2, "downloads did not overlap");
}

#[tokio::test]
async fn capacity_one_serializes_downloads() {
    let start = t0();
    let mut builder = MockCloudClient::builder().latency(Duration::from_millis(10));
    for n in 1..=3 {
        builder = builder
            .sensor(CloudSensor::new(mac(n), format!("S{n}")))
            .records(&mac(n), history(&mac(n), start, 1));
    }
    let config = SyncConfig {
        queue_capacity: 1,
        ..Default::default()
    };
    let f = fleet(builder.build(), config);

    f.orchestrator.sync_all().await.unwrap();
    assert_eq!(f.cloud.peak_concurrent_record_loads(), 1);
}

#[tokio::test]
async fn second_sync_is_idempotent() {
    let start = t0();
    let cloud = MockCloudClient::builder()
        .sensor(CloudSensor::new(mac(1), "Sauna"))
        .records(&mac(1), history(&mac(1), start, 3))
        .build();
    let f = fleet(cloud, SyncConfig::default());

    f.orchestrator.sync_all().await.unwrap();
    let key = SensorKey::from(&mac(1));
    let watermark = f.store.get_sync_date(&key).await.unwrap();

    let second = f.orchestrator.sync_all().await.unwrap();
    assert_eq!(second.sensors.mutations(), 0);
    assert_eq!(second.records_synced(), 0);
    assert_eq!(f.store.get_sync_date(&key).await.unwrap(), watermark);
    assert_eq!(f.store.lock().await.count_records(Some(&key)).unwrap(), 3);
}

#[tokio::test]
async fn watermark_advances_with_new_records_and_holds_on_failure() {
    let start = t0();
    let cloud = MockCloudClient::builder()
        .sensor(CloudSensor::new(mac(1), "Sauna"))
        .records(&mac(1), history(&mac(1), start, 2))
        .build();
    let f = fleet(cloud, SyncConfig::default());
    let key = SensorKey::from(&mac(1));

    f.orchestrator.sync_all().await.unwrap();
    let first = f.store.get_sync_date(&key).await.unwrap().unwrap();

    f.cloud
        .push_records(&mac(1), history(&mac(1), start + time::Duration::hours(1), 2))
        .await;
    f.orchestrator.sync_all().await.unwrap();
    let second = f.store.get_sync_date(&key).await.unwrap().unwrap();
    assert!(second > first);

    f.cloud
        .push_records(&mac(1), history(&mac(1), start + time::Duration::hours(2), 2))
        .await;
    f.cloud.fail_records_for(&mac(1)).await;
    f.orchestrator.sync_all().await.unwrap();
    assert_eq!(f.store.get_sync_date(&key).await.unwrap().unwrap(), second);

    // The failed window is retried on the next cycle
    f.cloud.clear_failure(&mac(1)).await;
    let report = f.orchestrator.sync_all().await.unwrap();
    assert_eq!(report.history[&key].as_ref().unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_sync_all_is_rejected() {
    let cloud = MockCloudClient::builder()
        .sensor(CloudSensor::new(mac(1), "Sauna"))
        .latency(Duration::from_millis(50))
        .build();
    let f = fleet(cloud, SyncConfig::default());

    let (first, second) = tokio::join!(f.orchestrator.sync_all(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.orchestrator.sync_all().await
    });
    assert!(first.is_ok());
    assert!(matches!(second, Err(SyncError::QueueIsAlreadySyncing)));

    // The guard is released afterwards
    assert!(f.orchestrator.sync_all().await.is_ok());
}

#[tokio::test]
async fn unauthorized_raises_signal_once() {
    let cloud = MockCloudClient::builder()
        .sensor(CloudSensor::new(mac(1), "Sauna"))
        .build();
    let f = fleet(cloud, SyncConfig::default());
    f.orchestrator.sync_all().await.unwrap();

    let mut rx = f.orchestrator.events().subscribe();
    f.cloud.set_unauthorized(true);
    let err = f.orchestrator.sync_all().await.unwrap_err();
    assert!(err.is_unauthorized());

    let mut signals = 0;
    while let Ok(event) = rx.try_recv() {
        if event == SyncEvent::AuthorizationFailed {
            signals += 1;
        }
    }
    assert_eq!(signals, 1);
}

#[tokio::test]
async fn newer_local_offset_is_replayed_to_cloud() {
    let mut sensor = CloudSensor::new(mac(1), "Sauna");
    sensor.offsets.temperature = Some(0.0);
    sensor.offsets.updated_at = Some(t0());
    let cloud = MockCloudClient::builder().sensor(sensor).build();
    let f = fleet(cloud, SyncConfig::default());
    f.orchestrator.sync_all().await.unwrap();

    // A local edit after the cloud's last change
    f.store
        .lock()
        .await
        .set_offset(
            &SensorKey::from(&mac(1)),
            fleetsync_core::types::OffsetKind::Temperature,
            Some(0.7),
        )
        .unwrap();

    // The next cycle queues the upload and replays it
    f.orchestrator.sync_all().await.unwrap();
    let replay = f.orchestrator.execute_pending().await.unwrap();
    assert_eq!(replay.submitted, 0);

    let submitted = f.cloud.submitted().await;
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        submitted[0].idempotency_key,
        "offset:AA:BB:CC:DD:EE:01:temperature"
    );
}
