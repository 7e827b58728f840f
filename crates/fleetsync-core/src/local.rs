//! Local persistence contract consumed by the sync engine.
//!
//! The engine only depends on the traits in this module. [`SqliteLocalStore`]
//! implements all of them on top of [`fleetsync_store::Store`], serializing
//! every access through one async mutex so writes for the same sensor key
//! never interleave.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard};

use fleetsync_store::Store;
use fleetsync_types::{
    AppSettings, Luid, MacId, Offset, OffsetKind, QueuedRequest, Record, Sensor, SensorAlert,
    SensorKey, SensorSettings, SyncState, SyncStatus,
};

use crate::error::StorageError;

/// Result type for local store calls.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Sensor persistence.
#[async_trait]
pub trait SensorRepository: Send + Sync {
    /// Every local sensor.
    async fn read_all(&self) -> StorageResult<Vec<Sensor>>;
    async fn create_sensor(&self, sensor: &Sensor) -> StorageResult<()>;
    async fn update_sensor(&self, sensor: &Sensor) -> StorageResult<()>;
    async fn delete_sensor(&self, sensor: &Sensor) -> StorageResult<()>;
    /// The local identifier known for a MAC, if any.
    async fn luid_for_mac(&self, mac_id: &MacId) -> StorageResult<Option<Luid>>;
}

/// Measurement persistence.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Newest history record of a sensor.
    async fn read_last(&self, key: &SensorKey) -> StorageResult<Option<Record>>;
    /// The "latest" row of a sensor.
    async fn read_latest(&self, key: &SensorKey) -> StorageResult<Option<Record>>;
    /// Create or overwrite the "latest" row.
    async fn write_latest(&self, record: &Record) -> StorageResult<()>;
    /// Append one history record. Returns whether it was new.
    async fn create_record(&self, record: &Record) -> StorageResult<bool>;
    /// Append a batch transactionally. Returns the number of new records.
    async fn create_records(&self, records: &[Record]) -> StorageResult<usize>;
}

/// Per-sensor sync bookkeeping.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get_sync_date(&self, key: &SensorKey) -> StorageResult<Option<OffsetDateTime>>;
    async fn set_sync_date(&self, date: Option<OffsetDateTime>, key: &SensorKey)
    -> StorageResult<()>;
    async fn set_sync_status(&self, status: SyncStatus, key: &SensorKey) -> StorageResult<()>;
    async fn read_sync_state(&self, key: &SensorKey) -> StorageResult<Option<SyncState>>;
}

/// Calibration offsets keyed by sensor identity.
#[async_trait]
pub trait CalibrationStore: Send + Sync {
    async fn read_calibration(&self, key: &SensorKey) -> StorageResult<Option<SensorSettings>>;
    async fn write_offset(
        &self,
        key: &SensorKey,
        kind: OffsetKind,
        offset: Offset,
    ) -> StorageResult<()>;
}

/// Application settings and the alert registry.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn load_app_settings(&self) -> StorageResult<AppSettings>;
    async fn save_app_settings(&self, settings: &AppSettings) -> StorageResult<()>;
    async fn read_alerts(&self, key: &SensorKey) -> StorageResult<Vec<SensorAlert>>;
    async fn replace_alerts(&self, key: &SensorKey, alerts: &[SensorAlert]) -> StorageResult<()>;
}

/// Durable queue of requests awaiting replay.
#[async_trait]
pub trait RequestQueue: Send + Sync {
    /// Queue a request, replacing the payload of one queued under the same
    /// idempotency key. Returns `false` if an identical request is already queued.
    async fn enqueue(&self, request: &QueuedRequest) -> StorageResult<bool>;
    /// Drop the request queued under `idempotency_key`, if any.
    async fn discard(&self, idempotency_key: &str) -> StorageResult<bool>;
    /// All queued requests, oldest first.
    async fn pending(&self) -> StorageResult<Vec<QueuedRequest>>;
    /// Remove a successfully replayed request.
    async fn complete(&self, id: i64) -> StorageResult<()>;
    /// Count a failed replay.
    async fn record_failure(&self, id: i64) -> StorageResult<()>;
}

/// Everything the sync engine needs from local persistence.
pub trait LocalStore:
    SensorRepository + RecordRepository + SyncStateStore + CalibrationStore + SettingsRepository + RequestQueue
{
}

impl<T> LocalStore for T where
    T: SensorRepository
        + RecordRepository
        + SyncStateStore
        + CalibrationStore
        + SettingsRepository
        + RequestQueue
{
}

/// [`LocalStore`] backed by SQLite.
#[derive(Clone)]
pub struct SqliteLocalStore {
    store: Arc<Mutex<Store>>,
}

impl SqliteLocalStore {
    /// Wrap an open store.
    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Ok(Self::new(Store::open(path)?))
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::new(Store::open_in_memory()?))
    }

    /// Lock the underlying store for direct queries.
    pub async fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().await
    }

    async fn with<T>(
        &self,
        f: impl FnOnce(&Store) -> fleetsync_store::Result<T> + Send,
    ) -> StorageResult<T> {
        let store = self.store.lock().await;
        f(&store).map_err(StorageError::from)
    }
}

#[async_trait]
impl SensorRepository for SqliteLocalStore {
    async fn read_all(&self) -> StorageResult<Vec<Sensor>> {
        self.with(|s| s.list_sensors()).await
    }

    async fn create_sensor(&self, sensor: &Sensor) -> StorageResult<()> {
        self.with(|s| s.create_sensor(sensor)).await
    }

    async fn update_sensor(&self, sensor: &Sensor) -> StorageResult<()> {
        self.with(|s| s.update_sensor(sensor)).await
    }

    async fn delete_sensor(&self, sensor: &Sensor) -> StorageResult<()> {
        self.with(|s| s.delete_sensor(sensor)).await
    }

    async fn luid_for_mac(&self, mac_id: &MacId) -> StorageResult<Option<Luid>> {
        self.with(|s| s.luid_for_mac(mac_id)).await
    }
}

#[async_trait]
impl RecordRepository for SqliteLocalStore {
    async fn read_last(&self, key: &SensorKey) -> StorageResult<Option<Record>> {
        self.with(|s| s.last_record(key)).await
    }

    async fn read_latest(&self, key: &SensorKey) -> StorageResult<Option<Record>> {
        self.with(|s| s.latest_record(key)).await
    }

    async fn write_latest(&self, record: &Record) -> StorageResult<()> {
        self.with(|s| s.upsert_latest(record)).await
    }

    async fn create_record(&self, record: &Record) -> StorageResult<bool> {
        self.with(|s| s.insert_record(record)).await
    }

    async fn create_records(&self, records: &[Record]) -> StorageResult<usize> {
        self.with(|s| s.insert_records(records)).await
    }
}

#[async_trait]
impl SyncStateStore for SqliteLocalStore {
    async fn get_sync_date(&self, key: &SensorKey) -> StorageResult<Option<OffsetDateTime>> {
        self.with(|s| s.sync_date(key)).await
    }

    async fn set_sync_date(
        &self,
        date: Option<OffsetDateTime>,
        key: &SensorKey,
    ) -> StorageResult<()> {
        self.with(|s| s.set_sync_date(key, date)).await
    }

    async fn set_sync_status(&self, status: SyncStatus, key: &SensorKey) -> StorageResult<()> {
        self.with(|s| s.set_sync_status(key, status)).await
    }

    async fn read_sync_state(&self, key: &SensorKey) -> StorageResult<Option<SyncState>> {
        self.with(|s| s.get_sync_state(key)).await
    }
}

#[async_trait]
impl CalibrationStore for SqliteLocalStore {
    async fn read_calibration(&self, key: &SensorKey) -> StorageResult<Option<SensorSettings>> {
        self.with(|s| s.get_sensor_settings(key)).await
    }

    async fn write_offset(
        &self,
        key: &SensorKey,
        kind: OffsetKind,
        offset: Offset,
    ) -> StorageResult<()> {
        self.with(|s| s.write_offset(key, kind, offset)).await
    }
}

#[async_trait]
impl SettingsRepository for SqliteLocalStore {
    async fn load_app_settings(&self) -> StorageResult<AppSettings> {
        self.with(|s| s.load_app_settings()).await
    }

    async fn save_app_settings(&self, settings: &AppSettings) -> StorageResult<()> {
        self.with(|s| s.save_app_settings(settings)).await
    }

    async fn read_alerts(&self, key: &SensorKey) -> StorageResult<Vec<SensorAlert>> {
        self.with(|s| s.alerts(key)).await
    }

    async fn replace_alerts(&self, key: &SensorKey, alerts: &[SensorAlert]) -> StorageResult<()> {
        self.with(|s| s.replace_alerts(key, alerts)).await
    }
}

#[async_trait]
impl RequestQueue for SqliteLocalStore {
    async fn enqueue(&self, request: &QueuedRequest) -> StorageResult<bool> {
        self.with(|s| s.enqueue_request(request)).await
    }

    async fn discard(&self, idempotency_key: &str) -> StorageResult<bool> {
        self.with(|s| s.discard_request(idempotency_key)).await
    }

    async fn pending(&self) -> StorageResult<Vec<QueuedRequest>> {
        self.with(|s| s.pending_requests()).await
    }

    async fn complete(&self, id: i64) -> StorageResult<()> {
        self.with(|s| s.delete_request(id)).await
    }

    async fn record_failure(&self, id: i64) -> StorageResult<()> {
        self.with(|s| s.record_request_failure(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_adapter_roundtrip() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        let mac = MacId::parse("AA:BB:CC:DD:EE:01").unwrap();
        let key = SensorKey::from(&mac);

        let sensor = Sensor {
            mac_id: Some(mac.clone()),
            name: "Sauna".to_string(),
            ..Default::default()
        };
        store.create_sensor(&sensor).await.unwrap();
        assert_eq!(store.read_all().await.unwrap(), vec![sensor]);

        store.set_sync_status(SyncStatus::Syncing, &key).await.unwrap();
        assert_eq!(
            store.read_sync_state(&key).await.unwrap().unwrap().status,
            SyncStatus::Syncing
        );
        assert!(store.get_sync_date(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_usable_as_trait_object() {
        let store: Arc<dyn LocalStore> = Arc::new(SqliteLocalStore::open_in_memory().unwrap());
        assert!(store.pending().await.unwrap().is_empty());
        assert_eq!(store.load_app_settings().await.unwrap(), AppSettings::default());
    }
}
