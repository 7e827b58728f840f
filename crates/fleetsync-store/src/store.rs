//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use time::OffsetDateTime;
use tracing::{debug, info};

use fleetsync_types::{
    AlertType, AppSettings, Luid, MacId, Offset, OffsetKind, QueuedRequest, Record,
    RequestKind, Sensor, SensorAlert, SensorKey, SensorSettings, SyncState, SyncStatus,
};

use crate::error::{Error, Result};
use crate::models::{
    RECORD_COLUMNS, SENSOR_COLUMNS, StoredRecord, from_millis, opt_from_millis, parse_column,
    record_from_row, sensor_from_row, to_millis,
};
use crate::queries::RecordQuery;
use crate::schema;

/// SQLite-based store for sensors, measurements and sync bookkeeping.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

// Sensor operations
impl Store {
    /// Insert a new sensor.
    pub fn create_sensor(&self, sensor: &Sensor) -> Result<()> {
        if sensor.key().is_none() {
            return Err(Error::MissingIdentity);
        }

        self.conn.execute(
            &format!(
                "INSERT INTO sensors ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                SENSOR_COLUMNS
            ),
            params![
                sensor.luid.as_ref().map(Luid::as_str),
                sensor.mac_id.as_ref().map(MacId::as_str),
                sensor.name,
                sensor.firmware_version,
                sensor.owner,
                sensor.is_owner,
                sensor.is_claimed,
                sensor.is_cloud_sensor,
                sensor.can_share,
                serde_json::to_string(&sensor.shared_to)?,
                sensor.picture_url,
            ],
        )?;

        debug!("Created sensor {:?}", sensor.key());
        Ok(())
    }

    /// Update an existing sensor, matched by its MAC or its LUID.
    ///
    /// Matching on either identifier lets a local-only sensor gain its MAC
    /// when it is claimed.
    pub fn update_sensor(&self, sensor: &Sensor) -> Result<()> {
        let key = sensor.key().ok_or(Error::MissingIdentity)?;

        let updated = self.conn.execute(
            "UPDATE sensors SET
                luid = ?1, mac_id = ?2, name = ?3, firmware_version = ?4, owner = ?5,
                is_owner = ?6, is_claimed = ?7, is_cloud_sensor = ?8, can_share = ?9,
                shared_to = ?10, picture_url = ?11
             WHERE mac_id = ?2 OR luid = ?1",
            params![
                sensor.luid.as_ref().map(Luid::as_str),
                sensor.mac_id.as_ref().map(MacId::as_str),
                sensor.name,
                sensor.firmware_version,
                sensor.owner,
                sensor.is_owner,
                sensor.is_claimed,
                sensor.is_cloud_sensor,
                sensor.can_share,
                serde_json::to_string(&sensor.shared_to)?,
                sensor.picture_url,
            ],
        )?;

        if updated == 0 {
            return Err(Error::SensorNotFound(key.to_string()));
        }

        debug!("Updated sensor {}", key);
        Ok(())
    }

    /// Delete a sensor together with everything keyed by it.
    pub fn delete_sensor(&self, sensor: &Sensor) -> Result<()> {
        let key = sensor.key().ok_or(Error::MissingIdentity)?;
        let luid = sensor.luid.as_ref().map(Luid::as_str);
        let mac = sensor.mac_id.as_ref().map(MacId::as_str);

        let tx = self.conn.unchecked_transaction()?;
        let deleted = tx.execute(
            "DELETE FROM sensors WHERE mac_id = ?1 OR luid = ?2",
            params![mac, luid],
        )?;
        if deleted == 0 {
            return Err(Error::SensorNotFound(key.to_string()));
        }

        for table in [
            "records",
            "latest_records",
            "sync_state",
            "sensor_settings",
            "alerts",
        ] {
            tx.execute(
                &format!("DELETE FROM {} WHERE sensor_key = ?1 OR sensor_key = ?2", table),
                params![mac, luid],
            )?;
        }
        tx.commit()?;

        info!("Deleted sensor {}", key);
        Ok(())
    }

    /// Get a sensor by key (matches either identifier).
    pub fn get_sensor(&self, key: &SensorKey) -> Result<Option<Sensor>> {
        let sensor = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM sensors WHERE mac_id = ?1 OR luid = ?1",
                    SENSOR_COLUMNS
                ),
                [key.as_str()],
                sensor_from_row,
            )
            .optional()?;
        Ok(sensor)
    }

    /// List all sensors.
    pub fn list_sensors(&self) -> Result<Vec<Sensor>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM sensors ORDER BY id", SENSOR_COLUMNS))?;

        let sensors = stmt
            .query_map([], sensor_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sensors)
    }

    /// Find the local identifier known for a MAC, if any.
    pub fn luid_for_mac(&self, mac: &MacId) -> Result<Option<Luid>> {
        let luid: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT luid FROM sensors WHERE mac_id = ?",
                [mac.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(luid.flatten().map(Luid::new))
    }
}

fn record_params(record: &Record, key: &SensorKey, synced_at: i64) -> Vec<Box<dyn rusqlite::ToSql>> {
    vec![
        Box::new(key.as_str().to_string()),
        Box::new(record.luid.as_ref().map(|l| l.as_str().to_string())),
        Box::new(record.mac_id.as_ref().map(|m| m.as_str().to_string())),
        Box::new(to_millis(record.date)),
        Box::new(synced_at),
        Box::new(record.source.as_str()),
        Box::new(record.temperature),
        Box::new(record.humidity),
        Box::new(record.pressure),
        Box::new(record.voltage),
        Box::new(record.rssi),
        Box::new(record.movement_counter),
        Box::new(record.measurement_sequence_number),
        Box::new(record.temperature_offset),
        Box::new(record.humidity_offset),
        Box::new(record.pressure_offset),
    ]
}

const RECORD_PLACEHOLDERS: &str = "?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16";

// History operations
impl Store {
    /// Insert history records as one transaction (with deduplication).
    ///
    /// Either every record is written or none is. Records already stored for
    /// the same sensor and timestamp are skipped. Returns the number of new rows.
    pub fn insert_records(&self, records: &[Record]) -> Result<usize> {
        let synced_at = to_millis(OffsetDateTime::now_utc());
        let sql = format!(
            "INSERT OR IGNORE INTO records (sensor_key, {}) VALUES ({})",
            RECORD_COLUMNS, RECORD_PLACEHOLDERS
        );

        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for record in records {
                let key = record.key().ok_or(Error::MissingIdentity)?;
                let params = record_params(record, &key, synced_at);
                let params_ref: Vec<&dyn rusqlite::ToSql> =
                    params.iter().map(|p| p.as_ref()).collect();
                inserted += stmt.execute(params_ref.as_slice())?;
            }
        }
        tx.commit()?;

        debug!("Inserted {} of {} history records", inserted, records.len());
        Ok(inserted)
    }

    /// Insert a single history record. Returns whether a new row was written.
    pub fn insert_record(&self, record: &Record) -> Result<bool> {
        Ok(self.insert_records(std::slice::from_ref(record))? == 1)
    }

    /// Query history records with filters.
    pub fn query_records(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_ref.as_slice(), |row| {
                let (record, synced_at) = record_from_row(row, 1)?;
                Ok(StoredRecord {
                    id: row.get(0)?,
                    record,
                    synced_at,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// The newest history record for a sensor.
    pub fn last_record(&self, key: &SensorKey) -> Result<Option<Record>> {
        let query = RecordQuery::new().sensor(key).newest_first().limit(1);
        Ok(self.query_records(&query)?.pop().map(|stored| stored.record))
    }

    /// Count history records, optionally for one sensor.
    pub fn count_records(&self, key: Option<&SensorKey>) -> Result<u64> {
        let count: i64 = match key {
            Some(key) => self.conn.query_row(
                "SELECT COUNT(*) FROM records WHERE sensor_key = ?",
                [key.as_str()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// The "latest" row for a sensor.
    pub fn latest_record(&self, key: &SensorKey) -> Result<Option<Record>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM latest_records WHERE sensor_key = ?",
                    RECORD_COLUMNS
                ),
                [key.as_str()],
                |row| record_from_row(row, 0).map(|(record, _)| record),
            )
            .optional()?;
        Ok(record)
    }

    /// Create or overwrite the "latest" row for the record's sensor.
    pub fn upsert_latest(&self, record: &Record) -> Result<()> {
        let key = record.key().ok_or(Error::MissingIdentity)?;
        let params = record_params(record, &key, to_millis(OffsetDateTime::now_utc()));
        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO latest_records (sensor_key, {}) VALUES ({})",
                RECORD_COLUMNS, RECORD_PLACEHOLDERS
            ),
            params_ref.as_slice(),
        )?;
        Ok(())
    }
}

// Sync state operations
impl Store {
    /// Get sync state for a sensor.
    pub fn get_sync_state(&self, key: &SensorKey) -> Result<Option<SyncState>> {
        let state = self
            .conn
            .query_row(
                "SELECT sensor_key, last_sync_date, last_gatt_sync_date, status
                 FROM sync_state WHERE sensor_key = ?",
                [key.as_str()],
                |row| {
                    let status: String = row.get(3)?;
                    Ok(SyncState {
                        key: SensorKey::from(row.get::<_, String>(0)?.as_str()),
                        last_sync_date: opt_from_millis(row.get(1)?)?,
                        last_gatt_sync_date: opt_from_millis(row.get(2)?)?,
                        status: parse_column(3, &status, |s| s.parse::<SyncStatus>())?,
                    })
                },
            )
            .optional()?;

        Ok(state)
    }

    /// List the sync state of every sensor that has one.
    pub fn list_sync_states(&self) -> Result<Vec<SyncState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT sensor_key FROM sync_state ORDER BY sensor_key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut states = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(state) = self.get_sync_state(&SensorKey::from(key.as_str()))? {
                states.push(state);
            }
        }
        Ok(states)
    }

    /// The watermark of the last successful cloud sync.
    pub fn sync_date(&self, key: &SensorKey) -> Result<Option<OffsetDateTime>> {
        Ok(self.get_sync_state(key)?.and_then(|s| s.last_sync_date))
    }

    /// Set (or clear) the cloud sync watermark, creating the state row if needed.
    pub fn set_sync_date(&self, key: &SensorKey, date: Option<OffsetDateTime>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_state (sensor_key, last_sync_date, status) VALUES (?1, ?2, ?3)
             ON CONFLICT(sensor_key) DO UPDATE SET last_sync_date = ?2",
            params![key.as_str(), date.map(to_millis), SyncStatus::Idle.as_str()],
        )?;
        debug!("Set sync date for {} to {:?}", key, date);
        Ok(())
    }

    /// Set (or clear) the local log download timestamp.
    pub fn set_gatt_sync_date(&self, key: &SensorKey, date: Option<OffsetDateTime>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_state (sensor_key, last_gatt_sync_date, status) VALUES (?1, ?2, ?3)
             ON CONFLICT(sensor_key) DO UPDATE SET last_gatt_sync_date = ?2",
            params![key.as_str(), date.map(to_millis), SyncStatus::Idle.as_str()],
        )?;
        Ok(())
    }

    /// Set the sync status, creating the state row if needed.
    pub fn set_sync_status(&self, key: &SensorKey, status: SyncStatus) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_state (sensor_key, status) VALUES (?1, ?2)
             ON CONFLICT(sensor_key) DO UPDATE SET status = ?2",
            params![key.as_str(), status.as_str()],
        )?;
        Ok(())
    }
}

fn offset_columns(kind: OffsetKind) -> (&'static str, &'static str) {
    match kind {
        OffsetKind::Temperature => ("temperature_offset", "temperature_offset_date"),
        OffsetKind::Humidity => ("humidity_offset", "humidity_offset_date"),
        OffsetKind::Pressure => ("pressure_offset", "pressure_offset_date"),
    }
}

// Calibration operations
impl Store {
    /// Get calibration for a sensor.
    pub fn get_sensor_settings(&self, key: &SensorKey) -> Result<Option<SensorSettings>> {
        let settings = self
            .conn
            .query_row(
                "SELECT temperature_offset, temperature_offset_date, humidity_offset,
                        humidity_offset_date, pressure_offset, pressure_offset_date
                 FROM sensor_settings WHERE sensor_key = ?",
                [key.as_str()],
                |row| {
                    Ok(SensorSettings {
                        key: key.clone(),
                        temperature: Offset {
                            value: row.get(0)?,
                            set_at: opt_from_millis(row.get(1)?)?,
                        },
                        humidity: Offset {
                            value: row.get(2)?,
                            set_at: opt_from_millis(row.get(3)?)?,
                        },
                        pressure: Offset {
                            value: row.get(4)?,
                            set_at: opt_from_millis(row.get(5)?)?,
                        },
                    })
                },
            )
            .optional()?;
        Ok(settings)
    }

    /// Write one calibration offset verbatim, creating the row lazily.
    pub fn write_offset(&self, key: &SensorKey, kind: OffsetKind, offset: Offset) -> Result<()> {
        let (value_col, date_col) = offset_columns(kind);
        self.conn.execute(
            &format!(
                "INSERT INTO sensor_settings (sensor_key, {value_col}, {date_col}) VALUES (?1, ?2, ?3)
                 ON CONFLICT(sensor_key) DO UPDATE SET {value_col} = ?2, {date_col} = ?3"
            ),
            params![key.as_str(), offset.value, offset.set_at.map(to_millis)],
        )?;
        debug!("Wrote {} offset {:?} for {}", kind, offset.value, key);
        Ok(())
    }

    /// Record a user calibration change, stamped with the current time.
    pub fn set_offset(&self, key: &SensorKey, kind: OffsetKind, value: Option<f64>) -> Result<()> {
        self.write_offset(
            key,
            kind,
            Offset {
                value,
                set_at: Some(OffsetDateTime::now_utc()),
            },
        )
    }
}

// Application settings and alerts
impl Store {
    /// Load application settings, or defaults when none were saved.
    pub fn load_app_settings(&self) -> Result<AppSettings> {
        let json: Option<String> = self
            .conn
            .query_row("SELECT json FROM app_settings WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(AppSettings::default()),
        }
    }

    /// Persist application settings.
    pub fn save_app_settings(&self, settings: &AppSettings) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO app_settings (id, json) VALUES (1, ?)",
            [serde_json::to_string(settings)?],
        )?;
        Ok(())
    }

    /// Alerts configured for a sensor.
    pub fn alerts(&self, key: &SensorKey) -> Result<Vec<SensorAlert>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, enabled, min, max, counter, delay, description, last_updated
             FROM alerts WHERE sensor_key = ? ORDER BY kind",
        )?;

        let alerts = stmt
            .query_map([key.as_str()], |row| {
                let kind: String = row.get(0)?;
                Ok(SensorAlert {
                    kind: parse_column(0, &kind, |s| s.parse::<AlertType>())?,
                    enabled: row.get(1)?,
                    min: row.get(2)?,
                    max: row.get(3)?,
                    counter: row.get(4)?,
                    delay: row.get(5)?,
                    description: row.get(6)?,
                    last_updated: opt_from_millis(row.get(7)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(alerts)
    }

    /// Replace every alert of a sensor with `alerts`, in one transaction.
    pub fn replace_alerts(&self, key: &SensorKey, alerts: &[SensorAlert]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM alerts WHERE sensor_key = ?", [key.as_str()])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO alerts (sensor_key, kind, enabled, min, max, counter,
                 delay, description, last_updated) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for alert in alerts {
                stmt.execute(params![
                    key.as_str(),
                    alert.kind.as_str(),
                    alert.enabled,
                    alert.min,
                    alert.max,
                    alert.counter,
                    alert.delay,
                    alert.description,
                    alert.last_updated.map(to_millis),
                ])?;
            }
        }
        tx.commit()?;

        debug!("Replaced alerts for {} ({} rules)", key, alerts.len());
        Ok(())
    }
}

// Request queue operations
impl Store {
    /// Queue a request for replay.
    ///
    /// A request whose idempotency key is already queued replaces the queued
    /// payload and starts over with zero attempts. Returns `false` when the
    /// queued payload was already identical (nothing changed).
    pub fn enqueue_request(&self, request: &QueuedRequest) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT INTO queued_requests
             (kind, idempotency_key, mac_id, payload, created_at, attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(idempotency_key) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                attempts = 0
             WHERE queued_requests.payload != excluded.payload",
            params![
                request.kind.as_str(),
                request.idempotency_key,
                request.mac_id.as_ref().map(MacId::as_str),
                request.payload,
                to_millis(request.created_at),
                request.attempts,
            ],
        )?;

        if changed == 1 {
            info!("Queued {} request {}", request.kind, request.idempotency_key);
        }
        Ok(changed == 1)
    }

    /// Drop a queued request by idempotency key. Returns whether one was queued.
    pub fn discard_request(&self, idempotency_key: &str) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM queued_requests WHERE idempotency_key = ?",
            [idempotency_key],
        )?;
        if deleted > 0 {
            debug!("Discarded queued request {}", idempotency_key);
        }
        Ok(deleted > 0)
    }

    /// All queued requests, oldest first.
    pub fn pending_requests(&self) -> Result<Vec<QueuedRequest>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, idempotency_key, mac_id, payload, created_at, attempts
             FROM queued_requests ORDER BY created_at, id",
        )?;

        let requests = stmt
            .query_map([], |row| {
                let kind: String = row.get(1)?;
                Ok(QueuedRequest {
                    id: row.get(0)?,
                    kind: parse_column(1, &kind, |s| s.parse::<RequestKind>())?,
                    idempotency_key: row.get(2)?,
                    mac_id: row
                        .get::<_, Option<String>>(3)?
                        .map(|s| parse_column(3, &s, MacId::parse))
                        .transpose()?,
                    payload: row.get(4)?,
                    created_at: from_millis(row.get(5)?)?,
                    attempts: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(requests)
    }

    /// Remove a request after a successful replay.
    pub fn delete_request(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM queued_requests WHERE id = ?", [id])?;
        Ok(())
    }

    /// Count a failed replay attempt.
    pub fn record_request_failure(&self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE queued_requests SET attempts = attempts + 1 WHERE id = ?",
            [id],
        )?;
        Ok(())
    }
}
