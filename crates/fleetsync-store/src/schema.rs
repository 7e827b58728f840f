//! Database schema and migrations.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        // Fresh database - create all tables
        create_schema_v1(conn)?;
        migrate_to_v2(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1).
///
/// All timestamps are unix milliseconds.
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- Sensors, identified by luid and/or mac_id
        CREATE TABLE IF NOT EXISTS sensors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            luid TEXT UNIQUE,
            mac_id TEXT UNIQUE,
            name TEXT NOT NULL,
            firmware_version TEXT,
            owner TEXT,
            is_owner INTEGER NOT NULL,
            is_claimed INTEGER NOT NULL,
            is_cloud_sensor INTEGER NOT NULL,
            can_share INTEGER NOT NULL,
            shared_to TEXT NOT NULL,
            picture_url TEXT,
            CHECK (luid IS NOT NULL OR mac_id IS NOT NULL)
        );

        -- Append-only measurement history
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sensor_key TEXT NOT NULL,
            luid TEXT,
            mac_id TEXT,
            date INTEGER NOT NULL,
            synced_at INTEGER NOT NULL,
            source TEXT NOT NULL,
            temperature REAL,
            humidity REAL,
            pressure REAL,
            voltage REAL,
            rssi INTEGER,
            movement_counter INTEGER,
            measurement_sequence_number INTEGER,
            temperature_offset REAL,
            humidity_offset REAL,
            pressure_offset REAL,
            UNIQUE(sensor_key, date)
        );
        CREATE INDEX IF NOT EXISTS idx_records_sensor_date
            ON records(sensor_key, date);

        -- Newest known measurement per sensor
        CREATE TABLE IF NOT EXISTS latest_records (
            sensor_key TEXT PRIMARY KEY,
            luid TEXT,
            mac_id TEXT,
            date INTEGER NOT NULL,
            synced_at INTEGER NOT NULL,
            source TEXT NOT NULL,
            temperature REAL,
            humidity REAL,
            pressure REAL,
            voltage REAL,
            rssi INTEGER,
            movement_counter INTEGER,
            measurement_sequence_number INTEGER,
            temperature_offset REAL,
            humidity_offset REAL,
            pressure_offset REAL
        );

        -- Per-sensor sync watermark and status
        CREATE TABLE IF NOT EXISTS sync_state (
            sensor_key TEXT PRIMARY KEY,
            last_sync_date INTEGER,
            last_gatt_sync_date INTEGER,
            status TEXT NOT NULL
        );

        -- Per-sensor calibration
        CREATE TABLE IF NOT EXISTS sensor_settings (
            sensor_key TEXT PRIMARY KEY,
            temperature_offset REAL,
            temperature_offset_date INTEGER,
            humidity_offset REAL,
            humidity_offset_date INTEGER,
            pressure_offset REAL,
            pressure_offset_date INTEGER
        );

        -- Application settings as a single JSON document
        CREATE TABLE IF NOT EXISTS app_settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            json TEXT NOT NULL
        );
        "#,
    )?;

    Ok(())
}

/// Version 2: alert registry and durable request queue.
fn migrate_to_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            sensor_key TEXT NOT NULL,
            kind TEXT NOT NULL,
            enabled INTEGER NOT NULL,
            min REAL,
            max REAL,
            counter INTEGER,
            delay INTEGER,
            description TEXT,
            last_updated INTEGER,
            PRIMARY KEY (sensor_key, kind)
        );

        CREATE TABLE IF NOT EXISTS queued_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            idempotency_key TEXT NOT NULL UNIQUE,
            mac_id TEXT,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )?;
    Ok(())
}

/// Run migrations from old_version to current.
fn migrate(conn: &Connection, old_version: i32) -> Result<()> {
    if old_version < 2 {
        migrate_to_v2(conn)?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_initialize_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let tables = table_names(&conn);
        for expected in [
            "sensors",
            "records",
            "latest_records",
            "sync_state",
            "sensor_settings",
            "app_settings",
            "alerts",
            "queued_requests",
            "schema_version",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_schema_version_tracking() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        // Re-initializing is a no-op
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_from_v1() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_v1(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();

        initialize(&conn).unwrap();

        let tables = table_names(&conn);
        assert!(tables.contains(&"alerts".to_string()));
        assert!(tables.contains(&"queued_requests".to_string()));
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
