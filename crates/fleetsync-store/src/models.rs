//! Stored row models and column mapping.

use rusqlite::Row;
use rusqlite::types::Type;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use fleetsync_types::{Luid, MacId, Record, RecordSource, Sensor};

/// A history record as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Database row ID.
    pub id: i64,
    /// The measurement.
    pub record: Record,
    /// When this record was written locally.
    #[serde(with = "time::serde::rfc3339")]
    pub synced_at: OffsetDateTime,
}

/// Columns shared by the `records` and `latest_records` tables, in mapping order.
pub(crate) const RECORD_COLUMNS: &str = "luid, mac_id, date, synced_at, source, temperature, \
     humidity, pressure, voltage, rssi, movement_counter, measurement_sequence_number, \
     temperature_offset, humidity_offset, pressure_offset";

/// Columns of the `sensors` table, in mapping order.
pub(crate) const SENSOR_COLUMNS: &str = "luid, mac_id, name, firmware_version, owner, is_owner, \
     is_claimed, is_cloud_sensor, can_share, shared_to, picture_url";

/// Convert a timestamp to unix milliseconds.
pub(crate) fn to_millis(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Convert unix milliseconds back to a timestamp.
pub(crate) fn from_millis(ms: i64) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(e)))
}

pub(crate) fn opt_from_millis(ms: Option<i64>) -> rusqlite::Result<Option<OffsetDateTime>> {
    ms.map(from_millis).transpose()
}

/// Parse a stored string column with a fallible parser.
pub(crate) fn parse_column<T, E>(
    idx: usize,
    value: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    parse(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn mac_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<MacId>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| parse_column(idx, &s, MacId::parse))
        .transpose()
}

/// Map a row whose columns start with [`RECORD_COLUMNS`] at `offset`.
pub(crate) fn record_from_row(
    row: &Row<'_>,
    offset: usize,
) -> rusqlite::Result<(Record, OffsetDateTime)> {
    let source: String = row.get(offset + 4)?;
    let record = Record {
        luid: row.get::<_, Option<String>>(offset)?.map(Luid::new),
        mac_id: mac_column(row, offset + 1)?,
        date: from_millis(row.get(offset + 2)?)?,
        source: parse_column(offset + 4, &source, |s| s.parse::<RecordSource>())?,
        temperature: row.get(offset + 5)?,
        humidity: row.get(offset + 6)?,
        pressure: row.get(offset + 7)?,
        voltage: row.get(offset + 8)?,
        rssi: row.get(offset + 9)?,
        movement_counter: row.get(offset + 10)?,
        measurement_sequence_number: row.get(offset + 11)?,
        temperature_offset: row.get(offset + 12)?,
        humidity_offset: row.get(offset + 13)?,
        pressure_offset: row.get(offset + 14)?,
    };
    let synced_at = from_millis(row.get(offset + 3)?)?;
    Ok((record, synced_at))
}

/// Map a row whose columns are [`SENSOR_COLUMNS`].
pub(crate) fn sensor_from_row(row: &Row<'_>) -> rusqlite::Result<Sensor> {
    let shared_to: String = row.get(9)?;
    Ok(Sensor {
        luid: row.get::<_, Option<String>>(0)?.map(Luid::new),
        mac_id: mac_column(row, 1)?,
        name: row.get(2)?,
        firmware_version: row.get(3)?,
        owner: row.get(4)?,
        is_owner: row.get(5)?,
        is_claimed: row.get(6)?,
        is_cloud_sensor: row.get(7)?,
        can_share: row.get(8)?,
        shared_to: parse_column(9, &shared_to, |s| serde_json::from_str::<Vec<String>>(s))?,
        picture_url: row.get(10)?,
    })
}
