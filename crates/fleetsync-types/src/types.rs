//! Core types for sensors, measurement records and sync state.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};

/// Local-only sensor identifier.
///
/// Assigned the first time a sensor is seen over the local transport. It is
/// stable on one installation but means nothing to the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Luid(String);

impl Luid {
    /// Wrap a local identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Luid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Globally stable sensor identifier (the hardware MAC address).
///
/// Always stored in normalized upper-case, colon-separated form
/// (`AA:BB:CC:DD:EE:FF`), so two spellings of the same MAC compare equal.
///
/// # Examples
///
/// ```
/// use fleetsync_types::MacId;
///
/// let a: MacId = "aa:bb:cc:dd:ee:ff".parse().unwrap();
/// let b: MacId = "AABBCCDDEEFF".parse().unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "AA:BB:CC:DD:EE:FF");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct MacId(String);

impl MacId {
    /// Parse and normalize a MAC identifier.
    ///
    /// Accepts colon, dash or space separators, or none at all.
    pub fn parse(input: &str) -> ParseResult<Self> {
        let hex: String = input
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | ' '))
            .collect();

        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidMacId(input.to_string()));
        }

        let upper = hex.to_ascii_uppercase();
        let octets: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
        Ok(Self(octets.join(":")))
    }

    /// The normalized identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MacId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MacId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MacId> for String {
    fn from(value: MacId) -> Self {
        value.0
    }
}

impl fmt::Display for MacId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistence key for per-sensor rows (sync state, calibration, history).
///
/// The MAC identifier when the sensor has one, otherwise its LUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct SensorKey(String);

impl SensorKey {
    /// Build a key from the identifiers a sensor or record carries.
    ///
    /// Returns `None` when both are absent.
    pub fn from_ids(mac_id: Option<&MacId>, luid: Option<&Luid>) -> Option<Self> {
        mac_id
            .map(Self::from)
            .or_else(|| luid.map(Self::from))
    }

    /// The key as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&MacId> for SensorKey {
    fn from(mac: &MacId) -> Self {
        Self(mac.0.clone())
    }
}

impl From<&Luid> for SensorKey {
    fn from(luid: &Luid) -> Self {
        Self(luid.0.clone())
    }
}

impl From<&str> for SensorKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A sensor known to this installation.
///
/// At least one of `luid` and `mac_id` is present; [`Sensor::key`] returns
/// `None` for a sensor that violates this.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sensor {
    /// Local-only identifier, present for sensors seen over the local transport.
    pub luid: Option<Luid>,
    /// Cloud-stable identifier, present once the sensor is known to the cloud.
    pub mac_id: Option<MacId>,
    /// Display name.
    pub name: String,
    /// Firmware version string.
    pub firmware_version: Option<String>,
    /// E-mail of the owning cloud account.
    pub owner: Option<String>,
    /// Whether the signed-in account owns this sensor.
    pub is_owner: bool,
    /// Whether the sensor is claimed on the cloud.
    pub is_claimed: bool,
    /// Whether the sensor was materialized from (or is tracked by) the cloud.
    pub is_cloud_sensor: bool,
    /// Whether the owner's plan allows sharing.
    pub can_share: bool,
    /// Accounts the sensor is shared with.
    pub shared_to: Vec<String>,
    /// Cloud reference to the sensor's background picture.
    pub picture_url: Option<String>,
}

impl Sensor {
    /// Create a local-only sensor, as first seen over the local transport.
    pub fn local(luid: Luid, name: impl Into<String>) -> Self {
        Self {
            luid: Some(luid),
            name: name.into(),
            is_owner: true,
            ..Default::default()
        }
    }

    /// Persistence key for this sensor.
    pub fn key(&self) -> Option<SensorKey> {
        SensorKey::from_ids(self.mac_id.as_ref(), self.luid.as_ref())
    }

    /// Whether the sensor carries the identifier required for cloud sync.
    pub fn is_cloud_syncable(&self) -> bool {
        self.mac_id.is_some()
    }

    /// Whether the sensor has an origin independent of the cloud.
    pub fn has_local_origin(&self) -> bool {
        self.luid.is_some()
    }

    /// The local-only variant of this sensor, with every cloud field cleared.
    #[must_use]
    pub fn unclaimed(&self) -> Self {
        Self {
            owner: None,
            is_owner: true,
            is_claimed: false,
            is_cloud_sensor: false,
            can_share: false,
            shared_to: Vec::new(),
            picture_url: None,
            ..self.clone()
        }
    }
}

/// Where a measurement record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RecordSource {
    /// Broadcast advertisement heard locally.
    Advertisement,
    /// Connected heartbeat notification.
    Heartbeat,
    /// Downloaded from the device log.
    Log,
    /// Fetched from the cloud.
    #[default]
    Cloud,
}

impl RecordSource {
    /// Stable storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSource::Advertisement => "advertisement",
            RecordSource::Heartbeat => "heartbeat",
            RecordSource::Log => "log",
            RecordSource::Cloud => "cloud",
        }
    }
}

impl FromStr for RecordSource {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advertisement" => Ok(RecordSource::Advertisement),
            "heartbeat" => Ok(RecordSource::Heartbeat),
            "log" => Ok(RecordSource::Log),
            "cloud" => Ok(RecordSource::Cloud),
            other => Err(ParseError::UnknownVariant {
                kind: "record source",
                value: other.to_string(),
            }),
        }
    }
}

/// An immutable measurement point.
///
/// Every channel is optional since sensor models and data formats differ in
/// what they report. The three calibrated channels carry their own offset.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Record {
    /// Local identifier of the originating sensor, if resolved.
    pub luid: Option<Luid>,
    /// Cloud identifier of the originating sensor.
    pub mac_id: Option<MacId>,
    /// When the measurement was taken.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub date: OffsetDateTime,
    /// Origin of the record.
    #[cfg_attr(feature = "serde", serde(default))]
    pub source: RecordSource,
    /// Temperature in degrees Celsius.
    pub temperature: Option<f64>,
    /// Relative humidity percentage.
    pub humidity: Option<f64>,
    /// Pressure in hPa.
    pub pressure: Option<f64>,
    /// Battery voltage in volts.
    pub voltage: Option<f64>,
    /// Received signal strength in dBm.
    pub rssi: Option<i32>,
    /// Movement counter.
    pub movement_counter: Option<i32>,
    /// Measurement sequence number.
    pub measurement_sequence_number: Option<i32>,
    /// Temperature calibration offset applied at capture time.
    pub temperature_offset: Option<f64>,
    /// Humidity calibration offset applied at capture time.
    pub humidity_offset: Option<f64>,
    /// Pressure calibration offset applied at capture time.
    pub pressure_offset: Option<f64>,
}

impl Record {
    /// An empty record for a cloud-known sensor at `date`.
    pub fn for_mac(mac_id: MacId, date: OffsetDateTime) -> Self {
        Self {
            luid: None,
            mac_id: Some(mac_id),
            date,
            source: RecordSource::Cloud,
            temperature: None,
            humidity: None,
            pressure: None,
            voltage: None,
            rssi: None,
            movement_counter: None,
            measurement_sequence_number: None,
            temperature_offset: None,
            humidity_offset: None,
            pressure_offset: None,
        }
    }

    /// Persistence key of the originating sensor.
    pub fn key(&self) -> Option<SensorKey> {
        SensorKey::from_ids(self.mac_id.as_ref(), self.luid.as_ref())
    }
}

/// Sync progress of a single sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SyncStatus {
    /// Never synced, or reset after cancellation.
    #[default]
    Idle,
    /// A sync operation is in progress.
    Syncing,
    /// The last sync operation succeeded.
    Complete,
    /// The last sync operation failed.
    Error,
}

impl SyncStatus {
    /// Stable storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Complete => "complete",
            SyncStatus::Error => "error",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SyncStatus::Idle),
            "syncing" => Ok(SyncStatus::Syncing),
            "complete" => Ok(SyncStatus::Complete),
            "error" => Ok(SyncStatus::Error),
            other => Err(ParseError::UnknownVariant {
                kind: "sync status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable per-sensor sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SyncState {
    /// Sensor the state belongs to.
    pub key: SensorKey,
    /// Watermark of the last successful cloud history sync.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub last_sync_date: Option<OffsetDateTime>,
    /// Timestamp of the last local log download.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub last_gatt_sync_date: Option<OffsetDateTime>,
    /// Current status.
    pub status: SyncStatus,
}

impl SyncState {
    /// A fresh state for a sensor that has never been synced.
    pub fn new(key: SensorKey) -> Self {
        Self {
            key,
            last_sync_date: None,
            last_gatt_sync_date: None,
            status: SyncStatus::Idle,
        }
    }
}
