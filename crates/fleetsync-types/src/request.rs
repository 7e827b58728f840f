//! Durable record of a local mutation awaiting cloud confirmation.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;
use crate::types::MacId;

/// What a queued request changes on the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum RequestKind {
    /// Push a calibration offset.
    SensorOffset,
    /// Push a sensor rename.
    SensorName,
    /// Push an application setting.
    Setting,
}

impl RequestKind {
    /// Stable storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::SensorOffset => "sensor_offset",
            RequestKind::SensorName => "sensor_name",
            RequestKind::Setting => "setting",
        }
    }
}

impl FromStr for RequestKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sensor_offset" => Ok(RequestKind::SensorOffset),
            "sensor_name" => Ok(RequestKind::SensorName),
            "setting" => Ok(RequestKind::Setting),
            other => Err(ParseError::UnknownVariant {
                kind: "request kind",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request queued for replay against the cloud.
///
/// `idempotency_key` identifies the logical mutation: queuing the same key
/// twice keeps a single row, and replaying it twice has the same effect as
/// replaying it once.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueuedRequest {
    /// Database row ID (0 until stored).
    pub id: i64,
    /// Request type tag.
    pub kind: RequestKind,
    /// Logical identity of the mutation.
    pub idempotency_key: String,
    /// Sensor the request targets, if any.
    pub mac_id: Option<MacId>,
    /// JSON body sent to the cloud.
    pub payload: String,
    /// When the request was queued.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub created_at: OffsetDateTime,
    /// Failed replay attempts so far.
    pub attempts: u32,
}

impl QueuedRequest {
    /// Create a request that has not been stored yet.
    pub fn new(
        kind: RequestKind,
        idempotency_key: impl Into<String>,
        mac_id: Option<MacId>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            kind,
            idempotency_key: idempotency_key.into(),
            mac_id,
            payload: payload.into(),
            created_at: OffsetDateTime::now_utc(),
            attempts: 0,
        }
    }
}
