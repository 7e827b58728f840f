//! Per-sensor calibration offsets.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;
use crate::types::SensorKey;

/// A calibrated measurement channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OffsetKind {
    /// Temperature offset in degrees Celsius.
    Temperature,
    /// Relative humidity offset as a fraction (0.05 = 5 %).
    Humidity,
    /// Pressure offset in hPa.
    Pressure,
}

impl OffsetKind {
    /// All calibrated channels, in a fixed order.
    pub const ALL: [OffsetKind; 3] = [
        OffsetKind::Temperature,
        OffsetKind::Humidity,
        OffsetKind::Pressure,
    ];

    /// Stable storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetKind::Temperature => "temperature",
            OffsetKind::Humidity => "humidity",
            OffsetKind::Pressure => "pressure",
        }
    }
}

impl FromStr for OffsetKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" => Ok(OffsetKind::Temperature),
            "humidity" => Ok(OffsetKind::Humidity),
            "pressure" => Ok(OffsetKind::Pressure),
            other => Err(ParseError::UnknownVariant {
                kind: "offset kind",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for OffsetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One calibration value and when it was last set.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Offset {
    /// The offset value, `None` when never calibrated.
    pub value: Option<f64>,
    /// When the value was set, `None` for legacy rows without tracking.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub set_at: Option<OffsetDateTime>,
}

/// Calibration row for one sensor, created lazily on the first offset write.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorSettings {
    /// Sensor the calibration belongs to.
    pub key: SensorKey,
    /// Temperature calibration.
    pub temperature: Offset,
    /// Humidity calibration.
    pub humidity: Offset,
    /// Pressure calibration.
    pub pressure: Offset,
}

impl SensorSettings {
    /// An empty calibration row.
    pub fn new(key: SensorKey) -> Self {
        Self {
            key,
            temperature: Offset::default(),
            humidity: Offset::default(),
            pressure: Offset::default(),
        }
    }

    /// The offset for one channel.
    pub fn offset(&self, kind: OffsetKind) -> Offset {
        match kind {
            OffsetKind::Temperature => self.temperature,
            OffsetKind::Humidity => self.humidity,
            OffsetKind::Pressure => self.pressure,
        }
    }

    /// Mutable access to the offset for one channel.
    pub fn offset_mut(&mut self, kind: OffsetKind) -> &mut Offset {
        match kind {
            OffsetKind::Temperature => &mut self.temperature,
            OffsetKind::Humidity => &mut self.humidity,
            OffsetKind::Pressure => &mut self.pressure,
        }
    }
}
