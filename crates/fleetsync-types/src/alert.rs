//! Alert configuration as owned by the cloud.

use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Kind of alert rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[non_exhaustive]
pub enum AlertType {
    /// Temperature out of range.
    Temperature,
    /// Relative humidity out of range.
    Humidity,
    /// Pressure out of range.
    Pressure,
    /// Signal strength out of range.
    Signal,
    /// Movement counter changed.
    Movement,
    /// No data received for `delay` seconds.
    Offline,
}

impl AlertType {
    /// Stable storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Temperature => "temperature",
            AlertType::Humidity => "humidity",
            AlertType::Pressure => "pressure",
            AlertType::Signal => "signal",
            AlertType::Movement => "movement",
            AlertType::Offline => "offline",
        }
    }
}

impl FromStr for AlertType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" => Ok(AlertType::Temperature),
            "humidity" => Ok(AlertType::Humidity),
            "pressure" => Ok(AlertType::Pressure),
            "signal" => Ok(AlertType::Signal),
            "movement" => Ok(AlertType::Movement),
            "offline" => Ok(AlertType::Offline),
            other => Err(ParseError::UnknownVariant {
                kind: "alert type",
                value: other.to_string(),
            }),
        }
    }
}

/// A single alert rule for a sensor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorAlert {
    /// Rule kind.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: AlertType,
    /// Whether the rule is active.
    pub enabled: bool,
    /// Lower bound, where applicable.
    pub min: Option<f64>,
    /// Upper bound, where applicable.
    pub max: Option<f64>,
    /// Movement counter baseline, for movement alerts.
    pub counter: Option<i64>,
    /// Seconds the condition must hold before triggering.
    pub delay: Option<i64>,
    /// User description shown with the notification.
    pub description: Option<String>,
    /// When the rule last changed on the cloud.
    #[cfg_attr(
        feature = "serde",
        serde(default, with = "time::serde::rfc3339::option")
    )]
    pub last_updated: Option<OffsetDateTime>,
}
