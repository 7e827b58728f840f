//! Application-wide display and behavior preferences.
//!
//! These preferences are mirrored by the cloud account settings. The sync
//! engine merges cloud values field by field, so every field here has a
//! counterpart in the cloud settings object.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Temperature display unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TemperatureUnit {
    /// Degrees Celsius.
    #[default]
    Celsius,
    /// Degrees Fahrenheit.
    Fahrenheit,
    /// Kelvin.
    Kelvin,
}

/// Humidity display unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum HumidityUnit {
    /// Relative humidity in percent.
    #[default]
    Percent,
    /// Absolute humidity in g/m³.
    GramsPerCubicMeter,
    /// Dew point.
    Dew,
}

/// Pressure display unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PressureUnit {
    /// Pascal.
    Pascal,
    /// Hectopascal.
    #[default]
    Hectopascal,
    /// Millimeters of mercury.
    MillimetersOfMercury,
    /// Inches of mercury.
    InchesOfMercury,
}

/// Number of decimals shown for a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Accuracy {
    /// No decimals.
    Zero,
    /// One decimal.
    One,
    /// Two decimals.
    #[default]
    Two,
}

/// Dashboard card style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DashboardType {
    /// Cards with the sensor picture.
    #[default]
    Image,
    /// Compact cards without pictures.
    Simple,
}

/// What tapping a dashboard card opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DashboardTapAction {
    /// The full sensor card.
    #[default]
    Card,
    /// The history chart.
    Chart,
}

/// Local application settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AppSettings {
    pub temperature_unit: TemperatureUnit,
    pub temperature_accuracy: Accuracy,
    pub humidity_unit: HumidityUnit,
    pub humidity_accuracy: Accuracy,
    pub pressure_unit: PressureUnit,
    pub pressure_accuracy: Accuracy,
    pub chart_show_all_points: bool,
    pub chart_draw_dots: bool,
    pub chart_duration_days: u32,
    pub chart_show_min_max_avg: bool,
    /// Makes the cloud the unconditional source of truth for latest records.
    pub cloud_mode_enabled: bool,
    pub dashboard_enabled: bool,
    pub dashboard_type: DashboardType,
    pub dashboard_tap_action: DashboardTapAction,
    pub email_alerts_disabled: bool,
    pub push_alerts_disabled: bool,
    pub marketing_preference: bool,
    pub profile_language_code: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            temperature_unit: TemperatureUnit::default(),
            temperature_accuracy: Accuracy::default(),
            humidity_unit: HumidityUnit::default(),
            humidity_accuracy: Accuracy::default(),
            pressure_unit: PressureUnit::default(),
            pressure_accuracy: Accuracy::default(),
            chart_show_all_points: false,
            chart_draw_dots: false,
            chart_duration_days: 10,
            chart_show_min_max_avg: true,
            cloud_mode_enabled: false,
            dashboard_enabled: true,
            dashboard_type: DashboardType::default(),
            dashboard_tap_action: DashboardTapAction::default(),
            email_alerts_disabled: false,
            push_alerts_disabled: false,
            marketing_preference: false,
            profile_language_code: None,
        }
    }
}
