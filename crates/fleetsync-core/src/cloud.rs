//! Cloud service contract.
//!
//! The [`CloudClient`] trait is the only way the sync engine talks to the
//! cloud. [`HttpCloudClient`](crate::HttpCloudClient) implements it over
//! HTTP and [`MockCloudClient`](crate::MockCloudClient) in memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use fleetsync_types::{
    Accuracy, DashboardTapAction, DashboardType, HumidityUnit, MacId, OffsetKind, PressureUnit,
    QueuedRequest, Record, Sensor, SensorAlert, TemperatureUnit,
};

use crate::error::CloudResult;

/// Calibration offsets as tracked by the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudOffsets {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    /// When the offsets were last changed on the cloud.
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl CloudOffsets {
    /// The cloud value for one offset kind.
    pub fn value(&self, kind: OffsetKind) -> Option<f64> {
        match kind {
            OffsetKind::Temperature => self.temperature,
            OffsetKind::Humidity => self.humidity,
            OffsetKind::Pressure => self.pressure,
        }
    }
}

/// A sensor as reported by the cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudSensor {
    pub mac_id: MacId,
    #[serde(default)]
    pub name: String,
    /// E-mail of the owning account.
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default = "default_claimed")]
    pub is_claimed: bool,
    #[serde(default)]
    pub can_share: bool,
    #[serde(default)]
    pub shared_to: Vec<String>,
    #[serde(default)]
    pub picture_url: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub offsets: CloudOffsets,
}

fn default_claimed() -> bool {
    true
}

impl CloudSensor {
    /// A claimed sensor owned by the signed-in account.
    pub fn new(mac_id: MacId, name: impl Into<String>) -> Self {
        Self {
            mac_id,
            name: name.into(),
            owner: None,
            is_owner: true,
            is_claimed: true,
            can_share: false,
            shared_to: Vec::new(),
            picture_url: None,
            firmware_version: None,
            offsets: CloudOffsets::default(),
        }
    }

    /// Materialize a new local sensor from this cloud record.
    pub fn to_sensor(&self) -> Sensor {
        self.merge_into(&Sensor::default())
    }

    /// Apply the cloud-authoritative fields to a local sensor.
    ///
    /// The local identifier is kept. Name and firmware are only replaced
    /// when the cloud provides them. The result is a fixed point: merging
    /// the same cloud sensor again yields an equal sensor.
    pub fn merge_into(&self, local: &Sensor) -> Sensor {
        Sensor {
            luid: local.luid.clone(),
            mac_id: Some(self.mac_id.clone()),
            name: if self.name.is_empty() {
                local.name.clone()
            } else {
                self.name.clone()
            },
            firmware_version: self
                .firmware_version
                .clone()
                .or_else(|| local.firmware_version.clone()),
            owner: self.owner.clone(),
            is_owner: self.is_owner,
            is_claimed: self.is_claimed,
            is_cloud_sensor: true,
            can_share: self.can_share,
            shared_to: self.shared_to.clone(),
            picture_url: self.picture_url.clone(),
        }
    }
}

/// One entry of the dense endpoint: a sensor and its newest measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseSensor {
    pub sensor: CloudSensor,
    #[serde(default)]
    pub record: Option<Record>,
}

/// Which sensors the dense endpoint returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenseFilter {
    /// Owned and shared sensors.
    #[default]
    All,
    /// Sensors owned by the account.
    Owned,
    /// Sensors shared with the account.
    Shared,
}

impl DenseFilter {
    /// Query-string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenseFilter::All => "all",
            DenseFilter::Owned => "owned",
            DenseFilter::Shared => "shared",
        }
    }

    /// Whether a sensor passes this filter.
    pub fn matches(&self, sensor: &CloudSensor) -> bool {
        match self {
            DenseFilter::All => true,
            DenseFilter::Owned => sensor.is_owner,
            DenseFilter::Shared => !sensor.is_owner,
        }
    }
}

/// Account settings as tracked by the cloud.
///
/// Every field is optional: `None` means the cloud does not track it (yet).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    pub temperature_unit: Option<TemperatureUnit>,
    pub temperature_accuracy: Option<Accuracy>,
    pub humidity_unit: Option<HumidityUnit>,
    pub humidity_accuracy: Option<Accuracy>,
    pub pressure_unit: Option<PressureUnit>,
    pub pressure_accuracy: Option<Accuracy>,
    pub chart_show_all_points: Option<bool>,
    pub chart_draw_dots: Option<bool>,
    pub chart_duration_days: Option<u32>,
    pub chart_show_min_max_avg: Option<bool>,
    pub cloud_mode_enabled: Option<bool>,
    pub dashboard_enabled: Option<bool>,
    pub dashboard_type: Option<DashboardType>,
    pub dashboard_tap_action: Option<DashboardTapAction>,
    pub email_alerts_disabled: Option<bool>,
    pub push_alerts_disabled: Option<bool>,
    pub marketing_preference: Option<bool>,
    pub profile_language_code: Option<String>,
}

/// The alert rules of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudSensorAlerts {
    pub mac_id: MacId,
    #[serde(default)]
    pub alerts: Vec<SensorAlert>,
}

/// Abstract cloud service.
///
/// Each call may fail with a classified [`CloudError`](crate::CloudError),
/// including [`CloudError::Unauthorized`](crate::CloudError::Unauthorized).
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// All sensors visible to the account.
    async fn load_sensors(&self) -> CloudResult<Vec<CloudSensor>>;

    /// History of one sensor with `since < date <= until`.
    async fn load_records(
        &self,
        mac_id: &MacId,
        since: OffsetDateTime,
        until: Option<OffsetDateTime>,
    ) -> CloudResult<Vec<Record>>;

    /// The newest measurement of every sensor, in one round trip.
    async fn load_sensors_dense(&self, filter: DenseFilter) -> CloudResult<Vec<DenseSensor>>;

    /// Account settings.
    async fn get_settings(&self) -> CloudResult<CloudSettings>;

    /// Alert rules of every sensor.
    async fn load_alerts(&self) -> CloudResult<Vec<CloudSensorAlerts>>;

    /// Replay a queued local mutation.
    async fn submit(&self, request: &QueuedRequest) -> CloudResult<()>;
}
