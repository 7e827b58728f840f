//! Platform-agnostic types for cloud-synchronised sensor fleets.
//!
//! This crate provides the shared vocabulary of the fleetsync workspace:
//! the persistence layer (fleetsync-store) and the sync engine
//! (fleetsync-core) both speak in these types.
//!
//! # Features
//!
//! - Sensor identity: local [`Luid`], cloud [`MacId`], and the persistence [`SensorKey`]
//! - [`Sensor`] and immutable measurement [`Record`]s
//! - Per-sensor [`SyncState`] and calibration [`SensorSettings`]
//! - Application-wide [`AppSettings`] and cloud-owned [`SensorAlert`]s
//! - [`QueuedRequest`]s awaiting replay against the cloud
//!
//! # Example
//!
//! ```
//! use fleetsync_types::{Luid, MacId, Sensor};
//!
//! let mut sensor = Sensor::local(Luid::new("luid-1"), "Sauna");
//! assert_eq!(sensor.key().unwrap().as_str(), "luid-1");
//!
//! sensor.mac_id = Some("de:ad:be:ef:00:01".parse::<MacId>().unwrap());
//! assert_eq!(sensor.key().unwrap().as_str(), "DE:AD:BE:EF:00:01");
//! ```

pub mod alert;
pub mod calibration;
pub mod error;
pub mod request;
pub mod settings;
pub mod types;

pub use alert::{AlertType, SensorAlert};
pub use calibration::{Offset, OffsetKind, SensorSettings};
pub use error::{ParseError, ParseResult};
pub use request::{QueuedRequest, RequestKind};
pub use settings::{
    Accuracy, AppSettings, DashboardTapAction, DashboardType, HumidityUnit, PressureUnit,
    TemperatureUnit,
};
pub use types::{Luid, MacId, Record, RecordSource, Sensor, SensorKey, SyncState, SyncStatus};
