//! Cloud synchronisation engine for sensor fleets.
//!
//! This crate keeps a local sensor database consistent with a remote cloud
//! account. It reconciles the sensor list, downloads history per sensor,
//! merges the newest measurements, and pulls settings, alert rules and
//! calibration offsets. Local mutations that the cloud has not seen yet are
//! queued and replayed.
//!
//! # Features
//!
//! - **Sensor reconciliation**: union of local and cloud sensors, unclaim and delete handling
//! - **History sync**: watermark-based, bounded concurrency, per-sensor isolation
//! - **Latest records**: one dense call, recency or cloud-mode merge
//! - **Settings and alerts**: field-level settings merge, alert replacement
//! - **Offsets**: timestamp collision resolution with upload queueing
//! - **Events**: phase lifecycle and authorization signals over a broadcast channel
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetsync_core::{HttpCloudClient, SqliteLocalStore, SyncContext, SyncOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cloud = HttpCloudClient::new("https://cloud.example.com/api", "token")?;
//!     let store = SqliteLocalStore::open("fleet.db")?;
//!
//!     let ctx = SyncContext::new(Arc::new(cloud), Arc::new(store));
//!     let orchestrator = SyncOrchestrator::new(ctx);
//!
//!     let report = orchestrator.sync_all().await?;
//!     println!("{} records synced", report.records_synced());
//!     Ok(())
//! }
//! ```

pub mod alerts;
pub mod cloud;
pub mod cloud_client;
pub mod collision;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod latest;
pub mod local;
pub mod mock;
pub mod offsets;
pub mod orchestrator;
pub mod pending;
pub mod pictures;
pub mod queue;
pub mod reconcile;
pub mod records;
pub mod settings;

// Re-export the data model for convenience
pub use fleetsync_types as types;

pub use alerts::AlertSync;
pub use cloud::{
    CloudClient, CloudOffsets, CloudSensor, CloudSensorAlerts, CloudSettings, DenseFilter,
    DenseSensor,
};
pub use cloud_client::HttpCloudClient;
pub use collision::{BothAbsent, CollisionResolver, Resolution, resolve};
pub use config::{SyncConfig, ValidationError, WatermarkPolicy};
pub use context::SyncContext;
pub use error::{CloudError, ErrorClass, Result, StorageError, SyncError};
pub use events::{EventDispatcher, EventReceiver, SyncEvent, SyncPhase};
pub use latest::{LatestAction, LatestOutcome, LatestRecordMerger};
pub use local::{LocalStore, SqliteLocalStore};
pub use mock::{MockCloudClient, MockCloudClientBuilder};
pub use offsets::{OffsetAction, OffsetSync};
pub use orchestrator::{SyncOrchestrator, SyncReport};
pub use pending::{PendingOutcome, PendingRequests};
pub use pictures::{DiskPictureCache, PictureCache, PictureError};
pub use queue::{BoundedTaskQueue, QueueError};
pub use reconcile::{ReconcileOutcome, SensorReconciler};
pub use records::RecordSyncOperation;
pub use settings::{SETTING_FIELDS, SettingField, SettingsSync, merge_settings};
