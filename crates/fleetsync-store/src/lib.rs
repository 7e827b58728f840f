//! Local persistence for cloud-synchronised sensor fleets.
//!
//! This crate provides SQLite-based storage for everything the sync engine
//! reads and writes on the device side: sensors, measurement history, the
//! per-sensor "latest" row, sync watermarks, calibration offsets,
//! application settings, alert rules and the queue of requests awaiting
//! replay against the cloud.
//!
//! All timestamps are stored as unix milliseconds.
//!
//! # Example
//!
//! ```no_run
//! use fleetsync_store::{RecordQuery, Store};
//! use fleetsync_types::SensorKey;
//!
//! let store = Store::open_default()?;
//!
//! let key = SensorKey::from("AA:BB:CC:DD:EE:FF");
//! let recent = store.query_records(&RecordQuery::new().sensor(&key).newest_first().limit(10))?;
//! println!("{} records, watermark {:?}", recent.len(), store.sync_date(&key)?);
//! # Ok::<(), fleetsync_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::StoredRecord;
pub use queries::RecordQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/fleetsync/data.db`
/// - macOS: `~/Library/Application Support/fleetsync/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\fleetsync\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("fleetsync")
        .join("data.db")
}
