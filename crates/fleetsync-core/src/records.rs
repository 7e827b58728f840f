//! Per-sensor history download.
//!
//! A [`RecordSyncOperation`] fetches the records of one sensor newer than its
//! watermark, stores them as one batch and advances the watermark. On any
//! failure the watermark stays where it was, so the next cycle retries the
//! same window.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fleetsync_types::{MacId, Record, Sensor, SensorKey, SyncStatus};

use crate::cloud::CloudClient;
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::local::{RecordRepository, SensorRepository, SyncStateStore};

/// History sync for one sensor.
pub struct RecordSyncOperation<'a> {
    ctx: &'a SyncContext,
    sensor: &'a Sensor,
    token: CancellationToken,
}

impl<'a> RecordSyncOperation<'a> {
    pub fn new(ctx: &'a SyncContext, sensor: &'a Sensor, token: CancellationToken) -> Self {
        Self { ctx, sensor, token }
    }

    /// Run the operation. Returns the records that were fetched and stored.
    pub async fn run(self) -> Result<Vec<Record>> {
        let Some(mac_id) = self.sensor.mac_id.clone() else {
            return Err(SyncError::mac_id_missing(
                self.sensor
                    .luid
                    .as_ref()
                    .map_or(self.sensor.name.as_str(), |luid| luid.as_str()),
            ));
        };
        let key = SensorKey::from(&mac_id);

        self.set_status(&key, SyncStatus::Syncing).await?;

        match self.download(&mac_id, &key).await {
            Ok(records) => {
                self.set_status(&key, SyncStatus::Complete).await?;
                Ok(records)
            }
            Err(SyncError::Cancelled) => {
                debug!("History sync for {} cancelled", key);
                self.set_status(&key, SyncStatus::Idle).await?;
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                warn!("History sync for {} failed: {}", key, e);
                if let Err(status_err) = self.set_status(&key, SyncStatus::Error).await {
                    warn!("Could not record error status for {}: {}", key, status_err);
                }
                Err(e)
            }
        }
    }

    async fn download(&self, mac_id: &MacId, key: &SensorKey) -> Result<Vec<Record>> {
        let store = &self.ctx.store;
        let previous = store.get_sync_date(key).await?;
        let since = previous.unwrap_or_else(|| self.ctx.config.initial_watermark(self.ctx.now()));

        let mut records = self.ctx.cloud.load_records(mac_id, since, None).await?;
        records.retain(|record| record.date > since);
        if records.is_empty() {
            debug!("No new records for {} since {}", key, since);
            return Ok(records);
        }

        let luid = match &self.sensor.luid {
            Some(luid) => Some(luid.clone()),
            None => store.luid_for_mac(mac_id).await?,
        };
        for record in &mut records {
            record.mac_id = Some(mac_id.clone());
            if record.luid.is_none() {
                record.luid = luid.clone();
            }
        }

        // Last point at which the operation can still be cancelled
        if self.token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let inserted = store.create_records(&records).await?;
        let watermark = self
            .ctx
            .config
            .watermark
            .advance(previous, &records, self.ctx.now());
        store.set_sync_date(watermark, key).await?;

        info!(
            "Stored {} new of {} fetched records for {}",
            inserted,
            records.len(),
            key
        );
        Ok(records)
    }

    async fn set_status(&self, key: &SensorKey, status: SyncStatus) -> Result<()> {
        self.ctx.store.set_sync_status(status, key).await?;
        self.ctx.events.sensor_status(key, status);
        Ok(())
    }
}
