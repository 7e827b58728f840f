//! Latest-record merge from the dense endpoint.
//!
//! The merge runs alongside the history operations. A sensor the dense
//! endpoint reports without a record is marked `complete`, except while its
//! status is `syncing` or `error`: those belong to the history operation of
//! the same run and are not overwritten.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use fleetsync_types::{Record, SensorKey, SyncStatus};

use crate::cloud::{CloudClient, DenseSensor};
use crate::collision::Resolution;
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::local::{RecordRepository, SettingsRepository, SyncStateStore};

/// What happened to one sensor's latest record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatestAction {
    /// Unclaimed, or owned while cloud mode is off.
    Skipped,
    /// The cloud has no measurement.
    NoRecord,
    /// The local latest row is at least as recent.
    KeptLocal,
    /// The cloud value was written.
    Accepted,
}

/// Result of one merge.
#[derive(Debug, Default)]
pub struct LatestOutcome {
    pub actions: BTreeMap<SensorKey, LatestAction>,
    pub failures: Vec<(SensorKey, SyncError)>,
}

impl LatestOutcome {
    /// Number of sensors whose latest row was replaced.
    pub fn accepted(&self) -> usize {
        self.actions
            .values()
            .filter(|action| **action == LatestAction::Accepted)
            .count()
    }
}

/// Merges the newest cloud measurement of every sensor.
pub struct LatestRecordMerger<'a> {
    ctx: &'a SyncContext,
}

impl<'a> LatestRecordMerger<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Fetch and merge. Fails only when the dense call or the settings read fails.
    pub async fn run(&self) -> Result<LatestOutcome> {
        let cloud_mode = self.ctx.store.load_app_settings().await?.cloud_mode_enabled;
        let dense = self
            .ctx
            .cloud
            .load_sensors_dense(self.ctx.config.dense_filter)
            .await?;
        debug!("Merging {} dense entries (cloud mode {})", dense.len(), cloud_mode);

        let mut outcome = LatestOutcome::default();
        for entry in dense {
            let key = SensorKey::from(&entry.sensor.mac_id);
            match self.merge(&key, entry, cloud_mode).await {
                Ok(action) => {
                    outcome.actions.insert(key, action);
                }
                Err(e) => {
                    warn!("Latest-record merge failed for {}: {}", key, e);
                    outcome.failures.push((key, e));
                }
            }
        }
        Ok(outcome)
    }

    async fn merge(
        &self,
        key: &SensorKey,
        entry: DenseSensor,
        cloud_mode: bool,
    ) -> Result<LatestAction> {
        let DenseSensor { sensor, record } = entry;
        if !sensor.is_claimed || (sensor.is_owner && !cloud_mode) {
            return Ok(LatestAction::Skipped);
        }

        let store = &self.ctx.store;
        let Some(mut record) = record else {
            let current = store.read_sync_state(key).await?.map(|s| s.status);
            if !matches!(current, Some(SyncStatus::Syncing | SyncStatus::Error)) {
                store.set_sync_status(SyncStatus::Complete, key).await?;
            }
            return Ok(LatestAction::NoRecord);
        };
        record.mac_id = Some(sensor.mac_id.clone());

        let previous = store.read_latest(key).await?;
        if !self.accepts(previous.as_ref(), &record, cloud_mode) {
            return Ok(LatestAction::KeptLocal);
        }

        // Both writes are decided against the state before the merge
        store.write_latest(&record).await?;
        store.create_record(&record).await?;
        debug!("Accepted cloud latest record for {} at {}", key, record.date);
        Ok(LatestAction::Accepted)
    }

    fn accepts(&self, previous: Option<&Record>, cloud: &Record, cloud_mode: bool) -> bool {
        match previous {
            None => true,
            Some(_) if cloud_mode => true,
            Some(local) => {
                self.ctx
                    .config
                    .resolver()
                    .resolve(Some(local.date), Some(cloud.date))
                    == Resolution::UpdateLocal
            }
        }
    }
}
