//! Calibration offset sync.
//!
//! For each offset kind the local "set at" timestamp is compared with the
//! cloud `updated_at` through the collision resolver. Both sides lacking a
//! timestamp counts as a legacy row and takes the cloud value.

use futures::future::join_all;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

use fleetsync_types::{MacId, Offset, OffsetKind, QueuedRequest, RequestKind, Sensor, SensorKey};

use crate::cloud::CloudOffsets;
use crate::collision::{BothAbsent, CollisionResolver, Resolution};
use crate::context::SyncContext;
use crate::error::{CloudError, Result, SyncError};
use crate::local::{CalibrationStore, RequestQueue};

/// What happened to one offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetAction {
    /// The cloud does not provide a value.
    Skipped,
    /// Nothing to do.
    Unchanged,
    /// The cloud value was written locally.
    Written,
    /// The local value is newer and was queued for upload.
    Queued,
}

#[derive(Serialize)]
struct OffsetPayload {
    kind: OffsetKind,
    value: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    set_at: Option<OffsetDateTime>,
}

/// Idempotency key of an offset upload.
pub fn offset_request_key(sensor: &SensorKey, kind: OffsetKind) -> String {
    format!("offset:{}:{}", sensor, kind)
}

/// Applies cloud offsets to the calibration store.
pub struct OffsetSync<'a> {
    ctx: &'a SyncContext,
    resolver: CollisionResolver,
}

impl<'a> OffsetSync<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self {
            ctx,
            resolver: ctx
                .config
                .resolver()
                .with_both_absent(BothAbsent::UpdateLocal),
        }
    }

    /// Apply the offsets of many sensors. Returns the failures.
    pub async fn apply_all(&self, sensors: &[(Sensor, CloudOffsets)]) -> Vec<(SensorKey, SyncError)> {
        let results = join_all(
            sensors
                .iter()
                .map(|(sensor, offsets)| async move { (sensor, self.apply(sensor, offsets).await) }),
        )
        .await;

        results
            .into_iter()
            .filter_map(|(sensor, result)| {
                let err = result.err()?;
                let key = sensor
                    .key()
                    .unwrap_or_else(|| SensorKey::from(sensor.name.as_str()));
                warn!("Offset sync failed for {}: {}", key, err);
                Some((key, err))
            })
            .collect()
    }

    /// Apply the three offsets of one sensor concurrently.
    pub async fn apply(
        &self,
        sensor: &Sensor,
        offsets: &CloudOffsets,
    ) -> Result<[(OffsetKind, OffsetAction); 3]> {
        let Some(mac_id) = sensor.mac_id.as_ref() else {
            return Err(SyncError::mac_id_missing(sensor.name.clone()));
        };
        let key = SensorKey::from(mac_id);
        let calibration = self.ctx.store.read_calibration(&key).await?;

        let results = join_all(OffsetKind::ALL.map(|kind| {
            let local = calibration
                .as_ref()
                .map(|c| c.offset(kind))
                .unwrap_or_default();
            self.apply_kind(mac_id, &key, kind, local, offsets)
        }))
        .await;

        let mut actions = [(OffsetKind::Temperature, OffsetAction::Skipped); 3];
        for (slot, (kind, result)) in actions.iter_mut().zip(OffsetKind::ALL.into_iter().zip(results)) {
            *slot = (kind, result?);
        }
        Ok(actions)
    }

    async fn apply_kind(
        &self,
        mac_id: &MacId,
        key: &SensorKey,
        kind: OffsetKind,
        local: Offset,
        offsets: &CloudOffsets,
    ) -> Result<OffsetAction> {
        let Some(cloud_value) = offsets.value(kind) else {
            return Ok(OffsetAction::Skipped);
        };

        match self.resolver.resolve(local.set_at, offsets.updated_at) {
            Resolution::UpdateLocal => {
                // An upload queued earlier is now older than the cloud value.
                let request_key = offset_request_key(key, kind);
                if self.ctx.store.discard(&request_key).await? {
                    debug!("Dropped stale upload {}", request_key);
                }
                if local.value == Some(cloud_value) {
                    return Ok(OffsetAction::Unchanged);
                }
                let offset = Offset {
                    value: Some(cloud_value),
                    set_at: offsets.updated_at,
                };
                self.ctx.store.write_offset(key, kind, offset).await?;
                debug!("{} offset of {} set to {} from cloud", kind, key, cloud_value);
                Ok(OffsetAction::Written)
            }
            Resolution::KeepLocalAndQueue => {
                let payload = serde_json::to_string(&OffsetPayload {
                    kind,
                    value: local.value,
                    set_at: local.set_at,
                })
                .map_err(CloudError::from)?;
                let request = QueuedRequest::new(
                    RequestKind::SensorOffset,
                    offset_request_key(key, kind),
                    Some(mac_id.clone()),
                    payload,
                );
                if self.ctx.store.enqueue(&request).await? {
                    debug!("Queued local {} offset of {} for upload", kind, key);
                }
                Ok(OffsetAction::Queued)
            }
            Resolution::NoAction => Ok(OffsetAction::Unchanged),
        }
    }
}
