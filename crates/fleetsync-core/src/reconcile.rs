//! Sensor reconciliation.
//!
//! Merges the local sensor set with the cloud sensor set, keyed by MAC:
//!
//! - a local sensor with a cloud counterpart takes the cloud-authoritative fields;
//! - a local sensor without one is deleted when it only ever existed on the
//!   cloud, and otherwise falls back to its unclaimed variant;
//! - a cloud sensor without a local counterpart is created locally.
//!
//! Sensors are only written when the merge actually changes them, so
//! reconciling twice with unchanged inputs performs no writes the second time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use fleetsync_types::{MacId, Sensor, SensorKey};

use crate::cloud::{CloudClient, CloudOffsets, CloudSensor};
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::local::SensorRepository;
use crate::offsets::OffsetSync;
use crate::pictures::PictureCache;

/// Result of one reconciliation.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub created: Vec<SensorKey>,
    pub updated: Vec<SensorKey>,
    pub unclaimed: Vec<SensorKey>,
    pub deleted: Vec<SensorKey>,
    pub unchanged: Vec<SensorKey>,
    /// Offset writes that failed. These do not fail the reconciliation.
    pub failures: Vec<(SensorKey, SyncError)>,
    /// Sensors that have a cloud counterpart, as persisted.
    pub synced: Vec<Sensor>,
}

impl ReconcileOutcome {
    /// Number of sensor writes performed.
    pub fn mutations(&self) -> usize {
        self.created.len() + self.updated.len() + self.unclaimed.len() + self.deleted.len()
    }
}

/// Reconciles local sensors with the cloud.
pub struct SensorReconciler<'a> {
    ctx: &'a SyncContext,
}

impl<'a> SensorReconciler<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Load both sides and reconcile them.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let local = self.ctx.store.read_all().await?;
        let cloud = self.ctx.cloud.load_sensors().await?;
        debug!(
            "Reconciling {} local with {} cloud sensors",
            local.len(),
            cloud.len()
        );
        self.apply(local, cloud).await
    }

    /// Reconcile the given sets.
    pub async fn apply(
        &self,
        local: Vec<Sensor>,
        cloud: Vec<CloudSensor>,
    ) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();

        // First entry wins for duplicated MACs
        let mut seen = HashSet::new();
        let cloud: Vec<CloudSensor> = cloud
            .into_iter()
            .filter(|sensor| seen.insert(sensor.mac_id.clone()))
            .collect();
        let mut by_mac: HashMap<&MacId, &CloudSensor> =
            cloud.iter().map(|sensor| (&sensor.mac_id, sensor)).collect();

        let mut with_offsets: Vec<(Sensor, CloudOffsets)> = Vec::new();

        for sensor in local {
            let Some(key) = sensor.key() else {
                warn!("Skipping local sensor {:?} without identity", sensor.name);
                continue;
            };

            let counterpart = sensor.mac_id.as_ref().and_then(|mac| by_mac.remove(mac));
            match counterpart {
                Some(remote) => {
                    let merged = remote.merge_into(&sensor);
                    if merged == sensor {
                        outcome.unchanged.push(key);
                    } else {
                        self.ctx.store.update_sensor(&merged).await?;
                        debug!("Updated sensor {} from cloud", key);
                        outcome.updated.push(key);
                    }
                    self.schedule_picture(remote);
                    with_offsets.push((merged.clone(), remote.offsets));
                    outcome.synced.push(merged);
                }
                None if sensor.is_cloud_sensor && !sensor.has_local_origin() => {
                    self.ctx.store.delete_sensor(&sensor).await?;
                    info!("Deleted sensor {} no longer on the cloud", key);
                    outcome.deleted.push(key);
                }
                None => {
                    let unclaimed = sensor.unclaimed();
                    if unclaimed == sensor {
                        outcome.unchanged.push(key);
                    } else {
                        self.ctx.store.update_sensor(&unclaimed).await?;
                        info!("Sensor {} was unclaimed on the cloud", key);
                        outcome.unclaimed.push(key);
                    }
                }
            }
        }

        // Whatever is left in the map has no local counterpart
        for remote in cloud.iter().filter(|s| by_mac.contains_key(&s.mac_id)) {
            let sensor = remote.to_sensor();
            self.ctx.store.create_sensor(&sensor).await?;
            let key = SensorKey::from(&remote.mac_id);
            info!("Created sensor {} from cloud", key);
            outcome.created.push(key);

            self.schedule_picture(remote);
            with_offsets.push((sensor.clone(), remote.offsets));
            outcome.synced.push(sensor);
        }

        outcome.failures = OffsetSync::new(self.ctx).apply_all(&with_offsets).await;
        Ok(outcome)
    }

    /// Fetch the sensor picture in the background when it is not cached.
    fn schedule_picture(&self, remote: &CloudSensor) {
        let (Some(cache), Some(url)) = (self.ctx.pictures.as_ref(), remote.picture_url.clone())
        else {
            return;
        };
        let cache: Arc<dyn PictureCache> = Arc::clone(cache);
        let mac_id = remote.mac_id.clone();

        tokio::spawn(async move {
            if cache.is_cached(&mac_id, &url).await {
                return;
            }
            if let Err(e) = cache.fetch(&mac_id, &url).await {
                warn!("Failed to fetch picture for {}: {}", mac_id, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockCloudClient;
    use crate::local::CalibrationStore;
    use crate::test_support::{harness, mac};
    use fleetsync_types::Luid;

    fn keys(sensors: &[Sensor]) -> Vec<SensorKey> {
        let mut keys: Vec<_> = sensors.iter().filter_map(Sensor::key).collect();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_cloud_sensors_are_created() {
        let h = harness(MockCloudClient::new());
        let cloud = vec![
            CloudSensor::new(mac(1), "Sauna"),
            CloudSensor::new(mac(2), "Cellar"),
        ];

        let outcome = SensorReconciler::new(&h.ctx)
            .apply(Vec::new(), cloud)
            .await
            .unwrap();
        assert_eq!(outcome.created.len(), 2);
        assert_eq!(outcome.synced.len(), 2);

        let stored = h.store.read_all().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|s| s.is_cloud_sensor && s.is_claimed));
    }

    #[tokio::test]
    async fn test_duplicate_cloud_macs_are_created_once() {
        let h = harness(MockCloudClient::new());
        let cloud = vec![
            CloudSensor::new(mac(1), "First"),
            CloudSensor::new(mac(1), "Second"),
        ];

        let outcome = SensorReconciler::new(&h.ctx)
            .apply(Vec::new(), cloud)
            .await
            .unwrap();
        assert_eq!(outcome.created, vec![SensorKey::from(&mac(1))]);
        assert_eq!(h.store.read_all().await.unwrap()[0].name, "First");
    }

    #[tokio::test]
    async fn test_matched_sensor_is_merged() {
        let h = harness(MockCloudClient::new());
        let local = Sensor {
            luid: Some(Luid::new("l1")),
            mac_id: Some(mac(1)),
            name: "Old".to_string(),
            ..Default::default()
        };
        h.store.create_sensor(&local).await.unwrap();

        let mut remote = CloudSensor::new(mac(1), "New");
        remote.shared_to = vec!["friend@example.com".to_string()];

        let outcome = SensorReconciler::new(&h.ctx)
            .apply(vec![local], vec![remote])
            .await
            .unwrap();
        assert_eq!(outcome.updated, vec![SensorKey::from(&mac(1))]);

        let stored = &h.store.read_all().await.unwrap()[0];
        assert_eq!(stored.name, "New");
        assert_eq!(stored.luid, Some(Luid::new("l1")));
        assert!(stored.is_cloud_sensor);
        assert_eq!(stored.shared_to.len(), 1);
    }

    #[tokio::test]
    async fn test_cloud_only_sensor_absent_from_cloud_is_deleted() {
        let h = harness(MockCloudClient::new());
        let gone = CloudSensor::new(mac(1), "Gone").to_sensor();
        h.store.create_sensor(&gone).await.unwrap();

        let outcome = SensorReconciler::new(&h.ctx)
            .apply(vec![gone], Vec::new())
            .await
            .unwrap();
        assert_eq!(outcome.deleted, vec![SensorKey::from(&mac(1))]);
        assert!(h.store.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_locally_known_sensor_is_unclaimed() {
        let h = harness(MockCloudClient::new());
        let claimed = Sensor {
            luid: Some(Luid::new("l1")),
            ..CloudSensor::new(mac(1), "Attic").to_sensor()
        };
        h.store.create_sensor(&claimed).await.unwrap();

        let outcome = SensorReconciler::new(&h.ctx)
            .apply(vec![claimed], Vec::new())
            .await
            .unwrap();
        assert_eq!(outcome.unclaimed, vec![SensorKey::from(&mac(1))]);

        let stored = &h.store.read_all().await.unwrap()[0];
        assert!(!stored.is_claimed);
        assert!(!stored.is_cloud_sensor);
        assert_eq!(stored.luid, Some(Luid::new("l1")));
    }

    #[tokio::test]
    async fn test_local_only_sensor_is_untouched() {
        let h = harness(MockCloudClient::new());
        let fridge = Sensor::local(Luid::new("l9"), "Fridge");
        h.store.create_sensor(&fridge).await.unwrap();

        let outcome = SensorReconciler::new(&h.ctx)
            .apply(vec![fridge.clone()], vec![CloudSensor::new(mac(1), "Sauna")])
            .await
            .unwrap();
        assert_eq!(outcome.unchanged, vec![SensorKey::from("l9")]);
        assert_eq!(outcome.mutations(), 1);
        assert!(h.store.read_all().await.unwrap().contains(&fridge));
    }

    #[tokio::test]
    async fn test_second_run_performs_no_writes() {
        let cloud = MockCloudClient::builder()
            .sensor(CloudSensor::new(mac(1), "Sauna"))
            .sensor(CloudSensor::new(mac(2), "Cellar"))
            .build();
        let h = harness(cloud);
        h.store
            .create_sensor(&Sensor::local(Luid::new("l1"), "Fridge"))
            .await
            .unwrap();
        h.store
            .create_sensor(&CloudSensor::new(mac(3), "Gone").to_sensor())
            .await
            .unwrap();

        let reconciler = SensorReconciler::new(&h.ctx);
        let first = reconciler.reconcile().await.unwrap();
        assert!(first.mutations() > 0);
        let after_first = keys(&h.store.read_all().await.unwrap());

        let second = reconciler.reconcile().await.unwrap();
        assert_eq!(second.mutations(), 0);
        assert_eq!(keys(&h.store.read_all().await.unwrap()), after_first);

        // Union of surviving local ids and cloud ids
        let mut expected = vec![
            SensorKey::from(&mac(1)),
            SensorKey::from(&mac(2)),
            SensorKey::from("l1"),
        ];
        expected.sort();
        assert_eq!(after_first, expected);
    }

    #[tokio::test]
    async fn test_offsets_applied_during_reconcile() {
        let h = harness(MockCloudClient::new());
        let mut remote = CloudSensor::new(mac(1), "Sauna");
        remote.offsets.temperature = Some(-1.5);

        let outcome = SensorReconciler::new(&h.ctx)
            .apply(Vec::new(), vec![remote])
            .await
            .unwrap();
        assert!(outcome.failures.is_empty());

        let calibration = h
            .store
            .read_calibration(&SensorKey::from(&mac(1)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(calibration.temperature.value, Some(-1.5));
    }

    #[tokio::test]
    async fn test_cloud_error_fails_reconcile() {
        let cloud = MockCloudClient::new();
        cloud.set_unauthorized(true);
        let h = harness(cloud);

        let err = SensorReconciler::new(&h.ctx).reconcile().await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        /// 0: no local sensor, 1: locally known with a MAC, 2: cloud-only.
        fn local_sensor(index: u8, kind: u8) -> Option<Sensor> {
            match kind {
                1 => Some(Sensor {
                    luid: Some(Luid::new(format!("l{index}"))),
                    mac_id: Some(mac(index)),
                    name: format!("Local {index}"),
                    ..Default::default()
                }),
                2 => Some(CloudSensor::new(mac(index), format!("Cloud {index}")).to_sensor()),
                _ => None,
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            /// Stored sensors are the union of surviving local and cloud
            /// ids, each exactly once, and a second pass writes nothing.
            #[test]
            fn reconcile_stores_union_once(
                kinds in proptest::collection::vec(0u8..3, 8),
                cloud_macs in proptest::collection::vec(0u8..8, 0..12),
                local_only in 0u8..3,
            ) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                let (stored, second_mutations) = rt.block_on(async {
                    let h = harness(MockCloudClient::new());
                    let mut local = Vec::new();
                    for (index, kind) in kinds.iter().enumerate() {
                        if let Some(sensor) = local_sensor(index as u8, *kind) {
                            h.store.create_sensor(&sensor).await.unwrap();
                            local.push(sensor);
                        }
                    }
                    for n in 0..local_only {
                        let sensor = Sensor::local(Luid::new(format!("o{n}")), "Fridge");
                        h.store.create_sensor(&sensor).await.unwrap();
                        local.push(sensor);
                    }
                    let cloud: Vec<CloudSensor> = cloud_macs
                        .iter()
                        .map(|&i| CloudSensor::new(mac(i), format!("Cloud {i}")))
                        .collect();

                    let reconciler = SensorReconciler::new(&h.ctx);
                    reconciler.apply(local, cloud.clone()).await.unwrap();
                    let stored = h.store.read_all().await.unwrap();
                    let second = reconciler.apply(stored.clone(), cloud).await.unwrap();
                    (stored, second.mutations())
                });

                let mut expected: BTreeSet<SensorKey> = cloud_macs
                    .iter()
                    .map(|&i| SensorKey::from(&mac(i)))
                    .collect();
                for (index, kind) in kinds.iter().enumerate() {
                    if *kind == 1 {
                        expected.insert(SensorKey::from(&mac(index as u8)));
                    }
                }
                for n in 0..local_only {
                    expected.insert(SensorKey::from(format!("o{n}").as_str()));
                }

                let stored_keys = keys(&stored);
                prop_assert_eq!(stored_keys.len(), stored.len());
                prop_assert_eq!(stored_keys, expected.into_iter().collect::<Vec<_>>());
                prop_assert_eq!(second_mutations, 0);
            }
        }
    }
}
