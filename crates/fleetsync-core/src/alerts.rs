//! Alert rule sync. Alerts are owned by the cloud and replaced wholesale.

use std::collections::HashSet;

use tracing::{debug, info};

use fleetsync_types::{SensorAlert, SensorKey};

use crate::cloud::CloudClient;
use crate::context::SyncContext;
use crate::error::Result;
use crate::local::{SensorRepository, SettingsRepository};

/// Pulls alert rules from the cloud.
pub struct AlertSync<'a> {
    ctx: &'a SyncContext,
}

impl<'a> AlertSync<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Replace the local rules of every sensor reported by the cloud.
    ///
    /// Cloud sensors missing from the response have their local rules
    /// cleared. Returns the number of sensors whose rules changed.
    pub async fn run(&self) -> Result<usize> {
        let all = self.ctx.cloud.load_alerts().await?;
        let mut replaced = 0;
        let mut reported = HashSet::new();

        for entry in all {
            let key = SensorKey::from(&entry.mac_id);
            reported.insert(key.clone());
            let mut incoming = entry.alerts;
            sort_by_kind(&mut incoming);

            let current = self.ctx.store.read_alerts(&key).await?;
            if current == incoming {
                continue;
            }
            self.ctx.store.replace_alerts(&key, &incoming).await?;
            debug!("Replaced {} alert rules for {}", incoming.len(), key);
            replaced += 1;
        }

        for sensor in self.ctx.store.read_all().await? {
            let Some(mac_id) = sensor.mac_id.as_ref().filter(|_| sensor.is_cloud_sensor) else {
                continue;
            };
            let key = SensorKey::from(mac_id);
            if reported.contains(&key) || self.ctx.store.read_alerts(&key).await?.is_empty() {
                continue;
            }
            self.ctx.store.replace_alerts(&key, &[]).await?;
            debug!("Cleared alert rules for {}, no longer reported by the cloud", key);
            replaced += 1;
        }

        if replaced > 0 {
            info!("Alert rules updated for {} sensors", replaced);
        }
        Ok(replaced)
    }
}

/// Stored rules are read back ordered by kind name.
fn sort_by_kind(alerts: &mut [SensorAlert]) {
    alerts.sort_by(|a, b| a.kind.as_str().cmp(b.kind.as_str()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockCloudClient;
    use crate::test_support::{harness, mac};
    use fleetsync_types::{AlertType, Sensor};

    fn alert(kind: AlertType, max: f64) -> SensorAlert {
        SensorAlert {
            kind,
            enabled: true,
            min: None,
            max: Some(max),
            counter: None,
            delay: Some(600),
            description: None,
            last_updated: None,
        }
    }

    #[tokio::test]
    async fn test_alerts_replace_local_rules() {
        let cloud = MockCloudClient::builder()
            .alerts(
                &mac(1),
                vec![alert(AlertType::Temperature, 30.0), alert(AlertType::Humidity, 0.8)],
            )
            .build();
        let h = harness(cloud);
        let key = SensorKey::from(&mac(1));
        h.store
            .replace_alerts(&key, &[alert(AlertType::Offline, 0.0)])
            .await
            .unwrap();

        assert_eq!(AlertSync::new(&h.ctx).run().await.unwrap(), 1);

        let stored = h.store.read_alerts(&key).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|a| a.kind != AlertType::Offline));
    }

    #[tokio::test]
    async fn test_unchanged_rules_are_not_rewritten() {
        let cloud = MockCloudClient::builder()
            .alerts(
                &mac(1),
                vec![alert(AlertType::Temperature, 30.0), alert(AlertType::Humidity, 0.8)],
            )
            .build();
        let h = harness(cloud);

        let sync = AlertSync::new(&h.ctx);
        assert_eq!(sync.run().await.unwrap(), 1);
        assert_eq!(sync.run().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_cloud_rules_clear_local() {
        let cloud = MockCloudClient::builder().alerts(&mac(1), Vec::new()).build();
        let h = harness(cloud);
        let key = SensorKey::from(&mac(1));
        h.store
            .replace_alerts(&key, &[alert(AlertType::Pressure, 1100.0)])
            .await
            .unwrap();

        AlertSync::new(&h.ctx).run().await.unwrap();
        assert!(h.store.read_alerts(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sensor_missing_from_response_is_cleared() {
        let cloud = MockCloudClient::builder()
            .alerts(&mac(1), vec![alert(AlertType::Temperature, 30.0)])
            .build();
        let h = harness(cloud);

        let mut dropped = Sensor {
            mac_id: Some(mac(2)),
            name: "Cellar".to_string(),
            is_claimed: true,
            is_cloud_sensor: true,
            ..Default::default()
        };
        h.store.create_sensor(&dropped).await.unwrap();
        let dropped_key = SensorKey::from(&mac(2));
        h.store
            .replace_alerts(&dropped_key, &[alert(AlertType::Humidity, 0.7)])
            .await
            .unwrap();

        // A local-only sensor keeps its rules
        dropped.mac_id = Some(mac(3));
        dropped.is_cloud_sensor = false;
        h.store.create_sensor(&dropped).await.unwrap();
        let local_key = SensorKey::from(&mac(3));
        h.store
            .replace_alerts(&local_key, &[alert(AlertType::Humidity, 0.7)])
            .await
            .unwrap();

        assert_eq!(AlertSync::new(&h.ctx).run().await.unwrap(), 2);
        assert!(h.store.read_alerts(&dropped_key).await.unwrap().is_empty());
        assert_eq!(h.store.read_alerts(&local_key).await.unwrap().len(), 1);
        assert_eq!(
            h.store.read_alerts(&SensorKey::from(&mac(1))).await.unwrap().len(),
            1
        );

        // Nothing left to clear
        assert_eq!(AlertSync::new(&h.ctx).run().await.unwrap(), 0);
    }
}
