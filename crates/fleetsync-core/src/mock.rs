//! In-memory cloud for testing.
//!
//! [`MockCloudClient`] implements [`CloudClient`] without any network. It
//! supports:
//!
//! - **Failure injection**: reject every call as unauthorized, or fail the
//!   history download of selected sensors
//! - **Latency simulation**: delay history downloads to exercise concurrency
//! - **Concurrency tracking**: the peak number of history downloads in flight

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use fleetsync_types::{MacId, QueuedRequest, Record, SensorAlert};

use crate::cloud::{
    CloudClient, CloudSensor, CloudSensorAlerts, CloudSettings, DenseFilter, DenseSensor,
};
use crate::error::{CloudError, CloudResult};

/// A mock cloud service.
///
/// # Example
///
/// ```
/// use fleetsync_core::{CloudClient, CloudSensor, MockCloudClient};
/// use fleetsync_types::MacId;
///
/// #[tokio::main]
/// async fn main() {
///     let mac = MacId::parse("AA:BB:CC:DD:EE:01").unwrap();
///     let cloud = MockCloudClient::builder()
///         .sensor(CloudSensor::new(mac, "Sauna"))
///         .build();
///
///     assert_eq!(cloud.load_sensors().await.unwrap().len(), 1);
/// }
/// ```
#[derive(Debug, Default)]
pub struct MockCloudClient {
    sensors: RwLock<Vec<CloudSensor>>,
    records: RwLock<HashMap<MacId, Vec<Record>>>,
    latest: RwLock<HashMap<MacId, Record>>,
    settings: RwLock<CloudSettings>,
    alerts: RwLock<Vec<CloudSensorAlerts>>,
    submitted: RwLock<Vec<QueuedRequest>>,
    failing_records: RwLock<HashSet<MacId>>,
    unauthorized: AtomicBool,
    failing_submits: AtomicBool,
    /// Simulated history download latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    record_loads: AtomicU32,
}

/// Decrements the in-flight counter when a download ends.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockCloudClient {
    /// An empty cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder.
    pub fn builder() -> MockCloudClientBuilder {
        MockCloudClientBuilder::default()
    }

    /// Replace the sensor list.
    pub async fn set_sensors(&self, sensors: Vec<CloudSensor>) {
        *self.sensors.write().await = sensors;
    }

    /// Remove a sensor (as if it was unclaimed on the cloud).
    pub async fn remove_sensor(&self, mac_id: &MacId) {
        self.sensors.write().await.retain(|s| &s.mac_id != mac_id);
        self.latest.write().await.remove(mac_id);
    }

    /// Update a sensor in place.
    pub async fn update_sensor(&self, mac_id: &MacId, f: impl FnOnce(&mut CloudSensor)) {
        if let Some(sensor) = self
            .sensors
            .write()
            .await
            .iter_mut()
            .find(|s| &s.mac_id == mac_id)
        {
            f(sensor);
        }
    }

    /// Append history records for a sensor.
    pub async fn push_records(&self, mac_id: &MacId, records: Vec<Record>) {
        self.records
            .write()
            .await
            .entry(mac_id.clone())
            .or_default()
            .extend(records);
    }

    /// Set the newest measurement returned by the dense endpoint.
    pub async fn set_latest(&self, mac_id: &MacId, record: Record) {
        self.latest.write().await.insert(mac_id.clone(), record);
    }

    /// Replace the account settings.
    pub async fn set_settings(&self, settings: CloudSettings) {
        *self.settings.write().await = settings;
    }

    /// Replace the alert rules of a sensor.
    pub async fn set_alerts(&self, mac_id: &MacId, alerts: Vec<SensorAlert>) {
        let mut all = self.alerts.write().await;
        all.retain(|a| &a.mac_id != mac_id);
        all.push(CloudSensorAlerts {
            mac_id: mac_id.clone(),
            alerts,
        });
    }

    /// Make every call fail with [`CloudError::Unauthorized`].
    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.unauthorized.store(unauthorized, Ordering::Relaxed);
    }

    /// Make history downloads of one sensor fail.
    pub async fn fail_records_for(&self, mac_id: &MacId) {
        self.failing_records.write().await.insert(mac_id.clone());
    }

    /// Let history downloads of one sensor succeed again.
    pub async fn clear_failure(&self, mac_id: &MacId) {
        self.failing_records.write().await.remove(mac_id);
    }

    /// Make request submissions fail with an API error.
    pub fn set_submit_failure(&self, fail: bool) {
        self.failing_submits.store(fail, Ordering::Relaxed);
    }

    /// Set the simulated history download latency.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Peak number of concurrent history downloads so far.
    pub fn peak_concurrent_record_loads(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Number of history downloads so far.
    pub fn record_load_count(&self) -> u32 {
        self.record_loads.load(Ordering::Relaxed)
    }

    /// Requests received through [`CloudClient::submit`].
    pub async fn submitted(&self) -> Vec<QueuedRequest> {
        self.submitted.read().await.clone()
    }

    fn check_authorized(&self) -> CloudResult<()> {
        if self.unauthorized.load(Ordering::Relaxed) {
            Err(CloudError::Unauthorized)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CloudClient for MockCloudClient {
    async fn load_sensors(&self) -> CloudResult<Vec<CloudSensor>> {
        self.check_authorized()?;
        Ok(self.sensors.read().await.clone())
    }

    async fn load_records(
        &self,
        mac_id: &MacId,
        since: OffsetDateTime,
        until: Option<OffsetDateTime>,
    ) -> CloudResult<Vec<Record>> {
        self.check_authorized()?;
        self.record_loads.fetch_add(1, Ordering::Relaxed);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.failing_records.read().await.contains(mac_id) {
            return Err(CloudError::Other(format!("Injected failure for {mac_id}")));
        }

        Ok(self
            .records
            .read()
            .await
            .get(mac_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.date > since && until.is_none_or(|until| r.date <= until))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn load_sensors_dense(&self, filter: DenseFilter) -> CloudResult<Vec<DenseSensor>> {
        self.check_authorized()?;
        let latest = self.latest.read().await;
        Ok(self
            .sensors
            .read()
            .await
            .iter()
            .filter(|sensor| filter.matches(sensor))
            .map(|sensor| DenseSensor {
                sensor: sensor.clone(),
                record: latest.get(&sensor.mac_id).cloned(),
            })
            .collect())
    }

    async fn get_settings(&self) -> CloudResult<CloudSettings> {
        self.check_authorized()?;
        Ok(self.settings.read().await.clone())
    }

    async fn load_alerts(&self) -> CloudResult<Vec<CloudSensorAlerts>> {
        self.check_authorized()?;
        Ok(self.alerts.read().await.clone())
    }

    async fn submit(&self, request: &QueuedRequest) -> CloudResult<()> {
        self.check_authorized()?;
        if self.failing_submits.load(Ordering::Relaxed) {
            return Err(CloudError::Api {
                status: 500,
                message: "Injected submit failure".to_string(),
            });
        }
        self.submitted.write().await.push(request.clone());
        Ok(())
    }
}

/// Builder for [`MockCloudClient`].
#[derive(Debug, Default)]
pub struct MockCloudClientBuilder {
    sensors: Vec<CloudSensor>,
    records: HashMap<MacId, Vec<Record>>,
    latest: HashMap<MacId, Record>,
    settings: CloudSettings,
    alerts: Vec<CloudSensorAlerts>,
    latency: Duration,
}

impl MockCloudClientBuilder {
    /// Add a sensor.
    pub fn sensor(mut self, sensor: CloudSensor) -> Self {
        self.sensors.push(sensor);
        self
    }

    /// Add history records for a sensor.
    pub fn records(mut self, mac_id: &MacId, records: Vec<Record>) -> Self {
        self.records.entry(mac_id.clone()).or_default().extend(records);
        self
    }

    /// Set the dense-endpoint measurement of a sensor.
    pub fn latest(mut self, mac_id: &MacId, record: Record) -> Self {
        self.latest.insert(mac_id.clone(), record);
        self
    }

    /// Set the account settings.
    pub fn settings(mut self, settings: CloudSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the alert rules of a sensor.
    pub fn alerts(mut self, mac_id: &MacId, alerts: Vec<SensorAlert>) -> Self {
        self.alerts.push(CloudSensorAlerts {
            mac_id: mac_id.clone(),
            alerts,
        });
        self
    }

    /// Set the history download latency.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Build the mock cloud.
    pub fn build(self) -> MockCloudClient {
        MockCloudClient {
            sensors: RwLock::new(self.sensors),
            records: RwLock::new(self.records),
            latest: RwLock::new(self.latest),
            settings: RwLock::new(self.settings),
            alerts: RwLock::new(self.alerts),
            latency_ms: AtomicU64::new(self.latency.as_millis() as u64),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn mac(n: u8) -> MacId {
        MacId::parse(&format!("AA:BB:CC:DD:EE:{n:02X}")).unwrap()
    }

    #[tokio::test]
    async fn test_records_filtered_by_range() {
        let t0 = datetime!(2024-01-01 00:00 UTC);
        let records = (0..5)
            .map(|i| Record::for_mac(mac(1), t0 + time::Duration::hours(i)))
            .collect();
        let cloud = MockCloudClient::builder().records(&mac(1), records).build();

        let after = cloud.load_records(&mac(1), t0, None).await.unwrap();
        assert_eq!(after.len(), 4);

        let window = cloud
            .load_records(&mac(1), t0, Some(t0 + time::Duration::hours(2)))
            .await
            .unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(cloud.record_load_count(), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_injection() {
        let cloud = MockCloudClient::new();
        cloud.set_unauthorized(true);
        assert!(matches!(
            cloud.load_sensors().await,
            Err(CloudError::Unauthorized)
        ));
        cloud.set_unauthorized(false);
        assert!(cloud.load_sensors().await.is_ok());
    }

    #[tokio::test]
    async fn test_record_failure_injection() {
        let cloud = MockCloudClient::new();
        cloud.fail_records_for(&mac(2)).await;
        let since = datetime!(2024-01-01 00:00 UTC);
        assert!(cloud.load_records(&mac(2), since, None).await.is_err());
        assert!(cloud.load_records(&mac(3), since, None).await.is_ok());
        cloud.clear_failure(&mac(2)).await;
        assert!(cloud.load_records(&mac(2), since, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_dense_pairs_sensor_with_latest() {
        let t0 = datetime!(2024-01-01 00:00 UTC);
        let cloud = MockCloudClient::builder()
            .sensor(CloudSensor::new(mac(1), "a"))
            .sensor(CloudSensor::new(mac(2), "b"))
            .latest(&mac(1), Record::for_mac(mac(1), t0))
            .build();

        let dense = cloud.load_sensors_dense(DenseFilter::All).await.unwrap();
        assert_eq!(dense.len(), 2);
        assert!(dense[0].record.is_some());
        assert!(dense[1].record.is_none());

        cloud.remove_sensor(&mac(1)).await;
        assert_eq!(cloud.load_sensors().await.unwrap().len(), 1);
    }
}
