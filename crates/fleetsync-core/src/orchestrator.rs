//! Full sync cycle.
//!
//! [`SyncOrchestrator::sync_all`] reconciles sensors first. Once that
//! succeeds it runs, concurrently:
//!
//! - one history download per reconciled sensor, through the bounded queue
//! - the latest-record merge
//! - settings and alerts
//! - replay of queued requests
//!
//! A failure in one of those phases is reported in the [`SyncReport`]
//! without affecting the others. Only a reconciliation failure fails the
//! whole call.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::future::join_all;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use fleetsync_types::{Record, Sensor, SensorKey, SyncStatus};

use crate::alerts::AlertSync;
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::events::{EventDispatcher, SyncEvent, SyncPhase};
use crate::latest::{LatestOutcome, LatestRecordMerger};
use crate::local::SyncStateStore;
use crate::pending::{PendingOutcome, PendingRequests};
use crate::queue::{BoundedTaskQueue, QueueError};
use crate::reconcile::{ReconcileOutcome, SensorReconciler};
use crate::records::RecordSyncOperation;
use crate::settings::SettingsSync;

/// Outcome of one [`SyncOrchestrator::sync_all`] call.
#[derive(Debug)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub sensors: ReconcileOutcome,
    /// Records stored per sensor.
    pub history: BTreeMap<SensorKey, Result<Vec<Record>>>,
    pub latest: Result<LatestOutcome>,
    /// Names of the settings that changed.
    pub settings: Result<Vec<&'static str>>,
    /// Number of sensors whose alert rules changed.
    pub alerts: Result<usize>,
    pub pending: Result<PendingOutcome>,
}

impl SyncReport {
    /// Every failure of the run, labelled by phase and sensor.
    pub fn failures(&self) -> Vec<(String, &SyncError)> {
        let mut failures = Vec::new();

        for (key, err) in &self.sensors.failures {
            failures.push((format!("sensors/{key}"), err));
        }
        for (key, result) in &self.history {
            if let Err(err) = result {
                failures.push((format!("history/{key}"), err));
            }
        }
        match &self.latest {
            Ok(outcome) => {
                for (key, err) in &outcome.failures {
                    failures.push((format!("latest/{key}"), err));
                }
            }
            Err(err) => failures.push(("latest".to_string(), err)),
        }
        if let Err(err) = &self.settings {
            failures.push(("settings".to_string(), err));
        }
        if let Err(err) = &self.alerts {
            failures.push(("alerts".to_string(), err));
        }
        if let Err(err) = &self.pending {
            failures.push(("pending".to_string(), err));
        }

        failures
    }

    /// Whether every phase succeeded for every sensor.
    pub fn is_complete_success(&self) -> bool {
        self.failures().is_empty()
    }

    /// Records stored across all sensors.
    pub fn records_synced(&self) -> usize {
        self.history
            .values()
            .filter_map(|result| result.as_ref().ok())
            .map(Vec::len)
            .sum()
    }
}

/// Clears the in-progress flag when a run ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs sync cycles against one context.
pub struct SyncOrchestrator {
    ctx: SyncContext,
    queue: BoundedTaskQueue,
    syncing: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(ctx: SyncContext) -> Self {
        let queue = BoundedTaskQueue::new(ctx.config.queue_capacity);
        Self {
            ctx,
            queue,
            syncing: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Event channel of this engine.
    pub fn events(&self) -> &EventDispatcher {
        &self.ctx.events
    }

    /// Whether a [`sync_all`](Self::sync_all) call is in progress.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Cancel the history download of one sensor.
    ///
    /// A queued download never starts. A running one stops if it has not
    /// started writing yet. Returns `false` if nothing was queued or running.
    pub fn stop_sync(&self, key: &SensorKey) -> bool {
        self.queue.cancel(key)
    }

    /// Run a full sync cycle.
    ///
    /// Fails with [`SyncError::QueueIsAlreadySyncing`] if a cycle is in
    /// progress, and with the reconciliation error if that phase fails.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
            warn!("Sync requested while another sync is running");
            return Err(SyncError::QueueIsAlreadySyncing);
        };

        let run_id = Uuid::new_v4();
        let started_at = self.ctx.now();
        let auth_reported = AtomicBool::new(false);
        info!("Sync run {} started", run_id);

        let sensors = self
            .phase(
                SyncPhase::Sensors,
                &auth_reported,
                SensorReconciler::new(&self.ctx).reconcile(),
            )
            .await?;

        let latest_merger = LatestRecordMerger::new(&self.ctx);
        let settings_sync = SettingsSync::new(&self.ctx);
        let alert_sync = AlertSync::new(&self.ctx);
        let pending_requests = PendingRequests::new(&self.ctx);
        let (history, latest, settings, alerts, pending) = tokio::join!(
            self.sync_history(&sensors.synced, &auth_reported),
            self.phase(
                SyncPhase::Latest,
                &auth_reported,
                latest_merger.run()
            ),
            self.phase(
                SyncPhase::Settings,
                &auth_reported,
                settings_sync.run()
            ),
            self.phase(
                SyncPhase::Alerts,
                &auth_reported,
                alert_sync.run()
            ),
            self.phase(
                SyncPhase::Pending,
                &auth_reported,
                pending_requests.execute()
            ),
        );

        let report = SyncReport {
            run_id,
            started_at,
            finished_at: self.ctx.now(),
            sensors,
            history,
            latest,
            settings,
            alerts,
            pending,
        };

        let failures = report.failures().len();
        if failures == 0 {
            info!(
                "Sync run {} finished: {} records",
                run_id,
                report.records_synced()
            );
        } else {
            warn!("Sync run {} finished with {} failures", run_id, failures);
        }
        Ok(report)
    }

    /// Replay queued requests outside a full cycle.
    pub async fn execute_pending(&self) -> Result<PendingOutcome> {
        let auth_reported = AtomicBool::new(false);
        self.phase(
            SyncPhase::Pending,
            &auth_reported,
            PendingRequests::new(&self.ctx).execute(),
        )
        .await
    }

    /// Run one phase, emitting its lifecycle events.
    async fn phase<T>(
        &self,
        phase: SyncPhase,
        auth_reported: &AtomicBool,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        self.ctx.emit(SyncEvent::PhaseStarted { phase });
        match work.await {
            Ok(value) => {
                self.ctx.emit(SyncEvent::PhaseSucceeded { phase });
                Ok(value)
            }
            Err(e) => {
                let e = e.in_phase(phase);
                warn!("{}", e);
                self.report_unauthorized(&e, auth_reported);
                self.ctx.emit(SyncEvent::PhaseFailed {
                    phase,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn sync_history(
        &self,
        sensors: &[Sensor],
        auth_reported: &AtomicBool,
    ) -> BTreeMap<SensorKey, Result<Vec<Record>>> {
        let phase = SyncPhase::History;
        self.ctx.emit(SyncEvent::PhaseStarted { phase });

        let total = sensors.len();
        let completed = AtomicUsize::new(0);
        let tasks = sensors.iter().filter_map(|sensor| {
            let key = sensor.key()?;
            let completed = &completed;
            Some(async move {
                let result = self.sync_sensor(key.clone(), sensor).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                self.ctx.emit(SyncEvent::PhaseProgress {
                    phase,
                    completed: done,
                    total,
                });
                (key, result.map_err(|e| e.in_phase(phase)))
            })
        });
        let results: BTreeMap<_, _> = join_all(tasks).await.into_iter().collect();

        let failed: Vec<&SyncError> = results.values().filter_map(|r| r.as_ref().err()).collect();
        for err in &failed {
            self.report_unauthorized(err, auth_reported);
        }
        if failed.is_empty() {
            self.ctx.emit(SyncEvent::PhaseSucceeded { phase });
        } else {
            self.ctx.emit(SyncEvent::PhaseFailed {
                phase,
                error: format!("{} of {} sensors failed", failed.len(), total),
            });
        }
        results
    }

    async fn sync_sensor(&self, key: SensorKey, sensor: &Sensor) -> Result<Vec<Record>> {
        let queued = self
            .queue
            .run(key.clone(), |token| {
                RecordSyncOperation::new(&self.ctx, sensor, token).run()
            })
            .await;

        match queued {
            Ok(result) => result,
            Err(QueueError::Cancelled(key)) => {
                self.ctx.store.set_sync_status(SyncStatus::Idle, &key).await?;
                self.ctx.events.sensor_status(&key, SyncStatus::Idle);
                Err(SyncError::Cancelled)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Raise the authorization signal once per run.
    fn report_unauthorized(&self, err: &SyncError, auth_reported: &AtomicBool) {
        if err.is_unauthorized() && !auth_reported.swap(true, Ordering::SeqCst) {
            warn!("Cloud rejected the credentials");
            self.ctx.emit(SyncEvent::AuthorizationFailed);
        }
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("ctx", &self.ctx)
            .field("queue", &self.queue)
            .field("syncing", &self.is_syncing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockCloudClient;
    use crate::cloud::CloudSensor;
    use crate::test_support::{harness, mac};

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = SyncGuard::acquire(&flag).unwrap();
            assert!(SyncGuard::acquire(&flag).is_none());
        }
        assert!(SyncGuard::acquire(&flag).is_some());
    }

    #[tokio::test]
    async fn test_empty_cloud_sync_succeeds() {
        let h = harness(MockCloudClient::new());
        let orchestrator = SyncOrchestrator::new(h.ctx.clone());

        let report = orchestrator.sync_all().await.unwrap();
        assert!(report.is_complete_success());
        assert!(report.history.is_empty());
        assert!(!orchestrator.is_syncing());
    }

    #[tokio::test]
    async fn test_phase_events_are_emitted() {
        let cloud = MockCloudClient::builder()
            .sensor(CloudSensor::new(mac(1), "Sauna"))
            .build();
        let h = harness(cloud);
        let orchestrator = SyncOrchestrator::new(h.ctx.clone());
        let mut rx = orchestrator.events().subscribe();

        orchestrator.sync_all().await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events.first(),
            Some(&SyncEvent::PhaseStarted {
                phase: SyncPhase::Sensors
            })
        );
        for phase in [
            SyncPhase::Sensors,
            SyncPhase::History,
            SyncPhase::Latest,
            SyncPhase::Settings,
            SyncPhase::Alerts,
            SyncPhase::Pending,
        ] {
            assert!(
                events.contains(&SyncEvent::PhaseSucceeded { phase }),
                "{phase} did not succeed"
            );
        }
        assert!(events.contains(&SyncEvent::PhaseProgress {
            phase: SyncPhase::History,
            completed: 1,
            total: 1
        }));
    }

    #[tokio::test]
    async fn test_reconcile_failure_fails_the_call() {
        let cloud = MockCloudClient::new();
        cloud.set_unauthorized(true);
        let h = harness(cloud);
        let orchestrator = SyncOrchestrator::new(h.ctx.clone());

        let err = orchestrator.sync_all().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Phase {
                phase: SyncPhase::Sensors,
                ..
            }
        ));
        assert!(err.is_unauthorized());
        assert!(!orchestrator.is_syncing());
    }
}
