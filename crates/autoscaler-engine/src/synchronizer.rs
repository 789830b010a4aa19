//! Active-schedule reconciliation.
//!
//! The scheduler owns the authoritative "active schedule per app" view; the
//! engine keeps its own copy. The two drift when a start or end event is
//! lost (restart, delivery failure). A sync pass compares both views and
//! replays the missing starts and ends through the engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use autoscaler_state::{ActiveSchedule, AppId, ScheduleId};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::collaborators::{ActiveScheduleHandler, ScalingEngineStore, SchedulerStore};

/// Outcome counts of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Schedules started on the engine.
    pub started: usize,
    /// Schedules ended on the engine.
    pub ended: usize,
    /// Reconciliation calls that returned an error.
    pub failed: usize,
}

enum Reconcile {
    Start,
    End,
}

/// Reconciles the scheduler's active schedules with the engine's.
pub struct ActiveScheduleSynchronizer {
    scheduler: Arc<dyn SchedulerStore>,
    engine_store: Arc<dyn ScalingEngineStore>,
    handler: Arc<dyn ActiveScheduleHandler>,
}

impl ActiveScheduleSynchronizer {
    pub fn new(
        scheduler: Arc<dyn SchedulerStore>,
        engine_store: Arc<dyn ScalingEngineStore>,
        handler: Arc<dyn ActiveScheduleHandler>,
    ) -> Self {
        Self {
            scheduler,
            engine_store,
            handler,
        }
    }

    /// Run one reconciliation pass and wait for every per-app call.
    ///
    /// A failed read of either view aborts the pass before any call is made.
    pub async fn sync(&self) -> SyncReport {
        let scheduled = match self.scheduler.get_active_schedules().await {
            Ok(schedules) => schedules,
            Err(e) => {
                error!(error = %e, "failed to get active schedules from scheduler store");
                return SyncReport::default();
            }
        };
        let recorded = match self.engine_store.get_active_schedules().await {
            Ok(schedules) => schedules,
            Err(e) => {
                error!(error = %e, "failed to get active schedules from scaling engine store");
                return SyncReport::default();
            }
        };

        let (starts, ends) = diff(scheduled, &recorded);
        debug!(
            scheduled = starts.len(),
            ended = ends.len(),
            "active schedules out of sync"
        );

        let mut tasks = JoinSet::new();
        for (app_id, schedule) in starts {
            let handler = self.handler.clone();
            tasks.spawn(async move {
                info!(%app_id, schedule_id = %schedule.schedule_id, "starting missed active schedule");
                let outcome = handler.set_active_schedule(&app_id, &schedule).await;
                (Reconcile::Start, app_id, outcome)
            });
        }
        for (app_id, schedule_id) in ends {
            let handler = self.handler.clone();
            tasks.spawn(async move {
                info!(%app_id, %schedule_id, "ending stale active schedule");
                let outcome = handler.remove_active_schedule(&app_id, &schedule_id).await;
                (Reconcile::End, app_id, outcome)
            });
        }

        let mut report = SyncReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((kind, _, Ok(()))) => match kind {
                    Reconcile::Start => report.started += 1,
                    Reconcile::End => report.ended += 1,
                },
                Ok((_, app_id, Err(e))) => {
                    warn!(%app_id, error = %e, "failed to reconcile active schedule");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "active schedule reconciliation task panicked");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Sync immediately, then every `interval`, until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "active schedule synchronizer started");
        loop {
            let report = self.sync().await;
            debug!(
                started = report.started,
                ended = report.ended,
                failed = report.failed,
                "active schedule sync pass complete"
            );

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    debug!("active schedule synchronizer shutting down");
                    break;
                }
            }
        }
    }
}

/// Schedules to start (missing or stale on the engine) and to end
/// (unknown to the scheduler).
fn diff(
    mut scheduled: HashMap<AppId, ActiveSchedule>,
    recorded: &HashMap<AppId, ScheduleId>,
) -> (Vec<(AppId, ActiveSchedule)>, Vec<(AppId, ScheduleId)>) {
    let ends = recorded
        .iter()
        .filter(|(app_id, _)| !scheduled.contains_key(*app_id))
        .map(|(app_id, schedule_id)| (app_id.clone(), schedule_id.clone()))
        .collect();

    scheduled.retain(|app_id, schedule| recorded.get(app_id) != Some(&schedule.schedule_id));
    (scheduled.into_iter().collect(), ends)
}
