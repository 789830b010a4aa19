//! ScalingEngine — per-app locked scaling decisions.
//!
//! Every operation takes the app's stripe of the lock pool, works on a
//! pending `AppScalingHistory`, and saves that record on every exit path
//! once the decision has started. Store failures before a decision starts
//! (reading or writing the active schedule) return without a record.

use std::sync::Arc;
use std::time::SystemTime;

use autoscaler_state::{
    ActiveSchedule, AppScalingHistory, AppScalingResult, ScalingStatus, ScalingType, Trigger,
};
use tracing::{debug, error, info, warn};

use crate::adjustment::{AdjustmentError, compute_new_instances};
use crate::clock::{Clock, SystemClock, unix_nanos};
use crate::collaborators::{PlatformClient, PolicyStore, ProcessType, ScalingEngineStore};
use crate::error::{EngineError, EngineResult};
use crate::lock::StripedLock;

/// Cooldown applied when neither the trigger nor the config sets one.
pub const DEFAULT_COOL_DOWN_SECS: u64 = 300;

/// App label that opts an app out of dynamic scaling.
pub const DISABLE_AUTOSCALING_LABEL: &str = "app-autoscaler.cloudfoundry.org/disable-autoscaling";

const APP_STATE_STARTED: &str = "STARTED";

/// The scaling decision engine.
pub struct ScalingEngine {
    platform: Arc<dyn PlatformClient>,
    policies: Arc<dyn PolicyStore>,
    store: Arc<dyn ScalingEngineStore>,
    app_lock: StripedLock,
    clock: Arc<dyn Clock>,
    default_cool_down_secs: u64,
}

impl ScalingEngine {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        policies: Arc<dyn PolicyStore>,
        store: Arc<dyn ScalingEngineStore>,
        app_lock: StripedLock,
    ) -> Self {
        Self {
            platform,
            policies,
            store,
            app_lock,
            clock: Arc::new(SystemClock),
            default_cool_down_secs: DEFAULT_COOL_DOWN_SECS,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cooldown used for triggers that do not set their own.
    pub fn with_default_cool_down_secs(mut self, secs: u64) -> Self {
        self.default_cool_down_secs = secs;
        self
    }

    pub fn default_cool_down_secs(&self) -> u64 {
        self.default_cool_down_secs
    }

    /// Apply an adjustment expression to a current instance count.
    pub fn compute_new_instances(
        &self,
        current: i32,
        adjustment: &str,
    ) -> Result<i32, AdjustmentError> {
        compute_new_instances(current, adjustment)
    }

    // ── Dynamic scaling ───────────────────────────────────────────

    /// Handle a dynamic scaling request for `app_id`.
    pub async fn scale(&self, app_id: &str, trigger: &Trigger) -> EngineResult<AppScalingResult> {
        let _guard = self.app_lock.get_lock(app_id).lock().await;

        let now = self.clock.now();
        let mut history = AppScalingHistory::pending(
            app_id,
            unix_nanos(now),
            ScalingType::Dynamic,
            dynamic_reason(trigger),
        );
        let outcome = self.decide_scale(app_id, trigger, now, &mut history).await;
        self.save_history(&history).await;
        outcome
    }

    async fn decide_scale(
        &self,
        app_id: &str,
        trigger: &Trigger,
        now: SystemTime,
        history: &mut AppScalingHistory,
    ) -> EngineResult<AppScalingResult> {
        let app = match self.platform.get_app_and_processes(app_id).await {
            Ok(app) => app,
            Err(e) => {
                error!(%app_id, error = %e, "failed to get app info");
                mark_failed(history, format!("failed to get app info: {e}"));
                return Err(EngineError::AppInfo(e));
            }
        };
        history.old_instances = app.instances;

        if !app.state.eq_ignore_ascii_case(APP_STATE_STARTED) {
            info!(%app_id, state = %app.state, "app is not started, skip scaling");
            mark_ignored(history, "app is not started");
            return Ok(ignored(app_id, 0));
        }

        if let Some(hint) = &app.disable_autoscaling {
            info!(%app_id, "autoscaling disabled by label, skip scaling");
            mark_ignored(history, disabled_message(hint));
            return Ok(ignored(app_id, 0));
        }

        let (allowed, cooldown_expired_at) = match self.store.can_scale_app(app_id).await {
            Ok(verdict) => verdict,
            Err(e) => {
                error!(%app_id, error = %e, "failed to check app cooldown setting");
                mark_failed(history, "failed to check app cooldown setting");
                return Err(EngineError::Cooldown(e));
            }
        };
        if !allowed {
            info!(%app_id, cooldown_expired_at, "app in cooldown period");
            mark_ignored(history, "app in cooldown period");
            return Ok(ignored(app_id, cooldown_expired_at));
        }

        let desired = match compute_new_instances(app.instances, &trigger.adjustment) {
            Ok(n) => n,
            Err(e) => {
                error!(%app_id, adjustment = %trigger.adjustment, error = %e, "failed to compute new app instances");
                mark_failed(history, "failed to compute new app instances");
                return Err(e.into());
            }
        };

        let (instance_min, instance_max) = match self.store.get_active_schedule(app_id).await {
            Ok(Some(schedule)) => {
                debug!(%app_id, schedule_id = %schedule.schedule_id, "using active schedule bounds");
                (schedule.instance_min, schedule.instance_max)
            }
            Ok(None) => match self.policies.get_app_policy(app_id).await {
                Ok(Some(policy)) => (policy.instance_min, policy.instance_max),
                Ok(None) => {
                    info!(%app_id, "app does not have policy set");
                    mark_ignored(history, "app does not have policy set");
                    return Ok(ignored(app_id, 0));
                }
                Err(e) => {
                    error!(%app_id, error = %e, "failed to get scaling policy");
                    mark_failed(history, "failed to get scaling policy");
                    return Err(EngineError::Policy(e));
                }
            },
            Err(e) => {
                error!(%app_id, error = %e, "failed to get active schedule");
                mark_failed(history, "failed to get active schedule");
                return Err(EngineError::ActiveSchedule(e));
            }
        };

        let new_instances = clamp_instances(desired, instance_min, instance_max, history);
        history.new_instances = new_instances;
        if new_instances == app.instances {
            debug!(%app_id, instances = new_instances, "instance count unchanged");
            history.status = ScalingStatus::Ignored;
            return Ok(ignored(app_id, 0));
        }

        self.set_instances(app_id, new_instances, history).await?;

        let cool_down = trigger.cool_down(self.default_cool_down_secs);
        let cooldown_expired_at = now
            .checked_add(cool_down)
            .map(unix_nanos)
            .unwrap_or(i64::MAX);
        if let Err(e) = self
            .store
            .update_scaling_cooldown_expire_time(app_id, cooldown_expired_at)
            .await
        {
            warn!(%app_id, error = %e, "failed to update scaling cooldown expire time");
        }

        Ok(AppScalingResult {
            app_id: app_id.to_string(),
            status: ScalingStatus::Succeeded,
            adjustment: new_instances - app.instances,
            cooldown_expired_at,
        })
    }

    // ── Scheduled scaling ─────────────────────────────────────────

    /// Start a schedule for `app_id`, raising the app to the schedule's
    /// initial floor or lowering it to its max.
    pub async fn set_active_schedule(
        &self,
        app_id: &str,
        schedule: &ActiveSchedule,
    ) -> EngineResult<()> {
        let _guard = self.app_lock.get_lock(app_id).lock().await;

        let current = self
            .store
            .get_active_schedule(app_id)
            .await
            .map_err(EngineError::Store)?;
        match current {
            Some(current) if current.schedule_id == schedule.schedule_id => {
                info!(%app_id, schedule_id = %schedule.schedule_id, "duplicate request to set active schedule");
                return Ok(());
            }
            Some(current) => {
                info!(
                    %app_id,
                    current_schedule_id = %current.schedule_id,
                    schedule_id = %schedule.schedule_id,
                    "replacing active schedule"
                );
            }
            None => {}
        }

        self.store
            .set_active_schedule(app_id, schedule)
            .await
            .map_err(EngineError::Store)?;

        let mut history = AppScalingHistory::pending(
            app_id,
            unix_nanos(self.clock.now()),
            ScalingType::Schedule,
            schedule_start_reason(schedule),
        );
        let outcome = self.start_schedule(app_id, schedule, &mut history).await;
        self.save_history(&history).await;
        outcome
    }

    async fn start_schedule(
        &self,
        app_id: &str,
        schedule: &ActiveSchedule,
        history: &mut AppScalingHistory,
    ) -> EngineResult<()> {
        let current = match self.platform.get_app_processes(app_id, ProcessType::Web).await {
            Ok(n) => n,
            Err(e) => {
                error!(%app_id, error = %e, "failed to get app info");
                mark_failed(history, format!("failed to get app info: {e}"));
                return Err(EngineError::AppInfo(e));
            }
        };
        history.old_instances = current;

        let floor = schedule.instance_min_initial.max(schedule.instance_min);
        let new_instances = clamp_instances(current, floor, schedule.instance_max, history);
        history.new_instances = new_instances;
        if new_instances == current {
            debug!(%app_id, instances = current, "instances within schedule bounds");
            history.status = ScalingStatus::Ignored;
            return Ok(());
        }

        self.set_instances(app_id, new_instances, history).await
    }

    /// End the schedule `schedule_id` of `app_id` and fall back to the
    /// default policy bounds. Unknown or superseded schedules are skipped.
    pub async fn remove_active_schedule(&self, app_id: &str, schedule_id: &str) -> EngineResult<()> {
        let _guard = self.app_lock.get_lock(app_id).lock().await;

        let current = self
            .store
            .get_active_schedule(app_id)
            .await
            .map_err(EngineError::Store)?;
        match current {
            Some(current) if current.schedule_id == schedule_id => {}
            Some(current) => {
                info!(
                    %app_id,
                    %schedule_id,
                    current_schedule_id = %current.schedule_id,
                    "schedule is not the active one, skip removal"
                );
                return Ok(());
            }
            None => {
                info!(%app_id, %schedule_id, "no active schedule, skip removal");
                return Ok(());
            }
        }

        self.store
            .remove_active_schedule(app_id)
            .await
            .map_err(EngineError::Store)?;

        let mut history = AppScalingHistory::pending(
            app_id,
            unix_nanos(self.clock.now()),
            ScalingType::Schedule,
            "schedule ends".to_string(),
        );
        let outcome = self.end_schedule(app_id, &mut history).await;
        self.save_history(&history).await;
        outcome
    }

    async fn end_schedule(&self, app_id: &str, history: &mut AppScalingHistory) -> EngineResult<()> {
        let current = match self.platform.get_app_processes(app_id, ProcessType::Web).await {
            Ok(n) => n,
            Err(e) if e.is_not_found() => {
                info!(%app_id, "app not found, schedule end ignored");
                history.status = ScalingStatus::Ignored;
                history.message = "app not found".to_string();
                return Ok(());
            }
            Err(e) => {
                error!(%app_id, error = %e, "failed to get app info");
                mark_failed(history, format!("failed to get app info: {e}"));
                return Err(EngineError::AppInfo(e));
            }
        };
        history.old_instances = current;

        let policy = match self.policies.get_app_policy(app_id).await {
            Ok(Some(policy)) => policy,
            Ok(None) => {
                info!(%app_id, "app does not have policy set");
                mark_ignored(history, "app does not have policy set");
                return Ok(());
            }
            Err(e) => {
                error!(%app_id, error = %e, "failed to get app policy");
                mark_failed(history, "failed to get app policy");
                return Err(EngineError::Policy(e));
            }
        };

        let new_instances =
            clamp_instances(current, policy.instance_min, policy.instance_max, history);
        history.new_instances = new_instances;
        if new_instances == current {
            debug!(%app_id, instances = current, "instances within policy bounds");
            history.status = ScalingStatus::Ignored;
            return Ok(());
        }

        self.set_instances(app_id, new_instances, history).await
    }

    // ── Shared steps ──────────────────────────────────────────────

    async fn set_instances(
        &self,
        app_id: &str,
        instances: i32,
        history: &mut AppScalingHistory,
    ) -> EngineResult<()> {
        match self.platform.scale_app_web_process(app_id, instances).await {
            Ok(()) => {
                info!(%app_id, old = history.old_instances, new = instances, "app scaled");
                history.status = ScalingStatus::Succeeded;
                Ok(())
            }
            Err(e) => {
                error!(%app_id, instances, error = %e, "failed to set app instances");
                mark_failed(history, format!("failed to set app instances: {e}"));
                Err(EngineError::SetInstances(e))
            }
        }
    }

    async fn save_history(&self, history: &AppScalingHistory) {
        if let Err(e) = self.store.save_scaling_history(history).await {
            warn!(app_id = %history.app_id, error = %e, "failed to save scaling history");
        }
    }
}

/// Clamp to `[min, max]`, noting on the history which bound applied.
fn clamp_instances(instances: i32, min: i32, max: i32, history: &mut AppScalingHistory) -> i32 {
    if instances < min {
        history.message = format!("limited by min instances {min}");
        min
    } else if instances > max {
        history.message = format!("limited by max instances {max}");
        max
    } else {
        instances
    }
}

fn mark_failed(history: &mut AppScalingHistory, error: impl Into<String>) {
    history.status = ScalingStatus::Failed;
    history.error = error.into();
}

fn mark_ignored(history: &mut AppScalingHistory, message: impl Into<String>) {
    history.status = ScalingStatus::Ignored;
    history.new_instances = history.old_instances;
    history.message = message.into();
}

fn ignored(app_id: &str, cooldown_expired_at: i64) -> AppScalingResult {
    AppScalingResult {
        app_id: app_id.to_string(),
        status: ScalingStatus::Ignored,
        adjustment: 0,
        cooldown_expired_at,
    }
}

fn dynamic_reason(trigger: &Trigger) -> String {
    format!(
        "{} instance(s) because {} {} {}{} for {} seconds",
        trigger.adjustment,
        trigger.metric_type,
        trigger.operator,
        trigger.threshold,
        trigger.metric_unit,
        trigger.breach_duration_seconds
    )
}

fn schedule_start_reason(schedule: &ActiveSchedule) -> String {
    format!(
        "schedule starts with instance min {}, instance max {} and instance min initial {}",
        schedule.instance_min, schedule.instance_max, schedule.instance_min_initial
    )
}

fn disabled_message(hint: &str) -> String {
    let message = format!("app is not scaled as the label {DISABLE_AUTOSCALING_LABEL} is set");
    if hint.is_empty() {
        message
    } else {
        format!("{message}: {hint}")
    }
}
