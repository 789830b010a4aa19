//! Collaborator traits consumed by the engine, and their `StateStore`
//! implementations.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use autoscaler_state::{
    ActiveSchedule, AppId, AppScalingHistory, ScalingPolicy, ScheduleId, StateResult, StateStore,
    store::now_nanos,
};

use crate::engine::ScalingEngine;
use crate::error::{EngineResult, PlatformError};

// ── Runtime platform ──────────────────────────────────────────────

/// Snapshot of an app as reported by the runtime platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppAndProcesses {
    /// Lifecycle state, e.g. `STARTED` or `STOPPED`.
    pub state: String,
    /// Instance count of the web process.
    pub instances: i32,
    /// Content of the disable-autoscaling label, if the label is present.
    pub disable_autoscaling: Option<String>,
}

/// A process type of an app. Only the web process is ever scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessType {
    Web,
}

impl ProcessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads and changes the instance count of apps on the runtime platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn get_app_and_processes(&self, app_id: &str) -> Result<AppAndProcesses, PlatformError>;

    async fn get_app_processes(
        &self,
        app_id: &str,
        process_type: ProcessType,
    ) -> Result<i32, PlatformError>;

    async fn scale_app_web_process(&self, app_id: &str, instances: i32)
    -> Result<(), PlatformError>;
}

// ── Stores ────────────────────────────────────────────────────────

/// Default scaling policies. `None` means no policy is configured.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_app_policy(&self, app_id: &str) -> StateResult<Option<ScalingPolicy>>;
}

/// The engine's own state: cooldowns, active schedules, and history.
#[async_trait]
pub trait ScalingEngineStore: Send + Sync {
    /// Whether the app is out of cooldown, with the stored expiry (ns).
    async fn can_scale_app(&self, app_id: &str) -> StateResult<(bool, i64)>;

    async fn get_active_schedule(&self, app_id: &str) -> StateResult<Option<ActiveSchedule>>;

    async fn set_active_schedule(&self, app_id: &str, schedule: &ActiveSchedule)
    -> StateResult<()>;

    async fn remove_active_schedule(&self, app_id: &str) -> StateResult<()>;

    async fn save_scaling_history(&self, history: &AppScalingHistory) -> StateResult<()>;

    async fn update_scaling_cooldown_expire_time(
        &self,
        app_id: &str,
        expire_at: i64,
    ) -> StateResult<()>;

    /// All active schedules the engine knows of: app id → schedule id.
    async fn get_active_schedules(&self) -> StateResult<HashMap<AppId, ScheduleId>>;
}

/// The scheduler's authoritative view of active schedules.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    async fn get_active_schedules(&self) -> StateResult<HashMap<AppId, ActiveSchedule>>;
}

/// Receiver of schedule start/end events.
#[async_trait]
pub trait ActiveScheduleHandler: Send + Sync {
    async fn set_active_schedule(&self, app_id: &str, schedule: &ActiveSchedule)
    -> EngineResult<()>;

    async fn remove_active_schedule(&self, app_id: &str, schedule_id: &str) -> EngineResult<()>;
}

#[async_trait]
impl ActiveScheduleHandler for ScalingEngine {
    async fn set_active_schedule(
        &self,
        app_id: &str,
        schedule: &ActiveSchedule,
    ) -> EngineResult<()> {
        ScalingEngine::set_active_schedule(self, app_id, schedule).await
    }

    async fn remove_active_schedule(&self, app_id: &str, schedule_id: &str) -> EngineResult<()> {
        ScalingEngine::remove_active_schedule(self, app_id, schedule_id).await
    }
}

// ── StateStore ────────────────────────────────────────────────────

#[async_trait]
impl PolicyStore for StateStore {
    async fn get_app_policy(&self, app_id: &str) -> StateResult<Option<ScalingPolicy>> {
        self.get_policy(app_id)
    }
}

#[async_trait]
impl ScalingEngineStore for StateStore {
    async fn can_scale_app(&self, app_id: &str) -> StateResult<(bool, i64)> {
        StateStore::can_scale_app(self, app_id, now_nanos())
    }

    async fn get_active_schedule(&self, app_id: &str) -> StateResult<Option<ActiveSchedule>> {
        StateStore::get_active_schedule(self, app_id)
    }

    async fn set_active_schedule(
        &self,
        app_id: &str,
        schedule: &ActiveSchedule,
    ) -> StateResult<()> {
        StateStore::set_active_schedule(self, app_id, schedule)
    }

    async fn remove_active_schedule(&self, app_id: &str) -> StateResult<()> {
        StateStore::remove_active_schedule(self, app_id).map(|_| ())
    }

    async fn save_scaling_history(&self, history: &AppScalingHistory) -> StateResult<()> {
        StateStore::save_scaling_history(self, history)
    }

    async fn update_scaling_cooldown_expire_time(
        &self,
        app_id: &str,
        expire_at: i64,
    ) -> StateResult<()> {
        StateStore::update_scaling_cooldown_expire_time(self, app_id, expire_at)
    }

    async fn get_active_schedules(&self) -> StateResult<HashMap<AppId, ScheduleId>> {
        StateStore::get_active_schedules(self)
    }
}

#[async_trait]
impl SchedulerStore for StateStore {
    async fn get_active_schedules(&self) -> StateResult<HashMap<AppId, ActiveSchedule>> {
        self.list_scheduler_active_schedules()
    }
}
