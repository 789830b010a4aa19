//! Hand-written collaborator fakes for engine and synchronizer tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use autoscaler_state::{
    ActiveSchedule, AppId, AppScalingHistory, ScalingPolicy, ScheduleId, StateError, StateResult,
};
use tokio::sync::Barrier;

use crate::clock::Clock;
use crate::collaborators::{
    ActiveScheduleHandler, AppAndProcesses, PlatformClient, PolicyStore, ProcessType,
    ScalingEngineStore, SchedulerStore,
};
use crate::error::{EngineError, EngineResult, PlatformError};

fn injected(slot: &Mutex<Option<String>>) -> StateResult<()> {
    match slot.lock().unwrap().clone() {
        Some(msg) => Err(StateError::Read(msg)),
        None => Ok(()),
    }
}

fn injected_platform(slot: &Mutex<Option<PlatformError>>) -> Result<(), PlatformError> {
    match slot.lock().unwrap().clone() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// ── Clock ─────────────────────────────────────────────────────────

/// A settable clock.
#[derive(Debug)]
pub(crate) struct FakeClock {
    now: Mutex<SystemTime>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// A clock frozen at `nanos` since the unix epoch.
    pub fn at_unix_nanos(nanos: u64) -> Self {
        Self::new(UNIX_EPOCH + Duration::from_nanos(nanos))
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, to: SystemTime) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}

// ── Platform ──────────────────────────────────────────────────────

pub(crate) struct FakePlatform {
    pub app: Mutex<AppAndProcesses>,
    pub get_app_error: Mutex<Option<PlatformError>>,
    pub get_processes_error: Mutex<Option<PlatformError>>,
    pub scale_error: Mutex<Option<PlatformError>>,
    pub scale_calls: Mutex<Vec<(String, i32)>>,
    /// `begin:{app}` on app lookup, `end:{app}` on scale.
    pub events: Mutex<Vec<String>>,
    pub delay: Mutex<Duration>,
    pub rendezvous: Mutex<Option<std::sync::Arc<Barrier>>>,
}

impl FakePlatform {
    pub fn started(instances: i32) -> Self {
        Self {
            app: Mutex::new(AppAndProcesses {
                state: "STARTED".to_string(),
                instances,
                disable_autoscaling: None,
            }),
            get_app_error: Mutex::new(None),
            get_processes_error: Mutex::new(None),
            scale_error: Mutex::new(None),
            scale_calls: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
            rendezvous: Mutex::new(None),
        }
    }

    pub fn scale_calls(&self) -> Vec<(String, i32)> {
        self.scale_calls.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn get_app_and_processes(&self, app_id: &str) -> Result<AppAndProcesses, PlatformError> {
        self.events.lock().unwrap().push(format!("begin:{app_id}"));
        let barrier = self.rendezvous.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        self.pause().await;
        injected_platform(&self.get_app_error)?;
        Ok(self.app.lock().unwrap().clone())
    }

    async fn get_app_processes(
        &self,
        _app_id: &str,
        _process_type: ProcessType,
    ) -> Result<i32, PlatformError> {
        injected_platform(&self.get_processes_error)?;
        Ok(self.app.lock().unwrap().instances)
    }

    async fn scale_app_web_process(
        &self,
        app_id: &str,
        instances: i32,
    ) -> Result<(), PlatformError> {
        self.pause().await;
        self.scale_calls
            .lock()
            .unwrap()
            .push((app_id.to_string(), instances));
        self.events.lock().unwrap().push(format!("end:{app_id}"));
        injected_platform(&self.scale_error)?;
        self.app.lock().unwrap().instances = instances;
        Ok(())
    }
}

// ── Policy store ──────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakePolicyStore {
    pub policy: Mutex<Option<ScalingPolicy>>,
    pub error: Mutex<Option<String>>,
    pub calls: AtomicUsize,
}

impl FakePolicyStore {
    pub fn with_bounds(instance_min: i32, instance_max: i32) -> Self {
        let store = Self::default();
        *store.policy.lock().unwrap() = Some(ScalingPolicy {
            instance_min,
            instance_max,
        });
        store
    }
}

#[async_trait]
impl PolicyStore for FakePolicyStore {
    async fn get_app_policy(&self, _app_id: &str) -> StateResult<Option<ScalingPolicy>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        injected(&self.error)?;
        Ok(self.policy.lock().unwrap().clone())
    }
}

// ── Engine store ──────────────────────────────────────────────────

pub(crate) struct FakeEngineStore {
    pub cooldown: Mutex<(bool, i64)>,
    pub cooldown_error: Mutex<Option<String>>,
    pub schedules: Mutex<HashMap<AppId, ActiveSchedule>>,
    pub get_schedule_error: Mutex<Option<String>>,
    pub set_schedule_error: Mutex<Option<String>>,
    pub remove_schedule_error: Mutex<Option<String>>,
    pub save_history_error: Mutex<Option<String>>,
    pub update_cooldown_error: Mutex<Option<String>>,
    pub list_error: Mutex<Option<String>>,
    pub histories: Mutex<Vec<AppScalingHistory>>,
    pub set_schedule_calls: Mutex<Vec<(AppId, ActiveSchedule)>>,
    pub remove_schedule_calls: Mutex<Vec<AppId>>,
    pub cooldown_updates: Mutex<Vec<(AppId, i64)>>,
}

impl Default for FakeEngineStore {
    fn default() -> Self {
        Self {
            cooldown: Mutex::new((true, 0)),
            cooldown_error: Mutex::new(None),
            schedules: Mutex::new(HashMap::new()),
            get_schedule_error: Mutex::new(None),
            set_schedule_error: Mutex::new(None),
            remove_schedule_error: Mutex::new(None),
            save_history_error: Mutex::new(None),
            update_cooldown_error: Mutex::new(None),
            list_error: Mutex::new(None),
            histories: Mutex::new(Vec::new()),
            set_schedule_calls: Mutex::new(Vec::new()),
            remove_schedule_calls: Mutex::new(Vec::new()),
            cooldown_updates: Mutex::new(Vec::new()),
        }
    }
}

impl FakeEngineStore {
    pub fn histories(&self) -> Vec<AppScalingHistory> {
        self.histories.lock().unwrap().clone()
    }

    /// The single history saved so far.
    pub fn only_history(&self) -> AppScalingHistory {
        let histories = self.histories();
        assert_eq!(histories.len(), 1, "expected exactly one history record");
        histories[0].clone()
    }

    pub fn with_schedule(self, app_id: &str, schedule: ActiveSchedule) -> Self {
        self.schedules
            .lock()
            .unwrap()
            .insert(app_id.to_string(), schedule);
        self
    }
}

#[async_trait]
impl ScalingEngineStore for FakeEngineStore {
    async fn can_scale_app(&self, _app_id: &str) -> StateResult<(bool, i64)> {
        injected(&self.cooldown_error)?;
        Ok(*self.cooldown.lock().unwrap())
    }

    async fn get_active_schedule(&self, app_id: &str) -> StateResult<Option<ActiveSchedule>> {
        injected(&self.get_schedule_error)?;
        Ok(self.schedules.lock().unwrap().get(app_id).cloned())
    }

    async fn set_active_schedule(
        &self,
        app_id: &str,
        schedule: &ActiveSchedule,
    ) -> StateResult<()> {
        self.set_schedule_calls
            .lock()
            .unwrap()
            .push((app_id.to_string(), schedule.clone()));
        injected(&self.set_schedule_error)?;
        self.schedules
            .lock()
            .unwrap()
            .insert(app_id.to_string(), schedule.clone());
        Ok(())
    }

    async fn remove_active_schedule(&self, app_id: &str) -> StateResult<()> {
        self.remove_schedule_calls
            .lock()
            .unwrap()
            .push(app_id.to_string());
        injected(&self.remove_schedule_error)?;
        self.schedules.lock().unwrap().remove(app_id);
        Ok(())
    }

    async fn save_scaling_history(&self, history: &AppScalingHistory) -> StateResult<()> {
        self.histories.lock().unwrap().push(history.clone());
        injected(&self.save_history_error)
    }

    async fn update_scaling_cooldown_expire_time(
        &self,
        app_id: &str,
        expire_at: i64,
    ) -> StateResult<()> {
        self.cooldown_updates
            .lock()
            .unwrap()
            .push((app_id.to_string(), expire_at));
        injected(&self.update_cooldown_error)
    }

    async fn get_active_schedules(&self) -> StateResult<HashMap<AppId, ScheduleId>> {
        injected(&self.list_error)?;
        Ok(self
            .schedules
            .lock()
            .unwrap()
            .iter()
            .map(|(app_id, schedule)| (app_id.clone(), schedule.schedule_id.clone()))
            .collect())
    }
}

// ── Scheduler store ───────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeSchedulerStore {
    pub schedules: Mutex<HashMap<AppId, ActiveSchedule>>,
    pub error: Mutex<Option<String>>,
}

impl FakeSchedulerStore {
    pub fn with_schedule(self, app_id: &str, schedule: ActiveSchedule) -> Self {
        self.schedules
            .lock()
            .unwrap()
            .insert(app_id.to_string(), schedule);
        self
    }
}

#[async_trait]
impl SchedulerStore for FakeSchedulerStore {
    async fn get_active_schedules(&self) -> StateResult<HashMap<AppId, ActiveSchedule>> {
        injected(&self.error)?;
        Ok(self.schedules.lock().unwrap().clone())
    }
}

// ── Schedule handler ──────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct RecordingHandler {
    pub set_calls: Mutex<Vec<(AppId, ActiveSchedule)>>,
    pub remove_calls: Mutex<Vec<(AppId, ScheduleId)>>,
    pub failing_apps: Mutex<HashSet<AppId>>,
}

impl RecordingHandler {
    pub fn set_calls(&self) -> Vec<(AppId, ActiveSchedule)> {
        let mut calls = self.set_calls.lock().unwrap().clone();
        calls.sort_by(|a, b| a.0.cmp(&b.0));
        calls
    }

    pub fn remove_calls(&self) -> Vec<(AppId, ScheduleId)> {
        let mut calls = self.remove_calls.lock().unwrap().clone();
        calls.sort();
        calls
    }

    fn outcome(&self, app_id: &str) -> EngineResult<()> {
        if self.failing_apps.lock().unwrap().contains(app_id) {
            return Err(EngineError::Store(StateError::Write("injected".into())));
        }
        Ok(())
    }
}

#[async_trait]
impl ActiveScheduleHandler for RecordingHandler {
    async fn set_active_schedule(
        &self,
        app_id: &str,
        schedule: &ActiveSchedule,
    ) -> EngineResult<()> {
        self.set_calls
            .lock()
            .unwrap()
            .push((app_id.to_string(), schedule.clone()));
        self.outcome(app_id)
    }

    async fn remove_active_schedule(&self, app_id: &str, schedule_id: &str) -> EngineResult<()> {
        self.remove_calls
            .lock()
            .unwrap()
            .push((app_id.to_string(), schedule_id.to_string()));
        self.outcome(app_id)
    }
}
