//! autoscaler-engine — the scaling decision engine.
//!
//! Receives dynamic scaling requests (`Trigger`s) and schedule start/end
//! events, decides whether and how far to change an application's instance
//! count, applies the change through the runtime platform, and records one
//! `AppScalingHistory` per decision.
//!
//! # Decision flow
//!
//! ```text
//! Scale(app, trigger)
//!   lock(app) ─► app info ─► started? ─► autoscaling disabled?
//!             ─► cooldown ─► compute ─► bounds (schedule | policy)
//!             ─► clamp ─► no-op? ─► scale ─► cooldown expiry
//!   save history (always)
//! ```
//!
//! Collaborators (platform client, policy store, engine store, scheduler
//! store, clock) are traits so the engine can be exercised with fakes.
//! `ActiveScheduleSynchronizer` reconciles the scheduler's view of active
//! schedules with the engine's own and heals any drift. `HistoryPruner`
//! keeps the scaling history within its retention window.

pub mod adjustment;
pub mod clock;
pub mod collaborators;
pub mod engine;
pub mod error;
pub mod lock;
pub mod pruner;
pub mod synchronizer;

#[cfg(test)]
pub(crate) mod fakes;

pub use adjustment::{AdjustmentError, compute_new_instances};
pub use clock::{Clock, SystemClock};
pub use collaborators::{
    ActiveScheduleHandler, AppAndProcesses, PlatformClient, PolicyStore, ProcessType,
    ScalingEngineStore, SchedulerStore,
};
pub use engine::{DEFAULT_COOL_DOWN_SECS, DISABLE_AUTOSCALING_LABEL, ScalingEngine};
pub use error::{EngineError, EngineResult, PlatformError};
pub use lock::StripedLock;
pub use pruner::HistoryPruner;
pub use synchronizer::{ActiveScheduleSynchronizer, SyncReport};
