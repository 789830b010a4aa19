//! autoscaler-api — REST API for the scaling engine.
//!
//! Provides axum route handlers that drive the `ScalingEngine` and expose
//! the scaling history audit trail.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/v1/apps/{appid}/scale` | Dynamic scaling request (`Trigger` body) |
//! | GET | `/v1/apps/{appid}/scaling_histories` | Paged scaling history |
//! | GET | `/v1/apps/{appid}/active_schedules` | The app's active schedule |
//! | PUT | `/v1/apps/{appid}/active_schedules/{scheduleid}` | Start a schedule |
//! | DELETE | `/v1/apps/{appid}/active_schedules/{scheduleid}` | End a schedule |
//! | PUT | `/v1/syncActiveSchedules` | Run one active-schedule sync pass |
//! | GET | `/health` | Liveness |

pub mod handlers;

use std::sync::Arc;

use autoscaler_engine::{ActiveScheduleSynchronizer, ScalingEngine};
use autoscaler_state::StateStore;
use axum::Router;
use axum::routing::{get, post, put};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<ScalingEngine>,
    /// The scaling engine's own store (histories, active schedules).
    pub store: StateStore,
    pub synchronizer: Arc<ActiveScheduleSynchronizer>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let app_routes = Router::new()
        .route("/{appid}/scale", post(handlers::scale))
        .route("/{appid}/scaling_histories", get(handlers::get_scaling_histories))
        .route("/{appid}/active_schedules", get(handlers::get_active_schedule))
        .route(
            "/{appid}/active_schedules/{scheduleid}",
            put(handlers::start_active_schedule).delete(handlers::remove_active_schedule),
        );

    Router::new()
        .nest("/v1/apps", app_routes)
        .route("/v1/syncActiveSchedules", put(handlers::sync_active_schedules))
        .route("/health", get(handlers::health))
        .with_state(state)
}
