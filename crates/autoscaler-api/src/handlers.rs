//! REST API handlers.
//!
//! Engine operations go through `ScalingEngine`; history and active
//! schedule reads go straight to the engine's `StateStore`. All JSON
//! responses share the `ApiResponse` envelope.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use tracing::{error, info};

use autoscaler_engine::EngineError;
use autoscaler_state::*;

use crate::ApiState;

const DEFAULT_RESULTS_PER_PAGE: usize = 50;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Map an engine error to a status code. Internal causes stay in the log.
fn engine_error_response(app_id: &str, e: &EngineError, action: &str) -> axum::response::Response {
    if e.is_client_error() {
        error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
    } else if e.is_not_found() {
        error_response("app not found", StatusCode::NOT_FOUND).into_response()
    } else {
        error!(%app_id, error = %e, "{action} failed");
        error_response(&format!("error {action}"), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response()
    }
}

// ── Scaling ────────────────────────────────────────────────────

/// POST /v1/apps/{appid}/scale
pub async fn scale(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
    Json(mut trigger): Json<Trigger>,
) -> impl IntoResponse {
    if trigger.app_id.is_empty() {
        trigger.app_id = app_id.clone();
    }
    match state.engine.scale(&app_id, &trigger).await {
        Ok(result) => ApiResponse::ok(result).into_response(),
        Err(e) => engine_error_response(&app_id, &e, "taking scaling action"),
    }
}

// ── Scaling history ────────────────────────────────────────────

/// One page of scaling histories.
#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub total_results: usize,
    pub total_pages: usize,
    pub page: usize,
    pub resources: Vec<AppScalingHistory>,
}

/// Validated history query parameters.
#[derive(Debug, PartialEq, Eq)]
struct HistoryQuery {
    start: i64,
    end: i64,
    order: HistoryOrder,
    include_all: bool,
    page: usize,
    per_page: usize,
}

impl HistoryQuery {
    fn parse(params: &HashMap<String, String>) -> Result<Self, String> {
        fn int<T: std::str::FromStr>(
            params: &HashMap<String, String>,
            name: &str,
            default: T,
        ) -> Result<T, String> {
            match params.get(name) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| format!("{name} must be an integer")),
                None => Ok(default),
            }
        }

        let start = int(params, "start-time", 0i64)?;
        let end = int(params, "end-time", -1i64)?;
        let order = match params.get("order-direction").map(|s| s.to_ascii_lowercase()) {
            None => HistoryOrder::Desc,
            Some(o) if o == "desc" => HistoryOrder::Desc,
            Some(o) if o == "asc" => HistoryOrder::Asc,
            Some(_) => return Err("order-direction must be desc or asc".to_string()),
        };
        let include_all = match params.get("include-all").map(|s| s.to_ascii_lowercase()) {
            None => false,
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => false,
            Some(_) => return Err("include-all must be a boolean".to_string()),
        };
        let page = int(params, "page", 1usize)?;
        if page < 1 {
            return Err("page must be greater than 0".to_string());
        }
        let per_page = int(params, "results-per-page", DEFAULT_RESULTS_PER_PAGE)?;
        if per_page < 1 {
            return Err("results-per-page must be greater than 0".to_string());
        }

        Ok(Self {
            start,
            end,
            order,
            include_all,
            page,
            per_page,
        })
    }
}

/// GET /v1/apps/{appid}/scaling_histories
pub async fn get_scaling_histories(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let query = match HistoryQuery::parse(&params) {
        Ok(q) => q,
        Err(msg) => return error_response(&msg, StatusCode::BAD_REQUEST).into_response(),
    };

    let total = match state
        .store
        .count_scaling_histories(&app_id, query.start, query.end, query.include_all)
    {
        Ok(n) => n,
        Err(e) => {
            error!(%app_id, error = %e, "failed to count scaling histories");
            return error_response("error retrieving scaling histories", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    match state.store.retrieve_scaling_histories(
        &app_id,
        query.start,
        query.end,
        query.order,
        query.include_all,
        query.page,
        query.per_page,
    ) {
        Ok(resources) => ApiResponse::ok(HistoryPage {
            total_results: total,
            total_pages: total.div_ceil(query.per_page),
            page: query.page,
            resources,
        })
        .into_response(),
        Err(e) => {
            error!(%app_id, error = %e, "failed to retrieve scaling histories");
            error_response("error retrieving scaling histories", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    }
}

// ── Active schedules ───────────────────────────────────────────

/// GET /v1/apps/{appid}/active_schedules
pub async fn get_active_schedule(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_active_schedule(&app_id) {
        Ok(Some(schedule)) => ApiResponse::ok(schedule).into_response(),
        Ok(None) => {
            error_response("active schedule not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => {
            error!(%app_id, error = %e, "failed to get active schedule");
            error_response("error getting active schedule", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    }
}

/// PUT /v1/apps/{appid}/active_schedules/{scheduleid}
pub async fn start_active_schedule(
    State(state): State<ApiState>,
    Path((app_id, schedule_id)): Path<(String, String)>,
    Json(mut schedule): Json<ActiveSchedule>,
) -> impl IntoResponse {
    schedule.schedule_id = schedule_id;
    if schedule.instance_min > schedule.instance_max {
        return error_response(
            "instance_min_count must not be greater than instance_max_count",
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }

    info!(%app_id, schedule_id = %schedule.schedule_id, "start active schedule");
    match state.engine.set_active_schedule(&app_id, &schedule).await {
        Ok(()) => ApiResponse::ok(schedule).into_response(),
        Err(e) => engine_error_response(&app_id, &e, "setting active schedule"),
    }
}

/// DELETE /v1/apps/{appid}/active_schedules/{scheduleid}
pub async fn remove_active_schedule(
    State(state): State<ApiState>,
    Path((app_id, schedule_id)): Path<(String, String)>,
) -> impl IntoResponse {
    info!(%app_id, %schedule_id, "end active schedule");
    match state
        .engine
        .remove_active_schedule(&app_id, &schedule_id)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => engine_error_response(&app_id, &e, "removing active schedule"),
    }
}

/// PUT /v1/syncActiveSchedules
pub async fn sync_active_schedules(State(state): State<ApiState>) -> impl IntoResponse {
    let report = state.synchronizer.sync().await;
    ApiResponse::ok(report)
}

// ── Health ─────────────────────────────────────────────────────

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use autoscaler_engine::{
        ActiveScheduleSynchronizer, AppAndProcesses, PlatformClient, PlatformError, ProcessType,
        ScalingEngine, StripedLock,
    };
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::build_router;

    const APP: &str = "an-app-id";

    /// One web process per app, all apps started.
    #[derive(Default)]
    struct FakePlatform {
        instances: Mutex<HashMap<String, i32>>,
        fail_scale: Mutex<bool>,
    }

    #[async_trait]
    impl PlatformClient for FakePlatform {
        async fn get_app_and_processes(
            &self,
            app_id: &str,
        ) -> Result<AppAndProcesses, PlatformError> {
            let instances = self.get_app_processes(app_id, ProcessType::Web).await?;
            Ok(AppAndProcesses {
                state: "STARTED".to_string(),
                instances,
                disable_autoscaling: None,
            })
        }

        async fn get_app_processes(
            &self,
            app_id: &str,
            _process_type: ProcessType,
        ) -> Result<i32, PlatformError> {
            self.instances
                .lock()
                .unwrap()
                .get(app_id)
                .copied()
                .ok_or_else(|| PlatformError::NotFound(app_id.to_string()))
        }

        async fn scale_app_web_process(
            &self,
            app_id: &str,
            instances: i32,
        ) -> Result<(), PlatformError> {
            if *self.fail_scale.lock().unwrap() {
                return Err(PlatformError::Api {
                    status: 500,
                    body: "internal".to_string(),
                });
            }
            self.instances
                .lock()
                .unwrap()
                .insert(app_id.to_string(), instances);
            Ok(())
        }
    }

    struct Fixture {
        store: StateStore,
        platform: Arc<FakePlatform>,
        state: ApiState,
    }

    fn fixture() -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_policy(
                APP,
                &ScalingPolicy {
                    instance_min: 1,
                    instance_max: 5,
                },
            )
            .unwrap();
        let platform = Arc::new(FakePlatform::default());
        platform.instances.lock().unwrap().insert(APP.to_string(), 2);

        let shared = Arc::new(store.clone());
        let engine = Arc::new(ScalingEngine::new(
            platform.clone(),
            shared.clone(),
            shared.clone(),
            StripedLock::new(8),
        ));
        let synchronizer = Arc::new(ActiveScheduleSynchronizer::new(
            shared.clone(),
            shared,
            engine.clone(),
        ));
        Fixture {
            store: store.clone(),
            platform,
            state: ApiState {
                engine,
                store,
                synchronizer,
            },
        }
    }

    fn instances(f: &Fixture) -> i32 {
        f.platform.instances.lock().unwrap()[APP]
    }

    async fn call(state: &ApiState, req: Request<Body>) -> (StatusCode, Value) {
        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn trigger(adjustment: &str) -> Value {
        json!({
            "metric_type": "memoryused",
            "metric_unit": "MB",
            "breach_duration_secs": 100,
            "threshold": 80,
            "operator": ">",
            "cool_down_secs": 30,
            "adjustment": adjustment,
        })
    }

    #[test]
    fn history_query_defaults() {
        let q = HistoryQuery::parse(&HashMap::new()).unwrap();
        assert_eq!(
            q,
            HistoryQuery {
                start: 0,
                end: -1,
                order: HistoryOrder::Desc,
                include_all: false,
                page: 1,
                per_page: 50,
            }
        );
    }

    #[test]
    fn history_query_rejects_bad_values() {
        let params = |k: &str, v: &str| HashMap::from([(k.to_string(), v.to_string())]);
        assert!(HistoryQuery::parse(&params("start-time", "yesterday")).is_err());
        assert!(HistoryQuery::parse(&params("order-direction", "sideways")).is_err());
        assert!(HistoryQuery::parse(&params("include-all", "maybe")).is_err());
        assert!(HistoryQuery::parse(&params("page", "0")).is_err());
        assert!(HistoryQuery::parse(&params("results-per-page", "-1")).is_err());
        assert_eq!(
            HistoryQuery::parse(&params("order-direction", "ASC")).unwrap().order,
            HistoryOrder::Asc
        );
    }

    #[tokio::test]
    async fn health_is_ok() {
        let f = fixture();
        let (status, body) = call(&f.state, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn scale_returns_result() {
        let f = fixture();
        let (status, body) = call(
            &f.state,
            json_request("POST", &format!("/v1/apps/{APP}/scale"), trigger("+1")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "succeeded");
        assert_eq!(body["data"]["adjustment"], 1);
        assert_eq!(body["data"]["app_id"], APP);
        assert_eq!(instances(&f), 3);
    }

    #[tokio::test]
    async fn scale_with_bad_adjustment_is_bad_request() {
        let f = fixture();
        let (status, body) = call(
            &f.state,
            json_request("POST", &format!("/v1/apps/{APP}/scale"), trigger("#1")),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(instances(&f), 2);
    }

    #[tokio::test]
    async fn scale_unknown_app_is_not_found() {
        let f = fixture();
        let (status, _) = call(
            &f.state,
            json_request("POST", "/v1/apps/ghost/scale", trigger("+1")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn scale_without_policy_is_ignored() {
        let f = fixture();
        f.platform
            .instances
            .lock()
            .unwrap()
            .insert("unmanaged".to_string(), 2);
        let (status, body) = call(
            &f.state,
            json_request("POST", "/v1/apps/unmanaged/scale", trigger("+1")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ignored");
        assert_eq!(f.platform.instances.lock().unwrap()["unmanaged"], 2);
    }

    #[tokio::test]
    async fn scale_platform_failure_is_opaque_server_error() {
        let f = fixture();
        *f.platform.fail_scale.lock().unwrap() = true;
        let (status, body) = call(
            &f.state,
            json_request("POST", &format!("/v1/apps/{APP}/scale"), trigger("+1")),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "error taking scaling action");
    }

    #[tokio::test]
    async fn scaling_histories_are_paged() {
        let f = fixture();
        for _ in 0..3 {
            call(
                &f.state,
                json_request("POST", &format!("/v1/apps/{APP}/scale"), trigger("+1")),
            )
            .await;
        }

        let (status, body) = call(
            &f.state,
            get(&format!(
                "/v1/apps/{APP}/scaling_histories?include-all=true&results-per-page=2&order-direction=asc"
            )),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let page = &body["data"];
        assert_eq!(page["total_results"], 3);
        assert_eq!(page["total_pages"], 2);
        assert_eq!(page["page"], 1);
        let resources = page["resources"].as_array().unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0]["status"], "succeeded");
        assert_eq!(resources[0]["scaling_type"], "dynamic");
    }

    #[tokio::test]
    async fn scaling_histories_hide_ignored_by_default() {
        let f = fixture();
        // The second request falls into the cooldown window and is ignored.
        for _ in 0..2 {
            call(
                &f.state,
                json_request("POST", &format!("/v1/apps/{APP}/scale"), trigger("+1")),
            )
            .await;
        }

        let uri = format!("/v1/apps/{APP}/scaling_histories");
        let (_, body) = call(&f.state, get(&uri)).await;
        assert_eq!(body["data"]["total_results"], 1);

        let (_, body) = call(&f.state, get(&format!("{uri}?include-all=true"))).await;
        assert_eq!(body["data"]["total_results"], 2);
    }

    #[tokio::test]
    async fn scaling_histories_bad_query_is_bad_request() {
        let f = fixture();
        let (status, body) = call(
            &f.state,
            get(&format!("/v1/apps/{APP}/scaling_histories?page=zero")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "page must be an integer");
    }

    #[tokio::test]
    async fn active_schedule_lifecycle() {
        let f = fixture();
        let uri = format!("/v1/apps/{APP}/active_schedules");

        let (status, _) = call(&f.state, get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &f.state,
            json_request(
                "PUT",
                &format!("{uri}/sched-a"),
                json!({
                    "instance_min_count": 2,
                    "instance_max_count": 10,
                    "initial_min_instance_count": 4,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["schedule_id"], "sched-a");
        assert_eq!(instances(&f), 4);

        let (status, body) = call(&f.state, get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["schedule_id"], "sched-a");
        assert_eq!(body["data"]["instance_min_count"], 2);

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("{uri}/sched-a"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&f.state, req).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        // Back within the policy's 1..=5.
        assert_eq!(instances(&f), 4);

        let (status, _) = call(&f.state, get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn inverted_schedule_bounds_are_rejected() {
        let f = fixture();
        let (status, _) = call(
            &f.state,
            json_request(
                "PUT",
                &format!("/v1/apps/{APP}/active_schedules/sched-a"),
                json!({ "instance_min_count": 5, "instance_max_count": 2 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(f.store.get_active_schedule(APP).unwrap().is_none());
    }

    #[tokio::test]
    async fn sync_endpoint_reconciles() {
        let f = fixture();
        f.store
            .put_scheduler_active_schedule(
                APP,
                &ActiveSchedule {
                    schedule_id: "sched-a".to_string(),
                    instance_min: 3,
                    instance_max: 6,
                    instance_min_initial: 0,
                },
            )
            .unwrap();

        let req = Request::builder()
            .method("PUT")
            .uri("/v1/syncActiveSchedules")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&f.state, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["started"], 1);
        assert_eq!(
            f.store.get_active_schedule(APP).unwrap().unwrap().schedule_id,
            "sched-a"
        );
        assert_eq!(instances(&f), 3);
    }
}
