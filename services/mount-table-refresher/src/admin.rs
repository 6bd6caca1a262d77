//! Admin API
//!
//! Endpoints:
//! - GET  /health: last cycle outcome, router and cache counts, uptime
//! - GET  /metrics: Prometheus text exposition
//! - POST /admin/refresh: run one refresh cycle now and return its counts
//! - GET  /admin/routers: current router admin addresses
//! - PUT  /admin/routers: replace the router admin addresses

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::info;

use mount_table::{ClientCache, CycleResult, Endpoint, RefreshOrchestrator, RouterStore, StaticRouterStore};
use router_admin::RouterClient;

/// Outcome of the most recent cycle, from the periodic loop or an admin trigger.
#[derive(Debug, Clone, Copy)]
struct LastCycle {
    result: CycleResult,
    completed_at_unix: u64,
}

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    orchestrator: Arc<RefreshOrchestrator>,
    store: Arc<StaticRouterStore>,
    cache: Arc<ClientCache<RouterClient>>,
    last_cycle: Arc<RwLock<Option<LastCycle>>>,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

impl AdminState {
    pub fn new(
        orchestrator: Arc<RefreshOrchestrator>,
        store: Arc<StaticRouterStore>,
        cache: Arc<ClientCache<RouterClient>>,
        prometheus: PrometheusHandle,
    ) -> Self {
        Self {
            orchestrator,
            store,
            cache,
            last_cycle: Arc::new(RwLock::new(None)),
            started_at: Instant::now(),
            prometheus,
        }
    }

    /// Remember a completed cycle for `/health` and publish its gauges.
    pub fn record_cycle(&self, result: CycleResult) {
        let completed_at_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        *self.last_cycle.write().unwrap_or_else(PoisonError::into_inner) = Some(LastCycle {
            result,
            completed_at_unix,
        });
        crate::metrics::record_last_cycle(&result);
    }

    fn last_cycle(&self) -> Option<LastCycle> {
        *self.last_cycle.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Build the admin axum router.
///
/// At most `max_connections` requests are served concurrently; the rest wait.
pub fn build_admin_router(state: AdminState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/admin/refresh", post(refresh_handler))
        .route("/admin/routers", get(list_routers).put(replace_routers))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /health: always 200.
///
/// `status` is `idle` before the first cycle, `healthy` when the last cycle
/// refreshed every router and `degraded` otherwise.
async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let last_cycle = state.last_cycle();
    let status = match &last_cycle {
        None => "idle",
        Some(last) if last.result.all_succeeded() => "healthy",
        Some(_) => "degraded",
    };
    let last_cycle = last_cycle.map(|last| {
        serde_json::json!({
            "success_count": last.result.success_count,
            "failure_count": last.result.failure_count,
            "completed_at_unix": last.completed_at_unix,
        })
    });

    json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": status,
            "routers": state.store.list_endpoints().len(),
            "cached_clients": state.cache.len(),
            "last_cycle": last_cycle,
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        }),
    )
}

/// GET /metrics: Prometheus text exposition format.
async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// POST /admin/refresh: run a cycle now.
///
/// Returns 204 when no router is known, otherwise 200 with the cycle counts.
async fn refresh_handler(State(state): State<AdminState>) -> axum::response::Response {
    let Some(result) = state.orchestrator.refresh().await else {
        return StatusCode::NO_CONTENT.into_response();
    };
    state.record_cycle(result);
    info!(
        success_count = result.success_count,
        failure_count = result.failure_count,
        "refresh cycle triggered via admin API"
    );

    json_response(
        StatusCode::OK,
        serde_json::json!({
            "success_count": result.success_count,
            "failure_count": result.failure_count,
            "all_succeeded": result.all_succeeded(),
        }),
    )
    .into_response()
}

/// GET /admin/routers
async fn list_routers(State(state): State<AdminState>) -> impl IntoResponse {
    let routers: Vec<String> = state
        .store
        .list_endpoints()
        .into_iter()
        .map(|endpoint| endpoint.admin_address)
        .collect();
    json_response(StatusCode::OK, serde_json::json!({ "routers": routers }))
}

#[derive(Debug, Deserialize)]
struct ReplaceRoutersRequest {
    routers: Vec<String>,
}

/// PUT /admin/routers: replace the router list used by the next cycle.
///
/// Rejects blank addresses with 400. Cached clients for removed routers are
/// left to expire.
async fn replace_routers(
    State(state): State<AdminState>,
    Json(request): Json<ReplaceRoutersRequest>,
) -> axum::response::Response {
    if request.routers.iter().any(|address| address.trim().is_empty()) {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "router admin addresses must not be blank" }),
        )
        .into_response();
    }

    let count = request.routers.len();
    state
        .store
        .replace(request.routers.into_iter().map(Endpoint::new).collect());
    crate::metrics::set_known_routers(count);

    json_response(StatusCode::OK, serde_json::json!({ "routers": count })).into_response()
}
