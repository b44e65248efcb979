//! Thin HTTP shim over the fleet server.
//!
//! All routing and JSON shaping lives here; every decision is delegated to
//! the fleet server through [`FleetHandle`]. Destructive bulk operations
//! (kill-all, kill-all-of-type, rolling restart, framework restart) are
//! gated on a `sure` query parameter that must case-insensitively equal
//! "yes"; a mismatch is a structured 400 error and mutates nothing.

use std::net::SocketAddr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::server::{FleetHandle, RestartScope};

#[derive(Clone)]
pub struct ApiState {
    pub handle: FleetHandle,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct ConfirmQuery {
    sure: Option<String>,
}

impl ConfirmQuery {
    fn confirmed(&self) -> bool {
        self.sure
            .as_deref()
            .is_some_and(|sure| sure.eq_ignore_ascii_case("yes"))
    }
}

fn ok() -> (StatusCode, Json<StatusResponse>) {
    (StatusCode::OK, Json(StatusResponse { status: "ok" }))
}

fn bad_request(error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

fn unavailable() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "fleet server unavailable".to_string(),
        }),
    )
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/types", get(type_stats_handler))
        .route("/api/stats", get(fleet_stats_handler))
        .route("/api/types/{type}/scale/{instances}", put(scale_handler))
        .route("/api/tasks/{task}/restart", post(task_restart_handler))
        .route("/api/types/{type}/restart", post(type_rolling_restart_handler))
        .route("/api/restart", post(fleet_rolling_restart_handler))
        .route("/api/types/{type}/kill", post(kill_type_handler))
        .route("/api/kill", post(kill_all_handler))
        .route("/api/framework/restart", post(framework_restart_handler))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve the API until the process exits.
pub async fn run_api(addr: SocketAddr, state: ApiState) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting API server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind API server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "API server failed");
    }
}

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    match state.handle.healthy().await {
        Ok(true) => (StatusCode::OK, "OK"),
        Ok(false) => (StatusCode::INTERNAL_SERVER_ERROR, "no recent scheduler heartbeat"),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "fleet server unavailable"),
    }
}

async fn type_stats_handler(State(state): State<ApiState>) -> impl IntoResponse {
    match state.handle.type_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(_) => unavailable().into_response(),
    }
}

async fn fleet_stats_handler(State(state): State<ApiState>) -> impl IntoResponse {
    match state.handle.fleet_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(_) => unavailable().into_response(),
    }
}

/// Fire-and-forget: unknown types and types with scaling disabled are
/// no-ops, acked anyway.
async fn scale_handler(
    State(state): State<ApiState>,
    Path((type_name, instances)): Path<(String, i64)>,
) -> impl IntoResponse {
    match state.handle.scale(&type_name, instances).await {
        Ok(outcome) => {
            tracing::debug!(task_type = %type_name, instances, ?outcome, "Scale request handled");
            ok().into_response()
        }
        Err(_) => unavailable().into_response(),
    }
}

async fn task_restart_handler(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    if task_id.trim().is_empty() {
        return bad_request("task id must not be blank").into_response();
    }
    match state.handle.restart_task(&task_id).await {
        Ok(()) => ok().into_response(),
        Err(_) => unavailable().into_response(),
    }
}

async fn type_rolling_restart_handler(
    State(state): State<ApiState>,
    Path(type_name): Path<String>,
    Query(confirm): Query<ConfirmQuery>,
) -> impl IntoResponse {
    if !confirm.confirmed() {
        return bad_request("sure parameter must be yes").into_response();
    }
    match state
        .handle
        .rolling_restart(RestartScope::Type(type_name))
        .await
    {
        Ok(()) => ok().into_response(),
        Err(_) => unavailable().into_response(),
    }
}

async fn fleet_rolling_restart_handler(
    State(state): State<ApiState>,
    Query(confirm): Query<ConfirmQuery>,
) -> impl IntoResponse {
    if !confirm.confirmed() {
        return bad_request("sure parameter must be yes").into_response();
    }
    match state.handle.rolling_restart(RestartScope::Fleet).await {
        Ok(()) => ok().into_response(),
        Err(_) => unavailable().into_response(),
    }
}

async fn kill_type_handler(
    State(state): State<ApiState>,
    Path(type_name): Path<String>,
    Query(confirm): Query<ConfirmQuery>,
) -> impl IntoResponse {
    if !confirm.confirmed() {
        return bad_request("sure parameter must be yes").into_response();
    }
    if type_name.trim().is_empty() {
        return bad_request("type parameter must not be blank").into_response();
    }
    match state.handle.kill_all_of_type(&type_name).await {
        Ok(killed) => {
            tracing::info!(task_type = %type_name, killed, "Kill-all-of-type requested");
            ok().into_response()
        }
        Err(_) => unavailable().into_response(),
    }
}

async fn kill_all_handler(
    State(state): State<ApiState>,
    Query(confirm): Query<ConfirmQuery>,
) -> impl IntoResponse {
    if !confirm.confirmed() {
        return bad_request("sure parameter must be yes").into_response();
    }
    match state.handle.kill_all().await {
        Ok(killed) => {
            tracing::info!(killed, "Kill-all requested");
            ok().into_response()
        }
        Err(_) => unavailable().into_response(),
    }
}

/// Acknowledge, then exit so the platform's process supervisor restarts the
/// framework with a clean slate.
async fn framework_restart_handler(Query(confirm): Query<ConfirmQuery>) -> impl IntoResponse {
    if !confirm.confirmed() {
        return bad_request("sure parameter must be yes").into_response();
    }
    tracing::warn!("Framework restart requested, exiting in 1s");
    tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        std::process::exit(0);
    });
    ok().into_response()
}
