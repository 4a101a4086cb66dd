use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::db::CaptureDb;
use crate::hotspot::HotSpot;
use crate::pipeline::{Command, PipelineHandle};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ApiContext {
    pub pipeline: PipelineHandle,
    /// Absent when the capture index failed to open; /captures answers 503.
    pub db: Option<Arc<CaptureDb>>,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SensitivityBody {
    value: i32,
}

#[derive(Debug, Deserialize)]
struct CapturesQuery {
    limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health
async fn health() -> &'static str {
    "ok"
}

/// GET /status — point-in-time pipeline snapshot
async fn status(State(ctx): State<ApiContext>) -> impl IntoResponse {
    match ctx.pipeline.status().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            error!(error = %e, "status query failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// GET /hotspots — detection regions in evaluation order
async fn list_hotspots(State(ctx): State<ApiContext>) -> impl IntoResponse {
    match ctx.pipeline.status().await {
        Ok(snapshot) => Json(snapshot.hotspots).into_response(),
        Err(e) => {
            error!(error = %e, "status query failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// POST /hotspots
/// Body: { "left": 0, "top": 0, "width": 100, "height": 80 }
async fn add_hotspot(
    State(ctx): State<ApiContext>,
    Json(spot): Json<HotSpot>,
) -> impl IntoResponse {
    match ctx.pipeline.send(Command::AddHotSpot(spot)).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            error!(error = %e, "hotspot command failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// DELETE /hotspots/:index
/// Out-of-range indexes are accepted and logged by the pipeline.
async fn remove_hotspot(
    State(ctx): State<ApiContext>,
    AxumPath(index): AxumPath<usize>,
) -> impl IntoResponse {
    match ctx.pipeline.send(Command::RemoveHotSpot(index)).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            error!(error = %e, "hotspot command failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// PUT /sensitivity
/// Body: { "value": 20 }, clamped to [0, 255]
async fn set_sensitivity(
    State(ctx): State<ApiContext>,
    Json(body): Json<SensitivityBody>,
) -> impl IntoResponse {
    match ctx.pipeline.send(Command::SetSensitivity(body.value)).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            error!(error = %e, "sensitivity command failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// POST /capture — start a capture from whatever is buffered right now.
/// A no-op while a capture is already running.
async fn trigger_capture(State(ctx): State<ApiContext>) -> impl IntoResponse {
    match ctx.pipeline.send(Command::TriggerCapture).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            error!(error = %e, "capture command failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// GET /captures?limit=
async fn list_captures(
    State(ctx): State<ApiContext>,
    Query(q): Query<CapturesQuery>,
) -> impl IntoResponse {
    let Some(db) = ctx.db.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "capture index unavailable").into_response();
    };
    let limit = q.limit.unwrap_or(50).min(500);

    let result = tokio::task::spawn_blocking(move || db.recent(limit)).await;
    match result {
        Ok(Ok(rows)) => Json(rows).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "SQLite query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/hotspots", get(list_hotspots))
        .route("/hotspots", post(add_hotspot))
        .route("/hotspots/:index", delete(remove_hotspot))
        .route("/sensitivity", put(set_sensitivity))
        .route("/capture", post(trigger_capture))
        .route("/captures", get(list_captures))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
