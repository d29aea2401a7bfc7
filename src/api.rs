// src/api.rs
//! HTTP control API over `RelayService`.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::envelope::RawItem;
use crate::error::{PublishError, ServiceError};
use crate::service::{RelayService, RelayStatus, SurfaceStatus};

pub type AppState = Arc<RelayService>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/config", get(get_config).put(put_config))
        .route("/status", get(get_status))
        .route("/monitoring/start", post(start_monitoring))
        .route("/monitoring/stop", post(stop_monitoring))
        .route("/surfaces/items", post(push_items))
        .route("/surfaces/status", get(surface_status))
        .route("/messages", post(send_message))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::MonitoringDisabled => StatusCode::CONFLICT,
            ServiceError::SurfaceNotMonitored(_) => StatusCode::NOT_FOUND,
            ServiceError::Publish(PublishError::NotConnected) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Publish(PublishError::Protocol(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Publish(PublishError::Serialize(_)) => StatusCode::BAD_REQUEST,
            ServiceError::Publish(PublishError::Transport(_)) => StatusCode::BAD_GATEWAY,
            ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, %status, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Deserialize)]
struct SurfaceReq {
    surface: String,
}

#[derive(Deserialize)]
struct PushReq {
    surface: String,
    #[serde(default)]
    items: Vec<RawItem>,
}

async fn get_config(State(svc): State<AppState>) -> Json<Config> {
    Json(svc.get_config().await)
}

async fn put_config(
    State(svc): State<AppState>,
    Json(cfg): Json<Config>,
) -> Result<Json<Config>, ServiceError> {
    svc.save_config(cfg).await.map(Json)
}

async fn get_status(State(svc): State<AppState>) -> Json<RelayStatus> {
    Json(svc.get_status().await)
}

async fn start_monitoring(
    State(svc): State<AppState>,
    Json(req): Json<SurfaceReq>,
) -> Result<Json<Value>, ServiceError> {
    svc.start_monitoring(&req.surface).await?;
    Ok(Json(json!({ "surface": req.surface, "monitoring": true })))
}

async fn stop_monitoring(State(svc): State<AppState>, Json(req): Json<SurfaceReq>) -> Json<Value> {
    let stopped = svc.stop_monitoring(&req.surface).await;
    Json(json!({ "surface": req.surface, "stopped": stopped }))
}

async fn push_items(State(svc): State<AppState>, Json(req): Json<PushReq>) -> Json<Value> {
    let buffered = svc.push_items(&req.surface, req.items).await;
    Json(json!({ "surface": req.surface, "buffered": buffered }))
}

async fn surface_status(
    State(svc): State<AppState>,
    Query(req): Query<SurfaceReq>,
) -> Result<Json<SurfaceStatus>, StatusCode> {
    svc.surface_status(&req.surface)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn send_message(
    State(svc): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ServiceError> {
    svc.send_message(&payload).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "published": true }))))
}
