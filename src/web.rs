//! Axum-based HTTP surface
//!
//! Status and snapshot stream for observers, the operator actions, and entity
//! state ingestion for a host bridge feeding the in-memory store.

use crate::coordinator::Coordinator;
use crate::error::{BalancerError, Result};
use crate::host::EntityValue;
use crate::services::ChargingRequest;
use crate::store::EntityStore;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    /// Entity store behind the coordinator, when the host is in-memory
    pub store: Option<EntityStore>,
}

#[derive(Debug, Deserialize)]
pub struct ModeBody {
    pub mode: String,
}

fn error_status(err: &BalancerError) -> StatusCode {
    match err {
        BalancerError::Validation { .. } => StatusCode::BAD_REQUEST,
        BalancerError::Busy { .. } => StatusCode::CONFLICT,
        BalancerError::Sensor { .. } => StatusCode::SERVICE_UNAVAILABLE,
        BalancerError::Actuation { .. } => StatusCode::BAD_GATEWAY,
        BalancerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: BalancerError) -> (StatusCode, Json<serde_json::Value>) {
    (
        error_status(&err),
        Json(serde_json::json!({"error": err.to_string()})),
    )
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "version": env!("APP_VERSION")}))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.coordinator.latest();
    let mut root = serde_json::to_value(snapshot.as_ref())
        .unwrap_or_else(|_| serde_json::json!({"error": "serialization"}));
    root["mode"] = serde_json::json!(state.coordinator.mode());
    root["busy"] = serde_json::json!(state.coordinator.is_busy());
    Json(root)
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    let json = serde_json::to_value(state.coordinator.config())
        .unwrap_or_else(|_| serde_json::json!({"error": "serialization"}));
    Json(json)
}

async fn set_mode(State(state): State<AppState>, Json(body): Json<ModeBody>) -> impl IntoResponse {
    match state.coordinator.set_mode_label(&body.mode) {
        Ok(mode) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "mode": mode})),
        ),
        Err(e) => error_response(e),
    }
}

async fn set_charging(
    State(state): State<AppState>,
    Json(body): Json<ChargingRequest>,
) -> impl IntoResponse {
    match state.coordinator.set_charging(body).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "current": body.current, "phases": body.phases})),
        ),
        Err(e) => error_response(e),
    }
}

/// Run a control cycle now instead of waiting for the next tick
async fn run_cycle(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.poll_cycle().await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(serde_json::to_value(snapshot.as_ref()).unwrap_or_default()),
        ),
        Err(e) => error_response(e),
    }
}

async fn list_entities(State(state): State<AppState>) -> impl IntoResponse {
    let Some(store) = state.store else {
        return error_response(BalancerError::web("No entity store attached"));
    };
    let map: serde_json::Map<String, serde_json::Value> = store
        .states()
        .into_iter()
        .map(|(id, value)| (id, serde_json::to_value(value).unwrap_or_default()))
        .collect();
    (StatusCode::OK, Json(serde_json::Value::Object(map)))
}

async fn get_entity(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> impl IntoResponse {
    let value = state.store.as_ref().and_then(|s| s.get_state(&entity_id));
    match value {
        Some(value) => (
            StatusCode::OK,
            Json(serde_json::json!({"entity_id": entity_id, "state": value})),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("Unknown entity {}", entity_id)})),
        ),
    }
}

async fn put_entity(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    Json(value): Json<EntityValue>,
) -> impl IntoResponse {
    let Some(store) = state.store else {
        return error_response(BalancerError::web("No entity store attached"));
    };
    store.set_state(&entity_id, value.clone());
    (
        StatusCode::OK,
        Json(serde_json::json!({"entity_id": entity_id, "state": value})),
    )
}

async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let stream = WatchStream::new(state.coordinator.subscribe())
        .map(|snapshot| Event::default().event("snapshot").json_data(snapshot.as_ref()));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/config", get(get_config))
        .route("/api/mode", post(set_mode))
        .route("/api/charging", post(set_charging))
        .route("/api/cycle", post(run_cycle))
        .route("/api/entities", get(list_entities))
        .route("/api/entities/{entity_id}", get(get_entity).put(put_entity))
        .route("/api/events", get(events))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until `shutdown` resolves
pub async fn serve<F>(state: AppState, host: &str, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(state);
    let logger = crate::logging::get_logger("web");
    logger.info(&format!(
        "Starting web server; requested host={}, port={}",
        host, port
    ));

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            logger.warn(&format!("Invalid host '{}'; falling back to 127.0.0.1", host));
            ([127, 0, 0, 1], port).into()
        }
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BalancerError::web(format!("Failed to bind {}: {}", addr, e)))?;
    let local_addr = listener.local_addr()?;
    logger.info(&format!(
        "Web server listening at http://{}:{} (API /api, events /api/events)",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BalancerError::web(e.to_string()))?;
    logger.info("Web server stopped");
    Ok(())
}
