//! Axum-based HTTP and WebSocket server.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_core::error::ParleyError;
use parley_core::types::SessionId;
use parley_session::SessionRequest;

use crate::audio::bridge_audio;
use crate::state::GatewayState;

/// Registry errors rendered as JSON with a matching status code.
pub struct ApiError(ParleyError);

impl From<ParleyError> for ApiError {
    fn from(e: ParleyError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ParleyError::NotFound(_) => StatusCode::NOT_FOUND,
            ParleyError::CapacityExceeded { .. } | ParleyError::Config(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ParleyError::Transport(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        #[cfg(feature = "metrics")]
        crate::metrics::record_error(self.0.kind());
        let body = json!({
            "error": {
                "kind": self.0.kind(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{id}", get(session_status).delete(end_session))
        .route("/sessions/{id}/audio", get(audio_handler));

    #[cfg(feature = "metrics")]
    let app = app
        .route("/metrics", get(metrics_handler))
        .route_layer(axum::middleware::from_fn(track_requests));

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Start the gateway server and the session supervisor.
///
/// Runs until CTRL+C, then drains every session before returning.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.gateway_bind();
    let supervisor = state.registry.spawn_supervisor();

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.registry.shutdown().await;
    if let Some(supervisor) = supervisor {
        let _ = supervisor.await;
    }
    Ok(())
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let health = state.registry.health_snapshot().await;
    let status = if health.is_ready() { "ok" } else { "degraded" };

    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "collaborators": {
            "speech_to_text": health.speech_to_text,
            "text_to_speech": health.text_to_speech,
            "ai_backend": health.ai_backend,
            "media_transport": health.media_transport,
        },
        "active_sessions": health.active_sessions,
    }))
}

async fn create_session(
    State(state): State<Arc<GatewayState>>,
    request: Option<Json<SessionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let created = state.registry.create(request).await?;

    #[cfg(feature = "metrics")]
    {
        crate::metrics::record_session_created();
        crate::metrics::record_active_sessions(state.registry.len().await);
    }

    let audio_url = format!("/sessions/{}/audio", created.session_id);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "session_id": created.session_id,
            "room": created.room,
            "audio_url": audio_url,
        })),
    ))
}

async fn list_sessions(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.registry.list().await)
}

async fn session_status(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let info = state.registry.describe(&SessionId::from(id)).await?;
    Ok(Json(info))
}

async fn end_session(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SessionId::from(id);
    state.registry.end(&id).await?;

    #[cfg(feature = "metrics")]
    {
        crate::metrics::record_session_ended("request");
        crate::metrics::record_active_sessions(state.registry.len().await);
    }

    Ok(Json(json!({ "session_id": id, "status": "ended" })))
}

async fn audio_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SessionId::from(id);
    let info = state.registry.describe(&id).await?;
    let edge = state.transport.attach(&info.room_id)?;

    Ok(ws.on_upgrade(move |socket| bridge_audio(state, id, edge, socket)))
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    crate::metrics::record_active_sessions(state.registry.len().await);
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics recorder not installed".to_string(),
        ),
    }
}

#[cfg(feature = "metrics")]
async fn track_requests(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let route = request
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = std::time::Instant::now();
    let response = next.run(request).await;
    crate::metrics::record_request(
        &route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Could not listen for CTRL+C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}
