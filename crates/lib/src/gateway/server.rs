//! Gateway HTTP server: relays chat turns to the upstream API.

use crate::config::{self, Config};
use crate::gateway::protocol::{ChatRequest, ChatTurn, ErrorBody, HealthResponse, ProbeResponse};
use crate::gateway::upstream::{UpstreamClient, UpstreamError};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

/// Greeting sent upstream by `POST /api/test`.
const PROBE_GREETING: &str = "Hello";

/// Shared state for the gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub upstream: UpstreamClient,
}

/// Any origin, method and header; the relay is meant to be called from a browser on another port.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any)
}

/// Routes: `POST /api/chat`, `GET /api/health`, `POST /api/test`.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_http))
        .route("/api/health", get(health_http))
        .route("/api/test", post(probe_http))
        .layer(cors_layer())
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Fails at startup when no upstream API key is configured.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let upstream = UpstreamClient::from_config(&config)?;
    let bind_addr = config::host_port(config.gateway.bind.trim(), config.gateway.port);
    log::info!("relaying chat requests to {}", upstream.endpoint());

    let app = router(GatewayState { upstream });

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

fn error_response(status: StatusCode, error: String, details: Option<String>) -> Response {
    (status, Json(ErrorBody { error, details })).into_response()
}

/// POST /api/chat forwards the turns upstream. Success passes the upstream JSON through;
/// an upstream error status is returned with the same status and the raw body as `details`.
async fn chat_http(State(state): State<GatewayState>, Json(req): Json<ChatRequest>) -> Response {
    log::debug!("chat request with {} turn(s)", req.messages.len());
    match state.upstream.generate(&req.messages).await {
        Ok(data) => Json(data).into_response(),
        Err(UpstreamError::Upstream { status, body }) => {
            log::warn!("upstream api error: {} {}", status, body);
            let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            error_response(
                code,
                format!("upstream request failed: {}", status),
                Some(body),
            )
        }
        Err(e) => {
            log::warn!("proxy error: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server error".to_string(),
                Some(e.to_string()),
            )
        }
    }
}

/// GET /api/health returns `{ status: "ok", timestamp }`.
async fn health_http() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// POST /api/test sends a fixed greeting upstream and reports status and body, even when upstream fails.
async fn probe_http(State(state): State<GatewayState>) -> Response {
    let turns = [ChatTurn::user(PROBE_GREETING)];
    match state.upstream.probe(&turns).await {
        Ok((status, response)) => Json(ProbeResponse {
            success: true,
            response,
            status,
        })
        .into_response(),
        Err(e) => {
            log::warn!("probe failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
