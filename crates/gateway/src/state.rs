//! Shared application state and the HTTP router.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    http::HeaderValue,
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::{
    auth::CredentialVerifier, config::GatewayConfig, registry::ConnectionRegistry, session,
};

/// Shared state for all gateway routes.
#[derive(Clone)]
pub struct AppState {
    registry: ConnectionRegistry,
    verifier: Arc<dyn CredentialVerifier>,
    config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(config: GatewayConfig, verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            verifier,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config().allowed_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// WebSocket upgrade endpoint for client connections.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let registry = state.registry().clone();
    let verifier = state.verifier.clone();
    ws.on_upgrade(move |socket| session::handle(socket, registry, verifier))
}

/// An empty origin list allows any origin, the dev default.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(origin, ?error, "ignoring unparseable allowed origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any)
}
