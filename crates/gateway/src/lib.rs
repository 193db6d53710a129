//! HTTP front controller for chatrelay.
//!
//! Exposes the conversation endpoints under `/api`, a health check, and
//! server-sent events for in-process progress streams.
//!
//! Built on Axum.

pub mod api;
pub mod error;
pub mod params;
pub mod state;

pub use error::ApiError;
pub use state::GatewayState;

use axum::extract::DefaultBodyLimit;
use axum::{Router, http::Method, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use chatrelay_config::{AppConfig, process_env};

pub type SharedState = Arc<GatewayState>;

/// Build the router with every gateway route.
///
/// Layers applied:
/// - CORS for browser clients following a stream
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api::api_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(GatewayState::from_config(&config, process_env())?);
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
