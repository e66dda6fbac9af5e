//! HTTP surface

pub mod handlers;
pub mod response;

use crate::analytics::SecurityAnalytics;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::gateway::LogQueryGateway;
use crate::nlq::ChatPipeline;
use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub analytics: Arc<SecurityAnalytics>,
    pub pipeline: Arc<ChatPipeline>,
    pub gateway: Arc<LogQueryGateway>,
}

fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origin.trim() == "*" {
        return Ok(layer.allow_origin(Any));
    }
    let value = HeaderValue::from_str(origin.trim())
        .map_err(|e| Error::Config(format!("invalid CORS origin {}: {}", origin, e)))?;
    Ok(layer.allow_origin(value))
}

pub fn router(state: AppState, config: &ServerConfig) -> Result<Router> {
    let analytics = Router::new()
        .route("/analyze-user", get(handlers::analyze_user))
        .route("/detect-anomalies", get(handlers::detect_anomalies))
        .route("/get-risk-score", get(handlers::get_risk_score))
        .route("/get-anomaly-events", get(handlers::get_anomaly_events));

    Ok(Router::new()
        .route("/health", get(handlers::health))
        .nest("/security-analytics", analytics)
        .route("/llm1", post(handlers::chat))
        .route("/llm2", post(handlers::summarize))
        .route("/execute-query", post(handlers::execute_query))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.cors_origin)?)
        .with_state(state))
}

/// Serve until Ctrl-C
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<()> {
    let app = router(state, config)?;
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
