//! HTTP surface - routes, request/response bodies and error mapping

pub mod error;
pub mod handlers;
pub mod message;

use crate::config::ServerConfig;
use crate::orchestrator::Orchestrator;
use axum::{
    http::{header, Method, StatusCode},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

pub use error::{ApiError, ApiResult};

/// Shared state handed to every handler
pub type AppState = Arc<Orchestrator>;

pub fn router(state: AppState, cfg: &ServerConfig) -> Router {
    let mut router = Router::new()
        .route("/upload", post(handlers::upload))
        .route("/start", post(handlers::start))
        .route("/stop", post(handlers::stop))
        .route("/sessions", get(handlers::list_sessions))
        .route("/status/:id", get(handlers::status))
        .route("/history/:id", get(handlers::history))
        .route("/transactions/:id", get(handlers::transactions))
        .route("/results/:id/jtl", get(handlers::download_results))
        .route("/results/:id/summary", get(handlers::download_summary))
        .route("/results/:id/report/generate", post(handlers::generate_report))
        .route("/results/:id/report.zip", get(handlers::download_report))
        .route("/healthz", get(handlers::healthz))
        .with_state(state);

    if cfg.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]);
        router = router.layer(cors);
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(cfg.max_upload_bytes))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(cfg.request_timeout_secs),
                )),
        )
        .layer(TraceLayer::new_for_http())
}
