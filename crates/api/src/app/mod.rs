//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store and service wiring
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, extract::DefaultBodyLimit, routing::get};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use almoner_infra::{AppConfig, WiringError};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router around already wired services.
pub fn build_app(services: Arc<AppServices>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(Extension(services))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
}

/// Wire the stores selected by `config` and build the router (entrypoint used by `main.rs`).
pub async fn build_app_from_config(config: &AppConfig) -> Result<Router, WiringError> {
    let services = Arc::new(AppServices::from_config(config).await?);
    Ok(build_app(services, config.max_upload_bytes))
}
