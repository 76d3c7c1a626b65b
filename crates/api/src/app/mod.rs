//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, registry client, credentials, orchestration components
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::ServiceBuilder;

use einvoice_infra::PollWorker;

use crate::config::Config;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router plus the poll worker sharing its services.
///
/// The worker is returned unstarted so the caller owns its lifetime.
pub async fn build_app(config: &Config) -> anyhow::Result<(Router, PollWorker)> {
    let (services, worker) = services::build_services(config).await?;
    Ok((router(Arc::new(services)), worker))
}

pub fn router(services: Arc<AppServices>) -> Router {
    // Protected routes: require tenant context.
    let protected = routes::router()
        .route_layer(axum::middleware::from_fn(middleware::tenant_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/webhooks/registry/:tenant_id", post(routes::webhooks::receive))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

pub use services::AppServices;
