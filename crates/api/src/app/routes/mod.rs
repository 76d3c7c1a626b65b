use axum::{routing::get, Router};

pub mod invoices;
pub mod issuer;
pub mod sync;
pub mod system;
pub mod webhooks;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/issuer-profile", get(issuer::get_profile).put(issuer::put_profile))
        .nest("/invoices", invoices::router())
        .nest("/sync", sync::router())
}
