use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use einvoice_infra::PollMode;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new().route("/poll", post(poll_now))
}

/// Run one poll pass for the caller's tenant outside the worker schedule.
pub async fn poll_now(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::PollQuery>,
) -> axum::response::Response {
    let mode = match query.parse_mode() {
        Ok(mode) => mode,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_mode", msg),
    };
    let tenant_id = tenant.tenant_id();

    let report = match mode {
        Some(PollMode::Tracked) => services.poller.poll_tracked(tenant_id).await,
        Some(PollMode::Delta) => services.poller.poll_delta(tenant_id).await,
        None => return Json(services.poller.poll_all(tenant_id).await).into_response(),
    };
    match report {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::poll_error_to_response(e),
    }
}
