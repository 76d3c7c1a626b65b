use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use einvoice_infra::IssuerDirectory;
use einvoice_invoicing::IssuerProfile;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub async fn get_profile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.issuers.get(tenant.tenant_id()).await {
        Ok(Some(profile)) => Json(profile).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "no issuer profile configured",
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Replace the tenant's issuer profile and enrol the tenant in background polling.
pub async fn put_profile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(profile): Json<IssuerProfile>,
) -> axum::response::Response {
    if profile.party.name.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "issuer name is required");
    }
    if let Err(e) = services.issuers.put(tenant.tenant_id(), profile.clone()).await {
        return errors::store_error_to_response(e);
    }
    services.track_tenant(tenant.tenant_id()).await;
    Json(profile).into_response()
}
