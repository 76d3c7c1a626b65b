//! Tenant resolution.
//!
//! Authentication happens upstream; the gateway forwards the resolved tenant
//! as `X-Tenant-Id`.

use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use einvoice_core::TenantId;

use crate::app::errors::json_error;
use crate::context::TenantContext;

pub const TENANT_HEADER: &str = "x-tenant-id";

pub async fn tenant_middleware(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let tenant_id = match extract_tenant(req.headers()) {
        Ok(t) => t,
        Err(message) => return json_error(StatusCode::UNAUTHORIZED, "missing_tenant", message),
    };

    req.extensions_mut().insert(TenantContext::new(tenant_id));
    next.run(req).await
}

fn extract_tenant(headers: &HeaderMap) -> Result<TenantId, &'static str> {
    let header = headers
        .get(TENANT_HEADER)
        .ok_or("X-Tenant-Id header is required")?;
    let header = header.to_str().map_err(|_| "X-Tenant-Id header is not valid text")?;
    header
        .trim()
        .parse::<TenantId>()
        .map_err(|_| "X-Tenant-Id header is not a valid tenant id")
}
