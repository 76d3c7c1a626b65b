//! Registry webhook ingestion. Public route: the tenant comes from the path
//! and authenticity from the optional HMAC signature.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use tracing::{info, warn};

use einvoice_core::TenantId;
use einvoice_invoicing::{SignalSource, StatusSignal};
use einvoice_registry::{webhook, WebhookEvent, SIGNATURE_HEADER};

use crate::app::errors;
use crate::app::services::AppServices;

fn acknowledged(reason: &'static str) -> axum::response::Response {
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "ignored", "reason": reason })),
    )
        .into_response()
}

pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let tenant_id: TenantId = match tenant_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_tenant", "invalid tenant id"),
    };

    if let Some(secret) = services.webhook_secret.as_deref() {
        let header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        if let Err(e) = webhook::verify_signature(secret, &body, header) {
            warn!(tenant_id = %tenant_id, error = %e, "webhook signature rejected");
            return errors::json_error(StatusCode::UNAUTHORIZED, "invalid_signature", e.to_string());
        }
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_payload", e.to_string()),
    };
    let event: WebhookEvent = match serde_json::from_value(payload.clone()) {
        Ok(v) => v,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_payload", e.to_string()),
    };

    let Some(status) = event.effective_status() else {
        info!(
            tenant_id = %tenant_id,
            event_type = event.event_type.as_str(),
            "webhook event carries no status; ignored"
        );
        return acknowledged("not_a_status_event");
    };
    let Some(document_id) = event.document_id.as_deref().filter(|d| !d.trim().is_empty()) else {
        warn!(
            tenant_id = %tenant_id,
            event_type = event.event_type.as_str(),
            "status webhook without document_id ignored"
        );
        return acknowledged("missing_document_id");
    };

    let signal = StatusSignal::new(
        document_id.trim(),
        status,
        SignalSource::Webhook,
        event.timestamp.unwrap_or_else(Utc::now),
    )
    .with_payload(payload);

    match services.reconciliation.apply_signal(tenant_id, &signal).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => errors::reconcile_error_to_response(e),
    }
}
