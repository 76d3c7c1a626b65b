use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use einvoice_core::AggregateId;
use einvoice_invoicing::{CreateInvoice, InvoiceId};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_invoice).get(list_invoices))
        .route("/:id", get(get_invoice))
        .route("/:id/document", get(preview_document))
        .route("/:id/submit", post(submit_invoice))
        .route("/:id/cancel", post(cancel_invoice))
        .route("/:id/audit", get(audit_trail))
}

#[allow(clippy::result_large_err)]
fn parse_invoice_id(raw: &str) -> Result<InvoiceId, axum::response::Response> {
    raw.parse::<AggregateId>()
        .map(InvoiceId::new)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id"))
}

pub async fn create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::CreateInvoiceRequest>,
) -> axum::response::Response {
    let cmd = CreateInvoice {
        tenant_id: tenant.tenant_id(),
        invoice_id: InvoiceId::new(AggregateId::new()),
        invoice_number: body.invoice_number,
        document_kind: body.document_kind,
        direction: body.direction,
        currency: body.currency,
        issue_date: body.issue_date,
        issue_time: body.issue_time,
        due_date: body.due_date,
        counterparty: body.counterparty,
        lines: body.lines,
        declared_totals: body.totals,
        billing_reference: body.billing_reference,
        registry_document_id: body.registry_document_id,
        occurred_at: Utc::now(),
    };

    match services.invoices.create(cmd).await {
        Ok(invoice) => (StatusCode::CREATED, Json(dto::InvoiceResponse::from(&invoice))).into_response(),
        Err(e) => errors::invoice_error_to_response(e),
    }
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.invoices.list(tenant.tenant_id()).await {
        Ok(invoices) => Json(
            invoices
                .iter()
                .map(dto::InvoiceResponse::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::invoice_error_to_response(e),
    }
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.invoices.get(tenant.tenant_id(), invoice_id).await {
        Ok(invoice) => Json(dto::InvoiceResponse::from(&invoice)).into_response(),
        Err(e) => errors::invoice_error_to_response(e),
    }
}

/// Render and validate without submitting.
pub async fn preview_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.submission.preview(tenant.tenant_id(), invoice_id).await {
        Ok(preview) => Json(serde_json::json!({
            "code_number": preview.document.code_number(),
            "kind": preview.document.kind(),
            "sha256": preview.document.sha256_hex(),
            "xml": preview.document.xml(),
            "is_valid": preview.validation.is_valid(),
            "error_codes": preview.validation.error_codes(),
            "validation": preview.validation,
        }))
        .into_response(),
        Err(e) => errors::submission_error_to_response(e),
    }
}

/// The body reports the outcome; a recorded failure is still a 200.
pub async fn submit_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.submission.submit(tenant.tenant_id(), invoice_id).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => errors::submission_error_to_response(e),
    }
}

pub async fn cancel_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelRequest>>,
) -> axum::response::Response {
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);
    match services.invoices.cancel(tenant.tenant_id(), invoice_id, reason).await {
        Ok(invoice) => Json(dto::InvoiceResponse::from(&invoice)).into_response(),
        Err(e) => errors::invoice_error_to_response(e),
    }
}

pub async fn audit_trail(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.invoices.audit_trail(tenant.tenant_id(), invoice_id).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => errors::invoice_error_to_response(e),
    }
}
