use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use einvoice_core::DomainError;
use einvoice_infra::{
    InvoiceServiceError, PollError, ReconcileError, StoreError, SubmissionError,
};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let status = match err {
        DomainError::Validation(_) | DomainError::InvalidId(_) => StatusCode::BAD_REQUEST,
        DomainError::InvariantViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DomainError::NotFound => StatusCode::NOT_FOUND,
        DomainError::Conflict(_) => StatusCode::CONFLICT,
    };
    json_error(status, err.code(), err.to_string())
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "invoice not found"),
        StoreError::Conflict { .. } => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        StoreError::DuplicateNumber(number) => json_error(
            StatusCode::CONFLICT,
            "duplicate_number",
            format!("invoice number {number} already exists"),
        ),
        other => {
            tracing::error!(error = %other, "store error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", other.to_string())
        }
    }
}

fn conflict_exhausted(attempts: u32) -> axum::response::Response {
    json_error(
        StatusCode::CONFLICT,
        "conflict_exhausted",
        format!("gave up after {attempts} conflicting writes"),
    )
}

pub fn invoice_error_to_response(err: InvoiceServiceError) -> axum::response::Response {
    match err {
        InvoiceServiceError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "invoice not found"),
        InvoiceServiceError::Domain(e) => domain_error_to_response(e),
        InvoiceServiceError::Store(e) => store_error_to_response(e),
        InvoiceServiceError::Audit(e) => {
            tracing::error!(error = %e, "audit trail unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "audit_unavailable", e.to_string())
        }
        InvoiceServiceError::ConflictExhausted { attempts } => conflict_exhausted(attempts),
    }
}

pub fn submission_error_to_response(err: SubmissionError) -> axum::response::Response {
    match err {
        SubmissionError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "invoice not found"),
        SubmissionError::NotDraft(status) => json_error(
            StatusCode::CONFLICT,
            "not_draft",
            format!("only draft invoices can be submitted (current: {status})"),
        ),
        SubmissionError::IssuerProfileMissing => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "issuer_profile_missing",
            "configure the issuer profile before submitting",
        ),
        SubmissionError::Store(e) => store_error_to_response(e),
        SubmissionError::Domain(e) => domain_error_to_response(e),
        SubmissionError::ConflictExhausted { attempts } => conflict_exhausted(attempts),
        SubmissionError::AcceptedButUnrecorded {
            registry_document_id,
            verification_reference,
            submission_uid,
            source,
        } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(json!({
                "error": "accepted_but_unrecorded",
                "message": format!("registry accepted the document but recording it failed: {source}"),
                "registry_document_id": registry_document_id,
                "verification_reference": verification_reference,
                "submission_uid": submission_uid,
            })),
        )
            .into_response(),
    }
}

pub fn reconcile_error_to_response(err: ReconcileError) -> axum::response::Response {
    match err {
        ReconcileError::Store(e) => store_error_to_response(e),
        ReconcileError::Domain(e) => domain_error_to_response(e),
        ReconcileError::ConflictExhausted { attempts, .. } => conflict_exhausted(attempts),
    }
}

pub fn poll_error_to_response(err: PollError) -> axum::response::Response {
    match err {
        PollError::Credential(e) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "credential_unavailable", e.to_string())
        }
        PollError::Registry(e) => json_error(StatusCode::BAD_GATEWAY, "registry_error", e.to_string()),
        PollError::Store(e) => store_error_to_response(e),
    }
}
