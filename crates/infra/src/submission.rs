//! Submission orchestrator.
//!
//! `draft` invoice → render → validate → registry submit → `submitted` or
//! `failed`. Codec and validation failures never reach the network. Outcomes
//! that say nothing about the document itself (no credential, transient
//! registry trouble after retries) leave the invoice in `draft`.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use einvoice_core::{DomainError, TenantId};
use einvoice_documents::{RenderedDocument, ValidationResult};
use einvoice_invoicing::{
    AuditAction, AuditEvent, AuditSource, Invoice, InvoiceCommand, InvoiceEvent, InvoiceId,
    LifecycleStatus, RecordSubmissionAccepted, RecordSubmissionFailed,
};
use einvoice_registry::{CredentialProvider, RegistryClient, RegistryError, SubmissionDocument};

use crate::audit::AuditRecorder;
use crate::issuers::IssuerDirectory;
use crate::reconciliation::DEFAULT_MAX_CAS_ATTEMPTS;
use crate::retry::{RetryPolicy, retry_transient};
use crate::store::{CommitError, InvoiceStore, StoreError, commit_command};

pub const DOCUMENT_FORMAT: &str = "XML";

/// Errors that stop a submission before any outcome is recorded.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("invoice not found")]
    NotFound,

    #[error("only draft invoices can be submitted (current: {0})")]
    NotDraft(LifecycleStatus),

    #[error("no issuer profile configured for tenant")]
    IssuerProfileMissing,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("gave up after {attempts} conflicting writes")]
    ConflictExhausted { attempts: u32 },

    /// The registry holds the document but the invoice does not say so.
    #[error("registry accepted document {registry_document_id} but recording it failed: {source}")]
    AcceptedButUnrecorded {
        registry_document_id: String,
        verification_reference: Option<String>,
        submission_uid: Option<String>,
        #[source]
        source: Box<SubmissionError>,
    },
}

impl From<CommitError> for SubmissionError {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::Store(StoreError::NotFound) => SubmissionError::NotFound,
            CommitError::Store(e) => SubmissionError::Store(e),
            CommitError::Domain(e) => SubmissionError::Domain(e),
            CommitError::ConflictExhausted { attempts } => SubmissionError::ConflictExhausted { attempts },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The codec could not produce a document.
    Codec,
    /// Business or structural rules failed.
    Validation,
    /// The registry rejected the document.
    Rejected,
    /// Permanent registry error (auth, malformed envelope, protocol).
    Registry,
    /// No credential for the tenant; invoice left in draft.
    CredentialUnavailable,
    /// Transient registry failure after all retries; invoice left in draft.
    Transient,
}

impl FailureKind {
    pub fn leaves_draft(self) -> bool {
        matches!(self, FailureKind::CredentialUnavailable | FailureKind::Transient)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Stable rule codes or the registry's error code.
    pub codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionResult {
    pub success: bool,
    pub status: LifecycleStatus,
    pub registry_document_id: Option<String>,
    pub verification_reference: Option<String>,
    pub error: Option<SubmissionFailure>,
}

/// Rendered document plus its validation, without submitting.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentPreview {
    pub document: RenderedDocument,
    pub validation: ValidationResult,
}

#[derive(Clone)]
pub struct SubmissionOrchestrator {
    store: Arc<dyn InvoiceStore>,
    issuers: Arc<dyn IssuerDirectory>,
    registry: Arc<dyn RegistryClient>,
    credentials: Arc<dyn CredentialProvider>,
    audit: AuditRecorder,
    retry: RetryPolicy,
    max_cas_attempts: u32,
}

impl SubmissionOrchestrator {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        issuers: Arc<dyn IssuerDirectory>,
        registry: Arc<dyn RegistryClient>,
        credentials: Arc<dyn CredentialProvider>,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            store,
            issuers,
            registry,
            credentials,
            audit,
            retry: RetryPolicy::default(),
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_cas_attempts(mut self, attempts: u32) -> Self {
        self.max_cas_attempts = attempts.max(1);
        self
    }

    /// Render and validate the stored invoice as it would be submitted.
    pub async fn preview(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<DocumentPreview, SubmissionError> {
        let invoice = self.load(tenant_id, invoice_id).await?;
        let issuer = self
            .issuers
            .get(tenant_id)
            .await?
            .ok_or(SubmissionError::IssuerProfileMissing)?;
        let document = einvoice_documents::render(&invoice, &issuer)
            .map_err(|e| SubmissionError::Domain(DomainError::validation(e.to_string())))?;
        let validation = einvoice_documents::validate(&document, invoice.document_kind());
        Ok(DocumentPreview { document, validation })
    }

    pub async fn submit(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<SubmissionResult, SubmissionError> {
        let invoice = self.load(tenant_id, invoice_id).await?;
        if invoice.lifecycle_status() != LifecycleStatus::Draft {
            return Err(SubmissionError::NotDraft(invoice.lifecycle_status()));
        }
        let issuer = self
            .issuers
            .get(tenant_id)
            .await?
            .ok_or(SubmissionError::IssuerProfileMissing)?;

        let document = match einvoice_documents::render(&invoice, &issuer) {
            Ok(document) => document,
            Err(err) => {
                let failure = SubmissionFailure {
                    kind: FailureKind::Codec,
                    message: err.to_string(),
                    codes: vec![],
                };
                return self.record_failure(invoice, failure).await;
            }
        };

        let validation = einvoice_documents::validate(&document, invoice.document_kind());
        if !validation.is_valid() {
            let failure = SubmissionFailure {
                kind: FailureKind::Validation,
                message: validation.summary(),
                codes: validation.error_codes(),
            };
            return self.record_failure(invoice, failure).await;
        }

        let credential = match self.credentials.credential(tenant_id).await {
            Ok(credential) => credential,
            Err(err) => {
                let failure = SubmissionFailure {
                    kind: FailureKind::CredentialUnavailable,
                    message: err.to_string(),
                    codes: vec![],
                };
                return Ok(self.record_deferral(&invoice, failure).await);
            }
        };

        let envelope = [SubmissionDocument {
            kind: document.kind(),
            format: DOCUMENT_FORMAT.to_string(),
            document: document.base64(),
            document_hash: document.sha256_hex(),
            code_number: document.code_number().to_string(),
        }];

        let response = retry_transient(&self.retry, "submit_documents", || {
            self.registry.submit_documents(&credential, &envelope)
        })
        .await;

        let response = match response {
            Ok(response) => response,
            Err(err) if err.is_transient() => {
                let failure = SubmissionFailure {
                    kind: FailureKind::Transient,
                    message: err.to_string(),
                    codes: vec![],
                };
                return Ok(self.record_deferral(&invoice, failure).await);
            }
            Err(err) => {
                let failure = SubmissionFailure {
                    kind: FailureKind::Registry,
                    message: err.to_string(),
                    codes: vec![],
                };
                return self.record_failure(invoice, failure).await;
            }
        };

        let code_number = document.code_number();
        if let Some(accepted) = response.accepted_for(code_number) {
            let command = InvoiceCommand::RecordSubmissionAccepted(RecordSubmissionAccepted {
                tenant_id,
                invoice_id,
                registry_document_id: accepted.document_id.clone(),
                verification_reference: accepted.verification_link.clone(),
                occurred_at: Utc::now(),
            });
            let status = invoice.lifecycle_status();
            let (invoice, events) = match commit_command(&*self.store, invoice, &command, self.max_cas_attempts).await {
                Ok(committed) => committed,
                Err(err) => {
                    let err = SubmissionError::from(err);
                    error!(
                        tenant_id = %tenant_id,
                        invoice_id = %invoice_id,
                        document_id = %accepted.document_id,
                        verification_reference = ?accepted.verification_link,
                        submission_uid = ?response.submission_uid,
                        error = %err,
                        "registry accepted the document but the invoice was not updated"
                    );
                    self.audit
                        .record(AuditEvent::new(
                            tenant_id,
                            invoice_id,
                            AuditAction::AcceptedUnrecorded,
                            Some(status),
                            status,
                            AuditSource::Submission,
                            serde_json::json!({
                                "documentId": accepted.document_id,
                                "verificationReference": accepted.verification_link,
                                "submissionUid": response.submission_uid,
                                "error": err.to_string(),
                            }),
                            Utc::now(),
                        ))
                        .await;
                    return Err(SubmissionError::AcceptedButUnrecorded {
                        registry_document_id: accepted.document_id.clone(),
                        verification_reference: accepted.verification_link.clone(),
                        submission_uid: response.submission_uid.clone(),
                        source: Box::new(err),
                    });
                }
            };
            info!(
                tenant_id = %tenant_id,
                invoice_id = %invoice_id,
                document_id = %accepted.document_id,
                "invoice submitted to registry"
            );
            let extra = serde_json::json!({ "submissionUid": response.submission_uid });
            self.audit_events(&events, extra).await;
            return Ok(SubmissionResult {
                success: true,
                status: invoice.lifecycle_status(),
                registry_document_id: invoice.registry_document_id().map(str::to_string),
                verification_reference: invoice.verification_reference().map(str::to_string),
                error: None,
            });
        }

        let failure = match response.rejected_for(code_number) {
            Some(rejected) => SubmissionFailure {
                kind: FailureKind::Rejected,
                message: rejected.error_message.clone(),
                codes: rejected.error_code.iter().cloned().collect(),
            },
            None => SubmissionFailure {
                kind: FailureKind::Registry,
                message: RegistryError::Protocol(if response.is_empty() {
                    "submission response lists no documents".to_string()
                } else {
                    format!("submission response does not mention {code_number}")
                })
                .to_string(),
                codes: vec![],
            },
        };
        self.record_failure(invoice, failure).await
    }

    async fn load(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<Invoice, SubmissionError> {
        self.store
            .get(tenant_id, invoice_id)
            .await?
            .ok_or(SubmissionError::NotFound)
    }

    /// Move to `failed` and audit.
    async fn record_failure(
        &self,
        invoice: Invoice,
        failure: SubmissionFailure,
    ) -> Result<SubmissionResult, SubmissionError> {
        let tenant_id = invoice.tenant_id().ok_or(StoreError::MissingTenant)?;
        let invoice_id = invoice.id_typed();
        let command = InvoiceCommand::RecordSubmissionFailed(RecordSubmissionFailed {
            tenant_id,
            invoice_id,
            detail: failure.message.clone(),
            rule_codes: failure.codes.clone(),
            occurred_at: Utc::now(),
        });
        let (invoice, events) = commit_command(&*self.store, invoice, &command, self.max_cas_attempts).await?;
        warn!(
            tenant_id = %tenant_id,
            invoice_id = %invoice_id,
            kind = ?failure.kind,
            codes = ?failure.codes,
            "invoice submission failed"
        );
        self.audit_events(&events, serde_json::json!({ "kind": failure.kind })).await;
        Ok(SubmissionResult {
            success: false,
            status: invoice.lifecycle_status(),
            registry_document_id: None,
            verification_reference: None,
            error: Some(failure),
        })
    }

    /// Leave the invoice untouched; audit the attempt.
    async fn record_deferral(&self, invoice: &Invoice, failure: SubmissionFailure) -> SubmissionResult {
        let status = invoice.lifecycle_status();
        if let Some(tenant_id) = invoice.tenant_id() {
            warn!(
                tenant_id = %tenant_id,
                invoice_id = %invoice.id_typed(),
                kind = ?failure.kind,
                error = %failure.message,
                "submission deferred, invoice stays in draft"
            );
            self.audit
                .record(AuditEvent::new(
                    tenant_id,
                    invoice.id_typed(),
                    AuditAction::SubmissionDeferred,
                    Some(status),
                    status,
                    AuditSource::Submission,
                    serde_json::json!({ "kind": failure.kind, "message": failure.message }),
                    Utc::now(),
                ))
                .await;
        }
        SubmissionResult {
            success: false,
            status,
            registry_document_id: None,
            verification_reference: None,
            error: Some(failure),
        }
    }

    async fn audit_events(&self, events: &[InvoiceEvent], extra: serde_json::Value) {
        for event in events {
            let (tenant_id, invoice_id, previous, next, detail) = match event {
                InvoiceEvent::SubmissionAccepted(e) => (
                    e.tenant_id,
                    e.invoice_id,
                    LifecycleStatus::Draft,
                    LifecycleStatus::Submitted,
                    serde_json::json!({
                        "registryDocumentId": e.registry_document_id,
                        "verificationReference": e.verification_reference,
                        "registry": extra,
                    }),
                ),
                InvoiceEvent::SubmissionFailed(e) => (
                    e.tenant_id,
                    e.invoice_id,
                    e.previous_status,
                    LifecycleStatus::Failed,
                    serde_json::json!({
                        "detail": e.detail,
                        "ruleCodes": e.rule_codes,
                        "registry": extra,
                    }),
                ),
                _ => continue,
            };
            self.audit
                .record(AuditEvent::new(
                    tenant_id,
                    invoice_id,
                    event.audit_action(),
                    Some(previous),
                    next,
                    AuditSource::Submission,
                    detail,
                    event.occurred_at(),
                ))
                .await;
        }
    }
}

impl core::fmt::Debug for SubmissionOrchestrator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubmissionOrchestrator")
            .field("retry", &self.retry)
            .field("max_cas_attempts", &self.max_cas_attempts)
            .finish_non_exhaustive()
    }
}
