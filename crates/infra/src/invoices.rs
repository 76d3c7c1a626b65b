//! Invoice lifecycle operations outside submission and reconciliation:
//! creation, local cancellation and the read side.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use einvoice_core::{DomainError, ExpectedVersion, TenantId};
use einvoice_invoicing::{
    AuditEvent, AuditSource, CancelInvoice, CreateInvoice, Invoice, InvoiceCommand, InvoiceEvent,
    InvoiceId,
};

use crate::audit::{AuditError, AuditRecorder};
use crate::reconciliation::DEFAULT_MAX_CAS_ATTEMPTS;
use crate::store::{CommitError, InvoiceStore, StoreError, commit_command};

#[derive(Debug, Error)]
pub enum InvoiceServiceError {
    #[error("invoice not found")]
    NotFound,

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("gave up after {attempts} conflicting writes")]
    ConflictExhausted { attempts: u32 },
}

impl From<CommitError> for InvoiceServiceError {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::Store(StoreError::NotFound) => InvoiceServiceError::NotFound,
            CommitError::Store(e) => InvoiceServiceError::Store(e),
            CommitError::Domain(e) => InvoiceServiceError::Domain(e),
            CommitError::ConflictExhausted { attempts } => InvoiceServiceError::ConflictExhausted { attempts },
        }
    }
}

#[derive(Clone)]
pub struct InvoiceService {
    store: Arc<dyn InvoiceStore>,
    audit: AuditRecorder,
}

impl InvoiceService {
    pub fn new(store: Arc<dyn InvoiceStore>, audit: AuditRecorder) -> Self {
        Self { store, audit }
    }

    pub async fn create(&self, cmd: CreateInvoice) -> Result<Invoice, InvoiceServiceError> {
        let invoice = Invoice::create(cmd)?;
        self.store.save(&invoice, ExpectedVersion::Absent).await?;

        if let (Some(tenant_id), Some(created_at)) = (invoice.tenant_id(), invoice.created_at()) {
            info!(
                tenant_id = %tenant_id,
                invoice_id = %invoice.id_typed(),
                invoice_number = invoice.invoice_number(),
                status = invoice.lifecycle_status().as_str(),
                "invoice created"
            );
            self.audit
                .record(AuditEvent::new(
                    tenant_id,
                    invoice.id_typed(),
                    einvoice_invoicing::AuditAction::Created,
                    None,
                    invoice.lifecycle_status(),
                    AuditSource::Api,
                    serde_json::json!({
                        "invoiceNumber": invoice.invoice_number(),
                        "documentKind": invoice.document_kind(),
                        "grandTotal": invoice.totals().grand_total,
                    }),
                    created_at,
                ))
                .await;
        }
        Ok(invoice)
    }

    /// Local cancellation of a `draft` or `submitted` invoice.
    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        reason: Option<String>,
    ) -> Result<Invoice, InvoiceServiceError> {
        let invoice = self.get(tenant_id, invoice_id).await?;
        let command = InvoiceCommand::CancelInvoice(CancelInvoice {
            tenant_id,
            invoice_id,
            reason,
            occurred_at: Utc::now(),
        });
        let (invoice, events) = commit_command(&*self.store, invoice, &command, DEFAULT_MAX_CAS_ATTEMPTS).await?;

        for event in &events {
            if let InvoiceEvent::InvoiceCancelled(e) = event {
                info!(tenant_id = %tenant_id, invoice_id = %invoice_id, "invoice cancelled");
                self.audit
                    .record(AuditEvent::new(
                        tenant_id,
                        invoice_id,
                        event.audit_action(),
                        Some(e.previous_status),
                        invoice.lifecycle_status(),
                        AuditSource::Api,
                        serde_json::json!({ "reason": e.reason }),
                        e.occurred_at,
                    ))
                    .await;
            }
        }
        Ok(invoice)
    }

    pub async fn get(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<Invoice, InvoiceServiceError> {
        self.store
            .get(tenant_id, invoice_id)
            .await?
            .ok_or(InvoiceServiceError::NotFound)
    }

    /// Most urgent first, then newest issue date.
    pub async fn list(&self, tenant_id: TenantId) -> Result<Vec<Invoice>, InvoiceServiceError> {
        let mut invoices = self.store.list(tenant_id).await?;
        invoices.sort_by(|a, b| {
            b.lifecycle_status()
                .display_priority()
                .cmp(&a.lifecycle_status().display_priority())
                .then_with(|| b.issue_date().cmp(&a.issue_date()))
                .then_with(|| a.invoice_number().cmp(b.invoice_number()))
        });
        Ok(invoices)
    }

    pub async fn audit_trail(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<AuditEvent>, InvoiceServiceError> {
        self.get(tenant_id, invoice_id).await?;
        Ok(self.audit.sink().list_for_invoice(tenant_id, invoice_id).await?)
    }
}

impl core::fmt::Debug for InvoiceService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InvoiceService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use einvoice_invoicing::{AuditAction, LifecycleStatus};

    use crate::audit::InMemoryAuditSink;
    use crate::store::InMemoryInvoiceStore;
    use crate::test_support::{draft, submitted};

    fn service() -> (InvoiceService, Arc<InMemoryInvoiceStore>, Arc<InMemoryAuditSink>) {
        let store = Arc::new(InMemoryInvoiceStore::new());
        let sink = Arc::new(InMemoryAuditSink::new());
        (InvoiceService::new(store.clone(), AuditRecorder::new(sink.clone())), store, sink)
    }

    #[tokio::test]
    async fn cancel_moves_draft_to_cancelled_once() {
        let (svc, store, sink) = service();
        let tenant = TenantId::new();
        let invoice = draft(tenant, "INV-9", true);
        let id = invoice.id_typed();
        store.save(&invoice, ExpectedVersion::Absent).await.unwrap();

        let cancelled = svc.cancel(tenant, id, Some("duplicate".into())).await.unwrap();
        assert_eq!(cancelled.lifecycle_status(), LifecycleStatus::Cancelled);
        assert!(matches!(
            svc.cancel(tenant, id, None).await,
            Err(InvoiceServiceError::Domain(DomainError::Conflict(_)))
        ));

        let rows = svc.audit_trail(tenant, id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, AuditAction::Cancelled);
        assert_eq!(rows[0].previous_status, Some(LifecycleStatus::Draft));
        assert_eq!(sink.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn list_puts_urgent_statuses_first() {
        let (svc, store, _sink) = service();
        let tenant = TenantId::new();
        let a = draft(tenant, "INV-A", true);
        let b = submitted(tenant, "INV-B", "DOC-B");
        store.save(&b, ExpectedVersion::Absent).await.unwrap();
        store.save(&a, ExpectedVersion::Absent).await.unwrap();

        let listed = svc.list(tenant).await.unwrap();
        let numbers: Vec<&str> = listed.iter().map(|i| i.invoice_number()).collect();
        assert_eq!(numbers, vec!["INV-A", "INV-B"]);
    }

    #[tokio::test]
    async fn unknown_invoice_is_not_found() {
        let (svc, _store, _sink) = service();
        let id = InvoiceId::new(einvoice_core::AggregateId::new());
        assert!(matches!(
            svc.get(TenantId::new(), id).await,
            Err(InvoiceServiceError::NotFound)
        ));
    }
}
