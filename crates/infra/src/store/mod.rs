//! Invoice persistence.
//!
//! Stores keep the latest invoice snapshot per `(tenant, invoice)` and use
//! the aggregate `version` as the compare-and-swap token. There are no locks:
//! a writer that loses the race gets `StoreError::Conflict` and re-reads.

mod in_memory;
mod postgres;

use std::sync::Arc;

use thiserror::Error;

use tracing::debug;

use einvoice_core::{AggregateRoot, DomainError, ExpectedVersion, TenantId};
use einvoice_invoicing::{Invoice, InvoiceCommand, InvoiceEvent, InvoiceId};

pub use in_memory::InMemoryInvoiceStore;
pub use postgres::PostgresInvoiceStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("invoice not found")]
    NotFound,

    #[error("version conflict (expected {expected:?}, actual {actual:?})")]
    Conflict {
        expected: ExpectedVersion,
        actual: Option<u64>,
    },

    #[error("invoice number {0} already exists")]
    DuplicateNumber(String),

    #[error("invoice is not bound to a tenant")]
    MissingTenant,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[async_trait::async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn get(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError>;

    async fn find_by_registry_document(
        &self,
        tenant_id: TenantId,
        document_id: &str,
    ) -> Result<Option<Invoice>, StoreError>;

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Invoice>, StoreError>;

    /// Registry-tracked, non-absorbing invoices, least recently reconciled first.
    async fn list_tracked(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<Invoice>, StoreError>;

    /// Conditional write of the snapshot.
    ///
    /// - `Absent`: insert; conflict when the invoice exists.
    /// - `Exact(v)`: update only while the stored version is `v`.
    /// - `Any`: unconditional upsert.
    async fn save(&self, invoice: &Invoice, expected: ExpectedVersion) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<S: InvoiceStore + ?Sized> InvoiceStore for Arc<S> {
    async fn get(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        (**self).get(tenant_id, invoice_id).await
    }

    async fn find_by_registry_document(
        &self,
        tenant_id: TenantId,
        document_id: &str,
    ) -> Result<Option<Invoice>, StoreError> {
        (**self).find_by_registry_document(tenant_id, document_id).await
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Invoice>, StoreError> {
        (**self).list(tenant_id).await
    }

    async fn list_tracked(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<Invoice>, StoreError> {
        (**self).list_tracked(tenant_id, limit).await
    }

    async fn save(&self, invoice: &Invoice, expected: ExpectedVersion) -> Result<(), StoreError> {
        (**self).save(invoice, expected).await
    }
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("gave up after {attempts} conflicting writes")]
    ConflictExhausted { attempts: u32 },
}

/// What a commit cycle should do with the invoice it just read.
#[derive(Debug)]
pub enum Decision<T> {
    Execute(InvoiceCommand),
    Skip(T),
}

#[derive(Debug)]
pub enum Committed<T> {
    Written { invoice: Invoice, events: Vec<InvoiceEvent> },
    Skipped { invoice: Invoice, reason: T },
}

/// Read-decide-write cycle conditioned on the invoice version. `decide` runs
/// against every fresh read, so a lost race is decided again on the winner's
/// state. A `Skip` writes nothing.
pub async fn commit_decided<S, T, F>(
    store: &S,
    mut invoice: Invoice,
    max_attempts: u32,
    mut decide: F,
) -> Result<Committed<T>, CommitError>
where
    S: InvoiceStore + ?Sized,
    F: FnMut(&Invoice) -> Decision<T>,
{
    let tenant_id = invoice.tenant_id().ok_or(StoreError::MissingTenant)?;
    let invoice_id = invoice.id_typed();
    let attempts = max_attempts.max(1);

    for attempt in 1..=attempts {
        let command = match decide(&invoice) {
            Decision::Execute(command) => command,
            Decision::Skip(reason) => return Ok(Committed::Skipped { invoice, reason }),
        };
        let expected = ExpectedVersion::Exact(invoice.version());
        let events = invoice.execute(&command)?;
        match store.save(&invoice, expected).await {
            Ok(()) => return Ok(Committed::Written { invoice, events }),
            Err(err) if err.is_conflict() => {
                debug!(
                    tenant_id = %tenant_id,
                    invoice_id = %invoice_id,
                    attempt,
                    "version conflict on commit, re-reading"
                );
                invoice = store.get(tenant_id, invoice_id).await?.ok_or(StoreError::NotFound)?;
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(CommitError::ConflictExhausted { attempts })
}

/// Execute `command` against `invoice` and write it back conditioned on the
/// version it was read at. Domain errors on a re-read state are returned as-is.
pub async fn commit_command<S: InvoiceStore + ?Sized>(
    store: &S,
    invoice: Invoice,
    command: &InvoiceCommand,
    max_attempts: u32,
) -> Result<(Invoice, Vec<InvoiceEvent>), CommitError> {
    let committed = commit_decided(store, invoice, max_attempts, |_| {
        Decision::<core::convert::Infallible>::Execute(command.clone())
    })
    .await?;
    match committed {
        Committed::Written { invoice, events } => Ok((invoice, events)),
        Committed::Skipped { reason, .. } => match reason {},
    }
}

/// Ordering used for tracked batches: never-reconciled first, then oldest.
pub(crate) fn tracked_order(a: &Invoice, b: &Invoice) -> core::cmp::Ordering {
    a.last_reconciled_at()
        .cmp(&b.last_reconciled_at())
        .then_with(|| a.created_at().cmp(&b.created_at()))
        .then_with(|| a.id_typed().cmp(&b.id_typed()))
}

pub(crate) fn is_tracked(invoice: &Invoice) -> bool {
    invoice.registry_document_id().is_some() && invoice.lifecycle_status().needs_tracking()
}
