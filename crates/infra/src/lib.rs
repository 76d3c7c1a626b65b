//! Infrastructure layer: persistence, registry orchestration, reconciliation
//! and polling.
//!
//! Components take their collaborators as `Arc<dyn Trait>` constructor
//! arguments; nothing here holds ambient global state.

pub mod audit;
pub mod cursor_store;
pub mod invoices;
pub mod issuers;
pub mod poll_worker;
pub mod poller;
pub mod reconciliation;
pub mod retry;
pub mod store;
pub mod submission;

#[cfg(test)]
pub(crate) mod test_support;


pub use audit::{AuditError, AuditRecorder, AuditSink, InMemoryAuditSink, PostgresAuditSink};
pub use cursor_store::{InMemorySyncCursorStore, PostgresSyncCursorStore, SyncCursorStore};
pub use invoices::{InvoiceService, InvoiceServiceError};
pub use issuers::{InMemoryIssuerDirectory, IssuerDirectory, PostgresIssuerDirectory};
pub use poll_worker::{PollWorker, PollWorkerHandle};
pub use poller::{PollError, PollMode, PollReport, PollRun, Poller};
pub use reconciliation::{ReconcileError, ReconcileOutcome, ReconciliationEngine};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{InMemoryInvoiceStore, InvoiceStore, PostgresInvoiceStore, StoreError};
pub use submission::{
    DocumentPreview, FailureKind, SubmissionError, SubmissionFailure, SubmissionOrchestrator,
    SubmissionResult,
};
