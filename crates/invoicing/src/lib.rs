//! Invoicing domain module.
//!
//! Business rules for registry-tracked invoices, credit notes and debit notes:
//! fixed-point line/total arithmetic, the lifecycle state machine, the single
//! registry-status mapping table and the audit vocabulary. Deterministic
//! domain logic only (no IO, no HTTP, no storage, no clock reads).

pub mod audit;
pub mod invoice;
pub mod money;
pub mod party;
pub mod signal;
pub mod status;

pub use audit::{AuditAction, AuditEvent, AuditSource};
pub use invoice::{
    ApplyStatusSignal, BillingReference, CancelInvoice, CreateInvoice, Direction, DocumentKind,
    Invoice, InvoiceCancelled, InvoiceCommand, InvoiceCreated, InvoiceEvent, InvoiceId,
    RecordSubmissionAccepted, RecordSubmissionFailed, StatusReconciled, SubmissionAccepted,
    SubmissionFailed,
};
pub use money::{AMOUNT_SCALE, LineItem, LineItemInput, Totals, round_amount};
pub use party::{IssuerProfile, Party, PostalAddress};
pub use signal::{IgnoreReason, SignalDecision, SignalSource, StatusSignal};
pub use status::{LifecycleStatus, MappedStatus, map_registry_status, normalize_status};
