use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use einvoice_infra::PollMode;
use einvoice_invoicing::{
    BillingReference, Direction, DocumentKind, Invoice, LifecycleStatus, LineItem, LineItemInput,
    Party, SignalSource, Totals,
};

// -------------------------
// Request DTOs
// -------------------------

fn default_kind() -> DocumentKind {
    DocumentKind::Invoice
}

fn default_direction() -> Direction {
    Direction::Outgoing
}

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub invoice_number: String,
    #[serde(default = "default_kind")]
    pub document_kind: DocumentKind,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    pub currency: String,
    pub issue_date: NaiveDate,
    #[serde(default)]
    pub issue_time: Option<NaiveTime>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub counterparty: Party,
    pub lines: Vec<LineItemInput>,
    /// When present, must match the recomputed totals exactly.
    #[serde(default)]
    pub totals: Option<Totals>,
    #[serde(default)]
    pub billing_reference: Option<BillingReference>,
    #[serde(default)]
    pub registry_document_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PollQuery {
    /// `tracked`, `delta` or absent for both.
    #[serde(default)]
    pub mode: Option<String>,
}

impl PollQuery {
    /// `Ok(None)` means run both modes.
    pub fn parse_mode(&self) -> Result<Option<PollMode>, String> {
        match self.mode.as_deref().map(str::trim) {
            None | Some("") | Some("all") => Ok(None),
            Some(m) if m.eq_ignore_ascii_case("tracked") => Ok(Some(PollMode::Tracked)),
            Some(m) if m.eq_ignore_ascii_case("delta") => Ok(Some(PollMode::Delta)),
            Some(other) => Err(format!("unknown poll mode {other:?}; expected tracked, delta or all")),
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub id: String,
    pub invoice_number: String,
    pub document_kind: DocumentKind,
    pub direction: Direction,
    pub status: LifecycleStatus,
    pub registry_status: Option<String>,
    pub currency: String,
    pub issue_date: Option<NaiveDate>,
    pub issue_time: Option<NaiveTime>,
    pub due_date: Option<NaiveDate>,
    pub counterparty: Option<Party>,
    pub lines: Vec<LineItem>,
    pub totals: Totals,
    pub billing_reference: Option<BillingReference>,
    pub registry_document_id: Option<String>,
    pub verification_reference: Option<String>,
    pub failure_detail: Option<String>,
    pub failure_codes: Vec<String>,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    pub last_signal_source: Option<SignalSource>,
    pub version: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Invoice> for InvoiceResponse {
    fn from(invoice: &Invoice) -> Self {
        use einvoice_core::AggregateRoot;

        Self {
            id: invoice.id_typed().to_string(),
            invoice_number: invoice.invoice_number().to_string(),
            document_kind: invoice.document_kind(),
            direction: invoice.direction(),
            status: invoice.lifecycle_status(),
            registry_status: invoice.registry_status().map(str::to_string),
            currency: invoice.currency().to_string(),
            issue_date: invoice.issue_date(),
            issue_time: invoice.issue_time(),
            due_date: invoice.due_date(),
            counterparty: invoice.counterparty().cloned(),
            lines: invoice.lines().to_vec(),
            totals: invoice.totals(),
            billing_reference: invoice.billing_reference().cloned(),
            registry_document_id: invoice.registry_document_id().map(str::to_string),
            verification_reference: invoice.verification_reference().map(str::to_string),
            failure_detail: invoice.failure_detail().map(str::to_string),
            failure_codes: invoice.failure_codes().to_vec(),
            last_reconciled_at: invoice.last_reconciled_at(),
            last_signal_source: invoice.last_signal_source(),
            version: invoice.version(),
            created_at: invoice.created_at(),
            updated_at: invoice.updated_at(),
        }
    }
}
