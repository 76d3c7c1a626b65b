use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use einvoice_core::{Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, TenantId};

use crate::audit::AuditAction;
use crate::money::{self, LineItem, LineItemInput, Totals};
use crate::party::Party;
use crate::signal::{IgnoreReason, SignalDecision, SignalSource, StatusSignal};
use crate::status::{LifecycleStatus, MappedStatus, map_registry_status, normalize_status};

/// Invoice identifier (the externally visible UUID).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for InvoiceId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Structural framing of the document sent to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    CreditNote,
    DebitNote,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Invoice => "invoice",
            DocumentKind::CreditNote => "credit_note",
            DocumentKind::DebitNote => "debit_note",
        }
    }

    /// Credit and debit notes adjust an earlier invoice.
    pub fn is_reference_kind(self) -> bool {
        matches!(self, DocumentKind::CreditNote | DocumentKind::DebitNote)
    }
}

impl core::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Pointer from a credit/debit note to the invoice it adjusts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingReference {
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    #[serde(default)]
    pub registry_document_id: Option<String>,
    #[serde(default)]
    pub original_invoice_id: Option<InvoiceId>,
}

/// Aggregate root: Invoice.
///
/// Not event-sourced in storage: stores persist the state snapshot and use
/// `version` as the compare-and-swap token. Events still drive every mutation
/// so each accepted change maps to exactly one audit action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    id: InvoiceId,
    tenant_id: Option<TenantId>,
    invoice_number: String,
    document_kind: DocumentKind,
    direction: Direction,
    lifecycle_status: LifecycleStatus,
    registry_status: Option<String>,
    totals: Totals,
    currency: String,
    issue_date: Option<NaiveDate>,
    issue_time: Option<NaiveTime>,
    due_date: Option<NaiveDate>,
    counterparty: Option<Party>,
    lines: Vec<LineItem>,
    billing_reference: Option<BillingReference>,
    registry_document_id: Option<String>,
    verification_reference: Option<String>,
    failure_detail: Option<String>,
    failure_codes: Vec<String>,
    last_reconciled_at: Option<DateTime<Utc>>,
    last_signal_source: Option<SignalSource>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            invoice_number: String::new(),
            document_kind: DocumentKind::Invoice,
            direction: Direction::Outgoing,
            lifecycle_status: LifecycleStatus::Draft,
            registry_status: None,
            totals: Totals::zero(),
            currency: String::new(),
            issue_date: None,
            issue_time: None,
            due_date: None,
            counterparty: None,
            lines: Vec::new(),
            billing_reference: None,
            registry_document_id: None,
            verification_reference: None,
            failure_detail: None,
            failure_codes: Vec::new(),
            last_reconciled_at: None,
            last_signal_source: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    /// Validate `cmd` and return the created aggregate.
    pub fn create(cmd: CreateInvoice) -> DomainResult<Self> {
        let mut invoice = Invoice::empty(cmd.invoice_id);
        invoice.execute(&InvoiceCommand::CreateInvoice(cmd))?;
        Ok(invoice)
    }

    /// Handle a command and apply the resulting events in place.
    pub fn execute(&mut self, command: &InvoiceCommand) -> DomainResult<Vec<InvoiceEvent>> {
        let events = self.handle(command)?;
        for event in &events {
            self.apply(event);
        }
        Ok(events)
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn document_kind(&self) -> DocumentKind {
        self.document_kind
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn lifecycle_status(&self) -> LifecycleStatus {
        self.lifecycle_status
    }

    pub fn registry_status(&self) -> Option<&str> {
        self.registry_status.as_deref()
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn issue_date(&self) -> Option<NaiveDate> {
        self.issue_date
    }

    pub fn issue_time(&self) -> Option<NaiveTime> {
        self.issue_time
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn counterparty(&self) -> Option<&Party> {
        self.counterparty.as_ref()
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn billing_reference(&self) -> Option<&BillingReference> {
        self.billing_reference.as_ref()
    }

    pub fn registry_document_id(&self) -> Option<&str> {
        self.registry_document_id.as_deref()
    }

    pub fn verification_reference(&self) -> Option<&str> {
        self.verification_reference.as_deref()
    }

    pub fn failure_detail(&self) -> Option<&str> {
        self.failure_detail.as_deref()
    }

    pub fn failure_codes(&self) -> &[String] {
        &self.failure_codes
    }

    pub fn last_reconciled_at(&self) -> Option<DateTime<Utc>> {
        self.last_reconciled_at
    }

    pub fn last_signal_source(&self) -> Option<SignalSource> {
        self.last_signal_source
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Decide what a status signal does to this invoice. Pure.
    ///
    /// Gate order: document identity, string-level dedup (relaxed when the
    /// other channel confirms after `dedup_window`), mapping, transition validity.
    pub fn decide_signal(&self, signal: &StatusSignal, dedup_window: Duration) -> SignalDecision {
        let Some(document_id) = self.registry_document_id.as_deref() else {
            return SignalDecision::Ignore(IgnoreReason::DocumentMismatch);
        };
        if document_id != signal.external_document_id {
            return SignalDecision::Ignore(IgnoreReason::DocumentMismatch);
        }

        let reported = normalize_status(&signal.reported_status);
        let same_string = self
            .registry_status
            .as_deref()
            .is_some_and(|stored| normalize_status(stored) == reported);
        if same_string && !self.cross_channel_recheck_due(signal, dedup_window) {
            return SignalDecision::Ignore(IgnoreReason::Duplicate);
        }

        let current = self.lifecycle_status;
        match map_registry_status(&signal.reported_status, current) {
            MappedStatus::Unrecognized => SignalDecision::Ignore(IgnoreReason::Unrecognized {
                status: signal.reported_status.clone(),
            }),
            MappedStatus::NotApplicable => SignalDecision::Ignore(IgnoreReason::NoTransition {
                current,
                mapped: None,
            }),
            MappedStatus::Target(target) if current.can_transition_to(target) => {
                SignalDecision::Apply {
                    from: current,
                    to: target,
                }
            }
            MappedStatus::Target(target) => SignalDecision::Ignore(IgnoreReason::NoTransition {
                current,
                mapped: Some(target),
            }),
        }
    }

    fn cross_channel_recheck_due(&self, signal: &StatusSignal, window: Duration) -> bool {
        match (self.last_signal_source, self.last_reconciled_at) {
            (Some(source), Some(at)) => {
                source != signal.source && signal.observed_at.signed_duration_since(at) >= window
            }
            _ => false,
        }
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub document_kind: DocumentKind,
    pub direction: Direction,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub issue_time: Option<NaiveTime>,
    pub due_date: Option<NaiveDate>,
    pub counterparty: Party,
    pub lines: Vec<LineItemInput>,
    /// Totals claimed by the caller; must equal the recomputed totals.
    pub declared_totals: Option<Totals>,
    pub billing_reference: Option<BillingReference>,
    /// Incoming documents arrive already registered.
    pub registry_document_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordSubmissionAccepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSubmissionAccepted {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub registry_document_id: String,
    pub verification_reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordSubmissionFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSubmissionFailed {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub detail: String,
    pub rule_codes: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyStatusSignal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyStatusSignal {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub signal: StatusSignal,
    pub dedup_window_secs: i64,
}

/// Command: CancelInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    CreateInvoice(CreateInvoice),
    RecordSubmissionAccepted(RecordSubmissionAccepted),
    RecordSubmissionFailed(RecordSubmissionFailed),
    ApplyStatusSignal(ApplyStatusSignal),
    CancelInvoice(CancelInvoice),
}

/// Event: InvoiceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub document_kind: DocumentKind,
    pub direction: Direction,
    pub initial_status: LifecycleStatus,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub issue_time: Option<NaiveTime>,
    pub due_date: Option<NaiveDate>,
    pub counterparty: Party,
    pub lines: Vec<LineItem>,
    pub totals: Totals,
    pub billing_reference: Option<BillingReference>,
    pub registry_document_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SubmissionAccepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionAccepted {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub registry_document_id: String,
    pub verification_reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SubmissionFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionFailed {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub previous_status: LifecycleStatus,
    pub detail: String,
    pub rule_codes: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusReconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReconciled {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub from: LifecycleStatus,
    pub to: LifecycleStatus,
    pub registry_status: String,
    pub source: SignalSource,
    pub observed_at: DateTime<Utc>,
}

/// Event: InvoiceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub previous_status: LifecycleStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceCreated(InvoiceCreated),
    SubmissionAccepted(SubmissionAccepted),
    SubmissionFailed(SubmissionFailed),
    StatusReconciled(StatusReconciled),
    InvoiceCancelled(InvoiceCancelled),
}

impl InvoiceEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated(_) => "invoicing.invoice.created",
            InvoiceEvent::SubmissionAccepted(_) => "invoicing.invoice.submission_accepted",
            InvoiceEvent::SubmissionFailed(_) => "invoicing.invoice.submission_failed",
            InvoiceEvent::StatusReconciled(_) => "invoicing.invoice.status_reconciled",
            InvoiceEvent::InvoiceCancelled(_) => "invoicing.invoice.cancelled",
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.occurred_at,
            InvoiceEvent::SubmissionAccepted(e) => e.occurred_at,
            InvoiceEvent::SubmissionFailed(e) => e.occurred_at,
            InvoiceEvent::StatusReconciled(e) => e.observed_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
        }
    }

    /// Audit vocabulary for this event.
    pub fn audit_action(&self) -> AuditAction {
        match self {
            InvoiceEvent::InvoiceCreated(_) => AuditAction::Created,
            InvoiceEvent::SubmissionAccepted(_) => AuditAction::Submitted,
            InvoiceEvent::SubmissionFailed(_) => AuditAction::SubmissionFailed,
            InvoiceEvent::StatusReconciled(e) => AuditAction::for_reconciled_status(e.to),
            InvoiceEvent::InvoiceCancelled(_) => AuditAction::Cancelled,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceCreated(e) => {
                self.id = e.invoice_id;
                self.tenant_id = Some(e.tenant_id);
                self.invoice_number = e.invoice_number.clone();
                self.document_kind = e.document_kind;
                self.direction = e.direction;
                self.lifecycle_status = e.initial_status;
                self.currency = e.currency.clone();
                self.issue_date = Some(e.issue_date);
                self.issue_time = e.issue_time;
                self.due_date = e.due_date;
                self.counterparty = Some(e.counterparty.clone());
                self.lines = e.lines.clone();
                self.totals = e.totals;
                self.billing_reference = e.billing_reference.clone();
                self.registry_document_id = e.registry_document_id.clone();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            InvoiceEvent::SubmissionAccepted(e) => {
                self.lifecycle_status = LifecycleStatus::Submitted;
                self.registry_document_id = Some(e.registry_document_id.clone());
                self.verification_reference = e.verification_reference.clone();
                self.failure_detail = None;
                self.failure_codes.clear();
            }
            InvoiceEvent::SubmissionFailed(e) => {
                self.lifecycle_status = LifecycleStatus::Failed;
                self.failure_detail = Some(e.detail.clone());
                self.failure_codes = e.rule_codes.clone();
            }
            InvoiceEvent::StatusReconciled(e) => {
                self.lifecycle_status = e.to;
                self.registry_status = Some(e.registry_status.clone());
                self.last_reconciled_at = Some(e.observed_at);
                self.last_signal_source = Some(e.source);
            }
            InvoiceEvent::InvoiceCancelled(_) => {
                self.lifecycle_status = LifecycleStatus::Cancelled;
            }
        }

        self.updated_at = Some(event.occurred_at());
        // +1 per applied event; this is the CAS token.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::CreateInvoice(cmd) => self.handle_create(cmd),
            InvoiceCommand::RecordSubmissionAccepted(cmd) => self.handle_accepted(cmd),
            InvoiceCommand::RecordSubmissionFailed(cmd) => self.handle_failed(cmd),
            InvoiceCommand::ApplyStatusSignal(cmd) => self.handle_signal(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Invoice {
    fn ensure_target(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }

        let invoice_number = cmd.invoice_number.trim();
        if invoice_number.is_empty() {
            return Err(DomainError::validation("invoice_number is required"));
        }

        let currency = cmd.currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(
                "currency must be a three-letter ISO 4217 code",
            ));
        }

        if let Some(due) = cmd.due_date {
            if due < cmd.issue_date {
                return Err(DomainError::validation("due_date precedes issue_date"));
            }
        }

        if cmd.billing_reference.is_some() && !cmd.document_kind.is_reference_kind() {
            return Err(DomainError::validation(
                "billing_reference is only allowed on credit and debit notes",
            ));
        }

        let registry_document_id = cmd
            .registry_document_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let initial_status = match (cmd.direction, &registry_document_id) {
            (Direction::Outgoing, None) => LifecycleStatus::Draft,
            (Direction::Outgoing, Some(_)) => {
                return Err(DomainError::validation(
                    "outgoing invoices receive their registry_document_id on submission",
                ));
            }
            (Direction::Incoming, Some(_)) => LifecycleStatus::Received,
            (Direction::Incoming, None) => {
                return Err(DomainError::validation(
                    "incoming documents require a registry_document_id",
                ));
            }
        };

        let lines = money::build_lines(&cmd.lines)?;
        let totals = Totals::from_lines(&lines)?;
        if let Some(declared) = &cmd.declared_totals {
            if !declared.matches(&totals) {
                return Err(DomainError::validation(format!(
                    "declared totals do not match line items (subtotal {} vs {}, tax {} vs {}, total {} vs {})",
                    declared.subtotal,
                    totals.subtotal,
                    declared.tax_total,
                    totals.tax_total,
                    declared.grand_total,
                    totals.grand_total
                )));
            }
        }

        Ok(vec![InvoiceEvent::InvoiceCreated(InvoiceCreated {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            invoice_number: invoice_number.to_string(),
            document_kind: cmd.document_kind,
            direction: cmd.direction,
            initial_status,
            currency,
            issue_date: cmd.issue_date,
            issue_time: cmd.issue_time,
            due_date: cmd.due_date,
            counterparty: cmd.counterparty.clone(),
            lines,
            totals,
            billing_reference: cmd.billing_reference.clone(),
            registry_document_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_accepted(
        &self,
        cmd: &RecordSubmissionAccepted,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.invoice_id)?;

        if self.lifecycle_status != LifecycleStatus::Draft {
            return Err(DomainError::conflict(format!(
                "only draft invoices can be submitted (current: {})",
                self.lifecycle_status
            )));
        }
        if self.registry_document_id.is_some() {
            return Err(DomainError::invariant(
                "registry_document_id is already assigned",
            ));
        }
        let document_id = cmd.registry_document_id.trim();
        if document_id.is_empty() {
            return Err(DomainError::validation("registry_document_id is required"));
        }

        Ok(vec![InvoiceEvent::SubmissionAccepted(SubmissionAccepted {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            registry_document_id: document_id.to_string(),
            verification_reference: cmd.verification_reference.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_failed(&self, cmd: &RecordSubmissionFailed) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.invoice_id)?;

        if !self.lifecycle_status.can_transition_to(LifecycleStatus::Failed) {
            return Err(DomainError::conflict(format!(
                "cannot mark {} invoice as failed",
                self.lifecycle_status
            )));
        }

        Ok(vec![InvoiceEvent::SubmissionFailed(SubmissionFailed {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            previous_status: self.lifecycle_status,
            detail: cmd.detail.clone(),
            rule_codes: cmd.rule_codes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_signal(&self, cmd: &ApplyStatusSignal) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.invoice_id)?;

        let window = Duration::seconds(cmd.dedup_window_secs.max(0));
        match self.decide_signal(&cmd.signal, window) {
            SignalDecision::Apply { from, to } => {
                Ok(vec![InvoiceEvent::StatusReconciled(StatusReconciled {
                    tenant_id: cmd.tenant_id,
                    invoice_id: cmd.invoice_id,
                    from,
                    to,
                    registry_status: cmd.signal.reported_status.trim().to_string(),
                    source: cmd.signal.source,
                    observed_at: cmd.signal.observed_at,
                })])
            }
            SignalDecision::Ignore(_) => Ok(vec![]),
        }
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.invoice_id)?;

        if !self.lifecycle_status.can_transition_to(LifecycleStatus::Cancelled) {
            return Err(DomainError::conflict(format!(
                "cannot cancel {} invoice",
                self.lifecycle_status
            )));
        }

        Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            previous_status: self.lifecycle_status,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::party::PostalAddress;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn counterparty() -> Party {
        Party {
            name: "Buyer Sdn Bhd".to_string(),
            tax_id: Some("C2584563200".to_string()),
            registration_id: Some("201901234567".to_string()),
            address: Some(PostalAddress {
                lines: vec!["Lot 66, Jalan Perusahaan".to_string()],
                city: "Kuala Lumpur".to_string(),
                postal_zone: Some("50480".to_string()),
                country_subentity: Some("14".to_string()),
                country_code: "MYS".to_string(),
            }),
            email: None,
            phone: None,
        }
    }

    fn create_cmd(tenant_id: TenantId, invoice_id: InvoiceId) -> CreateInvoice {
        CreateInvoice {
            tenant_id,
            invoice_id,
            invoice_number: "INV-0001".to_string(),
            document_kind: DocumentKind::Invoice,
            direction: Direction::Outgoing,
            currency: "myr".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            issue_time: None,
            due_date: NaiveDate::from_ymd_opt(2025, 3, 31),
            counterparty: counterparty(),
            lines: vec![LineItemInput {
                line_no: 1,
                description: "Widget".to_string(),
                quantity: dec!(2),
                unit_code: None,
                unit_price: dec!(50),
                tax_rate: dec!(10),
                classification_code: None,
            }],
            declared_totals: None,
            billing_reference: None,
            registry_document_id: None,
            occurred_at: test_time(),
        }
    }

    fn submitted_invoice() -> (TenantId, Invoice) {
        let tenant_id = TenantId::new();
        let invoice_id = InvoiceId::new(AggregateId::new());
        let mut invoice = Invoice::create(create_cmd(tenant_id, invoice_id)).unwrap();
        invoice
            .execute(&InvoiceCommand::RecordSubmissionAccepted(
                RecordSubmissionAccepted {
                    tenant_id,
                    invoice_id,
                    registry_document_id: "DOC-1".to_string(),
                    verification_reference: Some("https://registry.example/v/DOC-1".to_string()),
                    occurred_at: test_time(),
                },
            ))
            .unwrap();
        (tenant_id, invoice)
    }

    fn signal(status: &str, source: SignalSource, offset_secs: i64) -> StatusSignal {
        StatusSignal::new(
            "DOC-1",
            status,
            source,
            test_time() + Duration::seconds(offset_secs),
        )
    }

    fn apply(invoice: &mut Invoice, tenant_id: TenantId, signal: StatusSignal) -> usize {
        invoice
            .execute(&InvoiceCommand::ApplyStatusSignal(ApplyStatusSignal {
                tenant_id,
                invoice_id: invoice.id_typed(),
                signal,
                dedup_window_secs: 30,
            }))
            .unwrap()
            .len()
    }

    #[test]
    fn create_computes_totals_and_starts_in_draft() {
        let invoice =
            Invoice::create(create_cmd(TenantId::new(), InvoiceId::new(AggregateId::new())))
                .unwrap();
        assert_eq!(invoice.lifecycle_status(), LifecycleStatus::Draft);
        assert_eq!(invoice.totals().subtotal, dec!(100));
        assert_eq!(invoice.totals().tax_total, dec!(10));
        assert_eq!(invoice.totals().grand_total, dec!(110));
        assert_eq!(invoice.currency(), "MYR");
        assert_eq!(invoice.version(), 1);
        assert!(invoice.registry_document_id().is_none());
    }

    #[test]
    fn create_rejects_mismatched_declared_totals() {
        let mut cmd = create_cmd(TenantId::new(), InvoiceId::new(AggregateId::new()));
        cmd.declared_totals = Some(Totals {
            subtotal: dec!(99),
            tax_total: dec!(10),
            grand_total: dec!(109),
        });
        let err = Invoice::create(cmd).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("declared totals")));
    }

    #[test]
    fn incoming_documents_start_received() {
        let mut cmd = create_cmd(TenantId::new(), InvoiceId::new(AggregateId::new()));
        cmd.direction = Direction::Incoming;
        cmd.registry_document_id = Some("IN-9".to_string());
        let invoice = Invoice::create(cmd).unwrap();
        assert_eq!(invoice.lifecycle_status(), LifecycleStatus::Received);
        assert_eq!(invoice.registry_document_id(), Some("IN-9"));
    }

    #[test]
    fn billing_reference_rejected_on_plain_invoice() {
        let mut cmd = create_cmd(TenantId::new(), InvoiceId::new(AggregateId::new()));
        cmd.billing_reference = Some(BillingReference {
            invoice_number: "INV-0000".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            registry_document_id: None,
            original_invoice_id: None,
        });
        assert!(Invoice::create(cmd).is_err());
    }

    #[test]
    fn submission_assigns_registry_id_once() {
        let (tenant_id, invoice) = submitted_invoice();
        assert_eq!(invoice.lifecycle_status(), LifecycleStatus::Submitted);
        assert_eq!(invoice.registry_document_id(), Some("DOC-1"));

        let err = invoice
            .handle(&InvoiceCommand::RecordSubmissionAccepted(
                RecordSubmissionAccepted {
                    tenant_id,
                    invoice_id: invoice.id_typed(),
                    registry_document_id: "DOC-2".to_string(),
                    verification_reference: None,
                    occurred_at: test_time(),
                },
            ))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn same_signal_twice_changes_state_once() {
        let (tenant_id, mut invoice) = submitted_invoice();
        assert_eq!(apply(&mut invoice, tenant_id, signal("VALIDATED", SignalSource::Webhook, 1)), 1);
        let version = invoice.version();
        assert_eq!(apply(&mut invoice, tenant_id, signal("VALIDATED", SignalSource::Webhook, 1)), 0);
        assert_eq!(invoice.version(), version);
        assert_eq!(invoice.lifecycle_status(), LifecycleStatus::Validated);
    }

    #[test]
    fn processing_after_validated_does_not_regress() {
        let (tenant_id, mut invoice) = submitted_invoice();
        apply(&mut invoice, tenant_id, signal("VALIDATED", SignalSource::Webhook, 0));
        let decision = invoice.decide_signal(
            &signal("processing", SignalSource::Poll, 5),
            Duration::seconds(30),
        );
        assert_eq!(
            decision,
            SignalDecision::Ignore(IgnoreReason::NoTransition {
                current: LifecycleStatus::Validated,
                mapped: Some(LifecycleStatus::Submitted),
            })
        );
    }

    #[test]
    fn other_channel_confirmation_within_window_is_duplicate() {
        let (_, mut invoice) = submitted_invoice();
        let tenant_id = invoice.tenant_id().unwrap();
        apply(&mut invoice, tenant_id, signal("accepted", SignalSource::Webhook, 0));
        let decision = invoice.decide_signal(
            &signal("ACCEPTED", SignalSource::Poll, 10),
            Duration::seconds(30),
        );
        assert_eq!(decision, SignalDecision::Ignore(IgnoreReason::Duplicate));

        // Past the window the gate opens, but there is still nothing to move.
        let decision = invoice.decide_signal(
            &signal("ACCEPTED", SignalSource::Poll, 60),
            Duration::seconds(30),
        );
        assert!(matches!(
            decision,
            SignalDecision::Ignore(IgnoreReason::NoTransition { .. })
        ));
    }

    #[test]
    fn signal_for_other_document_is_ignored() {
        let (_, invoice) = submitted_invoice();
        let mut other = signal("accepted", SignalSource::Webhook, 0);
        other.external_document_id = "DOC-404".to_string();
        assert_eq!(
            invoice.decide_signal(&other, Duration::seconds(30)),
            SignalDecision::Ignore(IgnoreReason::DocumentMismatch)
        );
    }

    #[test]
    fn unrecognized_status_is_reported() {
        let (_, invoice) = submitted_invoice();
        assert!(matches!(
            invoice.decide_signal(&signal("archived", SignalSource::Poll, 0), Duration::seconds(30)),
            SignalDecision::Ignore(IgnoreReason::Unrecognized { .. })
        ));
    }

    #[test]
    fn delivered_moves_submitted_to_sent() {
        let (tenant_id, mut invoice) = submitted_invoice();
        apply(&mut invoice, tenant_id, signal("Delivered", SignalSource::Webhook, 0));
        assert_eq!(invoice.lifecycle_status(), LifecycleStatus::Sent);
    }

    #[test]
    fn cancel_is_refused_after_validation() {
        let (tenant_id, mut invoice) = submitted_invoice();
        apply(&mut invoice, tenant_id, signal("valid", SignalSource::Poll, 0));
        let err = invoice
            .handle(&InvoiceCommand::CancelInvoice(CancelInvoice {
                tenant_id,
                invoice_id: invoice.id_typed(),
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn failed_invoice_cannot_be_submitted_in_place() {
        let tenant_id = TenantId::new();
        let invoice_id = InvoiceId::new(AggregateId::new());
        let mut invoice = Invoice::create(create_cmd(tenant_id, invoice_id)).unwrap();
        invoice
            .execute(&InvoiceCommand::RecordSubmissionFailed(RecordSubmissionFailed {
                tenant_id,
                invoice_id,
                detail: "rule BR-09 failed".to_string(),
                rule_codes: vec!["BR-09".to_string()],
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(invoice.lifecycle_status(), LifecycleStatus::Failed);
        assert_eq!(invoice.failure_codes(), &["BR-09".to_string()]);

        let err = invoice
            .handle(&InvoiceCommand::RecordSubmissionAccepted(
                RecordSubmissionAccepted {
                    tenant_id,
                    invoice_id,
                    registry_document_id: "DOC-1".to_string(),
                    verification_reference: None,
                    occurred_at: test_time(),
                },
            ))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    fn status_strategy() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec![
            "validated",
            "VALID",
            "invalid",
            "accepted",
            "rejected",
            "processing",
            "pending",
            "delivered",
            "unknown-thing",
        ])
    }

    fn source_strategy() -> impl Strategy<Value = SignalSource> {
        prop::sample::select(vec![SignalSource::Webhook, SignalSource::Poll])
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: re-applying any signal right after it was applied is a no-op.
        #[test]
        fn reapplying_a_signal_is_a_no_op(
            statuses in prop::collection::vec((status_strategy(), source_strategy()), 1..8)
        ) {
            let (tenant_id, mut invoice) = submitted_invoice();
            for (idx, (status, source)) in statuses.into_iter().enumerate() {
                let s = signal(status, source, idx as i64);
                apply(&mut invoice, tenant_id, s.clone());
                let snapshot = invoice.clone();
                prop_assert_eq!(apply(&mut invoice, tenant_id, s), 0);
                prop_assert_eq!(&invoice, &snapshot);
            }
        }

        /// Property: the lifecycle status never moves to an earlier stage.
        #[test]
        fn status_never_regresses(
            statuses in prop::collection::vec((status_strategy(), source_strategy()), 1..10)
        ) {
            let (tenant_id, mut invoice) = submitted_invoice();
            for (idx, (status, source)) in statuses.into_iter().enumerate() {
                let before = invoice.lifecycle_status();
                apply(&mut invoice, tenant_id, signal(status, source, idx as i64));
                let after = invoice.lifecycle_status();
                prop_assert!(after.stage() >= before.stage());
                if before.is_absorbing() {
                    prop_assert_eq!(before, after);
                }
            }
        }

        /// Property: validated/accepted converge to accepted in any order and channel mix.
        #[test]
        fn validated_and_accepted_converge(
            first_source in source_strategy(),
            second_source in source_strategy(),
            accepted_first in any::<bool>(),
        ) {
            let (tenant_id, mut invoice) = submitted_invoice();
            let validated = signal("validated", first_source, 1);
            let accepted = signal("accepted", second_source, 2);
            if accepted_first {
                apply(&mut invoice, tenant_id, accepted);
                apply(&mut invoice, tenant_id, validated);
            } else {
                apply(&mut invoice, tenant_id, validated);
                apply(&mut invoice, tenant_id, accepted);
            }
            prop_assert_eq!(invoice.lifecycle_status(), LifecycleStatus::Accepted);
        }
    }
}
