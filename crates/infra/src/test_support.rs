//! Shared doubles for infra tests: invoice builders and a scripted registry.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;

use einvoice_core::{AggregateId, TenantId};
use einvoice_invoicing::{
    CreateInvoice, Direction, DocumentKind, Invoice, InvoiceCommand, InvoiceId, IssuerProfile,
    LineItemInput, Party, PostalAddress, RecordSubmissionAccepted,
};
use einvoice_registry::{
    Credential, DocumentDetail, PollResponse, RegistryClient, RegistryError, SubmissionDocument,
    SubmitResponse,
};

pub(crate) fn address() -> PostalAddress {
    PostalAddress {
        lines: vec!["Lot 66, Jalan Perdana".to_string()],
        city: "Kuala Lumpur".to_string(),
        postal_zone: Some("50480".to_string()),
        country_subentity: Some("14".to_string()),
        country_code: "MYS".to_string(),
    }
}

pub(crate) fn issuer() -> IssuerProfile {
    IssuerProfile {
        party: Party {
            name: "Seller Sdn Bhd".to_string(),
            tax_id: Some("C1234567890".to_string()),
            registration_id: Some("201901234567".to_string()),
            address: Some(address()),
            email: Some("billing@seller.test".to_string()),
            phone: Some("+60312345678".to_string()),
        },
        industry_code: Some("62010".to_string()),
        industry_description: Some("Software development".to_string()),
    }
}

pub(crate) fn buyer(with_address: bool) -> Party {
    Party {
        name: "Buyer Sdn Bhd".to_string(),
        tax_id: Some("C9876543210".to_string()),
        registration_id: Some("202001112222".to_string()),
        address: with_address.then(address),
        email: None,
        phone: Some("+60387654321".to_string()),
    }
}

/// Draft invoice: one line, quantity 2 at 50 with 10% tax.
pub(crate) fn draft(tenant_id: TenantId, number: &str, with_address: bool) -> Invoice {
    let at = Utc::now();
    let created = Invoice::create(CreateInvoice {
        tenant_id,
        invoice_id: InvoiceId::new(AggregateId::new()),
        invoice_number: number.to_string(),
        document_kind: DocumentKind::Invoice,
        direction: Direction::Outgoing,
        currency: "MYR".to_string(),
        issue_date: at.date_naive(),
        issue_time: None,
        due_date: None,
        counterparty: buyer(with_address),
        lines: vec![LineItemInput {
            line_no: 1,
            description: "Widget".to_string(),
            quantity: dec!(2),
            unit_code: Some("C62".to_string()),
            unit_price: dec!(50),
            tax_rate: dec!(10),
            classification_code: Some("022".to_string()),
        }],
        declared_totals: None,
        billing_reference: None,
        registry_document_id: None,
        occurred_at: at,
    });
    match created {
        Ok(invoice) => invoice,
        Err(err) => panic!("fixture invoice rejected: {err}"),
    }
}

pub(crate) fn submitted(tenant_id: TenantId, number: &str, document_id: &str) -> Invoice {
    let mut invoice = draft(tenant_id, number, true);
    let accepted = invoice.execute(&InvoiceCommand::RecordSubmissionAccepted(RecordSubmissionAccepted {
        tenant_id,
        invoice_id: invoice.id_typed(),
        registry_document_id: document_id.to_string(),
        verification_reference: None,
        occurred_at: Utc::now(),
    }));
    if let Err(err) = accepted {
        panic!("fixture submission rejected: {err}");
    }
    invoice
}

/// Registry double answering from scripted queues.
///
/// Empty submit queue: accept everything as `DOC-<codeNumber>`.
/// Unknown detail: `NotFound`.
#[derive(Default)]
pub(crate) struct ScriptedRegistry {
    pub submit_results: Mutex<VecDeque<Result<SubmitResponse, RegistryError>>>,
    pub details: Mutex<std::collections::HashMap<String, Result<DocumentDetail, RegistryError>>>,
    pub poll_results: Mutex<VecDeque<Result<PollResponse, RegistryError>>>,
    pub submit_calls: AtomicU32,
    pub detail_calls: AtomicU32,
    pub poll_since: Mutex<Vec<Option<DateTime<Utc>>>>,
    pub last_batch: Mutex<Vec<SubmissionDocument>>,
}

impl ScriptedRegistry {
    pub fn push_submit(&self, result: Result<SubmitResponse, RegistryError>) {
        if let Ok(mut q) = self.submit_results.lock() {
            q.push_back(result);
        }
    }

    pub fn set_detail(&self, document_id: &str, result: Result<DocumentDetail, RegistryError>) {
        if let Ok(mut d) = self.details.lock() {
            d.insert(document_id.to_string(), result);
        }
    }

    pub fn push_poll(&self, result: Result<PollResponse, RegistryError>) {
        if let Ok(mut q) = self.poll_results.lock() {
            q.push_back(result);
        }
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

pub(crate) fn detail(document_id: &str, status: &str, updated_at: DateTime<Utc>) -> DocumentDetail {
    DocumentDetail {
        document_id: document_id.to_string(),
        status: status.to_string(),
        updated_at: Some(updated_at),
        direction: None,
        code_number: None,
        extra: serde_json::Map::new(),
    }
}

#[async_trait::async_trait]
impl RegistryClient for ScriptedRegistry {
    async fn submit_documents(
        &self,
        _credential: &Credential,
        documents: &[SubmissionDocument],
    ) -> Result<SubmitResponse, RegistryError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_batch.lock() {
            *last = documents.to_vec();
        }
        let scripted = self.submit_results.lock().ok().and_then(|mut q| q.pop_front());
        match scripted {
            Some(result) => result,
            None => Ok(SubmitResponse {
                submission_uid: Some("SUB-1".to_string()),
                valid_documents: documents
                    .iter()
                    .map(|d| einvoice_registry::AcceptedDocument {
                        document_id: format!("DOC-{}", d.code_number),
                        verification_link: Some(format!("https://registry.test/v/{}", d.code_number)),
                        kind: Some(d.kind),
                        code_number: Some(d.code_number.clone()),
                    })
                    .collect(),
                failed_documents: vec![],
            }),
        }
    }

    async fn get_document(
        &self,
        _credential: &Credential,
        document_id: &str,
    ) -> Result<DocumentDetail, RegistryError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.details
            .lock()
            .ok()
            .and_then(|d| d.get(document_id).cloned())
            .unwrap_or_else(|| Err(RegistryError::NotFound(document_id.to_string())))
    }

    async fn poll_updates(
        &self,
        _credential: &Credential,
        since: Option<DateTime<Utc>>,
    ) -> Result<PollResponse, RegistryError> {
        if let Ok(mut calls) = self.poll_since.lock() {
            calls.push(since);
        }
        self.poll_results
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| Ok(PollResponse::default()))
    }
}
