use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal_macros::dec;

use einvoice_core::{AggregateId, TenantId};
use einvoice_invoicing::{
    CreateInvoice, Direction, DocumentKind, Invoice, InvoiceId, IssuerProfile, LineItemInput,
    Party, PostalAddress,
};

pub(crate) fn address() -> PostalAddress {
    PostalAddress {
        lines: vec!["Lot 66, Bangunan Merdeka".to_string(), "Persiaran Jaya".to_string()],
        city: "Kuala Lumpur".to_string(),
        postal_zone: Some("50480".to_string()),
        country_subentity: Some("14".to_string()),
        country_code: "MYS".to_string(),
    }
}

pub(crate) fn issuer() -> IssuerProfile {
    IssuerProfile {
        party: Party {
            name: "Supplier & Sons Sdn Bhd".to_string(),
            tax_id: Some("C21005678010".to_string()),
            registration_id: Some("202001234567".to_string()),
            address: Some(address()),
            email: Some("billing@supplier.example".to_string()),
            phone: Some("+60123456789".to_string()),
        },
        industry_code: Some("01111".to_string()),
        industry_description: Some("Growing of maize".to_string()),
    }
}

pub(crate) fn counterparty() -> Party {
    Party {
        name: "Buyer Trading".to_string(),
        tax_id: Some("C2584563200".to_string()),
        registration_id: Some("201901234567".to_string()),
        address: Some(address()),
        email: None,
        phone: None,
    }
}

pub(crate) fn create_cmd(kind: DocumentKind) -> CreateInvoice {
    CreateInvoice {
        tenant_id: TenantId::new(),
        invoice_id: InvoiceId::new(AggregateId::new()),
        invoice_number: "INV-0001".to_string(),
        document_kind: kind,
        direction: Direction::Outgoing,
        currency: "MYR".to_string(),
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
            classification_code: Some("022".to_string()),
        }],
        declared_totals: None,
        billing_reference: None,
        registry_document_id: None,
        occurred_at: DateTime::parse_from_rfc3339("2025-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
    }
}

pub(crate) fn invoice(kind: DocumentKind, tweak: impl FnOnce(&mut CreateInvoice)) -> Invoice {
    let mut cmd = create_cmd(kind);
    tweak(&mut cmd);
    Invoice::create(cmd).unwrap()
}
