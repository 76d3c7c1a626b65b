//! UBL 2.1 rendering for invoices, credit notes and debit notes.
//!
//! The three framings share one body. Absent identity data (party names, tax
//! identifiers, postal addresses, line items) is left out so the validator can
//! report it; other blank schema-required values get the [`NOT_APPLICABLE`] filler.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use thiserror::Error;

use einvoice_invoicing::{
    DocumentKind, Invoice, IssuerProfile, LineItem, Party, round_amount,
};

use crate::markup::{WriteError, XmlWriter};
use crate::rendered::RenderedDocument;

/// Filler for required values that have no source data.
pub const NOT_APPLICABLE: &str = "NA";

pub(crate) const NS_CAC: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
pub(crate) const NS_CBC: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";

const UBL_VERSION: &str = "2.1";
const TAX_SCHEME_ID: &str = "OTH";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invoice has not been created")]
    NotCreated,

    #[error("invoice {0} has no issue date")]
    MissingIssueDate(String),

    #[error("invoice {0} has no counterparty")]
    MissingCounterparty(String),

    #[error("unbalanced document structure: {0:?} left open")]
    Unbalanced(Vec<&'static str>),

    #[error("xml writer failed: {0}")]
    Write(String),
}

impl From<WriteError> for CodecError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Unclosed(open) => CodecError::Unbalanced(open),
            WriteError::Io(reason) => CodecError::Write(reason),
        }
    }
}

/// Element names that differ between framings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Framing {
    pub root: &'static str,
    pub namespace: &'static str,
    pub type_code: Option<(&'static str, &'static str)>,
    pub line: &'static str,
    pub quantity: &'static str,
    pub monetary_total: &'static str,
}

pub(crate) fn framing(kind: DocumentKind) -> Framing {
    match kind {
        DocumentKind::Invoice => Framing {
            root: "Invoice",
            namespace: "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2",
            type_code: Some(("cbc:InvoiceTypeCode", "380")),
            line: "cac:InvoiceLine",
            quantity: "cbc:InvoicedQuantity",
            monetary_total: "cac:LegalMonetaryTotal",
        },
        DocumentKind::CreditNote => Framing {
            root: "CreditNote",
            namespace: "urn:oasis:names:specification:ubl:schema:xsd:CreditNote-2",
            type_code: Some(("cbc:CreditNoteTypeCode", "381")),
            line: "cac:CreditNoteLine",
            quantity: "cbc:CreditedQuantity",
            monetary_total: "cac:LegalMonetaryTotal",
        },
        DocumentKind::DebitNote => Framing {
            root: "DebitNote",
            namespace: "urn:oasis:names:specification:ubl:schema:xsd:DebitNote-2",
            type_code: None,
            line: "cac:DebitNoteLine",
            quantity: "cbc:DebitedQuantity",
            monetary_total: "cac:RequestedMonetaryTotal",
        },
    }
}

/// Whole-unit amount text.
pub(crate) fn amount(value: Decimal) -> String {
    round_amount(value).to_string()
}

/// Quantities, prices and rates keep their scale, without trailing zeros.
fn plain(value: Decimal) -> String {
    value.normalize().to_string()
}

/// UNTDID 5305 category for a rate.
fn tax_category(rate: Decimal) -> &'static str {
    if rate.is_zero() { "Z" } else { "S" }
}

/// Render the invoice and its lines with the issuer's profile. Deterministic.
pub fn render(invoice: &Invoice, issuer: &IssuerProfile) -> Result<RenderedDocument, CodecError> {
    if !invoice.is_created() {
        return Err(CodecError::NotCreated);
    }
    let number = invoice.invoice_number().to_string();
    let issue_date = invoice
        .issue_date()
        .ok_or_else(|| CodecError::MissingIssueDate(number.clone()))?;
    let counterparty = invoice
        .counterparty()
        .ok_or_else(|| CodecError::MissingCounterparty(number.clone()))?;

    let kind = invoice.document_kind();
    let f = framing(kind);
    let currency = invoice.currency();
    let cur = [("currencyID", currency)];

    let mut w = XmlWriter::new();
    w.open(
        f.root,
        &[("xmlns", f.namespace), ("xmlns:cac", NS_CAC), ("xmlns:cbc", NS_CBC)],
    );

    // Header
    w.leaf("cbc:UBLVersionID", &[], UBL_VERSION);
    w.leaf("cbc:ID", &[], &number);
    w.leaf("cbc:IssueDate", &[], &issue_date.format("%Y-%m-%d").to_string());
    let issue_time = invoice
        .issue_time()
        .map(|t| t.format("%H:%M:%SZ").to_string())
        .unwrap_or_else(|| "00:00:00Z".to_string());
    w.leaf("cbc:IssueTime", &[], &issue_time);
    if kind == DocumentKind::Invoice {
        if let Some(due) = invoice.due_date() {
            w.leaf("cbc:DueDate", &[], &due.format("%Y-%m-%d").to_string());
        }
    }
    if let Some((element, code)) = f.type_code {
        w.leaf(element, &[("listVersionID", "1.0")], code);
    }
    w.leaf("cbc:DocumentCurrencyCode", &[], currency);

    if kind.is_reference_kind() {
        if let Some(reference) = invoice.billing_reference() {
            w.open("cac:BillingReference", &[]);
            w.open("cac:InvoiceDocumentReference", &[]);
            w.leaf("cbc:ID", &[], &reference.invoice_number);
            w.leaf_opt("cbc:UUID", &[], reference.registry_document_id.as_deref());
            w.leaf(
                "cbc:IssueDate",
                &[],
                &reference.issue_date.format("%Y-%m-%d").to_string(),
            );
            w.close();
            w.close();
        }
    }

    // Parties
    w.open("cac:AccountingSupplierParty", &[]);
    write_party(&mut w, &issuer.party, Some(issuer));
    w.close();

    w.open("cac:AccountingCustomerParty", &[]);
    write_party(&mut w, counterparty, None);
    w.close();

    // Tax summary, grouped by rate
    let mut by_rate: BTreeMap<Decimal, (Decimal, Decimal)> = BTreeMap::new();
    for line in invoice.lines() {
        let entry = by_rate
            .entry(line.tax_rate().normalize())
            .or_insert((Decimal::ZERO, Decimal::ZERO));
        entry.0 += line.line_total();
        entry.1 += line.tax_amount();
    }
    let totals = invoice.totals();
    w.open("cac:TaxTotal", &[]);
    w.leaf("cbc:TaxAmount", &cur, &amount(totals.tax_total));
    for (rate, (taxable, tax)) in &by_rate {
        write_tax_subtotal(&mut w, currency, *rate, *taxable, *tax);
    }
    w.close();

    // Monetary summary
    w.open(f.monetary_total, &[]);
    w.leaf("cbc:LineExtensionAmount", &cur, &amount(totals.subtotal));
    w.leaf("cbc:TaxExclusiveAmount", &cur, &amount(totals.subtotal));
    w.leaf("cbc:TaxInclusiveAmount", &cur, &amount(totals.grand_total));
    w.leaf("cbc:PayableAmount", &cur, &amount(totals.grand_total));
    w.close();

    for line in invoice.lines() {
        write_line(&mut w, &f, currency, line);
    }

    w.close();
    let xml = w.finish()?;
    Ok(RenderedDocument::new(kind, number, xml))
}

fn write_party(w: &mut XmlWriter, party: &Party, issuer: Option<&IssuerProfile>) {
    w.open("cac:Party", &[]);

    if let Some(profile) = issuer {
        let description = profile.industry_description.as_deref().unwrap_or_default();
        w.leaf(
            "cbc:IndustryClassificationCode",
            &[("name", description)],
            profile.industry_code.as_deref().unwrap_or_default(),
        );
    }

    for (scheme, id) in [
        ("TIN", party.tax_id.as_deref()),
        ("BRN", party.registration_id.as_deref()),
    ] {
        if let Some(id) = id.filter(|v| !v.trim().is_empty()) {
            w.open("cac:PartyIdentification", &[]);
            w.leaf("cbc:ID", &[("schemeID", scheme)], id);
            w.close();
        }
    }

    if let Some(address) = &party.address {
        w.open("cac:PostalAddress", &[]);
        w.leaf("cbc:CityName", &[], &address.city);
        w.leaf(
            "cbc:PostalZone",
            &[],
            address.postal_zone.as_deref().unwrap_or_default(),
        );
        w.leaf(
            "cbc:CountrySubentityCode",
            &[],
            address.country_subentity.as_deref().unwrap_or_default(),
        );
        if address.lines.iter().all(|l| l.trim().is_empty()) {
            w.open("cac:AddressLine", &[]);
            w.leaf("cbc:Line", &[], "");
            w.close();
        }
        for line in address.lines.iter().filter(|l| !l.trim().is_empty()) {
            w.open("cac:AddressLine", &[]);
            w.leaf("cbc:Line", &[], line);
            w.close();
        }
        w.open("cac:Country", &[]);
        w.leaf(
            "cbc:IdentificationCode",
            &[("listID", "ISO3166-1"), ("listAgencyID", "6")],
            &address.country_code,
        );
        w.close();
        w.close();
    }

    if !party.name.trim().is_empty() {
        w.open("cac:PartyLegalEntity", &[]);
        w.leaf("cbc:RegistrationName", &[], &party.name);
        w.close();
    }

    w.open("cac:Contact", &[]);
    w.leaf("cbc:Telephone", &[], party.phone.as_deref().unwrap_or_default());
    w.leaf(
        "cbc:ElectronicMail",
        &[],
        party.email.as_deref().unwrap_or_default(),
    );
    w.close();

    w.close();
}

fn write_tax_subtotal(
    w: &mut XmlWriter,
    currency: &str,
    rate: Decimal,
    taxable: Decimal,
    tax: Decimal,
) {
    let cur = [("currencyID", currency)];
    w.open("cac:TaxSubtotal", &[]);
    w.leaf("cbc:TaxableAmount", &cur, &amount(taxable));
    w.leaf("cbc:TaxAmount", &cur, &amount(tax));
    w.open("cac:TaxCategory", &[]);
    w.leaf("cbc:ID", &[], tax_category(rate));
    w.leaf("cbc:Percent", &[], &plain(rate));
    w.open("cac:TaxScheme", &[]);
    w.leaf(
        "cbc:ID",
        &[("schemeID", "UN/ECE 5153"), ("schemeAgencyID", "6")],
        TAX_SCHEME_ID,
    );
    w.close();
    w.close();
    w.close();
}

fn write_line(w: &mut XmlWriter, f: &Framing, currency: &str, line: &LineItem) {
    let cur = [("currencyID", currency)];
    w.open(f.line, &[]);
    w.leaf("cbc:ID", &[], &line.line_no().to_string());
    w.leaf(
        f.quantity,
        &[("unitCode", line.unit_code())],
        &plain(line.quantity()),
    );
    w.leaf("cbc:LineExtensionAmount", &cur, &amount(line.line_total()));

    w.open("cac:TaxTotal", &[]);
    w.leaf("cbc:TaxAmount", &cur, &amount(line.tax_amount()));
    write_tax_subtotal(w, currency, line.tax_rate(), line.line_total(), line.tax_amount());
    w.close();

    w.open("cac:Item", &[]);
    w.leaf("cbc:Description", &[], line.description());
    w.open("cac:CommodityClassification", &[]);
    w.leaf(
        "cbc:ItemClassificationCode",
        &[("listID", "CLASS")],
        line.classification_code().unwrap_or_default(),
    );
    w.close();
    w.close();

    w.open("cac:Price", &[]);
    w.leaf("cbc:PriceAmount", &cur, &plain(line.unit_price()));
    w.close();

    w.open("cac:ItemPriceExtension", &[]);
    w.leaf("cbc:Amount", &cur, &amount(line.line_total()));
    w.close();

    w.close();
}
