use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{NaiveDate, Utc};
use einvoice_core::{AggregateId, TenantId};
use einvoice_documents::{render, validate};
use einvoice_invoicing::{
    CreateInvoice, Direction, DocumentKind, Invoice, InvoiceId, IssuerProfile, LineItemInput,
    Party, PostalAddress,
};
use rust_decimal_macros::dec;

fn party(name: &str, tin: &str) -> Party {
    Party {
        name: name.to_string(),
        tax_id: Some(tin.to_string()),
        registration_id: Some("201901234567".to_string()),
        address: Some(PostalAddress {
            lines: vec!["Jalan Ampang 1".to_string()],
            city: "Kuala Lumpur".to_string(),
            postal_zone: Some("50450".to_string()),
            country_subentity: Some("14".to_string()),
            country_code: "MYS".to_string(),
        }),
        email: Some("ap@example.com".to_string()),
        phone: Some("+60312345678".to_string()),
    }
}

fn invoice_with_lines(count: u32) -> Invoice {
    let lines = (1..=count)
        .map(|line_no| LineItemInput {
            line_no,
            description: format!("Item {line_no}"),
            quantity: dec!(3),
            unit_code: None,
            unit_price: dec!(19.90),
            tax_rate: if line_no % 2 == 0 { dec!(8) } else { dec!(0) },
            classification_code: Some("022".to_string()),
        })
        .collect();

    Invoice::create(CreateInvoice {
        tenant_id: TenantId::new(),
        invoice_id: InvoiceId::new(AggregateId::new()),
        invoice_number: "BENCH-1".to_string(),
        document_kind: DocumentKind::Invoice,
        direction: Direction::Outgoing,
        currency: "MYR".to_string(),
        issue_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        issue_time: None,
        due_date: None,
        counterparty: party("Buyer Bhd", "C2584563200"),
        lines,
        declared_totals: None,
        billing_reference: None,
        registry_document_id: None,
        occurred_at: Utc::now(),
    })
    .unwrap()
}

fn bench_render_and_validate(c: &mut Criterion) {
    let issuer = IssuerProfile {
        party: party("Seller Sdn Bhd", "C21005678010"),
        industry_code: Some("46510".to_string()),
        industry_description: Some("Wholesale of computer hardware".to_string()),
    };

    let mut group = c.benchmark_group("render_validate");
    for lines in [1u32, 25, 250] {
        let invoice = invoice_with_lines(lines);
        group.throughput(Throughput::Elements(lines as u64));

        group.bench_with_input(BenchmarkId::new("render", lines), &invoice, |b, invoice| {
            b.iter(|| render(black_box(invoice), &issuer).unwrap());
        });

        let rendered = render(&invoice, &issuer).unwrap();
        group.bench_with_input(BenchmarkId::new("validate", lines), &rendered, |b, doc| {
            b.iter(|| validate(black_box(doc), DocumentKind::Invoice));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_render_and_validate);
criterion_main!(benches);
