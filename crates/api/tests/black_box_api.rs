use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::StatusCode;
use serde_json::json;

use einvoice_api::Config;
use einvoice_core::TenantId;
use einvoice_registry::{SIGNATURE_HEADER, webhook};

const WEBHOOK_SECRET: &str = "whsec-test";

/// Minimal stand-in for the registry: accepts every document as
/// `DOC-<codeNumber>` and reports `processing` for any detail lookup.
#[derive(Clone, Default)]
struct FakeRegistry {
    submissions: Arc<AtomicU32>,
}

async fn spawn(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), handle)
}

impl FakeRegistry {
    async fn spawn(&self) -> (String, tokio::task::JoinHandle<()>) {
        let app = Router::new()
            .route(
                "/api/v1/documentsubmissions",
                post(
                    |State(fake): State<FakeRegistry>, Json(body): Json<serde_json::Value>| async move {
                        fake.submissions.fetch_add(1, Ordering::SeqCst);
                        let code = body["documents"][0]["codeNumber"].as_str().unwrap_or_default().to_string();
                        Json(json!({
                            "validDocuments": [{
                                "documentId": format!("DOC-{code}"),
                                "verificationLink": format!("https://registry.test/v/{code}"),
                                "codeNumber": code
                            }],
                            "failedDocuments": []
                        }))
                    },
                ),
            )
            .route(
                "/api/v1/documents/:id/details",
                get(|Path(id): Path<String>| async move {
                    Json(json!({ "documentId": id, "status": "processing" }))
                }),
            )
            .route(
                "/api/v1/documents/recent",
                get(|| async { Json(json!({ "documents": [] })) }),
            )
            .with_state(self.clone());
        let (base, handle) = spawn(app).await;
        (format!("{base}/api/v1"), handle)
    }

    fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }
}

struct TestServer {
    base_url: String,
    registry: FakeRegistry,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    async fn spawn() -> Self {
        let registry = FakeRegistry::default();
        let (registry_url, registry_handle) = registry.spawn().await;

        let config = Config {
            registry_base_url: registry_url,
            registry_timeout: Duration::from_secs(5),
            registry_token: Some("test-token".to_string()),
            webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            ..Config::default()
        };
        // Build app (same router as prod), but bind to an ephemeral port.
        // The poll worker is not started; polling is driven through the API.
        let (app, _worker) = einvoice_api::app::build_app(&config).await.unwrap();
        let (base_url, api_handle) = spawn(app).await;

        Self {
            base_url,
            registry,
            handles: vec![registry_handle, api_handle],
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

fn address() -> serde_json::Value {
    json!({
        "lines": ["Lot 66, Jalan Perdana"],
        "city": "Kuala Lumpur",
        "postal_zone": "50480",
        "country_subentity": "14",
        "country_code": "MYS"
    })
}

fn issuer_profile() -> serde_json::Value {
    json!({
        "party": {
            "name": "Seller Sdn Bhd",
            "tax_id": "C1234567890",
            "registration_id": "201901234567",
            "address": address(),
            "email": "billing@seller.test"
        },
        "industry_code": "62010",
        "industry_description": "Software development"
    })
}

fn invoice_body(number: &str, with_address: bool) -> serde_json::Value {
    let mut counterparty = json!({
        "name": "Buyer Sdn Bhd",
        "tax_id": "C9876543210",
        "registration_id": "202001112222"
    });
    if with_address {
        counterparty["address"] = address();
    }
    json!({
        "invoice_number": number,
        "currency": "MYR",
        "issue_date": "2026-01-15",
        "counterparty": counterparty,
        "lines": [{
            "line_no": 1,
            "description": "Widget",
            "quantity": "2",
            "unit_code": "C62",
            "unit_price": "50",
            "tax_rate": "10",
            "classification_code": "022"
        }]
    })
}

/// Decimals serialize as strings.
fn amount(value: &serde_json::Value) -> f64 {
    value.as_str().and_then(|s| s.parse().ok()).unwrap()
}

async fn setup_tenant(client: &reqwest::Client, server: &TestServer) -> TenantId {
    let tenant = TenantId::new();
    let res = client
        .put(server.url("/issuer-profile"))
        .header("X-Tenant-Id", tenant.to_string())
        .json(&issuer_profile())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    tenant
}

async fn create_invoice(
    client: &reqwest::Client,
    server: &TestServer,
    tenant: TenantId,
    body: serde_json::Value,
) -> serde_json::Value {
    let res = client
        .post(server.url("/invoices"))
        .header("X-Tenant-Id", tenant.to_string())
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

async fn post_webhook(
    client: &reqwest::Client,
    server: &TestServer,
    tenant: TenantId,
    event: serde_json::Value,
    secret: &str,
) -> reqwest::Response {
    let body = serde_json::to_vec(&event).unwrap();
    client
        .post(server.url(&format!("/webhooks/registry/{tenant}")))
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, webhook::sign(secret.as_bytes(), &body))
        .body(body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_is_public_and_invoices_require_tenant() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(server.url("/invoices")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "missing_tenant");

    let res = client
        .get(server.url("/invoices"))
        .header("X-Tenant-Id", "not-a-tenant")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_submit_and_reconcile_from_both_channels() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = setup_tenant(&client, &server).await;

    let invoice = create_invoice(&client, &server, tenant, invoice_body("INV-1", true)).await;
    assert_eq!(invoice["status"], "draft");
    assert_eq!(amount(&invoice["totals"]["subtotal"]), 100.0);
    assert_eq!(amount(&invoice["totals"]["tax_total"]), 10.0);
    assert_eq!(amount(&invoice["totals"]["grand_total"]), 110.0);
    let id = invoice["id"].as_str().unwrap().to_string();

    let res = client
        .get(server.url(&format!("/invoices/{id}/document")))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let preview: serde_json::Value = res.json().await.unwrap();
    assert_eq!(preview["code_number"], "INV-1");
    assert_eq!(preview["is_valid"], true);

    let res = client
        .post(server.url(&format!("/invoices/{id}/submit")))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let result: serde_json::Value = res.json().await.unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["status"], "submitted");
    assert_eq!(result["registry_document_id"], "DOC-INV-1");
    assert_eq!(server.registry.submissions(), 1);

    let res = post_webhook(
        &client,
        &server,
        tenant,
        json!({ "type": "document.validated", "document_id": "DOC-INV-1" }),
        WEBHOOK_SECRET,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let outcome: serde_json::Value = res.json().await.unwrap();
    assert_eq!(outcome["outcome"], "applied");
    assert_eq!(outcome["to"], "validated");

    // The registry still says "processing"; polling must not regress the invoice.
    let res = client
        .post(server.url("/sync/poll?mode=tracked"))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: serde_json::Value = res.json().await.unwrap();
    assert_eq!(report["examined"], 1);
    assert_eq!(report["applied"], 0);

    let res = client
        .get(server.url(&format!("/invoices/{id}")))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    let stored: serde_json::Value = res.json().await.unwrap();
    assert_eq!(stored["status"], "validated");

    let res = client
        .get(server.url(&format!("/invoices/{id}/audit")))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    let audit: Vec<serde_json::Value> = res.json().await.unwrap();
    let actions: Vec<&str> = audit.iter().filter_map(|e| e["action"].as_str()).collect();
    assert_eq!(actions, vec!["created", "submitted", "validated"]);

    let res = client
        .post(server.url(&format!("/invoices/{id}/submit")))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn missing_buyer_address_fails_without_reaching_registry() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = setup_tenant(&client, &server).await;

    let invoice = create_invoice(&client, &server, tenant, invoice_body("INV-2", false)).await;
    let id = invoice["id"].as_str().unwrap().to_string();

    let res = client
        .post(server.url(&format!("/invoices/{id}/submit")))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let result: serde_json::Value = res.json().await.unwrap();
    assert_eq!(result["success"], false);
    assert_eq!(result["status"], "failed");
    let codes: Vec<&str> = result["error"]["codes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c.as_str())
        .collect();
    assert!(codes.contains(&"BR-09"));
    assert_eq!(server.registry.submissions(), 0);
}

#[tokio::test]
async fn webhook_signature_and_unknown_types() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();

    let res = post_webhook(
        &client,
        &server,
        tenant,
        json!({ "type": "document.accepted", "document_id": "DOC-X" }),
        "wrong-secret",
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = post_webhook(
        &client,
        &server,
        tenant,
        json!({ "type": "document.archived", "document_id": "DOC-X" }),
        WEBHOOK_SECRET,
    )
    .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    // Valid signature, status event, but no invoice carries the document.
    let res = post_webhook(
        &client,
        &server,
        tenant,
        json!({ "type": "document.accepted", "document_id": "DOC-X" }),
        WEBHOOK_SECRET,
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let outcome: serde_json::Value = res.json().await.unwrap();
    assert_eq!(outcome["outcome"], "ignored");
    assert_eq!(outcome["reason"], "unknown_document");
}

#[tokio::test]
async fn listing_and_cancellation() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = setup_tenant(&client, &server).await;

    let first = create_invoice(&client, &server, tenant, invoice_body("INV-3", true)).await;
    create_invoice(&client, &server, tenant, invoice_body("INV-4", true)).await;
    let id = first["id"].as_str().unwrap().to_string();

    let res = client
        .post(server.url(&format!("/invoices/{id}/cancel")))
        .header("X-Tenant-Id", tenant.to_string())
        .json(&json!({ "reason": "duplicate order" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cancelled: serde_json::Value = res.json().await.unwrap();
    assert_eq!(cancelled["status"], "cancelled");

    let res = client
        .get(server.url("/invoices"))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    let listed: Vec<serde_json::Value> = res.json().await.unwrap();
    assert_eq!(listed.len(), 2);

    // Another tenant sees nothing.
    let res = client
        .get(server.url("/invoices"))
        .header("X-Tenant-Id", TenantId::new().to_string())
        .send()
        .await
        .unwrap();
    let listed: Vec<serde_json::Value> = res.json().await.unwrap();
    assert!(listed.is_empty());
}
