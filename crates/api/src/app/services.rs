//! Service wiring: stores, registry client, credential supply and the
//! orchestration components, built once per process.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tokio::sync::RwLock;

use einvoice_core::TenantId;
use einvoice_infra::{
    AuditRecorder, AuditSink, InMemoryAuditSink, InMemoryInvoiceStore, InMemoryIssuerDirectory,
    InMemorySyncCursorStore, InvoiceService, InvoiceStore, IssuerDirectory, PollWorker, Poller,
    PostgresAuditSink, PostgresInvoiceStore, PostgresIssuerDirectory, PostgresSyncCursorStore,
    ReconciliationEngine, SubmissionOrchestrator, SyncCursorStore,
};
use einvoice_registry::{
    CachedCredentialProvider, CredentialProvider, HttpRegistryClient, RegistryClient,
    StaticCredentialSource,
};

use crate::config::Config;

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppServices {
    pub invoices: InvoiceService,
    pub submission: SubmissionOrchestrator,
    pub reconciliation: ReconciliationEngine,
    pub poller: Poller,
    pub issuers: Arc<dyn IssuerDirectory>,
    /// Tenants polled by the background worker.
    pub poll_tenants: Arc<RwLock<Vec<TenantId>>>,
    pub webhook_secret: Option<Vec<u8>>,
}

impl AppServices {
    /// Register a tenant with the background poll worker.
    pub async fn track_tenant(&self, tenant_id: TenantId) {
        let mut tenants = self.poll_tenants.write().await;
        if !tenants.contains(&tenant_id) {
            tenants.push(tenant_id);
            tracing::info!(tenant_id = %tenant_id, "tenant registered for polling");
        }
    }
}

struct Stores {
    invoices: Arc<dyn InvoiceStore>,
    audit: Arc<dyn AuditSink>,
    issuers: Arc<dyn IssuerDirectory>,
    cursors: Arc<dyn SyncCursorStore>,
}

async fn build_stores(config: &Config) -> anyhow::Result<Stores> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::info!("DATABASE_URL not set; using in-memory stores");
        return Ok(Stores {
            invoices: Arc::new(InMemoryInvoiceStore::new()),
            audit: Arc::new(InMemoryAuditSink::new()),
            issuers: Arc::new(InMemoryIssuerDirectory::new()),
            cursors: Arc::new(InMemorySyncCursorStore::new()),
        });
    };

    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    let invoices = PostgresInvoiceStore::new(pool.clone());
    invoices.ensure_schema().await.context("invoice schema")?;
    let audit = PostgresAuditSink::new(pool.clone());
    audit.ensure_schema().await.context("audit schema")?;
    let issuers = PostgresIssuerDirectory::new(pool.clone());
    issuers.ensure_schema().await.context("issuer profile schema")?;
    let cursors = PostgresSyncCursorStore::new(pool);
    cursors.ensure_schema().await.context("sync cursor schema")?;

    tracing::info!("using Postgres stores");
    Ok(Stores {
        invoices: Arc::new(invoices),
        audit: Arc::new(audit),
        issuers: Arc::new(issuers),
        cursors: Arc::new(cursors),
    })
}

/// Register configured tenants and every tenant with a stored issuer profile,
/// so a restart keeps polling what earlier processes tracked.
pub async fn seed_poll_tenants(
    worker: &PollWorker,
    issuers: &dyn IssuerDirectory,
    configured: &[TenantId],
) -> anyhow::Result<usize> {
    let stored = issuers
        .list_tenants()
        .await
        .context("failed to list tenants with issuer profiles")?;
    for tenant_id in configured.iter().chain(stored.iter()) {
        worker.add_tenant(*tenant_id).await;
    }
    Ok(worker.tenants().await.len())
}

/// Build the services and the (not yet started) poll worker sharing them.
pub async fn build_services(config: &Config) -> anyhow::Result<(AppServices, PollWorker)> {
    let stores = build_stores(config).await?;

    let registry: Arc<dyn RegistryClient> = Arc::new(
        HttpRegistryClient::new(config.registry_base_url.clone(), config.registry_timeout)
            .context("failed to build registry client")?,
    );

    let source = match config.registry_token.as_deref() {
        Some(token) => StaticCredentialSource::with_fallback(token),
        None => {
            tracing::warn!("REGISTRY_TOKEN not set; submissions will be deferred until a credential is available");
            StaticCredentialSource::new()
        }
    };
    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(CachedCredentialProvider::new(source, config.credential_ttl));

    let audit = AuditRecorder::new(stores.audit);
    let invoices = InvoiceService::new(stores.invoices.clone(), audit.clone());
    let reconciliation = ReconciliationEngine::new(stores.invoices.clone(), audit.clone())
        .with_dedup_window(chrono::Duration::seconds(config.dedup_window_secs))
        .with_max_cas_attempts(config.max_cas_attempts);
    let submission = SubmissionOrchestrator::new(
        stores.invoices.clone(),
        stores.issuers.clone(),
        registry.clone(),
        credentials.clone(),
        audit,
    )
    .with_retry_policy(config.retry.clone())
    .with_max_cas_attempts(config.max_cas_attempts);
    let poller = Poller::new(
        stores.invoices,
        registry,
        credentials,
        stores.cursors,
        reconciliation.clone(),
    )
    .with_retry_policy(config.retry.clone())
    .with_batch_size(config.poll_batch_size)
    .with_budget(config.poll_budget);

    let worker = PollWorker::new(poller.clone(), config.poll_interval);
    let seeded = seed_poll_tenants(&worker, &*stores.issuers, &config.poll_tenants).await?;
    tracing::info!(tenants = seeded, "poll worker seeded");

    let services = AppServices {
        invoices,
        submission,
        reconciliation,
        poller,
        issuers: stores.issuers,
        poll_tenants: worker.tenant_registry(),
        webhook_secret: config.webhook_secret.as_ref().map(|s| s.as_bytes().to_vec()),
    };
    Ok((services, worker))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use einvoice_invoicing::{IssuerProfile, Party};

    use super::*;

    fn worker() -> PollWorker {
        let invoices: Arc<dyn InvoiceStore> = Arc::new(InMemoryInvoiceStore::new());
        let registry: Arc<dyn RegistryClient> = Arc::new(
            HttpRegistryClient::new("http://127.0.0.1:9".to_string(), Duration::from_secs(1)).unwrap(),
        );
        let engine = ReconciliationEngine::new(invoices.clone(), AuditRecorder::new(Arc::new(InMemoryAuditSink::new())));
        let poller = Poller::new(
            invoices,
            registry,
            Arc::new(StaticCredentialSource::new()),
            Arc::new(InMemorySyncCursorStore::new()),
            engine,
        );
        PollWorker::new(poller, Duration::from_secs(60))
    }

    fn profile() -> IssuerProfile {
        IssuerProfile {
            party: Party {
                name: "Acme Sdn Bhd".to_string(),
                tax_id: Some("C1234567890".to_string()),
                registration_id: None,
                address: None,
                email: None,
                phone: None,
            },
            industry_code: None,
            industry_description: None,
        }
    }

    #[tokio::test]
    async fn stored_issuer_profiles_seed_the_worker_after_restart() {
        let issuers = InMemoryIssuerDirectory::new();
        let stored = TenantId::new();
        issuers.put(stored, profile()).await.unwrap();
        let configured = TenantId::new();

        // Fresh worker, as after a process restart.
        let worker = worker();
        let count = seed_poll_tenants(&worker, &issuers, &[configured, stored]).await.unwrap();

        assert_eq!(count, 2);
        let tenants = worker.tenants().await;
        assert!(tenants.contains(&stored));
        assert!(tenants.contains(&configured));
    }
}
