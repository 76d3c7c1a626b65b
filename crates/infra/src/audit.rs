//! Audit sink and recorder.
//!
//! The sink is append-only and at-least-once: a duplicate row is acceptable,
//! a missing row for a committed transition is not. The recorder never fails
//! its caller because the state change it describes is already committed.

use std::sync::{Arc, Mutex};

use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{debug, error, warn};

use einvoice_core::TenantId;
use einvoice_invoicing::{AuditEvent, InvoiceId, LifecycleStatus};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("audit row could not be decoded: {0}")]
    Decode(String),
}

#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError>;

    /// Oldest first.
    async fn list_for_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<AuditEvent>, AuditError>;
}

#[async_trait::async_trait]
impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        (**self).append(event).await
    }

    async fn list_for_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        (**self).list_for_invoice(tenant_id, invoice_id).await
    }
}

/// In-memory audit sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded row, in append order.
    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|_| AuditError::Unavailable("audit sink lock poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }

    async fn list_for_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        let events = self
            .events
            .lock()
            .map_err(|_| AuditError::Unavailable("audit sink lock poisoned".to_string()))?;
        Ok(events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.invoice_id == invoice_id)
            .cloned()
            .collect())
    }
}

/// Postgres-backed audit sink (`invoice_audit_events`).
#[derive(Debug, Clone)]
pub struct PostgresAuditSink {
    pool: Arc<PgPool>,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), AuditError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS invoice_audit_events (
                id              UUID        PRIMARY KEY,
                tenant_id       UUID        NOT NULL,
                invoice_id      UUID        NOT NULL,
                action          TEXT        NOT NULL,
                previous_status TEXT        NULL,
                new_status      TEXT        NOT NULL,
                source          TEXT        NOT NULL,
                detail          JSONB       NOT NULL DEFAULT '{}'::jsonb,
                created_at      TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS invoice_audit_events_invoice_idx
                ON invoice_audit_events (tenant_id, invoice_id, created_at)
            "#,
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| AuditError::Unavailable(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuditSink for PostgresAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        // Re-delivery of the same row id is harmless.
        sqlx::query(
            r#"
            INSERT INTO invoice_audit_events (
                id, tenant_id, invoice_id, action, previous_status,
                new_status, source, detail, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.tenant_id.as_uuid())
        .bind(event.invoice_id.0.as_uuid())
        .bind(event.action.as_str())
        .bind(event.previous_status.map(|s| s.as_str()))
        .bind(event.new_status.as_str())
        .bind(event.source.as_str())
        .bind(&event.detail)
        .bind(event.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| AuditError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn list_for_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        let rows = sqlx::query(
            r#"
            SELECT id, action, previous_status, new_status, source, detail, created_at
            FROM invoice_audit_events
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(invoice_id.0.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| AuditError::Unavailable(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let decode = |e: sqlx::Error| AuditError::Decode(e.to_string());
                let previous: Option<String> = row.try_get("previous_status").map_err(decode)?;
                let new_status: String = row.try_get("new_status").map_err(decode)?;
                let action: String = row.try_get("action").map_err(decode)?;
                let source: String = row.try_get("source").map_err(decode)?;
                Ok(AuditEvent {
                    id: row.try_get("id").map_err(decode)?,
                    tenant_id,
                    invoice_id,
                    action: action.parse().map_err(AuditError::Decode)?,
                    previous_status: previous
                        .map(|s| s.parse::<LifecycleStatus>())
                        .transpose()
                        .map_err(|e| AuditError::Decode(e.to_string()))?,
                    new_status: new_status
                        .parse::<LifecycleStatus>()
                        .map_err(|e| AuditError::Decode(e.to_string()))?,
                    source: source.parse().map_err(AuditError::Decode)?,
                    detail: row.try_get("detail").map_err(decode)?,
                    created_at: row.try_get("created_at").map_err(decode)?,
                })
            })
            .collect()
    }
}

/// Fire-and-forget front for an [`AuditSink`].
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }

    /// Append one row. Failures are logged, never returned; high-value
    /// actions log at `error` so a missing row gets noticed.
    pub async fn record(&self, event: AuditEvent) {
        match self.sink.append(&event).await {
            Ok(()) => debug!(
                tenant_id = %event.tenant_id,
                invoice_id = %event.invoice_id,
                action = event.action.as_str(),
                new_status = event.new_status.as_str(),
                "audit event recorded"
            ),
            Err(err) if event.action.is_high_value() => error!(
                tenant_id = %event.tenant_id,
                invoice_id = %event.invoice_id,
                action = event.action.as_str(),
                new_status = event.new_status.as_str(),
                error = %err,
                "failed to record audit event for committed transition"
            ),
            Err(err) => warn!(
                tenant_id = %event.tenant_id,
                invoice_id = %event.invoice_id,
                action = event.action.as_str(),
                error = %err,
                "failed to record audit event"
            ),
        }
    }
}

impl core::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuditRecorder").finish_non_exhaustive()
    }
}
