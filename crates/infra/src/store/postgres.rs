//! Postgres-backed invoice store.
//!
//! The snapshot is stored as JSONB next to the columns the queries filter on.
//! CAS is a single conditional `UPDATE ... AND version = $n`; zero affected
//! rows is a conflict, or not-found when the row is absent.
//!
//! | SQLx error | Code | StoreError |
//! |---|---|---|
//! | unique violation on invoice number | `23505` | `DuplicateNumber` |
//! | any other database / pool error | - | `Backend` |

use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use einvoice_core::{AggregateRoot, ExpectedVersion, TenantId};
use einvoice_invoicing::{Invoice, InvoiceId, LifecycleStatus};

use super::{InvoiceStore, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        tenant_id            UUID        NOT NULL,
        invoice_id           UUID        NOT NULL,
        invoice_number       TEXT        NOT NULL,
        document_kind        TEXT        NOT NULL,
        version              BIGINT      NOT NULL,
        lifecycle_status     TEXT        NOT NULL,
        registry_document_id TEXT        NULL,
        last_reconciled_at   TIMESTAMPTZ NULL,
        created_at           TIMESTAMPTZ NULL,
        body                 JSONB       NOT NULL,
        updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (tenant_id, invoice_id)
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS invoices_number_uidx
        ON invoices (tenant_id, document_kind, invoice_number)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS invoices_registry_document_idx
        ON invoices (tenant_id, registry_document_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS invoices_tracking_idx
        ON invoices (tenant_id, lifecycle_status, last_reconciled_at)
    "#,
];

#[derive(Debug, Clone)]
pub struct PostgresInvoiceStore {
    pool: Arc<PgPool>,
}

impl PostgresInvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e, ""))?;
        }
        Ok(())
    }

    async fn stored_version(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<Option<u64>, StoreError> {
        let row = sqlx::query("SELECT version FROM invoices WHERE tenant_id = $1 AND invoice_id = $2")
            .bind(tenant_id.as_uuid())
            .bind(invoice_id.0.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stored_version", e, ""))?;
        row.map(|r| {
            r.try_get::<i64, _>("version")
                .map(|v| v as u64)
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .transpose()
    }
}

fn decode_row(row: &PgRow) -> Result<Invoice, StoreError> {
    let body: serde_json::Value = row
        .try_get("body")
        .map_err(|e| StoreError::Backend(format!("failed to read invoice row: {e}")))?;
    serde_json::from_value(body).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_rows(rows: Vec<PgRow>) -> Result<Vec<Invoice>, StoreError> {
    rows.iter().map(decode_row).collect()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error, invoice_number: &str) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                StoreError::DuplicateNumber(invoice_number.to_string())
            } else {
                StoreError::Backend(format!("database error in {operation}: {}", db_err.message()))
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

/// Columns bound in the order `$1..$9` by every write.
struct WriteParams {
    tenant_id: uuid::Uuid,
    invoice_id: uuid::Uuid,
    invoice_number: String,
    document_kind: &'static str,
    version: i64,
    lifecycle_status: &'static str,
    registry_document_id: Option<String>,
    last_reconciled_at: Option<chrono::DateTime<chrono::Utc>>,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    body: serde_json::Value,
}

impl WriteParams {
    fn from_invoice(invoice: &Invoice) -> Result<Self, StoreError> {
        let tenant_id = invoice.tenant_id().ok_or(StoreError::MissingTenant)?;
        Ok(Self {
            tenant_id: *tenant_id.as_uuid(),
            invoice_id: *invoice.id_typed().0.as_uuid(),
            invoice_number: invoice.invoice_number().to_string(),
            document_kind: invoice.document_kind().as_str(),
            version: invoice.version() as i64,
            lifecycle_status: invoice.lifecycle_status().as_str(),
            registry_document_id: invoice.registry_document_id().map(str::to_string),
            last_reconciled_at: invoice.last_reconciled_at(),
            created_at: invoice.created_at(),
            body: serde_json::to_value(invoice).map_err(|e| StoreError::Serialization(e.to_string()))?,
        })
    }

    fn bind<'q>(
        &'q self,
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        query
            .bind(self.tenant_id)
            .bind(self.invoice_id)
            .bind(&self.invoice_number)
            .bind(self.document_kind)
            .bind(self.version)
            .bind(self.lifecycle_status)
            .bind(&self.registry_document_id)
            .bind(self.last_reconciled_at)
            .bind(self.created_at)
            .bind(&self.body)
    }
}

const INSERT: &str = r#"
    INSERT INTO invoices (
        tenant_id, invoice_id, invoice_number, document_kind, version,
        lifecycle_status, registry_document_id, last_reconciled_at, created_at, body
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
"#;

const UPDATE_SET: &str = r#"
        invoice_number = $3,
        document_kind = $4,
        version = $5,
        lifecycle_status = $6,
        registry_document_id = $7,
        last_reconciled_at = $8,
        created_at = $9,
        body = $10,
        updated_at = NOW()
"#;

#[async_trait::async_trait]
impl InvoiceStore for PostgresInvoiceStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id), err)]
    async fn get(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        let row = sqlx::query("SELECT body FROM invoices WHERE tenant_id = $1 AND invoice_id = $2")
            .bind(tenant_id.as_uuid())
            .bind(invoice_id.0.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e, ""))?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn find_by_registry_document(
        &self,
        tenant_id: TenantId,
        document_id: &str,
    ) -> Result<Option<Invoice>, StoreError> {
        let row = sqlx::query(
            "SELECT body FROM invoices WHERE tenant_id = $1 AND registry_document_id = $2 LIMIT 1",
        )
        .bind(tenant_id.as_uuid())
        .bind(document_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_registry_document", e, ""))?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Invoice>, StoreError> {
        let rows = sqlx::query(
            "SELECT body FROM invoices WHERE tenant_id = $1 ORDER BY created_at ASC, invoice_id ASC",
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e, ""))?;
        decode_rows(rows)
    }

    async fn list_tracked(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<Invoice>, StoreError> {
        let statuses: Vec<String> = LifecycleStatus::ALL
            .iter()
            .filter(|s| s.needs_tracking())
            .map(|s| s.as_str().to_string())
            .collect();

        let rows = sqlx::query(
            r#"
            SELECT body
            FROM invoices
            WHERE tenant_id = $1
              AND registry_document_id IS NOT NULL
              AND lifecycle_status = ANY($2)
            ORDER BY last_reconciled_at ASC NULLS FIRST, created_at ASC, invoice_id ASC
            LIMIT $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(&statuses)
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_tracked", e, ""))?;
        decode_rows(rows)
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id_typed(), version = invoice.version()), err)]
    async fn save(&self, invoice: &Invoice, expected: ExpectedVersion) -> Result<(), StoreError> {
        let params = WriteParams::from_invoice(invoice)?;
        let number = params.invoice_number.clone();

        let affected = match expected {
            ExpectedVersion::Absent => {
                let sql = format!("{INSERT} ON CONFLICT (tenant_id, invoice_id) DO NOTHING");
                params
                    .bind(sqlx::query(&sql))
                    .execute(&*self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("save", e, &number))?
                    .rows_affected()
            }
            ExpectedVersion::Any => {
                let sql = format!("{INSERT} ON CONFLICT (tenant_id, invoice_id) DO UPDATE SET {UPDATE_SET}");
                params
                    .bind(sqlx::query(&sql))
                    .execute(&*self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("save", e, &number))?
                    .rows_affected()
            }
            ExpectedVersion::Exact(v) => {
                let sql = format!(
                    "UPDATE invoices SET {UPDATE_SET} WHERE tenant_id = $1 AND invoice_id = $2 AND version = $11"
                );
                params
                    .bind(sqlx::query(&sql))
                    .bind(v as i64)
                    .execute(&*self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("save", e, &number))?
                    .rows_affected()
            }
        };

        if affected > 0 {
            return Ok(());
        }

        let tenant_id = invoice.tenant_id().ok_or(StoreError::MissingTenant)?;
        let actual = self.stored_version(tenant_id, invoice.id_typed()).await?;
        match (expected, actual) {
            (ExpectedVersion::Exact(_), None) => Err(StoreError::NotFound),
            _ => Err(StoreError::Conflict { expected, actual }),
        }
    }
}
