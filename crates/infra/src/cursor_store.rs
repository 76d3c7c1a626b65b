//! Delta-poll cursor persistence.
//!
//! One cursor per tenant: the largest registry `updatedAt` whose documents
//! were all processed. Cursors only move forward.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use einvoice_core::TenantId;

use crate::store::StoreError;

#[async_trait::async_trait]
pub trait SyncCursorStore: Send + Sync {
    async fn get(&self, tenant_id: TenantId) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Move the cursor to `to` unless it is already later. Returns the stored value.
    async fn advance(&self, tenant_id: TenantId, to: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError>;
}

#[async_trait::async_trait]
impl<S: SyncCursorStore + ?Sized> SyncCursorStore for Arc<S> {
    async fn get(&self, tenant_id: TenantId) -> Result<Option<DateTime<Utc>>, StoreError> {
        (**self).get(tenant_id).await
    }

    async fn advance(&self, tenant_id: TenantId, to: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        (**self).advance(tenant_id, to).await
    }
}

#[derive(Debug, Default)]
pub struct InMemorySyncCursorStore {
    cursors: RwLock<HashMap<TenantId, DateTime<Utc>>>,
}

impl InMemorySyncCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SyncCursorStore for InMemorySyncCursorStore {
    async fn get(&self, tenant_id: TenantId) -> Result<Option<DateTime<Utc>>, StoreError> {
        let cursors = self
            .cursors
            .read()
            .map_err(|_| StoreError::Backend("cursor store lock poisoned".to_string()))?;
        Ok(cursors.get(&tenant_id).copied())
    }

    async fn advance(&self, tenant_id: TenantId, to: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| StoreError::Backend("cursor store lock poisoned".to_string()))?;
        let entry = cursors.entry(tenant_id).or_insert(to);
        if to > *entry {
            *entry = to;
        }
        Ok(*entry)
    }
}

/// Postgres-backed cursor store (`registry_sync_cursors`).
#[derive(Debug, Clone)]
pub struct PostgresSyncCursorStore {
    pool: Arc<PgPool>,
}

impl PostgresSyncCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS registry_sync_cursors (
                tenant_id      UUID        PRIMARY KEY,
                last_synced_at TIMESTAMPTZ NOT NULL,
                updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SyncCursorStore for PostgresSyncCursorStore {
    async fn get(&self, tenant_id: TenantId) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query("SELECT last_synced_at FROM registry_sync_cursors WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.map(|r| {
            r.try_get::<DateTime<Utc>, _>("last_synced_at")
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .transpose()
    }

    async fn advance(&self, tenant_id: TenantId, to: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO registry_sync_cursors (tenant_id, last_synced_at)
            VALUES ($1, $2)
            ON CONFLICT (tenant_id)
            DO UPDATE SET
                last_synced_at = GREATEST(registry_sync_cursors.last_synced_at, EXCLUDED.last_synced_at),
                updated_at = NOW()
            RETURNING last_synced_at
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(to)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.try_get::<DateTime<Utc>, _>("last_synced_at")
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
