//! Issuer profile directory: the tenant's own party block for rendering.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sqlx::{PgPool, Row};

use einvoice_core::TenantId;
use einvoice_invoicing::IssuerProfile;

use crate::store::StoreError;

#[async_trait::async_trait]
pub trait IssuerDirectory: Send + Sync {
    async fn get(&self, tenant_id: TenantId) -> Result<Option<IssuerProfile>, StoreError>;

    /// Replace the tenant's profile.
    async fn put(&self, tenant_id: TenantId, profile: IssuerProfile) -> Result<(), StoreError>;

    /// Tenants with a profile, in a stable order. Only these can submit, so
    /// they cover every tenant with registry-tracked invoices.
    async fn list_tenants(&self) -> Result<Vec<TenantId>, StoreError>;
}

#[async_trait::async_trait]
impl<D: IssuerDirectory + ?Sized> IssuerDirectory for Arc<D> {
    async fn get(&self, tenant_id: TenantId) -> Result<Option<IssuerProfile>, StoreError> {
        (**self).get(tenant_id).await
    }

    async fn put(&self, tenant_id: TenantId, profile: IssuerProfile) -> Result<(), StoreError> {
        (**self).put(tenant_id, profile).await
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        (**self).list_tenants().await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryIssuerDirectory {
    profiles: RwLock<HashMap<TenantId, IssuerProfile>>,
}

impl InMemoryIssuerDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl IssuerDirectory for InMemoryIssuerDirectory {
    async fn get(&self, tenant_id: TenantId) -> Result<Option<IssuerProfile>, StoreError> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| StoreError::Backend("issuer directory lock poisoned".to_string()))?;
        Ok(profiles.get(&tenant_id).cloned())
    }

    async fn put(&self, tenant_id: TenantId, profile: IssuerProfile) -> Result<(), StoreError> {
        self.profiles
            .write()
            .map_err(|_| StoreError::Backend("issuer directory lock poisoned".to_string()))?
            .insert(tenant_id, profile);
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| StoreError::Backend("issuer directory lock poisoned".to_string()))?;
        let mut tenants: Vec<TenantId> = profiles.keys().copied().collect();
        tenants.sort();
        Ok(tenants)
    }
}

#[derive(Debug, Clone)]
pub struct PostgresIssuerDirectory {
    pool: Arc<PgPool>,
}

impl PostgresIssuerDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS issuer_profiles (
                tenant_id  UUID        PRIMARY KEY,
                profile    JSONB       NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
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
impl IssuerDirectory for PostgresIssuerDirectory {
    async fn get(&self, tenant_id: TenantId) -> Result<Option<IssuerProfile>, StoreError> {
        let row = sqlx::query("SELECT profile FROM issuer_profiles WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value: serde_json::Value = row
            .try_get("profile")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn put(&self, tenant_id: TenantId, profile: IssuerProfile) -> Result<(), StoreError> {
        let value = serde_json::to_value(&profile).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO issuer_profiles (tenant_id, profile)
            VALUES ($1, $2)
            ON CONFLICT (tenant_id)
            DO UPDATE SET profile = EXCLUDED.profile, updated_at = NOW()
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(&value)
        .execute(&*self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        let rows = sqlx::query("SELECT tenant_id FROM issuer_profiles ORDER BY tenant_id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.iter()
            .map(|row| {
                row.try_get::<uuid::Uuid, _>("tenant_id")
                    .map(TenantId::from_uuid)
                    .map_err(|e| StoreError::Backend(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::issuer;

    #[tokio::test]
    async fn list_tenants_returns_each_profiled_tenant_once() {
        let directory = InMemoryIssuerDirectory::new();
        assert!(directory.list_tenants().await.unwrap().is_empty());

        let a = TenantId::new();
        let b = TenantId::new();
        directory.put(a, issuer()).await.unwrap();
        directory.put(b, issuer()).await.unwrap();
        directory.put(a, issuer()).await.unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(directory.list_tenants().await.unwrap(), expected);
    }
}
