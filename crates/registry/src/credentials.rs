//! Bearer credential supply.
//!
//! Token acquisition and refresh belong to an external collaborator; the core
//! only asks for a usable credential per tenant.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use einvoice_core::TenantId;

use crate::error::CredentialError;

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn bearer(&self) -> &str {
        &self.token
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl core::fmt::Debug for Credential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self, tenant_id: TenantId) -> Result<Credential, CredentialError>;
}

#[async_trait::async_trait]
impl<T: CredentialProvider + ?Sized> CredentialProvider for Arc<T> {
    async fn credential(&self, tenant_id: TenantId) -> Result<Credential, CredentialError> {
        (**self).credential(tenant_id).await
    }
}

/// Fixed tokens per tenant, with an optional fallback for all tenants.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialSource {
    tokens: HashMap<TenantId, String>,
    fallback: Option<String>,
}

impl StaticCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(token: impl Into<String>) -> Self {
        Self {
            tokens: HashMap::new(),
            fallback: Some(token.into()),
        }
    }

    pub fn insert(&mut self, tenant_id: TenantId, token: impl Into<String>) {
        self.tokens.insert(tenant_id, token.into());
    }
}

#[async_trait::async_trait]
impl CredentialProvider for StaticCredentialSource {
    async fn credential(&self, tenant_id: TenantId) -> Result<Credential, CredentialError> {
        self.tokens
            .get(&tenant_id)
            .or(self.fallback.as_ref())
            .map(Credential::new)
            .ok_or(CredentialError::Unavailable(tenant_id))
    }
}

/// TTL cache in front of another provider. Expiry is checked on read.
pub struct CachedCredentialProvider<P> {
    inner: P,
    ttl: Duration,
    cache: RwLock<HashMap<TenantId, (Credential, Instant)>>,
}

impl<P: CredentialProvider> CachedCredentialProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn invalidate(&self, tenant_id: TenantId) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&tenant_id);
        }
    }

    fn cached(&self, tenant_id: TenantId) -> Option<Credential> {
        let cache = self.cache.read().ok()?;
        let (credential, fetched_at) = cache.get(&tenant_id)?;
        if fetched_at.elapsed() >= self.ttl || credential.is_expired_at(Utc::now()) {
            return None;
        }
        Some(credential.clone())
    }
}

#[async_trait::async_trait]
impl<P: CredentialProvider> CredentialProvider for CachedCredentialProvider<P> {
    async fn credential(&self, tenant_id: TenantId) -> Result<Credential, CredentialError> {
        if let Some(credential) = self.cached(tenant_id) {
            return Ok(credential);
        }

        debug!(tenant_id = %tenant_id, "fetching registry credential");
        let credential = self.inner.credential(tenant_id).await?;
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(tenant_id, (credential.clone(), Instant::now()));
        }
        Ok(credential)
    }
}
