use std::collections::HashMap;
use std::sync::RwLock;

use einvoice_core::{AggregateRoot, ExpectedVersion, TenantId};
use einvoice_invoicing::{Invoice, InvoiceId};

use super::{InvoiceStore, StoreError, is_tracked, tracked_order};

/// In-memory invoice store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryInvoiceStore {
    inner: RwLock<HashMap<(TenantId, InvoiceId), Invoice>>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<(TenantId, InvoiceId), Invoice>>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("invoice store lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn get(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        Ok(self.read()?.get(&(tenant_id, invoice_id)).cloned())
    }

    async fn find_by_registry_document(
        &self,
        tenant_id: TenantId,
        document_id: &str,
    ) -> Result<Option<Invoice>, StoreError> {
        Ok(self
            .read()?
            .iter()
            .find(|((t, _), inv)| *t == tenant_id && inv.registry_document_id() == Some(document_id))
            .map(|(_, inv)| inv.clone()))
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Invoice>, StoreError> {
        let mut out: Vec<Invoice> = self
            .read()?
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .map(|(_, inv)| inv.clone())
            .collect();
        out.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then(a.id_typed().cmp(&b.id_typed())));
        Ok(out)
    }

    async fn list_tracked(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<Invoice>, StoreError> {
        let mut out: Vec<Invoice> = self
            .read()?
            .iter()
            .filter(|((t, _), inv)| *t == tenant_id && is_tracked(inv))
            .map(|(_, inv)| inv.clone())
            .collect();
        out.sort_by(tracked_order);
        out.truncate(limit);
        Ok(out)
    }

    async fn save(&self, invoice: &Invoice, expected: ExpectedVersion) -> Result<(), StoreError> {
        let tenant_id = invoice.tenant_id().ok_or(StoreError::MissingTenant)?;
        let key = (tenant_id, invoice.id_typed());

        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::Backend("invoice store lock poisoned".to_string()))?;

        let actual = map.get(&key).map(|stored| stored.version());
        if !expected.matches(actual) {
            return Err(StoreError::Conflict { expected, actual });
        }

        if actual.is_none() {
            let number_taken = map.iter().any(|((t, id), other)| {
                *t == tenant_id
                    && *id != invoice.id_typed()
                    && other.invoice_number() == invoice.invoice_number()
                    && other.document_kind() == invoice.document_kind()
            });
            if number_taken {
                return Err(StoreError::DuplicateNumber(invoice.invoice_number().to_string()));
            }
        }

        map.insert(key, invoice.clone());
        Ok(())
    }
}
