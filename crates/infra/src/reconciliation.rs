//! Status reconciliation engine.
//!
//! Merges status signals from both channels into invoices. Each merge is a
//! read-decide-write cycle conditioned on the invoice version; a lost race
//! re-reads and decides again, up to `max_cas_attempts` times. Ignored
//! signals write nothing, so replays and cross-channel duplicates are free.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use einvoice_core::{AggregateRoot, DomainError, TenantId};
use einvoice_invoicing::{
    ApplyStatusSignal, AuditEvent, AuditSource, IgnoreReason, InvoiceCommand, InvoiceEvent,
    InvoiceId, LifecycleStatus, SignalDecision, StatusSignal,
};

use crate::audit::AuditRecorder;
use crate::store::{CommitError, Committed, Decision, InvoiceStore, StoreError, commit_decided};

pub const DEFAULT_DEDUP_WINDOW_SECS: i64 = 30;
pub const DEFAULT_MAX_CAS_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("gave up on invoice {invoice_id} after {attempts} conflicting writes")]
    ConflictExhausted { invoice_id: InvoiceId, attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied {
        invoice_id: InvoiceId,
        from: LifecycleStatus,
        to: LifecycleStatus,
        version: u64,
    },
    Ignored {
        invoice_id: Option<InvoiceId>,
        #[serde(flatten)]
        reason: IgnoreReason,
    },
}

impl ReconcileOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ReconcileOutcome::Applied { .. })
    }
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn InvoiceStore>,
    audit: AuditRecorder,
    dedup_window: chrono::Duration,
    max_cas_attempts: u32,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn InvoiceStore>, audit: AuditRecorder) -> Self {
        Self {
            store,
            audit,
            dedup_window: chrono::Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS),
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
        }
    }

    /// Minimum gap before the other channel may re-confirm an already recorded status.
    pub fn with_dedup_window(mut self, window: chrono::Duration) -> Self {
        self.dedup_window = window.max(chrono::Duration::zero());
        self
    }

    pub fn with_max_cas_attempts(mut self, attempts: u32) -> Self {
        self.max_cas_attempts = attempts.max(1);
        self
    }

    /// Route a signal to the invoice carrying its registry document id.
    pub async fn apply_signal(
        &self,
        tenant_id: TenantId,
        signal: &StatusSignal,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let found = self
            .store
            .find_by_registry_document(tenant_id, &signal.external_document_id)
            .await?;

        match found {
            Some(invoice) => self.apply_to_invoice(tenant_id, invoice.id_typed(), signal).await,
            None => {
                debug!(
                    tenant_id = %tenant_id,
                    document_id = %signal.external_document_id,
                    source = signal.source.as_str(),
                    "status signal for unknown document ignored"
                );
                Ok(ReconcileOutcome::Ignored {
                    invoice_id: None,
                    reason: IgnoreReason::UnknownDocument,
                })
            }
        }
    }

    pub async fn apply_to_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        signal: &StatusSignal,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let invoice = self
            .store
            .get(tenant_id, invoice_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        let command = InvoiceCommand::ApplyStatusSignal(ApplyStatusSignal {
            tenant_id,
            invoice_id,
            signal: signal.clone(),
            dedup_window_secs: self.dedup_window.num_seconds(),
        });

        let committed = commit_decided(&*self.store, invoice, self.max_cas_attempts, |current| {
            match current.decide_signal(signal, self.dedup_window) {
                SignalDecision::Ignore(reason) => Decision::Skip(reason),
                _ => Decision::Execute(command.clone()),
            }
        })
        .await;

        let (invoice, events) = match committed {
            Ok(Committed::Written { invoice, events }) => (invoice, events),
            Ok(Committed::Skipped { reason, .. }) => {
                log_ignored(tenant_id, invoice_id, signal, &reason);
                return Ok(ReconcileOutcome::Ignored {
                    invoice_id: Some(invoice_id),
                    reason,
                });
            }
            Err(CommitError::ConflictExhausted { attempts }) => {
                error!(
                    tenant_id = %tenant_id,
                    invoice_id = %invoice_id,
                    attempts,
                    document_id = %signal.external_document_id,
                    "reconciliation abandoned after repeated version conflicts"
                );
                return Err(ReconcileError::ConflictExhausted { invoice_id, attempts });
            }
            Err(CommitError::Store(e)) => return Err(e.into()),
            Err(CommitError::Domain(e)) => return Err(e.into()),
        };

        let mut outcome = None;
        for event in &events {
            if let InvoiceEvent::StatusReconciled(e) = event {
                info!(
                    tenant_id = %tenant_id,
                    invoice_id = %invoice_id,
                    document_id = %signal.external_document_id,
                    from = e.from.as_str(),
                    to = e.to.as_str(),
                    source = e.source.as_str(),
                    "invoice status reconciled"
                );
                self.audit
                    .record(AuditEvent::new(
                        tenant_id,
                        invoice_id,
                        event.audit_action(),
                        Some(e.from),
                        e.to,
                        AuditSource::from(e.source),
                        serde_json::json!({
                            "registryStatus": e.registry_status,
                            "documentId": signal.external_document_id,
                            "payload": signal.raw_payload,
                        }),
                        e.observed_at,
                    ))
                    .await;
                outcome = Some(ReconcileOutcome::Applied {
                    invoice_id,
                    from: e.from,
                    to: e.to,
                    version: invoice.version(),
                });
            }
        }

        outcome.ok_or_else(|| {
            ReconcileError::Domain(DomainError::invariant("applied signal produced no transition"))
        })
    }
}

impl core::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("dedup_window", &self.dedup_window)
            .field("max_cas_attempts", &self.max_cas_attempts)
            .finish_non_exhaustive()
    }
}

fn log_ignored(tenant_id: TenantId, invoice_id: InvoiceId, signal: &StatusSignal, reason: &IgnoreReason) {
    match reason {
        IgnoreReason::Unrecognized { status } => warn!(
            tenant_id = %tenant_id,
            invoice_id = %invoice_id,
            document_id = %signal.external_document_id,
            source = signal.source.as_str(),
            status = %status,
            "unrecognized registry status, invoice unchanged"
        ),
        other => debug!(
            tenant_id = %tenant_id,
            invoice_id = %invoice_id,
            source = signal.source.as_str(),
            reason = ?other,
            "status signal ignored"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use std::sync::Mutex;

    use chrono::{DateTime, Duration, Utc};
    use einvoice_core::ExpectedVersion;
    use einvoice_invoicing::{AuditAction, Invoice, SignalSource};

    use crate::audit::{AuditSink, InMemoryAuditSink};
    use crate::store::InMemoryInvoiceStore;
    use crate::test_support::submitted;

    const DOC: &str = "REG-DOC-1";

    async fn setup() -> (ReconciliationEngine, Arc<InMemoryInvoiceStore>, Arc<InMemoryAuditSink>, TenantId, InvoiceId) {
        let store = Arc::new(InMemoryInvoiceStore::new());
        let sink = Arc::new(InMemoryAuditSink::new());
        let tenant = TenantId::new();
        let invoice = submitted(tenant, "INV-001", DOC);
        let id = invoice.id_typed();
        store.save(&invoice, ExpectedVersion::Absent).await.unwrap();
        let engine = ReconciliationEngine::new(store.clone(), AuditRecorder::new(sink.clone()));
        (engine, store, sink, tenant, id)
    }

    fn signal(status: &str, source: SignalSource, at: DateTime<Utc>) -> StatusSignal {
        StatusSignal::new(DOC, status, source, at)
    }

    #[tokio::test]
    async fn webhook_then_poll_processing_keeps_validated() {
        let (engine, store, sink, tenant, id) = setup().await;
        let t0 = Utc::now();

        let first = engine
            .apply_signal(tenant, &signal("VALIDATED", SignalSource::Webhook, t0))
            .await
            .unwrap();
        assert!(first.is_applied());

        let second = engine
            .apply_signal(tenant, &signal("processing", SignalSource::Poll, t0 + Duration::seconds(5)))
            .await
            .unwrap();
        assert!(!second.is_applied());

        let invoice = store.get(tenant, id).await.unwrap().unwrap();
        assert_eq!(invoice.lifecycle_status(), LifecycleStatus::Validated);

        let rows = sink.list_for_invoice(tenant, id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, AuditAction::Validated);
        assert_eq!(rows[0].source, AuditSource::Webhook);
    }

    #[tokio::test]
    async fn same_signal_twice_writes_once() {
        let (engine, store, sink, tenant, id) = setup().await;
        let s = signal("accepted", SignalSource::Webhook, Utc::now());

        engine.apply_signal(tenant, &s).await.unwrap();
        let version = store.get(tenant, id).await.unwrap().unwrap().version();
        let again = engine.apply_signal(tenant, &s).await.unwrap();

        assert_eq!(
            again,
            ReconcileOutcome::Ignored {
                invoice_id: Some(id),
                reason: IgnoreReason::Duplicate
            }
        );
        assert_eq!(store.get(tenant, id).await.unwrap().unwrap().version(), version);
        assert_eq!(sink.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn unknown_document_and_unrecognized_status_are_ignored() {
        let (engine, _store, sink, tenant, _id) = setup().await;

        let unknown = StatusSignal::new("OTHER", "accepted", SignalSource::Poll, Utc::now());
        assert_eq!(
            engine.apply_signal(tenant, &unknown).await.unwrap(),
            ReconcileOutcome::Ignored {
                invoice_id: None,
                reason: IgnoreReason::UnknownDocument
            }
        );

        let odd = signal("teleported", SignalSource::Webhook, Utc::now());
        match engine.apply_signal(tenant, &odd).await.unwrap() {
            ReconcileOutcome::Ignored {
                reason: IgnoreReason::Unrecognized { status },
                ..
            } => assert_eq!(status, "teleported"),
            other => panic!("expected unrecognized, got {other:?}"),
        }
        assert!(sink.snapshot().is_empty());
    }

    /// Store whose first `conflicts` CAS writes lose to a concurrent writer.
    struct RacingStore {
        inner: InMemoryInvoiceStore,
        conflicts: AtomicU32,
    }

    #[async_trait::async_trait]
    impl InvoiceStore for RacingStore {
        async fn get(&self, t: TenantId, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
            self.inner.get(t, id).await
        }

        async fn find_by_registry_document(&self, t: TenantId, d: &str) -> Result<Option<Invoice>, StoreError> {
            self.inner.find_by_registry_document(t, d).await
        }

        async fn list(&self, t: TenantId) -> Result<Vec<Invoice>, StoreError> {
            self.inner.list(t).await
        }

        async fn list_tracked(&self, t: TenantId, limit: usize) -> Result<Vec<Invoice>, StoreError> {
            self.inner.list_tracked(t, limit).await
        }

        async fn save(&self, invoice: &Invoice, expected: ExpectedVersion) -> Result<(), StoreError> {
            if matches!(expected, ExpectedVersion::Exact(_))
                && self
                    .conflicts
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(StoreError::Conflict {
                    expected,
                    actual: Some(invoice.version()),
                });
            }
            self.inner.save(invoice, expected).await
        }
    }

    async fn racing(conflicts: u32) -> (ReconciliationEngine, TenantId, InvoiceId, Arc<InMemoryAuditSink>) {
        let store = Arc::new(RacingStore {
            inner: InMemoryInvoiceStore::new(),
            conflicts: AtomicU32::new(conflicts),
        });
        let tenant = TenantId::new();
        let invoice = submitted(tenant, "INV-001", DOC);
        let id = invoice.id_typed();
        store.save(&invoice, ExpectedVersion::Absent).await.unwrap();
        let sink = Arc::new(InMemoryAuditSink::new());
        let engine = ReconciliationEngine::new(store, AuditRecorder::new(sink.clone())).with_max_cas_attempts(3);
        (engine, tenant, id, sink)
    }

    #[tokio::test]
    async fn conflicts_are_retried_within_budget() {
        let (engine, tenant, id, sink) = racing(2).await;
        let outcome = engine
            .apply_to_invoice(tenant, id, &signal("rejected", SignalSource::Poll, Utc::now()))
            .await
            .unwrap();
        assert!(outcome.is_applied());
        assert_eq!(sink.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn conflict_exhaustion_is_reported() {
        let (engine, tenant, id, sink) = racing(10).await;
        let err = engine
            .apply_to_invoice(tenant, id, &signal("rejected", SignalSource::Poll, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::ConflictExhausted { attempts: 3, .. }));
        assert!(sink.snapshot().is_empty());
    }

    /// Store where another writer lands `winner` just before our first write.
    struct PreemptedStore {
        inner: InMemoryInvoiceStore,
        winner: Mutex<Option<Invoice>>,
    }

    #[async_trait::async_trait]
    impl InvoiceStore for PreemptedStore {
        async fn get(&self, t: TenantId, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
            self.inner.get(t, id).await
        }

        async fn find_by_registry_document(&self, t: TenantId, d: &str) -> Result<Option<Invoice>, StoreError> {
            self.inner.find_by_registry_document(t, d).await
        }

        async fn list(&self, t: TenantId) -> Result<Vec<Invoice>, StoreError> {
            self.inner.list(t).await
        }

        async fn list_tracked(&self, t: TenantId, limit: usize) -> Result<Vec<Invoice>, StoreError> {
            self.inner.list_tracked(t, limit).await
        }

        async fn save(&self, invoice: &Invoice, expected: ExpectedVersion) -> Result<(), StoreError> {
            let winner = self.winner.lock().unwrap().take();
            if let (Some(winner), ExpectedVersion::Exact(v)) = (winner, expected) {
                self.inner.save(&winner, ExpectedVersion::Exact(v)).await?;
                return Err(StoreError::Conflict {
                    expected,
                    actual: Some(winner.version()),
                });
            }
            self.inner.save(invoice, expected).await
        }
    }

    #[tokio::test]
    async fn lost_race_is_redecided_and_duplicate_writes_nothing() {
        let tenant = TenantId::new();
        let invoice = submitted(tenant, "INV-001", DOC);
        let id = invoice.id_typed();
        let s = signal("valid", SignalSource::Webhook, Utc::now());

        let mut winner = invoice.clone();
        winner
            .execute(&InvoiceCommand::ApplyStatusSignal(ApplyStatusSignal {
                tenant_id: tenant,
                invoice_id: id,
                signal: s.clone(),
                dedup_window_secs: DEFAULT_DEDUP_WINDOW_SECS,
            }))
            .unwrap();
        let winner_version = winner.version();

        let store = Arc::new(PreemptedStore {
            inner: InMemoryInvoiceStore::new(),
            winner: Mutex::new(None),
        });
        store.save(&invoice, ExpectedVersion::Absent).await.unwrap();
        *store.winner.lock().unwrap() = Some(winner);
        let sink = Arc::new(InMemoryAuditSink::new());
        let engine = ReconciliationEngine::new(store.clone(), AuditRecorder::new(sink.clone()));

        let outcome = engine.apply_to_invoice(tenant, id, &s).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Ignored {
                invoice_id: Some(id),
                reason: IgnoreReason::Duplicate
            }
        );
        let stored = store.get(tenant, id).await.unwrap().unwrap();
        assert_eq!(stored.version(), winner_version);
        assert_eq!(stored.lifecycle_status(), LifecycleStatus::Validated);
        assert!(sink.snapshot().is_empty());
    }
}
