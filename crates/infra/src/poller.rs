//! Poll runner: the system-of-record fallback for missed webhooks.
//!
//! Two modes per tenant:
//! - tracked: fetch detail for a bounded batch of registry-tracked, non-absorbing
//!   invoices, least recently reconciled first;
//! - delta: ask the registry what changed since the tenant's cursor and fetch
//!   detail for each changed document we know about. A document that fails
//!   permanently is skipped so it cannot pin the cursor.
//!
//! Both feed the same [`ReconciliationEngine`] as webhooks do. A run has a
//! wall-clock budget checked before each item; items not started in time are
//! reported as deferred and picked up by the next run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use einvoice_core::TenantId;
use einvoice_invoicing::{InvoiceId, SignalSource, StatusSignal};
use einvoice_registry::{
    Credential, CredentialError, CredentialProvider, DocumentUpdate, RegistryClient, RegistryError,
};

use crate::cursor_store::SyncCursorStore;
use crate::reconciliation::{ReconcileError, ReconcileOutcome, ReconciliationEngine};
use crate::retry::{RetryPolicy, retry_transient};
use crate::store::{InvoiceStore, StoreError};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollMode {
    Tracked,
    Delta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub mode: PollMode,
    pub examined: usize,
    pub applied: usize,
    pub ignored: usize,
    pub failed: usize,
    /// Delta updates passed over after a permanent failure.
    pub skipped: usize,
    pub deferred: usize,
    /// Delta cursor after the run.
    pub cursor: Option<DateTime<Utc>>,
}

impl PollReport {
    fn new(mode: PollMode) -> Self {
        Self {
            mode,
            examined: 0,
            applied: 0,
            ignored: 0,
            failed: 0,
            skipped: 0,
            deferred: 0,
            cursor: None,
        }
    }

    fn count(&mut self, outcome: &ReconcileOutcome) {
        if outcome.is_applied() {
            self.applied += 1;
        } else {
            self.ignored += 1;
        }
    }
}

/// Both modes for one tenant. A failing mode does not stop the other.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollRun {
    pub tracked: Option<PollReport>,
    pub delta: Option<PollReport>,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct Poller {
    store: Arc<dyn InvoiceStore>,
    registry: Arc<dyn RegistryClient>,
    credentials: Arc<dyn CredentialProvider>,
    cursors: Arc<dyn SyncCursorStore>,
    engine: ReconciliationEngine,
    retry: RetryPolicy,
    batch_size: usize,
    budget: Duration,
}

impl Poller {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        registry: Arc<dyn RegistryClient>,
        credentials: Arc<dyn CredentialProvider>,
        cursors: Arc<dyn SyncCursorStore>,
        engine: ReconciliationEngine,
    ) -> Self {
        Self {
            store,
            registry,
            credentials,
            cursors,
            engine,
            retry: RetryPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            budget: DEFAULT_BUDGET,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub async fn poll_tracked(&self, tenant_id: TenantId) -> Result<PollReport, PollError> {
        let credential = self.credentials.credential(tenant_id).await?;
        let invoices = self.store.list_tracked(tenant_id, self.batch_size).await?;
        let started = Instant::now();
        let mut report = PollReport::new(PollMode::Tracked);

        for (index, invoice) in invoices.iter().enumerate() {
            if started.elapsed() >= self.budget {
                report.deferred = invoices.len() - index;
                break;
            }
            let Some(document_id) = invoice.registry_document_id() else {
                continue;
            };
            report.examined += 1;

            match self
                .fetch_and_apply(tenant_id, &credential, invoice.id_typed(), document_id)
                .await
            {
                Ok(outcome) => report.count(&outcome),
                Err(_) => report.failed += 1,
            }
        }

        log_report(tenant_id, &report);
        Ok(report)
    }

    /// Changes since the tenant cursor, oldest first. The cursor advances
    /// over the leading run of settled documents; the first transient failure
    /// or budget deferral holds it so that document is listed again. Documents
    /// that fail permanently are skipped and logged.
    pub async fn poll_delta(&self, tenant_id: TenantId) -> Result<PollReport, PollError> {
        let credential = self.credentials.credential(tenant_id).await?;
        let since = self.cursors.get(tenant_id).await?;
        let mut updates = retry_transient(&self.retry, "poll_updates", || {
            self.registry.poll_updates(&credential, since)
        })
        .await?
        .documents;
        updates.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));

        let started = Instant::now();
        let mut report = PollReport::new(PollMode::Delta);
        let mut settled = 0;
        let mut blocked = false;

        for (index, update) in updates.iter().enumerate() {
            if started.elapsed() >= self.budget {
                report.deferred = updates.len() - index;
                break;
            }
            report.examined += 1;

            let known = self
                .store
                .find_by_registry_document(tenant_id, &update.document_id)
                .await;
            let done = match known {
                Ok(Some(invoice)) => {
                    match self
                        .fetch_and_apply(tenant_id, &credential, invoice.id_typed(), &update.document_id)
                        .await
                    {
                        Ok(outcome) => {
                            report.count(&outcome);
                            true
                        }
                        Err(ItemFailure::Permanent) => {
                            warn!(
                                tenant_id = %tenant_id,
                                invoice_id = %invoice.id_typed(),
                                document_id = %update.document_id,
                                updated_at = %update.updated_at,
                                "delta update skipped after permanent failure"
                            );
                            report.skipped += 1;
                            true
                        }
                        Err(ItemFailure::Transient) => {
                            report.failed += 1;
                            false
                        }
                    }
                }
                Ok(None) => {
                    debug!(
                        tenant_id = %tenant_id,
                        document_id = %update.document_id,
                        direction = ?update.direction,
                        "delta update for unknown document ignored"
                    );
                    report.ignored += 1;
                    true
                }
                Err(err) => {
                    warn!(tenant_id = %tenant_id, document_id = %update.document_id, error = %err, "lookup failed");
                    report.failed += 1;
                    false
                }
            };
            blocked |= !done;
            if !blocked {
                settled += 1;
            }
        }

        report.cursor = since;
        if let Some(to) = prefix_cursor(&updates, settled) {
            report.cursor = Some(self.cursors.advance(tenant_id, to).await?);
        }

        log_report(tenant_id, &report);
        Ok(report)
    }

    pub async fn poll_all(&self, tenant_id: TenantId) -> PollRun {
        let mut run = PollRun::default();
        match self.poll_tracked(tenant_id).await {
            Ok(report) => run.tracked = Some(report),
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "tracked poll failed");
                run.errors.push(format!("tracked: {err}"));
            }
        }
        match self.poll_delta(tenant_id).await {
            Ok(report) => run.delta = Some(report),
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "delta poll failed");
                run.errors.push(format!("delta: {err}"));
            }
        }
        run
    }

    /// Failures are logged here and classified for the cursor.
    async fn fetch_and_apply(
        &self,
        tenant_id: TenantId,
        credential: &Credential,
        invoice_id: InvoiceId,
        document_id: &str,
    ) -> Result<ReconcileOutcome, ItemFailure> {
        let detail = retry_transient(&self.retry, "get_document", || {
            self.registry.get_document(credential, document_id)
        })
        .await;
        let detail = match detail {
            Ok(detail) => detail,
            Err(err) => {
                warn!(
                    tenant_id = %tenant_id,
                    invoice_id = %invoice_id,
                    document_id,
                    error = %err,
                    "document detail fetch failed"
                );
                return Err(ItemFailure::from_registry(&err));
            }
        };

        let payload = serde_json::to_value(&detail).unwrap_or(serde_json::Value::Null);
        let signal = StatusSignal::new(document_id, detail.status, SignalSource::Poll, Utc::now()).with_payload(payload);

        self.engine
            .apply_to_invoice(tenant_id, invoice_id, &signal)
            .await
            .map_err(|err| {
                warn!(
                    tenant_id = %tenant_id,
                    invoice_id = %invoice_id,
                    document_id,
                    error = %err,
                    "reconciliation failed during poll"
                );
                match err {
                    ReconcileError::Domain(_) => ItemFailure::Permanent,
                    ReconcileError::Store(_) | ReconcileError::ConflictExhausted { .. } => ItemFailure::Transient,
                }
            })
    }
}

/// Whether a failed item may succeed if listed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemFailure {
    Transient,
    Permanent,
}

impl ItemFailure {
    /// Only failures tied to the document itself are permanent. A rejected
    /// credential affects every document, so it holds the cursor.
    fn from_registry(err: &RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_)
            | RegistryError::BadRequest { .. }
            | RegistryError::Decode(_)
            | RegistryError::Protocol(_) => ItemFailure::Permanent,
            _ => ItemFailure::Transient,
        }
    }
}

/// Newest timestamp the cursor may move to after `settled` leading updates.
/// Updates sharing a timestamp with the first unsettled one stay behind it.
fn prefix_cursor(updates: &[DocumentUpdate], settled: usize) -> Option<DateTime<Utc>> {
    let prefix = updates.get(..settled)?;
    match updates.get(settled) {
        Some(next) => prefix
            .iter()
            .rev()
            .map(|u| u.updated_at)
            .find(|at| *at < next.updated_at),
        None => prefix.last().map(|u| u.updated_at),
    }
}

impl core::fmt::Debug for Poller {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Poller")
            .field("batch_size", &self.batch_size)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

fn log_report(tenant_id: TenantId, report: &PollReport) {
    info!(
        tenant_id = %tenant_id,
        mode = ?report.mode,
        examined = report.examined,
        applied = report.applied,
        ignored = report.ignored,
        failed = report.failed,
        skipped = report.skipped,
        deferred = report.deferred,
        "poll batch finished"
    );
}
