//! Background worker that runs both poll modes on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tracing::{debug, info};

use einvoice_core::TenantId;

use crate::poller::Poller;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Periodic poller over the registered tenants.
///
/// Tenants are polled one after another on each tick; a tick that overruns
/// the interval skips the missed ticks instead of bursting.
pub struct PollWorker {
    poller: Poller,
    interval: Duration,
    shutdown: Arc<Notify>,
    active_tenants: Arc<RwLock<Vec<TenantId>>>,
}

/// Handle to stop a started worker.
#[derive(Debug)]
pub struct PollWorkerHandle {
    shutdown: Arc<Notify>,
    join: tokio::task::JoinHandle<()>,
}

impl PollWorkerHandle {
    /// Request graceful shutdown and wait for the current tick to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.join.await;
    }
}

impl PollWorker {
    pub fn new(poller: Poller, interval: Duration) -> Self {
        Self {
            poller,
            interval: interval.max(Duration::from_millis(1)),
            shutdown: Arc::new(Notify::new()),
            active_tenants: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn add_tenant(&self, tenant_id: TenantId) {
        let mut tenants = self.active_tenants.write().await;
        if !tenants.contains(&tenant_id) {
            tenants.push(tenant_id);
            info!(tenant_id = %tenant_id, "tenant added to poll worker");
        }
    }

    pub async fn remove_tenant(&self, tenant_id: TenantId) {
        let mut tenants = self.active_tenants.write().await;
        tenants.retain(|&id| id != tenant_id);
        info!(tenant_id = %tenant_id, "tenant removed from poll worker");
    }

    pub async fn tenants(&self) -> Vec<TenantId> {
        self.active_tenants.read().await.clone()
    }

    /// Tenant registry shared with the running task, for late registration.
    pub fn tenant_registry(&self) -> Arc<RwLock<Vec<TenantId>>> {
        self.active_tenants.clone()
    }

    pub fn start(self) -> PollWorkerHandle {
        let shutdown = self.shutdown.clone();
        let poller = self.poller;
        let active_tenants = self.active_tenants;
        let period = self.interval;
        let signal = shutdown.clone();

        let join = tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "poll worker started");

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = signal.notified() => {
                        info!("poll worker received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let tenants = active_tenants.read().await.clone();
                        if tenants.is_empty() {
                            debug!("no tenants registered for polling");
                            continue;
                        }
                        for tenant_id in tenants {
                            let run = poller.poll_all(tenant_id).await;
                            debug!(tenant_id = %tenant_id, errors = run.errors.len(), "tenant poll finished");
                        }
                    }
                }
            }

            info!("poll worker stopped");
        });

        PollWorkerHandle { shutdown, join }
    }
}

impl core::fmt::Debug for PollWorker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PollWorker")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
