// Sync module - drives the reconciler from the desired state file

pub mod state;

use ipnet::Ipv4Net;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{MissedTickBehavior, interval};

use crate::error::{RetryConfig, retry_with_backoff};
use crate::reconciler::RouteReconciler;
use state::{DesiredState, NodeLookup};

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub ensured: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub drift_checked: bool,
}

pub struct SyncService {
    reconciler: Arc<RouteReconciler>,
    state_file: PathBuf,
    interval: Duration,
    retry: RetryConfig,
    teardown_on_shutdown: bool,
    pools: Arc<RwLock<Vec<Ipv4Net>>>,
}

impl SyncService {
    pub fn new(
        reconciler: Arc<RouteReconciler>,
        state_file: PathBuf,
        interval: Duration,
        retry: RetryConfig,
        teardown_on_shutdown: bool,
    ) -> Self {
        SyncService {
            reconciler,
            state_file,
            interval,
            retry,
            teardown_on_shutdown,
            pools: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Pools seen by the most recent successful load
    pub fn known_pools(&self) -> Arc<RwLock<Vec<Ipv4Net>>> {
        self.pools.clone()
    }

    /// Sync on every tick until `shutdown` resolves, then tear down.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Some(report) = self.sync_once().await {
                        tracing::info!(
                            "sync pass: {} ensured, {} removed, {} skipped, {} failed, drift checked: {}",
                            report.ensured,
                            report.removed,
                            report.skipped,
                            report.failed,
                            report.drift_checked
                        );
                    }
                }
            }
        }

        if self.teardown_on_shutdown {
            self.shutdown().await;
        } else {
            tracing::info!("teardown disabled, leaving pod routes in place");
        }
    }

    /// One pass over the desired state. Returns `None` when the state file
    /// could not be read.
    pub async fn sync_once(&self) -> Option<SyncReport> {
        let state = match DesiredState::load(&self.state_file).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("unable to load desired state from {}: {}", self.state_file.display(), e);
                return None;
            }
        };

        Some(self.apply(&state).await)
    }

    pub async fn apply(&self, state: &DesiredState) -> SyncReport {
        let pools = state.managed_pools();
        *self.pools.write().await = pools.clone();

        let mut report = SyncReport::default();

        for block in &state.blocks {
            if block.deleted {
                tracing::info!("Delete block [{}]", block.cidr);
                match self.reconciler.remove(&block.cidr).await {
                    Ok(()) => report.removed += 1,
                    Err(e) => {
                        tracing::error!("del route [{}] error: {}", block.cidr, e.user_message());
                        report.failed += 1;
                    }
                }
                continue;
            }

            let gateway = match state.lookup(&block.node) {
                Ok(ip) => ip,
                Err(e) => {
                    tracing::warn!("skipping block [{}]: {}", block.cidr, e);
                    report.skipped += 1;
                    continue;
                }
            };

            tracing::debug!("Reconciling block [{}] node {} ip {}", block.cidr, block.node, gateway);
            let operation = format!("ensure route {} via {}", block.cidr, gateway);
            match retry_with_backoff(|| self.reconciler.ensure(&block.cidr, gateway), &self.retry, &operation).await
            {
                Ok(()) => report.ensured += 1,
                Err(e) => {
                    tracing::error!("update route [{}] error: {} ({})", block.cidr, e, e.user_message());
                    report.failed += 1;
                }
            }
        }

        match self
            .reconciler
            .reconcile_against_pools(&pools, &state.desired_destinations())
            .await
        {
            Ok(()) => report.drift_checked = true,
            Err(e) => tracing::error!("drift cleanup failed: {}", e),
        }

        report
    }

    /// Remove every managed route. Pools are re-read from the state file so a
    /// pool added since the last pass is covered too.
    pub async fn shutdown(&self) {
        let pools = match DesiredState::load(&self.state_file).await {
            Ok(state) => state.managed_pools(),
            Err(e) => {
                tracing::warn!("unable to reload pools for teardown, using last known: {}", e);
                self.pools.read().await.clone()
            }
        };

        tracing::info!("clean pod route ...");
        if let Err(e) = self.reconciler.teardown(&pools).await {
            tracing::error!("teardown failed: {}", e);
        }
        tracing::info!("clean pod route finished ...");
    }
}
