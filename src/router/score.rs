//! Score-based router.
//!
//! # Responsibilities
//! - Own the backend registry and the single lock guarding it
//! - Hand out selectors for new connections
//! - Fold feed deltas and remember the last discovery error
//! - Drive the redirect protocol: plan under the lock, propose outside it,
//!   apply the reported outcome under the lock again
//! - Run the rebalance worker and the feed observer, and stop both on close
//!
//! # Design Decisions
//! - `ScoreBasedRouter` is a cheap handle; clones share one router
//! - `conn.redirect()` is never called while the registry is locked
//! - Connection status callbacks run under the lock and must not re-enter

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::config::BalanceConfig;
use crate::health::observer::{BackendEventReceiver, BackendObserver};
use crate::health::state::{BackendHealth, BackendStatus};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::router::conn::{ConnHandle, RedirectableConn};
use crate::router::error::RouterError;
use crate::router::rebalance::plan_rebalance;
use crate::router::registry::BackendRegistry;
use crate::router::selector::BackendSelector;

/// Outcome counts of migrations between one pair of backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationCount {
    pub succeeded: u64,
    pub failed: u64,
}

/// Migration counts keyed by source and destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub from: String,
    pub to: String,
    pub succeeded: u64,
    pub failed: u64,
}

/// Point-in-time view of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSnapshot {
    pub addr: String,
    pub status: BackendStatus,
    pub server_version: Option<String>,
    pub score: i64,
    pub connections: usize,
    pub tentative: usize,
    pub incoming: usize,
    pub outgoing: usize,
    pub redirecting: usize,
}

struct RouterInner {
    registry: Mutex<BackendRegistry>,
    config: ArcSwap<BalanceConfig>,
    discovery_error: Mutex<Option<String>>,
    server_version: Mutex<Option<String>>,
    migrations: DashMap<(String, String), MigrationCount>,
    /// Wakes the rebalance worker early.
    nudge: Notify,
    /// Asks the observer for an immediate round.
    refresh: Mutex<Option<Arc<Notify>>>,
    shutdown: Shutdown,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

/// Routes new connections to the lowest-score backend and keeps existing
/// connections balanced.
#[derive(Clone)]
pub struct ScoreBasedRouter {
    inner: Arc<RouterInner>,
}

impl ScoreBasedRouter {
    pub fn new(config: BalanceConfig) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                registry: Mutex::new(BackendRegistry::new()),
                config: ArcSwap::from_pointee(config),
                discovery_error: Mutex::new(None),
                server_version: Mutex::new(None),
                migrations: DashMap::new(),
                nudge: Notify::new(),
                refresh: Mutex::new(None),
                shutdown: Shutdown::new(),
                workers: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the rebalance worker and, if given, the feed observer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, observer: Option<BackendObserver>) -> Result<(), RouterError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(RouterError::AlreadyStarted);
        }
        let mut workers = self.inner.workers.lock().expect("workers mutex poisoned");

        let rebalance_shutdown = self.inner.shutdown.subscribe();
        workers.push(tokio::spawn(self.clone().rebalance_loop(rebalance_shutdown)));

        if let Some(observer) = observer {
            *self.inner.refresh.lock().expect("refresh mutex poisoned") =
                Some(observer.refresh_handle());
            let receiver: Arc<dyn BackendEventReceiver> = Arc::new(self.clone());
            let observer_shutdown = self.inner.shutdown.subscribe();
            workers.push(tokio::spawn(observer.run(receiver, observer_shutdown)));
        }

        tracing::info!(workers = workers.len(), "Router started");
        Ok(())
    }

    /// Stop the background workers and wait for them to exit.
    pub async fn close(&self) {
        self.inner.shutdown.trigger();
        let workers = std::mem::take(&mut *self.inner.workers.lock().expect("workers mutex poisoned"));
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Router worker failed");
            }
        }
        *self.inner.refresh.lock().expect("refresh mutex poisoned") = None;
        tracing::info!("Router closed");
    }

    pub fn backend_selector(&self) -> BackendSelector {
        BackendSelector::new(self.clone())
    }

    fn registry(&self) -> MutexGuard<'_, BackendRegistry> {
        self.inner.registry.lock().expect("registry mutex poisoned")
    }

    pub(crate) fn route_once(&self, excluded: &[String]) -> Result<Option<String>, RouterError> {
        if let Some(addr) = self.registry().reserve_best(excluded) {
            return Ok(Some(addr));
        }
        // Nothing healthy: the list may be stale, so ask for a fresh one.
        self.request_refresh();
        match self.discovery_error() {
            Some(err) => Err(RouterError::Discovery(err)),
            None => Ok(None),
        }
    }

    pub(crate) fn on_create_conn(&self, addr: &str, conn: Option<ConnHandle>, succeed: bool) {
        let mut registry = self.registry();
        match (conn, succeed) {
            (Some(conn), true) => {
                let conn_id = conn.connection_id();
                match registry.commit(addr, conn) {
                    Ok(count) => {
                        tracing::debug!(
                            backend_addr = %addr,
                            connection_id = conn_id,
                            connections = count,
                            "Connection placed"
                        );
                    }
                    Err(e) => {
                        tracing::error!(connection_id = conn_id, error = %e, "Failed to place connection");
                    }
                }
            }
            (None, true) => {
                tracing::warn!(backend_addr = %addr, "Connect reported success without a connection");
                registry.rollback(addr);
            }
            (_, false) => {
                registry.rollback(addr);
            }
        }
        publish_backend(&registry, addr);
    }

    /// Drop a reservation left behind by a selector that was never finished.
    ///
    /// May run while unwinding, so a poisoned registry is skipped instead of panicking again.
    pub(crate) fn release_reservation(&self, addr: &str) {
        let Ok(mut registry) = self.inner.registry.lock() else {
            return;
        };
        tracing::debug!(backend_addr = %addr, "Releasing unsettled reservation");
        registry.rollback(addr);
        publish_backend(&registry, addr);
    }

    /// Fold a feed report.
    ///
    /// `err` replaces the remembered discovery error (`None` clears it). Backends are
    /// never evicted because of an error; only the named addresses are touched.
    pub fn on_backend_changed(&self, changes: HashMap<String, BackendHealth>, err: Option<String>) {
        if let Some(err) = &err {
            tracing::warn!(error = %err, "Backend discovery failed, keeping current backends");
        }
        let cleared = {
            let mut current = self.inner.discovery_error.lock().expect("discovery mutex poisoned");
            let cleared = current.is_some() && err.is_none();
            *current = err;
            cleared
        };
        if cleared {
            tracing::info!("Backend discovery recovered");
        }
        if changes.is_empty() {
            return;
        }

        let version = changes
            .values()
            .filter(|h| h.status.is_healthy())
            .find_map(|h| h.server_version.clone());
        if let Some(version) = version {
            *self.inner.server_version.lock().expect("version mutex poisoned") = Some(version);
        }

        {
            let mut registry = self.registry();
            let transitions = registry.upsert(&changes);
            let swept = registry.remove_if_dead();
            for t in &transitions {
                match t.prev {
                    None => tracing::info!(backend_addr = %t.addr, status = %t.cur, "Backend added"),
                    Some(prev) if prev != t.cur => tracing::info!(
                        backend_addr = %t.addr,
                        prev_status = %prev,
                        cur_status = %t.cur,
                        notified = t.notified,
                        "Backend status changed"
                    ),
                    Some(_) => {}
                }
                if t.removed {
                    tracing::info!(backend_addr = %t.addr, "Backend removed");
                }
                metrics::record_backend_health(&t.addr, t.cur.is_healthy());
                publish_backend(&registry, &t.addr);
            }
            for addr in &swept {
                tracing::info!(backend_addr = %addr, "Backend removed");
                publish_backend(&registry, addr);
            }
        }
        self.inner.nudge.notify_one();
    }

    /// Forget a closed connection.
    pub fn on_conn_closed(&self, addr: &str, conn: &dyn RedirectableConn) -> Result<(), RouterError> {
        let conn_id = conn.connection_id();
        let mut registry = self.registry();
        let entry = registry.close_conn(addr, conn_id)?;
        if let Some(to) = entry.redirecting_to() {
            tracing::debug!(
                backend_addr = %addr,
                connection_id = conn_id,
                to = %to,
                "Connection closed during redirect"
            );
        }
        publish_backend(&registry, addr);
        Ok(())
    }

    /// The connection now lives on `to`.
    pub fn on_redirect_succeed(
        &self,
        from: &str,
        to: &str,
        conn: &dyn RedirectableConn,
    ) -> Result<(), RouterError> {
        self.on_redirect_finished(from, to, conn, true)
    }

    /// The connection stayed on `from`.
    pub fn on_redirect_fail(
        &self,
        from: &str,
        to: &str,
        conn: &dyn RedirectableConn,
    ) -> Result<(), RouterError> {
        self.on_redirect_finished(from, to, conn, false)
    }

    fn on_redirect_finished(
        &self,
        from: &str,
        to: &str,
        conn: &dyn RedirectableConn,
        succeed: bool,
    ) -> Result<(), RouterError> {
        let conn_id = conn.connection_id();
        {
            let mut registry = self.registry();
            let (from_count, to_count) =
                registry.finish_redirect(from, to, conn_id, succeed, Instant::now())?;
            publish_backend(&registry, from);
            publish_backend(&registry, to);
            if succeed {
                tracing::debug!(
                    from = %from,
                    to = %to,
                    connection_id = conn_id,
                    from_connections = from_count,
                    to_connections = to_count,
                    "Redirect succeeded"
                );
            } else {
                tracing::warn!(from = %from, to = %to, connection_id = conn_id, "Redirect failed");
            }
        }

        let mut count = self
            .inner
            .migrations
            .entry((from.to_string(), to.to_string()))
            .or_default();
        if succeed {
            count.succeeded += 1;
        } else {
            count.failed += 1;
        }
        drop(count);
        metrics::record_migration(from, to, succeed);
        Ok(())
    }

    /// Propose up to `quota` migrations. Returns how many the connections accepted.
    pub fn rebalance(&self, quota: usize) -> usize {
        let config = self.inner.config.load_full();
        let plans = {
            let mut registry = self.registry();
            plan_rebalance(&mut registry, quota, &config, Instant::now())
        };

        let mut initiated = 0;
        for plan in plans {
            let conn_id = plan.conn.connection_id();
            if plan.conn.redirect(&plan.to) {
                tracing::debug!(
                    from = %plan.from,
                    to = %plan.to,
                    connection_id = conn_id,
                    "Redirect proposed"
                );
                initiated += 1;
                continue;
            }
            let mut registry = self.registry();
            registry.cancel_redirect(&plan.from, conn_id, &plan.to);
            tracing::debug!(
                from = %plan.from,
                to = %plan.to,
                connection_id = conn_id,
                "Connection declined redirect"
            );
        }

        if initiated > 0 {
            metrics::record_redirects_proposed(initiated);
            let registry = self.registry();
            for backend in registry.backends() {
                metrics::set_backend_score(backend.addr(), backend.score());
            }
        }
        initiated
    }

    async fn rebalance_loop(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Rebalance worker starting");
        loop {
            let config = self.inner.config.load_full();
            tokio::select! {
                _ = tokio::time::sleep(config.rebalance_interval()) => {}
                _ = self.inner.nudge.notified() => {}
                _ = shutdown.recv() => {
                    tracing::info!("Rebalance worker received shutdown signal, exiting loop");
                    break;
                }
            }
            self.rebalance(config.conns_per_loop);
        }
    }

    /// Swap the balancing knobs. The worker picks them up on its next pass.
    pub fn update_config(&self, config: BalanceConfig) {
        self.inner.config.store(Arc::new(config));
        self.inner.nudge.notify_one();
    }

    pub fn config(&self) -> Arc<BalanceConfig> {
        self.inner.config.load_full()
    }

    fn request_refresh(&self) {
        if let Some(refresh) = self.inner.refresh.lock().expect("refresh mutex poisoned").as_ref() {
            refresh.notify_one();
        }
    }

    /// Connections confirmed on any backend.
    pub fn conn_count(&self) -> usize {
        self.registry().total_conns()
    }

    /// Every backend, ascending by score.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        self.registry()
            .backends()
            .iter()
            .map(|b| BackendSnapshot {
                addr: b.addr().to_string(),
                status: b.status(),
                server_version: b.health().server_version.clone(),
                score: b.score(),
                connections: b.conn_count(),
                tentative: b.tentative,
                incoming: b.incoming,
                outgoing: b.outgoing,
                redirecting: b.redirecting_count(),
            })
            .collect()
    }

    pub fn migration_count(&self, from: &str, to: &str) -> MigrationCount {
        self.inner
            .migrations
            .get(&(from.to_string(), to.to_string()))
            .map(|c| *c)
            .unwrap_or_default()
    }

    pub fn migrations(&self) -> Vec<MigrationRecord> {
        let mut records: Vec<MigrationRecord> = self
            .inner
            .migrations
            .iter()
            .map(|entry| {
                let (from, to) = entry.key();
                MigrationRecord {
                    from: from.clone(),
                    to: to.clone(),
                    succeeded: entry.value().succeeded,
                    failed: entry.value().failed,
                }
            })
            .collect();
        records.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));
        records
    }

    /// Version reported by any healthy backend, if one has reported it.
    pub fn server_version(&self) -> Option<String> {
        self.inner.server_version.lock().expect("version mutex poisoned").clone()
    }

    /// The error carried by the last feed report, if it failed.
    pub fn discovery_error(&self) -> Option<String> {
        self.inner.discovery_error.lock().expect("discovery mutex poisoned").clone()
    }
}

impl BackendEventReceiver for ScoreBasedRouter {
    fn on_backend_changed(&self, changes: HashMap<String, BackendHealth>, err: Option<String>) {
        ScoreBasedRouter::on_backend_changed(self, changes, err);
    }
}

fn publish_backend(registry: &BackendRegistry, addr: &str) {
    let (connections, score) = registry
        .get(addr)
        .map(|b| (b.conn_count(), b.score()))
        .unwrap_or((0, 0));
    metrics::set_backend_connections(addr, connections);
    metrics::set_backend_score(addr, score);
}
