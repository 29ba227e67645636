//! Background feed worker.
//!
//! # Data Flow
//! ```text
//! tick (health_check.interval) or refresh request
//!     → fetcher.get_backend_list()   (per-attempt timeout, retried with backoff)
//!     → checker.check_health() for every backend, concurrently
//!     → diff against the previous round
//!     → receiver.on_backend_changed(delta, error)
//! ```
//!
//! # Design Decisions
//! - Only changes are pushed; an unchanged cluster produces no events
//! - A backend that vanished from the list is reported as CannotConnect so the
//!   router drains it instead of dropping its connections
//! - The same fetch error is reported once, and cleared by the next good round

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::config::{HealthCheckConfig, RetryConfig};
use crate::health::checker::HealthChecker;
use crate::health::fetcher::{BackendFetcher, BackendInfo, FetchError};
use crate::health::state::{BackendHealth, BackendStatus};
use crate::observability::metrics;
use crate::resilience::retry_delay;

/// Ping error attached to backends that disappeared from the list.
pub const REMOVED_FROM_LIST: &str = "removed from backend list";

/// Consumer of feed reports.
pub trait BackendEventReceiver: Send + Sync {
    /// `changes` holds only the backends whose health changed.
    /// `err` is set when the backend list could not be fetched.
    fn on_backend_changed(&self, changes: HashMap<String, BackendHealth>, err: Option<String>);
}

pub struct BackendObserver {
    fetcher: Arc<dyn BackendFetcher>,
    checker: Arc<dyn HealthChecker>,
    health_config: HealthCheckConfig,
    retries: RetryConfig,
    refresh: Arc<Notify>,
    current: HashMap<String, BackendHealth>,
    last_error: Option<String>,
}

impl BackendObserver {
    pub fn new(
        fetcher: Arc<dyn BackendFetcher>,
        checker: Arc<dyn HealthChecker>,
        health_config: HealthCheckConfig,
        retries: RetryConfig,
    ) -> Self {
        Self {
            fetcher,
            checker,
            health_config,
            retries,
            refresh: Arc::new(Notify::new()),
            current: HashMap::new(),
            last_error: None,
        }
    }

    /// Notifying the handle makes the observer run a round right away.
    pub fn refresh_handle(&self) -> Arc<Notify> {
        self.refresh.clone()
    }

    pub async fn run(
        mut self,
        receiver: Arc<dyn BackendEventReceiver>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(
            interval_ms = self.health_config.interval_ms,
            health_check = self.health_config.enabled,
            "Backend observer starting"
        );
        let mut ticker = tokio::time::interval(self.health_config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let refresh = self.refresh.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = refresh.notified() => {
                    tracing::debug!("Backend list refresh requested");
                }
                _ = shutdown.recv() => break,
            }
            tokio::select! {
                _ = self.observe_once(receiver.as_ref()) => {}
                _ = shutdown.recv() => break,
            }
        }
        tracing::info!("Backend observer received shutdown signal, exiting loop");
    }

    /// Run one fetch, check and report round.
    pub async fn observe_once(&mut self, receiver: &dyn BackendEventReceiver) {
        let list = match self.fetch_with_retry().await {
            Ok(list) => list,
            Err(e) => {
                metrics::record_feed_error();
                let msg = e.to_string();
                if self.last_error.as_deref() != Some(msg.as_str()) {
                    tracing::error!(error = %msg, "Fetching backend list failed");
                    receiver.on_backend_changed(HashMap::new(), Some(msg.clone()));
                    self.last_error = Some(msg);
                }
                return;
            }
        };

        let latest = self.check_all(list).await;
        let changes = diff(&self.current, &latest);
        let recovered = self.last_error.take().is_some();
        if !changes.is_empty() || recovered {
            for (addr, health) in &changes {
                tracing::debug!(backend_addr = %addr, health = %health, "Backend health changed");
            }
            receiver.on_backend_changed(changes, None);
        }
        self.current = latest;
    }

    async fn fetch_with_retry(&self) -> Result<HashMap<String, BackendInfo>, FetchError> {
        let timeout = self.retries.attempt_timeout();
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(timeout, self.fetcher.get_backend_list()).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(timeout)),
            };
            match result {
                Ok(list) => return Ok(list),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.retries.max_attempts {
                        return Err(e);
                    }
                    let delay = retry_delay(&self.retries, attempt);
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying backend list fetch");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn check_all(&self, list: HashMap<String, BackendInfo>) -> HashMap<String, BackendHealth> {
        let mut checks = JoinSet::new();
        for (addr, info) in list {
            let checker = self.checker.clone();
            checks.spawn(async move {
                let health = checker.check_health(&addr, &info).await;
                (addr, health)
            });
        }

        let mut latest = HashMap::new();
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok((addr, health)) => {
                    latest.insert(addr, health);
                }
                Err(e) => tracing::error!(error = %e, "Health check task failed"),
            }
        }
        latest
    }
}

/// Backends whose health differs between two rounds.
fn diff(
    previous: &HashMap<String, BackendHealth>,
    latest: &HashMap<String, BackendHealth>,
) -> HashMap<String, BackendHealth> {
    let mut changes: HashMap<String, BackendHealth> = latest
        .iter()
        .filter(|(addr, health)| !previous.get(*addr).is_some_and(|prev| prev.same_as(health)))
        .map(|(addr, health)| (addr.clone(), health.clone()))
        .collect();
    for addr in previous.keys().filter(|addr| !latest.contains_key(*addr)) {
        changes.insert(
            addr.clone(),
            BackendHealth::new(BackendStatus::CannotConnect).with_error(REMOVED_FROM_LIST),
        );
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::checker::DisabledHealthChecker;
    use crate::health::fetcher::ExternalFetcher;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(HashMap<String, BackendHealth>, Option<String>)>>,
    }

    impl BackendEventReceiver for Recorder {
        fn on_backend_changed(&self, changes: HashMap<String, BackendHealth>, err: Option<String>) {
            self.events.lock().unwrap().push((changes, err));
        }
    }

    fn observer(list: Arc<Mutex<Result<Vec<String>, String>>>) -> BackendObserver {
        let fetcher = ExternalFetcher::new(move || list.lock().unwrap().clone());
        let retries = RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 1,
            attempt_timeout_ms: 100,
        };
        BackendObserver::new(
            Arc::new(fetcher),
            Arc::new(DisabledHealthChecker),
            HealthCheckConfig::default(),
            retries,
        )
    }

    #[test]
    fn test_diff_reports_new_changed_and_vanished() {
        let previous = HashMap::from([
            ("a".to_string(), BackendHealth::healthy()),
            ("b".to_string(), BackendHealth::healthy()),
            ("c".to_string(), BackendHealth::healthy().with_error("ignored")),
        ]);
        let latest = HashMap::from([
            ("b".to_string(), BackendHealth::new(BackendStatus::RunSlow)),
            ("c".to_string(), BackendHealth::healthy()),
            ("d".to_string(), BackendHealth::healthy()),
        ]);
        let changes = diff(&previous, &latest);
        assert_eq!(changes.len(), 3);
        assert_eq!(changes["a"].status, BackendStatus::CannotConnect);
        assert_eq!(changes["a"].ping_error.as_deref(), Some(REMOVED_FROM_LIST));
        assert_eq!(changes["b"].status, BackendStatus::RunSlow);
        assert!(changes.contains_key("d"));
    }

    #[tokio::test]
    async fn test_only_changes_are_pushed() {
        let list = Arc::new(Mutex::new(Ok(vec!["a".to_string()])));
        let mut observer = observer(list.clone());
        let recorder = Recorder::default();

        observer.observe_once(&recorder).await;
        observer.observe_once(&recorder).await;
        assert_eq!(recorder.events.lock().unwrap().len(), 1);

        *list.lock().unwrap() = Ok(vec!["b".to_string()]);
        observer.observe_once(&recorder).await;
        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].0["a"].status, BackendStatus::CannotConnect);
        assert_eq!(events[1].0["b"].status, BackendStatus::Healthy);
    }

    #[tokio::test]
    async fn test_error_reported_once_then_cleared() {
        let list = Arc::new(Mutex::new(Ok(vec!["a".to_string()])));
        let mut observer = observer(list.clone());
        let recorder = Recorder::default();
        observer.observe_once(&recorder).await;

        *list.lock().unwrap() = Err("etcd down".to_string());
        observer.observe_once(&recorder).await;
        observer.observe_once(&recorder).await;
        {
            let events = recorder.events.lock().unwrap();
            assert_eq!(events.len(), 2);
            assert!(events[1].0.is_empty());
            assert!(events[1].1.as_deref().unwrap().contains("etcd down"));
        }

        // Same list as before the outage: nothing changed but the error must clear.
        *list.lock().unwrap() = Ok(vec!["a".to_string()]);
        observer.observe_once(&recorder).await;
        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(events[2].0.is_empty());
        assert_eq!(events[2].1, None);
    }
}
