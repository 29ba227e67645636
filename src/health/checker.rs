//! Health verdicts for listed backends.
//!
//! # Responsibilities
//! - Probe the HTTP status port of a backend
//! - Classify the outcome into a `BackendStatus`
//! - Read the server version from the status body when present
//!
//! # Design Decisions
//! - Connection errors mean CannotConnect, any non-2xx answer means ServerDown
//! - Probes are retried a few times before a backend is declared unreachable
//! - A backend without a status port is assumed healthy

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::HealthCheckConfig;
use crate::health::fetcher::BackendInfo;
use crate::health::state::{BackendHealth, BackendStatus};

#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check_health(&self, addr: &str, info: &BackendInfo) -> BackendHealth;
}

/// Reports every listed backend as healthy.
#[derive(Debug, Default)]
pub struct DisabledHealthChecker;

#[async_trait]
impl HealthChecker for DisabledHealthChecker {
    async fn check_health(&self, _addr: &str, _info: &BackendInfo) -> BackendHealth {
        BackendHealth::healthy()
    }
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    version: Option<String>,
}

/// Probes `http://{status_addr}{status_path}`.
pub struct HttpHealthChecker {
    client: reqwest::Client,
    config: HealthCheckConfig,
}

impl HttpHealthChecker {
    pub fn new(config: HealthCheckConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent("backend-router-health-check")
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn check_health(&self, addr: &str, info: &BackendInfo) -> BackendHealth {
        let Some(status_addr) = &info.status_addr else {
            return BackendHealth::healthy();
        };
        let url = format!("http://{}{}", status_addr, self.config.status_path);

        let mut verdict = BackendHealth::new(BackendStatus::CannotConnect);
        for attempt in 0..self.config.max_retries.max(1) {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_interval()).await;
            }
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let version = response
                        .json::<StatusBody>()
                        .await
                        .ok()
                        .and_then(|body| body.version);
                    let health = BackendHealth::healthy();
                    return match version {
                        Some(version) => health.with_version(version),
                        None => health,
                    };
                }
                Ok(response) => {
                    verdict = BackendHealth::new(BackendStatus::ServerDown)
                        .with_error(format!("status port returned {}", response.status()));
                }
                Err(e) => {
                    verdict = BackendHealth::new(BackendStatus::CannotConnect).with_error(e.to_string());
                }
            }
            tracing::debug!(backend_addr = %addr, attempt, health = %verdict, "Health check attempt failed");
        }
        verdict
    }
}

/// Pick the checker the config asks for.
pub fn checker_from_config(config: &HealthCheckConfig) -> Result<Arc<dyn HealthChecker>, reqwest::Error> {
    if config.enabled {
        Ok(Arc::new(HttpHealthChecker::new(config.clone())?))
    } else {
        tracing::info!("Active health checks disabled");
        Ok(Arc::new(DisabledHealthChecker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_checker_is_always_healthy() {
        let health = DisabledHealthChecker
            .check_health("127.0.0.1:1", &BackendInfo::default())
            .await;
        assert_eq!(health.status, BackendStatus::Healthy);
    }

    #[tokio::test]
    async fn test_missing_status_addr_is_healthy() {
        let checker = HttpHealthChecker::new(HealthCheckConfig::default()).unwrap();
        let health = checker
            .check_health("127.0.0.1:4000", &BackendInfo { status_addr: None })
            .await;
        assert_eq!(health, BackendHealth::healthy());
    }

    #[tokio::test]
    async fn test_refused_connection_cannot_connect() {
        // Bind and drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = HealthCheckConfig {
            max_retries: 2,
            retry_interval_ms: 10,
            timeout_ms: 200,
            ..Default::default()
        };
        let checker = HttpHealthChecker::new(config).unwrap();
        let health = checker
            .check_health("backend", &BackendInfo { status_addr: Some(addr) })
            .await;
        assert_eq!(health.status, BackendStatus::CannotConnect);
        assert!(health.ping_error.is_some());
    }
}
