//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    /// Connection balancing knobs.
    pub balance: BalanceConfig,

    /// Where the backend list comes from.
    pub discovery: DiscoveryConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Retry configuration for backend list fetches.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Balancing configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BalanceConfig {
    /// Interval between rebalance passes in milliseconds.
    pub rebalance_interval_ms: u64,

    /// Maximum number of connections proposed for migration per pass.
    pub conns_per_loop: usize,

    /// Rebalance while `max_score / (min_score + 1)` is at least this ratio.
    pub max_score_ratio: f64,

    /// A connection whose redirect failed is left alone for this long (ms).
    pub redirect_fail_min_interval_ms: u64,

    /// Below this many connections cluster-wide, healthy backends are not rebalanced.
    /// Draining unhealthy backends is not affected.
    pub min_connections: usize,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            rebalance_interval_ms: 10,
            conns_per_loop: 10,
            max_score_ratio: 1.2,
            redirect_fail_min_interval_ms: 3_000,
            min_connections: 2,
        }
    }
}

impl BalanceConfig {
    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_millis(self.rebalance_interval_ms)
    }

    pub fn redirect_fail_min_interval(&self) -> Duration {
        Duration::from_millis(self.redirect_fail_min_interval_ms)
    }
}

/// Backend list source.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Static backend list.
    pub backends: Vec<BackendConfig>,
}

/// Static backend definition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    /// Address clients are routed to (e.g., "10.0.0.1:4000").
    pub address: String,

    /// Address of the status endpoint probed by health checks (e.g., "10.0.0.1:10080").
    #[serde(default)]
    pub status_address: Option<String>,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks. When disabled every listed backend is healthy.
    pub enabled: bool,

    /// Interval between discovery rounds in milliseconds.
    pub interval_ms: u64,

    /// Per-attempt probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Probe attempts before a backend is declared unreachable.
    pub max_retries: u32,

    /// Pause between probe attempts in milliseconds.
    pub retry_interval_ms: u64,

    /// Path probed on the status address.
    pub status_path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 3_000,
            timeout_ms: 2_000,
            max_retries: 3,
            retry_interval_ms: 1_000,
            status_path: "/status".to_string(),
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of fetch attempts per discovery round.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Per-attempt fetch timeout in milliseconds.
    pub attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            attempt_timeout_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
