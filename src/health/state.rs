//! Backend health verdicts and their score penalties.
//!
//! # States
//! - Healthy: backend receives traffic at no penalty
//! - MemoryHigh / RunSlow: soft-degraded, drained first among the unhealthy ones
//! - CannotConnect / ServerDown / SchemaOutdated: broken, drained last
//!
//! Only Healthy backends receive new or migrated connections.
//!
//! # Design Decisions
//! - A verdict never disconnects sessions by itself; it only moves the backend in the ranking
//! - Broken statuses share one penalty, so load breaks ties between them

use serde::Serialize;
use std::fmt;

/// Penalty added to the score of a soft-degraded backend.
pub const DEGRADED_PENALTY: i64 = 5_000;
/// Penalty added to the score of a broken backend.
pub const BROKEN_PENALTY: i64 = 10_000_000;

/// Health verdict reported by the backend feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Healthy,
    CannotConnect,
    ServerDown,
    MemoryHigh,
    RunSlow,
    SchemaOutdated,
}

impl BackendStatus {
    /// Score contribution of this status.
    pub fn penalty(self) -> i64 {
        match self {
            BackendStatus::Healthy => 0,
            BackendStatus::MemoryHigh | BackendStatus::RunSlow => DEGRADED_PENALTY,
            BackendStatus::CannotConnect
            | BackendStatus::ServerDown
            | BackendStatus::SchemaOutdated => BROKEN_PENALTY,
        }
    }

    /// Only healthy backends take new or migrated connections.
    pub fn is_healthy(self) -> bool {
        self == BackendStatus::Healthy
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendStatus::Healthy => "healthy",
            BackendStatus::CannotConnect => "cannot connect",
            BackendStatus::ServerDown => "server down",
            BackendStatus::MemoryHigh => "memory high",
            BackendStatus::RunSlow => "run slow",
            BackendStatus::SchemaOutdated => "schema outdated",
        }
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a feed delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendHealth {
    pub status: BackendStatus,
    /// Version string the backend reports to clients during handshake.
    pub server_version: Option<String>,
    /// Why the last probe failed, kept for logging.
    pub ping_error: Option<String>,
}

impl BackendHealth {
    pub fn new(status: BackendStatus) -> Self {
        Self {
            status,
            server_version: None,
            ping_error: None,
        }
    }

    pub fn healthy() -> Self {
        Self::new(BackendStatus::Healthy)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = Some(version.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.ping_error = Some(error.into());
        self
    }

    /// Compare the parts that matter to the router; the ping error is informational.
    pub fn same_as(&self, other: &BackendHealth) -> bool {
        self.status == other.status && self.server_version == other.server_version
    }
}

impl fmt::Display for BackendHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status: {}", self.status)?;
        if let Some(err) = &self.ping_error {
            write!(f, ", err: {}", err)?;
        }
        Ok(())
    }
}
