//! Metrics collection and exposition.
//!
//! # Metrics
//! - `router_backend_connections` (gauge): connections confirmed per backend
//! - `router_backend_score` (gauge): current score per backend
//! - `router_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `router_migrations_total` (counter): finished redirects by source, target and result
//! - `router_redirects_proposed_total` (counter): redirects proposed by the rebalancer
//! - `router_feed_errors_total` (counter): discovery rounds that ended in error
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed recorder it is a no-op
//! - Prometheus exporter is opt-in via config

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint. Needs a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn set_backend_connections(backend: &str, count: usize) {
    gauge!("router_backend_connections", "backend" => backend.to_string()).set(count as f64);
}

pub fn set_backend_score(backend: &str, score: i64) {
    gauge!("router_backend_score", "backend" => backend.to_string()).set(score as f64);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("router_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_migration(from: &str, to: &str, succeeded: bool) {
    counter!(
        "router_migrations_total",
        "from" => from.to_string(),
        "to" => to.to_string(),
        "result" => if succeeded { "success" } else { "fail" }
    )
    .increment(1);
}

pub fn record_redirects_proposed(count: usize) {
    counter!("router_redirects_proposed_total").increment(count as u64);
}

pub fn record_feed_error() {
    counter!("router_feed_errors_total").increment(1);
}
