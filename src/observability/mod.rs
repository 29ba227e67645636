//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! router, observer, admin API produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (backend_addr, connection_id, from, to) on every routing event
//! - Metrics are cheap (atomic increments behind the facade)

pub mod logging;
pub mod metrics;
