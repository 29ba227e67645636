//! Score-based backend router.
//!
//! Keeps a health-aware ranking of interchangeable backend nodes, assigns new
//! connections to the best one, and migrates live connections between backends
//! to drain unhealthy nodes and absorb new ones.

pub mod admin;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod router;

pub use config::RouterConfig;
pub use health::{BackendHealth, BackendObserver, BackendStatus};
pub use lifecycle::Shutdown;
pub use router::{BackendSelector, RedirectableConn, RouterError, ScoreBasedRouter};
