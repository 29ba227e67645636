//! Backend discovery and health checking subsystem.
//!
//! # Data Flow
//! ```text
//! fetcher.rs (static list or callback)
//!     → observer.rs (retry, timeout, concurrent checks, diff)
//!         → checker.rs (HTTP status probe or always-healthy)
//!     → router (BackendEventReceiver) receives deltas
//!
//! state.rs: status vocabulary and score penalties shared with the router
//! ```
//!
//! # Design Decisions
//! - Fetching and checking are traits, chosen once at startup
//! - The observer never evicts on error; it reports the error and keeps going

pub mod checker;
pub mod fetcher;
pub mod observer;
pub mod state;

pub use checker::{checker_from_config, DisabledHealthChecker, HealthChecker, HttpHealthChecker};
pub use fetcher::{BackendFetcher, BackendInfo, ExternalFetcher, FetchError, StaticFetcher};
pub use observer::{BackendEventReceiver, BackendObserver};
pub use state::{BackendHealth, BackendStatus};
