//! Score-based routing and connection migration.
//!
//! # Data Flow
//! ```text
//! New connection:
//!     selector.rs next() → registry.rs reserve_best (tentative += 1)
//!     → session connects → finish() → commit or rollback
//!
//! Feed report (health::observer):
//!     score.rs on_backend_changed → registry.rs upsert → remove dead → nudge worker
//!
//! Rebalance worker (score.rs, every interval or on nudge):
//!     rebalance.rs plan (under lock) → conn.redirect(to) (outside lock)
//!     → session reports on_redirect_succeed / on_redirect_fail
//! ```
//!
//! # Design Decisions
//! - One registry lock; everything slow happens outside it
//! - Backends are a small Vec kept sorted by score, re-sorted locally after each change
//! - The registry only holds connection handles; sessions own their state

pub mod backend;
pub mod conn;
pub mod error;
pub mod rebalance;
pub mod registry;
pub mod score;
pub mod selector;

#[cfg(test)]
pub(crate) mod test_util;

pub use conn::{ConnHandle, RedirectableConn, ROUTER_BACKEND_KEY};
pub use error::RouterError;
pub use score::{BackendSnapshot, MigrationCount, MigrationRecord, ScoreBasedRouter};
pub use selector::BackendSelector;
