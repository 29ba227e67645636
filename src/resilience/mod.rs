//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! Backend list fetch (health::observer):
//!     → attempt under a per-attempt timeout
//!     → On failure: backoff.rs (exponential delay with jitter), retry up to max_attempts
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every discovery call has a deadline
//! - Jitter keeps several routers from hammering the source in lockstep

pub mod backoff;

pub use backoff::retry_delay;
