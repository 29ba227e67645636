//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     close() or signal → broadcast → rebalance worker, observer, admin server exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → resolve the wait in main → router.close()
//! ```
//!
//! # Design Decisions
//! - One broadcast per router; every background task subscribes before it is spawned
//! - Shutdown joins the workers, so no registry mutation happens after it returns

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
