//! Router error taxonomy.

use thiserror::Error;

/// Errors surfaced by the router.
///
/// "No backend available" is not an error: the selector reports it as `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The last feed report carried an error; routing data may be stale.
    #[error("backend discovery failed: {0}")]
    Discovery(String),

    #[error("backend {addr} not found")]
    BackendNotFound { addr: String },

    #[error("connection {conn_id} not found on backend {addr}")]
    ConnNotFound { addr: String, conn_id: u64 },

    #[error("connection {conn_id} is not redirecting from {from} to {to}")]
    NotRedirecting {
        from: String,
        to: String,
        conn_id: u64,
    },

    #[error("router already started")]
    AlreadyStarted,
}
