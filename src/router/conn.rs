//! Connection capability consumed by the router.
//!
//! The session layer owns every connection; the router only keeps handles
//! to them and asks them to move.

use std::sync::Arc;

use crate::health::state::BackendStatus;

/// Side-channel key under which the router records the connection's current backend.
pub const ROUTER_BACKEND_KEY: &str = "router.backend_addr";

/// A client connection that can be migrated between backends.
pub trait RedirectableConn: Send + Sync {
    /// Unique id of the connection.
    fn connection_id(&self) -> u64;

    /// Whether the session is currently in a state that allows migration
    /// (e.g. not inside a transaction).
    fn is_redirectable(&self) -> bool;

    /// Ask the session to migrate to `addr`. Must not block; returns false
    /// when the session declines.
    fn redirect(&self, addr: &str) -> bool;

    /// Target of an ongoing migration, if any.
    fn redirecting_addr(&self) -> Option<String>;

    /// Called whenever the health of the connection's backend changes.
    /// Must not call back into the router.
    fn notify_backend_status(&self, status: BackendStatus);

    fn set_value(&self, key: &'static str, value: String);

    fn value(&self, key: &'static str) -> Option<String>;
}

/// Shared handle to a connection.
pub type ConnHandle = Arc<dyn RedirectableConn>;
