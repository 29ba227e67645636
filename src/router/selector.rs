//! Per-routing-decision cursor over the registry.

use crate::router::conn::ConnHandle;
use crate::router::error::RouterError;
use crate::router::score::ScoreBasedRouter;

/// Picks a backend for one new connection.
///
/// Each `next()` reserves a slot on the best healthy backend that this
/// selector has not returned yet in the current round, so retries after a
/// failed connect land somewhere else. An address that was not settled with
/// `finish()` is released by the following `next()` or when the selector is dropped.
pub struct BackendSelector {
    router: ScoreBasedRouter,
    excluded: Vec<String>,
    cur: Option<String>,
}

impl BackendSelector {
    pub(crate) fn new(router: ScoreBasedRouter) -> Self {
        Self {
            router,
            excluded: Vec::new(),
            cur: None,
        }
    }

    /// Reserve the next backend.
    ///
    /// `Ok(None)` means no healthy backend is left in this round.
    /// `Err(RouterError::Discovery)` means the same, while the feed is also failing.
    pub fn next(&mut self) -> Result<Option<String>, RouterError> {
        if let Some(pending) = self.cur.take() {
            self.router.release_reservation(&pending);
        }
        let addr = self.router.route_once(&self.excluded)?;
        if let Some(addr) = &addr {
            self.excluded.push(addr.clone());
            self.cur = Some(addr.clone());
        }
        Ok(addr)
    }

    /// Settle the last reservation.
    ///
    /// On success the connection joins the backend; otherwise the reservation is dropped.
    pub fn finish(&mut self, conn: Option<ConnHandle>, succeed: bool) {
        if let Some(addr) = self.cur.take() {
            self.router.on_create_conn(&addr, conn, succeed);
        }
    }

    /// Start a new round: every backend may be returned again.
    pub fn reset(&mut self) {
        self.excluded.clear();
    }
}

impl Drop for BackendSelector {
    fn drop(&mut self) {
        if let Some(pending) = self.cur.take() {
            self.router.release_reservation(&pending);
        }
    }
}
