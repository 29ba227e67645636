//! Backend registry sorted by score.
//!
//! # Responsibilities
//! - Keep every known backend, ascending by score
//! - Apply feed deltas, reservations, commits and membership moves
//! - Drop unhealthy backends once nothing is left on them
//!
//! # Design Decisions
//! - Pure data: no locking, logging or I/O here; the router owns the lock
//! - Every score change is followed by `adjust` on that one backend, so the
//!   list is out of order by at most one element when bubbling starts
//! - Contract violations are rejected before anything is mutated

use std::collections::HashMap;
use std::time::Instant;

use crate::health::state::{BackendHealth, BackendStatus};
use crate::router::backend::{BackendEntry, ConnEntry, RedirectPhase};
use crate::router::conn::{ConnHandle, RedirectableConn, ROUTER_BACKEND_KEY};
use crate::router::error::RouterError;

/// Result of restoring the order after a score change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjusted {
    Kept,
    Removed,
    Missing,
}

/// A health change applied by `upsert`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub addr: String,
    pub prev: Option<BackendStatus>,
    pub cur: BackendStatus,
    /// Connections notified of the new status.
    pub notified: usize,
    pub removed: bool,
}

/// The authoritative set of backends.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: Vec<BackendEntry>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Backends in ascending score order.
    pub fn backends(&self) -> &[BackendEntry] {
        &self.backends
    }

    pub fn position(&self, addr: &str) -> Option<usize> {
        self.backends.iter().position(|b| b.addr() == addr)
    }

    pub fn get(&self, addr: &str) -> Option<&BackendEntry> {
        self.backends.iter().find(|b| b.addr() == addr)
    }

    pub fn total_conns(&self) -> usize {
        self.backends.iter().map(|b| b.conn_count()).sum()
    }

    pub fn total_tentative(&self) -> usize {
        self.backends.iter().map(|b| b.tentative).sum()
    }

    pub fn is_sorted(&self) -> bool {
        self.backends.windows(2).all(|w| w[0].score() <= w[1].score())
    }

    /// Merge a feed delta. Backends not named in `changes` are left alone.
    pub fn upsert(&mut self, changes: &HashMap<String, BackendHealth>) -> Vec<Transition> {
        let mut transitions = Vec::with_capacity(changes.len());
        for (addr, health) in changes {
            match self.position(addr) {
                Some(idx) => {
                    let backend = &mut self.backends[idx];
                    let prev = backend.set_health(health.clone());
                    let mut notified = 0;
                    if prev != health.status {
                        for entry in backend.conns() {
                            entry.conn.notify_backend_status(health.status);
                            notified += 1;
                        }
                    }
                    let removed = self.adjust(addr) == Adjusted::Removed;
                    transitions.push(Transition {
                        addr: addr.clone(),
                        prev: Some(prev),
                        cur: health.status,
                        notified,
                        removed,
                    });
                }
                // An unseen backend that is already unhealthy would be dead on arrival.
                None if health.status.is_healthy() => {
                    self.backends.push(BackendEntry::new(addr.clone(), health.clone()));
                    self.adjust(addr);
                    transitions.push(Transition {
                        addr: addr.clone(),
                        prev: None,
                        cur: health.status,
                        notified: 0,
                        removed: false,
                    });
                }
                None => {}
            }
        }
        transitions
    }

    /// Restore the order after the score of `addr` changed, dropping it if dead.
    pub fn adjust(&mut self, addr: &str) -> Adjusted {
        let Some(mut idx) = self.position(addr) else {
            return Adjusted::Missing;
        };
        if self.backends[idx].is_dead() {
            self.backends.remove(idx);
            return Adjusted::Removed;
        }
        let score = self.backends[idx].score();
        while idx > 0 && self.backends[idx - 1].score() > score {
            self.backends.swap(idx - 1, idx);
            idx -= 1;
        }
        while idx + 1 < self.backends.len() && self.backends[idx + 1].score() < score {
            self.backends.swap(idx, idx + 1);
            idx += 1;
        }
        Adjusted::Kept
    }

    /// Sweep all dead backends, returning their addresses.
    pub fn remove_if_dead(&mut self) -> Vec<String> {
        let mut removed = Vec::new();
        self.backends.retain(|b| {
            if b.is_dead() {
                removed.push(b.addr().to_string());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Reserve a slot on the lowest-score healthy backend not in `excluded`.
    pub fn reserve_best(&mut self, excluded: &[String]) -> Option<String> {
        let addr = self
            .backends
            .iter()
            .find(|b| b.status().is_healthy() && !excluded.iter().any(|ex| ex == b.addr()))
            .map(|b| b.addr().to_string())?;
        if let Some(idx) = self.position(&addr) {
            self.backends[idx].tentative += 1;
        }
        self.adjust(&addr);
        Some(addr)
    }

    /// Turn a reservation into confirmed membership.
    pub fn commit(&mut self, addr: &str, conn: ConnHandle) -> Result<usize, RouterError> {
        let idx = self.position(addr).ok_or_else(|| RouterError::BackendNotFound {
            addr: addr.to_string(),
        })?;
        let backend = &mut self.backends[idx];
        backend.tentative = backend.tentative.saturating_sub(1);
        conn.notify_backend_status(backend.status());
        conn.set_value(ROUTER_BACKEND_KEY, addr.to_string());
        backend.push_conn(ConnEntry::new(conn));
        let count = backend.conn_count();
        self.adjust(addr);
        Ok(count)
    }

    /// Drop a reservation without placing anything.
    pub fn rollback(&mut self, addr: &str) -> Adjusted {
        match self.position(addr) {
            Some(idx) => {
                let backend = &mut self.backends[idx];
                backend.tentative = backend.tentative.saturating_sub(1);
                self.adjust(addr)
            }
            None => Adjusted::Missing,
        }
    }

    /// Mark a connection as redirecting from `from` to `to` and move the load accounting.
    pub fn begin_redirect(
        &mut self,
        from: &str,
        conn_id: u64,
        to: &str,
        now: Instant,
    ) -> Option<ConnHandle> {
        self.position(to)?;
        let from_idx = self.position(from)?;
        let entry = self.backends[from_idx].conn_mut(conn_id)?;
        if entry.redirecting_to().is_some() {
            return None;
        }
        entry.phase = RedirectPhase::Redirecting {
            to: to.to_string(),
            since: now,
        };
        let conn = entry.conn.clone();
        self.backends[from_idx].outgoing += 1;
        self.adjust(from);
        // `adjust` may have moved entries around.
        if let Some(to_idx) = self.position(to) {
            self.backends[to_idx].incoming += 1;
            self.adjust(to);
        }
        Some(conn)
    }

    /// Undo `begin_redirect` for a proposal the connection declined.
    /// Returns false when the connection is no longer redirecting there.
    pub fn cancel_redirect(&mut self, from: &str, conn_id: u64, to: &str) -> bool {
        if self.check_redirecting(from, to, conn_id).is_err() {
            return false;
        }
        if let Some(idx) = self.position(from) {
            let backend = &mut self.backends[idx];
            if let Some(entry) = backend.conn_mut(conn_id) {
                entry.phase = RedirectPhase::NotRedirected;
            }
            backend.outgoing = backend.outgoing.saturating_sub(1);
            self.adjust(from);
        }
        self.release_incoming(to);
        true
    }

    /// Apply the reported outcome of a redirect.
    ///
    /// Returns the backend counts `(from, to)` after the change.
    pub fn finish_redirect(
        &mut self,
        from: &str,
        to: &str,
        conn_id: u64,
        succeed: bool,
        now: Instant,
    ) -> Result<(usize, usize), RouterError> {
        self.check_redirecting(from, to, conn_id)?;
        let from_idx = self.position(from).ok_or_else(|| RouterError::BackendNotFound {
            addr: from.to_string(),
        })?;
        let backend = &mut self.backends[from_idx];
        backend.outgoing = backend.outgoing.saturating_sub(1);
        let moved = if succeed {
            backend.remove_conn(conn_id)
        } else {
            if let Some(entry) = backend.conn_mut(conn_id) {
                entry.phase = RedirectPhase::RedirectFailed { at: now };
            }
            None
        };
        self.adjust(from);

        if let Some(mut entry) = moved {
            if let Some(idx) = self.position(to) {
                let target = &mut self.backends[idx];
                target.incoming = target.incoming.saturating_sub(1);
                entry.phase = RedirectPhase::NotRedirected;
                entry.conn.notify_backend_status(target.status());
                entry.conn.set_value(ROUTER_BACKEND_KEY, to.to_string());
                target.push_conn(entry);
                self.adjust(to);
            }
        } else {
            self.release_incoming(to);
        }
        Ok((self.conn_count(from), self.conn_count(to)))
    }

    /// Remove a closed connection, undoing any migration it was part of.
    pub fn close_conn(&mut self, addr: &str, conn_id: u64) -> Result<ConnEntry, RouterError> {
        let idx = self.position(addr).ok_or_else(|| RouterError::BackendNotFound {
            addr: addr.to_string(),
        })?;
        let backend = &mut self.backends[idx];
        let entry = backend
            .remove_conn(conn_id)
            .ok_or_else(|| RouterError::ConnNotFound {
                addr: addr.to_string(),
                conn_id,
            })?;
        let target = entry.redirecting_to().map(str::to_string);
        if target.is_some() {
            backend.outgoing = backend.outgoing.saturating_sub(1);
        }
        self.adjust(addr);
        if let Some(to) = target {
            self.release_incoming(&to);
        }
        Ok(entry)
    }

    pub fn conn_count(&self, addr: &str) -> usize {
        self.get(addr).map(|b| b.conn_count()).unwrap_or(0)
    }

    fn check_redirecting(&self, from: &str, to: &str, conn_id: u64) -> Result<(), RouterError> {
        let not_redirecting = || RouterError::NotRedirecting {
            from: from.to_string(),
            to: to.to_string(),
            conn_id,
        };
        let backend = self.get(from).ok_or_else(not_redirecting)?;
        let entry = backend.conn(conn_id).ok_or_else(not_redirecting)?;
        match entry.redirecting_to() {
            Some(target) if target == to => Ok(()),
            _ => Err(not_redirecting()),
        }
    }

    fn release_incoming(&mut self, to: &str) {
        if let Some(idx) = self.position(to) {
            let target = &mut self.backends[idx];
            target.incoming = target.incoming.saturating_sub(1);
            self.adjust(to);
        }
    }
}
