//! Registry entry for a single backend.
//!
//! # Responsibilities
//! - Hold the connections confirmed on the backend, oldest first
//! - Track reservations and in-flight migrations that count towards the score
//! - Decide when the entry is dead and can be dropped

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use crate::health::state::{BackendHealth, BackendStatus};
use crate::router::conn::ConnHandle;

/// Migration state of one connection, as seen by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectPhase {
    NotRedirected,
    /// A redirect to `to` has been proposed and not yet reported back.
    Redirecting { to: String, since: Instant },
    /// The last redirect failed at `at`.
    RedirectFailed { at: Instant },
}

/// A connection confirmed on a backend.
pub struct ConnEntry {
    pub conn: ConnHandle,
    pub phase: RedirectPhase,
}

impl ConnEntry {
    pub fn new(conn: ConnHandle) -> Self {
        Self {
            conn,
            phase: RedirectPhase::NotRedirected,
        }
    }

    pub fn id(&self) -> u64 {
        self.conn.connection_id()
    }

    pub fn redirecting_to(&self) -> Option<&str> {
        match &self.phase {
            RedirectPhase::Redirecting { to, .. } => Some(to),
            _ => None,
        }
    }

    /// Whether the rebalancer may propose a migration for this connection.
    pub fn is_eligible(&self, now: Instant, fail_interval: Duration) -> bool {
        match &self.phase {
            RedirectPhase::NotRedirected => true,
            RedirectPhase::Redirecting { .. } => false,
            // It failed recently, so it will probably fail again.
            RedirectPhase::RedirectFailed { at } => now.saturating_duration_since(*at) >= fail_interval,
        }
    }
}

impl fmt::Debug for ConnEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnEntry")
            .field("connection_id", &self.id())
            .field("phase", &self.phase)
            .finish()
    }
}

/// A backend known to the router.
#[derive(Debug)]
pub struct BackendEntry {
    addr: String,
    health: BackendHealth,
    /// Keyed by insertion sequence so iteration yields the least recently placed first.
    conns: BTreeMap<u64, ConnEntry>,
    seq_by_id: HashMap<u64, u64>,
    next_seq: u64,
    /// Selections reserved on this backend but not yet finished.
    pub(crate) tentative: usize,
    /// Connections redirecting towards this backend.
    pub(crate) incoming: usize,
    /// Connections on this backend redirecting elsewhere.
    pub(crate) outgoing: usize,
}

impl BackendEntry {
    pub fn new(addr: impl Into<String>, health: BackendHealth) -> Self {
        Self {
            addr: addr.into(),
            health,
            conns: BTreeMap::new(),
            seq_by_id: HashMap::new(),
            next_seq: 0,
            tentative: 0,
            incoming: 0,
            outgoing: 0,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn status(&self) -> BackendStatus {
        self.health.status
    }

    pub fn health(&self) -> &BackendHealth {
        &self.health
    }

    /// Replace the health record, returning the previous status.
    pub fn set_health(&mut self, health: BackendHealth) -> BackendStatus {
        std::mem::replace(&mut self.health, health).status
    }

    /// Lower is better.
    pub fn score(&self) -> i64 {
        self.status().penalty()
            + self.conns.len() as i64
            + self.tentative as i64
            + self.incoming as i64
            - self.outgoing as i64
    }

    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }

    /// An unhealthy backend with nothing on it and nothing heading to it.
    pub fn is_dead(&self) -> bool {
        !self.status().is_healthy()
            && self.conns.is_empty()
            && self.tentative == 0
            && self.incoming == 0
    }

    pub fn contains(&self, conn_id: u64) -> bool {
        self.seq_by_id.contains_key(&conn_id)
    }

    pub fn push_conn(&mut self, entry: ConnEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(old) = self.seq_by_id.insert(entry.id(), seq) {
            self.conns.remove(&old);
        }
        self.conns.insert(seq, entry);
    }

    pub fn remove_conn(&mut self, conn_id: u64) -> Option<ConnEntry> {
        let seq = self.seq_by_id.remove(&conn_id)?;
        self.conns.remove(&seq)
    }

    pub fn conn(&self, conn_id: u64) -> Option<&ConnEntry> {
        self.seq_by_id.get(&conn_id).and_then(|seq| self.conns.get(seq))
    }

    pub fn conn_mut(&mut self, conn_id: u64) -> Option<&mut ConnEntry> {
        let seq = self.seq_by_id.get(&conn_id)?;
        self.conns.get_mut(seq)
    }

    /// Connections in placement order.
    pub fn conns(&self) -> impl Iterator<Item = &ConnEntry> {
        self.conns.values()
    }

    pub fn conns_mut(&mut self) -> impl Iterator<Item = &mut ConnEntry> {
        self.conns.values_mut()
    }

    pub fn redirecting_count(&self) -> usize {
        self.conns
            .values()
            .filter(|c| c.redirecting_to().is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::test_util::TestConn;

    #[test]
    fn test_score_accounts_for_pending_work() {
        let mut backend = BackendEntry::new("b1", BackendHealth::healthy());
        assert_eq!(backend.score(), 0);

        backend.push_conn(ConnEntry::new(TestConn::handle(1)));
        backend.push_conn(ConnEntry::new(TestConn::handle(2)));
        backend.tentative = 1;
        assert_eq!(backend.score(), 3);

        backend.outgoing = 1;
        backend.incoming = 2;
        assert_eq!(backend.score(), 4);

        backend.set_health(BackendHealth::new(BackendStatus::RunSlow));
        assert_eq!(backend.score(), 5_004);
    }

    #[test]
    fn test_conns_keep_placement_order() {
        let mut backend = BackendEntry::new("b1", BackendHealth::healthy());
        for id in [5, 3, 9] {
            backend.push_conn(ConnEntry::new(TestConn::handle(id)));
        }
        assert!(backend.remove_conn(3).is_some());
        assert!(backend.remove_conn(3).is_none());
        backend.push_conn(ConnEntry::new(TestConn::handle(3)));

        let ids: Vec<u64> = backend.conns().map(|c| c.id()).collect();
        assert_eq!(ids, vec![5, 9, 3]);
        assert!(backend.contains(9));
    }

    #[test]
    fn test_dead_only_when_unhealthy_and_empty() {
        let mut backend = BackendEntry::new("b1", BackendHealth::healthy());
        assert!(!backend.is_dead());

        backend.set_health(BackendHealth::new(BackendStatus::CannotConnect));
        assert!(backend.is_dead());

        backend.incoming = 1;
        assert!(!backend.is_dead());
        backend.incoming = 0;

        backend.push_conn(ConnEntry::new(TestConn::handle(1)));
        assert!(!backend.is_dead());
    }

    #[test]
    fn test_failed_redirect_cools_down() {
        let now = Instant::now();
        let mut entry = ConnEntry::new(TestConn::handle(1));
        assert!(entry.is_eligible(now, Duration::from_secs(3)));

        entry.phase = RedirectPhase::Redirecting {
            to: "b2".into(),
            since: now,
        };
        assert!(!entry.is_eligible(now, Duration::ZERO));
        assert_eq!(entry.redirecting_to(), Some("b2"));

        entry.phase = RedirectPhase::RedirectFailed { at: now };
        assert!(!entry.is_eligible(now, Duration::from_secs(3)));
        assert!(entry.is_eligible(now + Duration::from_secs(3), Duration::from_secs(3)));
    }
}
