//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use backend_router::config::BalanceConfig;
use backend_router::health::{BackendHealth, BackendStatus};
use backend_router::router::{RedirectableConn, ScoreBasedRouter};

#[derive(Debug, Default)]
struct MockConnState {
    from: String,
    to: String,
    status: Option<BackendStatus>,
    kv: HashMap<&'static str, String>,
}

/// Session double that records what the router asks of it.
#[derive(Debug, Default)]
pub struct MockConn {
    id: u64,
    state: Mutex<MockConnState>,
    /// Proposals received while a previous one was still pending.
    pub double_proposals: AtomicUsize,
}

impl MockConn {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            ..Default::default()
        })
    }

    pub fn set_from(&self, addr: &str) {
        self.state.lock().unwrap().from = addr.to_string();
    }

    /// `(from, to)`; `to` is empty when not redirecting.
    pub fn addrs(&self) -> (String, String) {
        let state = self.state.lock().unwrap();
        (state.from.clone(), state.to.clone())
    }

    pub fn status(&self) -> Option<BackendStatus> {
        self.state.lock().unwrap().status
    }

    pub fn redirect_succeed(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(!state.to.is_empty());
        state.from = std::mem::take(&mut state.to);
    }

    pub fn redirect_fail(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(!state.to.is_empty());
        state.to.clear();
    }
}

impl RedirectableConn for MockConn {
    fn connection_id(&self) -> u64 {
        self.id
    }

    fn is_redirectable(&self) -> bool {
        true
    }

    fn redirect(&self, addr: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.to.is_empty() {
            self.double_proposals.fetch_add(1, Ordering::SeqCst);
            return false;
        }
        state.to = addr.to_string();
        true
    }

    fn redirecting_addr(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        (!state.to.is_empty()).then(|| state.to.clone())
    }

    fn notify_backend_status(&self, status: BackendStatus) {
        self.state.lock().unwrap().status = Some(status);
    }

    fn set_value(&self, key: &'static str, value: String) {
        self.state.lock().unwrap().kv.insert(key, value);
    }

    fn value(&self, key: &'static str) -> Option<String> {
        self.state.lock().unwrap().kv.get(key).cloned()
    }
}

/// Drives a router through backend, connection and redirect events.
pub struct RouterTester {
    pub router: ScoreBasedRouter,
    pub conns: HashMap<u64, Arc<MockConn>>,
    next_conn_id: u64,
    next_backend_id: usize,
}

impl RouterTester {
    pub fn new() -> Self {
        Self::with_config(BalanceConfig::default())
    }

    pub fn with_config(config: BalanceConfig) -> Self {
        Self {
            router: ScoreBasedRouter::new(config),
            conns: HashMap::new(),
            next_conn_id: 0,
            next_backend_id: 0,
        }
    }

    pub fn create_conn(&mut self) -> Arc<MockConn> {
        self.next_conn_id += 1;
        MockConn::new(self.next_conn_id)
    }

    /// Add `num` new healthy backends; returns their addresses.
    pub fn add_backends(&mut self, num: usize) -> Vec<String> {
        let mut changes = HashMap::new();
        for _ in 0..num {
            self.next_backend_id += 1;
            changes.insert(self.next_backend_id.to_string(), BackendHealth::healthy());
        }
        let addrs = changes.keys().cloned().collect();
        self.router.on_backend_changed(changes, None);
        self.check_backend_order();
        addrs
    }

    /// Mark `num` backends that are not yet CannotConnect as CannotConnect.
    pub fn kill_backends(&mut self, num: usize) -> Vec<String> {
        let victims: Vec<String> = self
            .router
            .snapshot()
            .into_iter()
            .filter(|b| b.status != BackendStatus::CannotConnect)
            .take(num)
            .map(|b| b.addr)
            .collect();
        let changes = victims
            .iter()
            .map(|addr| (addr.clone(), BackendHealth::new(BackendStatus::CannotConnect)))
            .collect();
        self.router.on_backend_changed(changes, None);
        self.check_backend_order();
        victims
    }

    pub fn update_backend_status(&mut self, addr: &str, status: BackendStatus) {
        self.router
            .on_backend_changed(HashMap::from([(addr.to_string(), BackendHealth::new(status))]), None);
        self.check_backend_order();
    }

    /// Select and connect once; returns the chosen address.
    pub fn simple_route(&self, conn: &Arc<MockConn>) -> Option<String> {
        let mut selector = self.router.backend_selector();
        let addr = selector.next().expect("discovery is healthy in tests");
        if addr.is_some() {
            selector.finish(Some(conn.clone()), true);
        }
        addr
    }

    pub fn add_connections(&mut self, num: usize) {
        for _ in 0..num {
            let conn = self.create_conn();
            let addr = self.simple_route(&conn).expect("a backend is available");
            conn.set_from(&addr);
            self.conns.insert(conn.connection_id(), conn);
        }
        self.check_backend_order();
    }

    pub fn close_connections(&mut self, num: usize, redirecting: bool) {
        let victims: Vec<Arc<MockConn>> = self
            .conns
            .values()
            .filter(|c| c.redirecting_addr().is_some() == redirecting)
            .take(num)
            .cloned()
            .collect();
        for conn in victims {
            let (from, _) = conn.addrs();
            self.router.on_conn_closed(&from, &*conn).unwrap();
            self.conns.remove(&conn.connection_id());
        }
        self.check_backend_order();
    }

    pub fn rebalance(&mut self, quota: usize) -> usize {
        let moved = self.router.rebalance(quota);
        self.check_backend_order();
        moved
    }

    pub fn redirect_finish(&mut self, num: usize, succeed: bool) {
        let pending: Vec<Arc<MockConn>> = self
            .conns
            .values()
            .filter(|c| c.redirecting_addr().is_some())
            .take(num)
            .cloned()
            .collect();
        for conn in pending {
            let (from, to) = conn.addrs();
            let before = self.router.migration_count(&from, &to);
            if succeed {
                self.router.on_redirect_succeed(&from, &to, &*conn).unwrap();
                conn.redirect_succeed();
            } else {
                self.router.on_redirect_fail(&from, &to, &*conn).unwrap();
                conn.redirect_fail();
            }
            let after = self.router.migration_count(&from, &to);
            if succeed {
                assert_eq!(after.succeeded, before.succeeded + 1);
            } else {
                assert_eq!(after.failed, before.failed + 1);
            }
        }
        self.check_backend_order();
    }

    /// Scores ascend, and no unhealthy backend lingers with nothing on it.
    pub fn check_backend_order(&self) {
        let snapshot = self.router.snapshot();
        for pair in snapshot.windows(2) {
            assert!(pair[0].score <= pair[1].score, "backends out of order: {:?}", snapshot);
        }
        for b in &snapshot {
            if b.status != BackendStatus::Healthy {
                assert!(
                    b.connections > 0 || b.tentative > 0 || b.incoming > 0,
                    "dead backend {} was kept",
                    b.addr
                );
            }
        }
    }

    pub fn check_balanced(&self, max_ratio: f64) {
        let snapshot = self.router.snapshot();
        assert!(snapshot.iter().all(|b| b.status == BackendStatus::Healthy));
        let max = snapshot.iter().map(|b| b.score).max().unwrap_or(0);
        let min = snapshot.iter().map(|b| b.score).min().unwrap_or(0);
        let ratio = max as f64 / (min as f64 + 1.0);
        assert!(ratio <= max_ratio, "unbalanced: {:?}", snapshot);
    }

    pub fn redirecting_num(&self) -> usize {
        self.conns
            .values()
            .filter(|c| c.redirecting_addr().is_some())
            .count()
    }

    pub fn backend_num(&self) -> usize {
        self.router.snapshot().len()
    }

    /// Drop every connection and backend, keeping the id counters.
    pub fn clear(&mut self) {
        let conns: Vec<Arc<MockConn>> = self.conns.drain().map(|(_, c)| c).collect();
        for conn in conns {
            let (from, _) = conn.addrs();
            let _ = self.router.on_conn_closed(&from, &*conn);
        }
        let changes = self
            .router
            .snapshot()
            .into_iter()
            .map(|b| (b.addr, BackendHealth::new(BackendStatus::CannotConnect)))
            .collect();
        self.router.on_backend_changed(changes, None);
        assert_eq!(self.backend_num(), 0, "backends survived clear");
    }
}

/// Poll `f` until it returns true or `timeout` expires.
pub async fn eventually<F>(timeout: Duration, mut f: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if f() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Start a programmable HTTP backend on an ephemeral port.
///
/// `f` decides the status code and body of every response.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        // Consume the request head before answering.
                        let mut buf = vec![0u8; 4096];
                        let mut read = 0;
                        while read < buf.len() {
                            match socket.read(&mut buf[read..]).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => read += n,
                            }
                            if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}
