//! Minimal connection double for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::health::state::BackendStatus;
use crate::router::conn::{ConnHandle, RedirectableConn};

#[derive(Debug, Default)]
pub struct TestConn {
    id: u64,
    pub declines: AtomicBool,
    pub target: Mutex<Option<String>>,
    pub status: Mutex<Option<BackendStatus>>,
    kv: Mutex<HashMap<&'static str, String>>,
}

impl TestConn {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            ..Default::default()
        })
    }

    pub fn handle(id: u64) -> ConnHandle {
        Self::new(id)
    }
}

impl RedirectableConn for TestConn {
    fn connection_id(&self) -> u64 {
        self.id
    }

    fn is_redirectable(&self) -> bool {
        true
    }

    fn redirect(&self, addr: &str) -> bool {
        if self.declines.load(Ordering::SeqCst) {
            return false;
        }
        *self.target.lock().unwrap() = Some(addr.to_string());
        true
    }

    fn redirecting_addr(&self) -> Option<String> {
        self.target.lock().unwrap().clone()
    }

    fn notify_backend_status(&self, status: BackendStatus) {
        *self.status.lock().unwrap() = Some(status);
    }

    fn set_value(&self, key: &'static str, value: String) {
        self.kv.lock().unwrap().insert(key, value);
    }

    fn value(&self, key: &'static str) -> Option<String> {
        self.kv.lock().unwrap().get(key).cloned()
    }
}
