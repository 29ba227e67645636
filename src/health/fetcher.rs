//! Backend list sources.
//!
//! # Responsibilities
//! - Produce the current set of backend addresses, with their status ports
//! - Allow the static list to be replaced at runtime (config reload)
//!
//! # Design Decisions
//! - One async trait; the observer does not care where the list comes from
//! - Fetchers do not retry; the observer owns retries and timeouts

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::BackendConfig;

/// What the feed knows about a backend besides its address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendInfo {
    /// Address of the HTTP status endpoint, if the backend exposes one.
    pub status_addr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("fetching backend list timed out after {0:?}")]
    Timeout(Duration),

    #[error("fetching backend list failed: {0}")]
    Source(String),
}

#[async_trait]
pub trait BackendFetcher: Send + Sync {
    async fn get_backend_list(&self) -> Result<HashMap<String, BackendInfo>, FetchError>;
}

/// Backend list taken from the config file.
pub struct StaticFetcher {
    backends: ArcSwap<HashMap<String, BackendInfo>>,
}

impl StaticFetcher {
    pub fn new(backends: &[BackendConfig]) -> Self {
        Self {
            backends: ArcSwap::from_pointee(to_map(backends)),
        }
    }

    /// Replace the list. The next observer round reports the difference.
    pub fn update(&self, backends: &[BackendConfig]) {
        self.backends.store(Arc::new(to_map(backends)));
        tracing::info!(backends = backends.len(), "Static backend list replaced");
    }
}

#[async_trait]
impl BackendFetcher for StaticFetcher {
    async fn get_backend_list(&self) -> Result<HashMap<String, BackendInfo>, FetchError> {
        Ok(self.backends.load().as_ref().clone())
    }
}

fn to_map(backends: &[BackendConfig]) -> HashMap<String, BackendInfo> {
    backends
        .iter()
        .map(|b| {
            (
                b.address.clone(),
                BackendInfo {
                    status_addr: b.status_address.clone(),
                },
            )
        })
        .collect()
}

type ListFn = dyn Fn() -> Result<Vec<String>, String> + Send + Sync;

/// Backend list supplied by the embedding application.
///
/// Backends from a callback have no status port, so they are probed as healthy.
pub struct ExternalFetcher {
    list: Box<ListFn>,
}

impl ExternalFetcher {
    pub fn new<F>(list: F) -> Self
    where
        F: Fn() -> Result<Vec<String>, String> + Send + Sync + 'static,
    {
        Self {
            list: Box::new(list),
        }
    }
}

#[async_trait]
impl BackendFetcher for ExternalFetcher {
    async fn get_backend_list(&self) -> Result<HashMap<String, BackendInfo>, FetchError> {
        let addrs = (self.list)().map_err(FetchError::Source)?;
        Ok(addrs
            .into_iter()
            .map(|addr| (addr, BackendInfo::default()))
            .collect())
    }
}
