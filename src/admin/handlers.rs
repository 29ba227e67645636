use axum::{extract::State, Json};
use serde::Serialize;

use super::AdminState;
use crate::router::{BackendSnapshot, MigrationRecord};

#[derive(Debug, Serialize)]
pub struct RouterStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub backends: usize,
    pub connections: usize,
    pub server_version: Option<String>,
    pub discovery_error: Option<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<RouterStatus> {
    let router = &state.router;
    let discovery_error = router.discovery_error();
    Json(RouterStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if discovery_error.is_some() { "degraded" } else { "operational" },
        backends: router.snapshot().len(),
        connections: router.conn_count(),
        server_version: router.server_version(),
        discovery_error,
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendSnapshot>> {
    Json(state.router.snapshot())
}

pub async fn get_migrations(State(state): State<AdminState>) -> Json<Vec<MigrationRecord>> {
    Json(state.router.migrations())
}
