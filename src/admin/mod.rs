//! Read-only admin API.
//!
//! # Endpoints
//! - `GET /admin/status`: router summary
//! - `GET /admin/backends`: backends in score order
//! - `GET /admin/migrations`: migration outcomes per backend pair
//!
//! Every endpoint requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::AdminConfig;
use crate::router::ScoreBasedRouter;

use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub router: ScoreBasedRouter,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends))
        .route("/admin/migrations", get(get_migrations))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API until shutdown is signalled.
pub async fn serve_admin(
    config: &AdminConfig,
    router: ScoreBasedRouter,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(&config.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");

    let app = setup_admin_router(AdminState {
        router,
        api_key: Arc::from(config.api_key.as_str()),
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
