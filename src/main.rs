//! Backend router daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   config file ──▶ loader ──▶ RouterConfig ──┬──▶ StaticFetcher ──┐
//!        │                                     │                   ▼
//!        └── watcher (hot reload) ─────────────┤            BackendObserver
//!                                              │          (fetch, check, diff)
//!                                              │                   │ deltas
//!                                              ▼                   ▼
//!                                      ScoreBasedRouter ◀──────────┘
//!                                  (registry, selector, rebalance)
//!                                              │
//!                           admin API ◀────────┴────────▶ metrics / logs
//! ```
//!
//! Sessions embedding the library use `ScoreBasedRouter` directly; the daemon
//! runs discovery, rebalancing and the admin surface around it.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use backend_router::admin::serve_admin;
use backend_router::config::loader::load_config;
use backend_router::config::watcher::ConfigWatcher;
use backend_router::health::{checker_from_config, BackendObserver, StaticFetcher};
use backend_router::lifecycle::{signals::shutdown_signal, Shutdown};
use backend_router::observability::{logging::init_logging, metrics::init_metrics};
use backend_router::router::ScoreBasedRouter;

#[derive(Parser)]
#[command(name = "backend-router")]
#[command(about = "Score-based backend router with live connection migration", long_about = None)]
struct Args {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "router.toml")]
    config: PathBuf,

    /// Override `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = load_config(&args.config)?;
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }
    init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        backends = config.discovery.backends.len(),
        health_check = config.health_check.enabled,
        "backend-router starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let router = ScoreBasedRouter::new(config.balance.clone());
    let fetcher = Arc::new(StaticFetcher::new(&config.discovery.backends));
    let checker = checker_from_config(&config.health_check)?;
    let observer = BackendObserver::new(
        fetcher.clone(),
        checker,
        config.health_check.clone(),
        config.retries.clone(),
    );
    router.start(Some(observer))?;

    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();
    if config.admin.enabled {
        let admin_config = config.admin.clone();
        let admin_router = router.clone();
        let admin_shutdown = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serve_admin(&admin_config, admin_router, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }));
    }

    let _watcher = match ConfigWatcher::new(&args.config, config.clone()).run() {
        Ok((watcher, mut updates)) => {
            let router = router.clone();
            let fetcher = fetcher.clone();
            let applied = config.clone();
            tokio::spawn(async move {
                let mut applied = applied;
                while let Some(next) = updates.recv().await {
                    fetcher.update(&next.discovery.backends);
                    router.update_config(next.balance.clone());
                    if next.health_check != applied.health_check
                        || next.retries != applied.retries
                        || next.observability != applied.observability
                        || next.admin != applied.admin
                    {
                        tracing::warn!("Only discovery and balance changes apply without a restart");
                    }
                    tracing::info!(backends = next.discovery.backends.len(), "Configuration reloaded");
                    applied = next;
                }
            });
            Some(watcher)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Config hot reload disabled");
            None
        }
    };

    shutdown_signal().await;
    tracing::info!("Shutting down");
    shutdown.trigger();
    router.close().await;
    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
