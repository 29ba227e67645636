//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::RouterConfig;

/// Watches the config file and emits every valid, changed configuration.
pub struct ConfigWatcher {
    path: PathBuf,
    current: RouterConfig,
}

impl ConfigWatcher {
    /// `current` is the config already applied; reloads equal to it are dropped.
    pub fn new(path: &Path, current: RouterConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            current,
        }
    }

    /// Start watching. The returned watcher must be kept alive for updates to flow.
    pub fn run(
        self,
    ) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<RouterConfig>), notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let path = self.path.clone();
        let file_name = path.file_name().map(|n| n.to_os_string());
        let last = Mutex::new(self.current);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "Config watch error");
                        return;
                    }
                };
                if !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }
                // Editors often replace the file, so the parent directory is watched.
                let touches_file = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if !touches_file {
                    return;
                }
                match load_config(&path) {
                    Ok(config) => {
                        let mut last = match last.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        if *last == config {
                            return;
                        }
                        tracing::info!(path = ?path, "Config file change detected, applying");
                        *last = config.clone();
                        let _ = tx.send(config);
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "Failed to reload config. Keeping current configuration."
                        );
                    }
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok((watcher, rx))
    }
}
