//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file, so editors that save
//! by writing a temp file and renaming it over the original keep triggering
//! reloads.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::TunnelConfig;

/// Monitors the configuration file and emits every version that loads and validates.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<TunnelConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<TunnelConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Updates stop when the returned watcher is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();
        let mut filter = UpdateFilter::new(&self.path);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if filter.concerns(&event) => match load_config(&path) {
                    Ok(config) => {
                        if filter.is_new(&config) {
                            tracing::info!(path = ?path, "Config file changed, reloading");
                            let _ = tx.send(config);
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                    }
                },
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Drops events for other files and the repeated writes editors emit per save.
struct UpdateFilter {
    file_name: Option<OsString>,
    last: Option<TunnelConfig>,
}

impl UpdateFilter {
    fn new(path: &Path) -> Self {
        Self {
            file_name: path.file_name().map(|name| name.to_os_string()),
            last: None,
        }
    }

    fn concerns(&self, event: &Event) -> bool {
        (event.kind.is_modify() || event.kind.is_create())
            && event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == self.file_name)
    }

    /// True the first time a given config is seen in a row.
    fn is_new(&mut self, config: &TunnelConfig) -> bool {
        if self.last.as_ref() == Some(config) {
            return false;
        }
        self.last = Some(config.clone());
        true
    }
}
