use crate::config::EngineConfig;
use crate::config_loader::ConfigLoader;
use anyhow::Result;
use notify::{Event, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Reloads the engine configuration when its file changes.
pub struct ConfigWatcher {
    tx: watch::Sender<EngineConfig>,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Creates a new configuration watcher with an initial configuration.
    ///
    /// Returns a tuple of the watcher and a receiver for configuration updates.
    #[must_use]
    pub fn new(
        initial_config: EngineConfig,
        path: impl Into<PathBuf>,
    ) -> (Self, watch::Receiver<EngineConfig>) {
        let (tx, rx) = watch::channel(initial_config);
        (
            Self {
                tx,
                path: path.into(),
            },
            rx,
        )
    }

    /// Watches the configuration file for changes and broadcasts updates.
    ///
    /// Invalid edits are logged and ignored; the previous configuration stays live.
    ///
    /// # Errors
    ///
    /// Returns an error if file watching cannot be initiated or if the watcher task fails.
    pub async fn watch(&self) -> Result<()> {
        let tx = self.tx.clone();
        let config_path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = notify::recommended_watcher(move |res: Result<Event, _>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            })?;

            watcher.watch(Path::new(&config_path), RecursiveMode::NonRecursive)?;

            for event in notify_rx {
                if event.kind.is_modify() {
                    tracing::info!(path = %config_path.display(), "Config file changed, reloading");
                    match ConfigLoader::load(&config_path) {
                        Ok(new_config) => {
                            if *tx.borrow() != new_config {
                                let _ = tx.send(new_config);
                                tracing::info!("Config reloaded successfully");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping previous");
                        }
                    }
                }
            }

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}
