//! Settings source: the persisted [`SyncConfig`] plus its change notifier.

use crate::config::SyncConfig;
use crate::error::Result;
use crate::notify::{ChangeNotifier, Subscription, Unsubscribe};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

/// What an update changed, so callers can decide on follow-up work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsChange {
    pub connection_changed: bool,
    pub link_handling_changed: bool,
}

/// Holds the live settings and persists every update.
pub struct SettingsStore {
    path: Option<PathBuf>,
    notifier: ChangeNotifier<SyncConfig>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Load settings from `path`, using defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = SyncConfig::load_or_default(&path)?;
        info!("settings loaded from {}", path.display());
        Ok(Self {
            path: Some(path),
            notifier: ChangeNotifier::new(config),
            write_lock: Mutex::new(()),
        })
    }

    /// Settings that live only in memory.
    pub fn in_memory(config: SyncConfig) -> Self {
        Self {
            path: None,
            notifier: ChangeNotifier::new(config),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn current(&self) -> SyncConfig {
        self.notifier.current()
    }

    /// Persist `next`, then publish it.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file cannot be written; nothing is
    /// published in that case.
    pub fn update(&self, next: SyncConfig) -> Result<SettingsChange> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let previous = self.notifier.current();
        if let Some(path) = &self.path {
            next.save_to_file(path)?;
        }

        let change = SettingsChange {
            connection_changed: previous.connection != next.connection,
            link_handling_changed: previous.should_handle_download_links
                != next.should_handle_download_links,
        };
        self.notifier.publish(next);
        Ok(change)
    }

    pub fn subscribe(&self) -> Subscription<SyncConfig> {
        self.notifier.subscribe()
    }

    pub fn subscribe_with<F>(&self, handler: F) -> Unsubscribe
    where
        F: FnMut(SyncConfig) + Send + 'static,
    {
        self.notifier.subscribe_with(handler)
    }
}
