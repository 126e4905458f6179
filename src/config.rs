//! User-facing settings: connection info, task visibility, link handling.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default poll period for the background timer.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Path appended to the host URL to open the Download Station web app.
const STATION_UI_PATH: &str = "/index.cgi?launchApp=SYNO.SDS.DownloadStation.Application";

/// Top-level settings for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Where the Download Station lives and how to log in.
    pub connection: ConnectionConfig,
    /// Which task categories the popup shows.
    pub visible_tasks: VisibleTaskSettings,
    /// Whether clicks on download-only links are turned into new tasks.
    pub should_handle_download_links: bool,
    /// Seconds between background polls.
    pub poll_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            visible_tasks: VisibleTaskSettings::default(),
            should_handle_download_links: true,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

/// Connection details for the remote Download Station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `http` or `https`.
    pub protocol: String,
    /// Hostname or IP; empty means unconfigured.
    pub hostname: String,
    /// DSM port.
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            protocol: "https".to_owned(),
            hostname: String::new(),
            port: 5001,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl ConnectionConfig {
    /// Base URL of the DSM instance, or `None` when no hostname is set.
    #[must_use]
    pub fn host_url(&self) -> Option<String> {
        let hostname = self.hostname.trim();
        if hostname.is_empty() {
            return None;
        }
        let protocol = match self.protocol.trim() {
            "" => "https",
            p => p,
        };
        Some(format!("{protocol}://{hostname}:{}", self.port))
    }

    /// `true` when a host URL resolves and both credentials are present.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.host_url().is_some() && !self.username.is_empty() && !self.password.is_empty()
    }
}

/// Per-category visibility toggles for the task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibleTaskSettings {
    pub downloading: bool,
    pub uploading: bool,
    pub completed: bool,
    pub errored: bool,
    pub other: bool,
}

impl Default for VisibleTaskSettings {
    fn default() -> Self {
        Self {
            downloading: true,
            uploading: true,
            completed: true,
            errored: true,
            other: true,
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::SyncError::Config(e.to_string()))
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> crate::error::Result<Self> {
        match std::fs::metadata(path) {
            Ok(_) => Self::from_file(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::SyncError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::sync_dirs::config_file()
    }

    /// Poll period, never shorter than one second.
    #[must_use]
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Link that opens the Download Station web app, when configured.
    #[must_use]
    pub fn station_ui_url(&self) -> Option<String> {
        self.connection
            .host_url()
            .map(|host| format!("{host}{STATION_UI_PATH}"))
    }
}
