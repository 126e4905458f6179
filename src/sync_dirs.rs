//! Filesystem locations used by the sync engine.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Config | `~/Library/Application Support/station-sync/` | `~/.config/station-sync/` |
//! | Cache | `~/Library/Caches/station-sync/` | `~/.cache/station-sync/` |
//!
//! Both can be overridden for tests or custom deployments:
//! - `STATION_SYNC_CONFIG_DIR` overrides [`config_dir`]
//! - `STATION_SYNC_CACHE_DIR` overrides [`cache_dir`]

use std::path::PathBuf;

const APP_DIR: &str = "station-sync";

/// Directory holding `config.toml`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("STATION_SYNC_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("/tmp/station-sync-config"))
}

/// Directory holding the persisted task snapshot.
#[must_use]
pub fn cache_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("STATION_SYNC_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::cache_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("/tmp/station-sync-cache"))
}

/// Settings file (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Cached task snapshot (`cache_dir()/tasks.json`).
#[must_use]
pub fn tasks_cache_file() -> PathBuf {
    cache_dir().join("tasks.json")
}
