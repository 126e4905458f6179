//! Cache and settings survive an engine restart.

use async_trait::async_trait;
use station_sync::cache::{CACHED_TASKS_KEY, JsonFileStorage};
use station_sync::settings::SettingsStore;
use station_sync::{
    FetchOutcome, RemoteFailure, SyncConfig, SyncEngine, Task, TaskSource, TaskStatus,
};
use std::sync::Arc;

struct FixedSource(Vec<Task>);

#[async_trait]
impl TaskSource for FixedSource {
    async fn fetch_tasks(&self) -> FetchOutcome {
        FetchOutcome::Tasks(self.0.clone())
    }

    async fn pause_task(&self, _id: &str) -> Result<(), RemoteFailure> {
        Ok(())
    }

    async fn resume_task(&self, _id: &str) -> Result<(), RemoteFailure> {
        Ok(())
    }

    async fn delete_task(&self, _id: &str) -> Result<(), RemoteFailure> {
        Ok(())
    }

    async fn create_tasks(
        &self,
        _urls: &[String],
        _destination: Option<&str>,
    ) -> Result<(), RemoteFailure> {
        Ok(())
    }
}

fn configured() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.connection.hostname = "nas.local".to_owned();
    config.connection.username = "admin".to_owned();
    config.connection.password = "secret".to_owned();
    config
}

#[tokio::test]
async fn snapshot_is_restored_after_restart() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config_path = dir.path().join("config.toml");
    let cache_path = dir.path().join("cache").join("tasks.json");

    let settings = Arc::new(SettingsStore::load(&config_path).expect("load settings"));
    let engine = SyncEngine::new(
        settings,
        Arc::new(JsonFileStorage::new(&cache_path)),
        Arc::new(FixedSource(vec![
            Task::new("dbid_1", "alpha", TaskStatus::Seeding),
            Task::new("dbid_2", "beta", TaskStatus::Paused),
        ])),
    );
    engine
        .update_settings(configured())
        .await
        .expect("save settings");
    let before = engine.cache().read();
    assert_eq!(before.tasks.len(), 2);
    drop(engine);

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&cache_path).expect("cache file")).expect("json");
    assert!(raw[CACHED_TASKS_KEY]["tasks"].is_array());
    assert!(!cache_path.with_extension("tmp").exists());

    let restored = SyncEngine::open(&config_path, &cache_path).expect("reopen");
    assert_eq!(restored.cache().read(), before);
    assert_eq!(restored.settings().current(), configured());
}

#[tokio::test]
async fn corrupt_cache_file_starts_empty() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cache_path = dir.path().join("tasks.json");
    std::fs::write(&cache_path, b"{ this is not json").expect("write garbage");

    let engine = SyncEngine::open(dir.path().join("config.toml"), &cache_path).expect("open");
    let cached = engine.cache().read();
    assert!(cached.tasks.is_empty());
    assert_eq!(cached.tasks_last_completed_fetch_timestamp, None);
}

#[tokio::test]
async fn unparseable_settings_file_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, "poll_interval_secs = \"soon\"").expect("write config");

    let result = SyncEngine::open(&config_path, dir.path().join("tasks.json"));
    assert!(result.is_err());
}
