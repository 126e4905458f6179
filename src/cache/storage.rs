//! Key/value persistence backends for the task cache.

use crate::error::{Result, SyncError};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Durable key/value storage.
///
/// `set` fully replaces the value under `key`; there is no merge.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// All keys in one JSON object on disk, rewritten via temp file + rename.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_guard: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(SyncError::Storage(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                tracing::warn!(
                    "ignoring malformed cache document at {}",
                    self.path.display()
                );
                Ok(Map::new())
            }
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Storage(format!("cannot create cache directory: {e}"))
            })?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(document)?;
        std::fs::write(&tmp_path, json)
            .map_err(|e| SyncError::Storage(format!("cannot write cache temp file: {e}")))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| SyncError::Storage(format!("cannot finalize cache file: {e}")))?;
        Ok(())
    }
}

impl KeyValueStorage for JsonFileStorage {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_document()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut document = self.read_document()?;
        document.insert(key.to_owned(), value);
        self.write_document(&document)
    }
}

/// In-process storage; writes can be made to fail for error-path tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `set` calls fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Storage(format!("write to `{key}` rejected")));
        }
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_owned(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_storage_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = JsonFileStorage::new(dir.path().join("tasks.json"));
        assert_eq!(storage.get("cachedTasks").expect("get"), None);
    }

    #[test]
    fn file_storage_keeps_other_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = JsonFileStorage::new(dir.path().join("nested").join("tasks.json"));

        storage.set("a", json!({"n": 1})).expect("set a");
        storage.set("b", json!([1, 2])).expect("set b");
        storage.set("a", json!({"n": 2})).expect("overwrite a");

        assert_eq!(storage.get("a").expect("get a"), Some(json!({"n": 2})));
        assert_eq!(storage.get("b").expect("get b"), Some(json!([1, 2])));
        assert!(!storage.path().with_extension("tmp").exists());
    }

    #[test]
    fn file_storage_ignores_malformed_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "{not json").expect("write garbage");

        let storage = JsonFileStorage::new(path);
        assert_eq!(storage.get("cachedTasks").expect("get"), None);
        storage.set("cachedTasks", json!(1)).expect("set recovers");
        assert_eq!(storage.get("cachedTasks").expect("get"), Some(json!(1)));
    }

    #[test]
    fn memory_storage_write_failures_are_reported() {
        let storage = MemoryStorage::new();
        storage.set("k", json!(1)).expect("set");
        storage.set_fail_writes(true);
        assert!(matches!(
            storage.set("k", json!(2)),
            Err(SyncError::Storage(_))
        ));
        assert_eq!(storage.get("k").expect("get"), Some(json!(1)));
    }
}
