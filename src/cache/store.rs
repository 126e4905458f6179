//! Persisted task cache with change fan-out.

use crate::cache::state::CachedTasks;
use crate::cache::storage::KeyValueStorage;
use crate::error::Result;
use crate::notify::{ChangeNotifier, Subscription, Unsubscribe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Storage key the snapshot lives under.
pub const CACHED_TASKS_KEY: &str = "cachedTasks";

/// The single persisted [`CachedTasks`] record.
///
/// Writes go to storage first and are published to subscribers only after the
/// storage call succeeded, all under one lock, so every subscriber sees the
/// same order of snapshots and never a snapshot that was not persisted.
///
/// Every [`TaskCache::clear`] starts a new generation. Writers that derived
/// their value from an earlier generation use [`TaskCache::update_within`] so
/// they cannot bring cleared tasks back.
pub struct TaskCache {
    storage: Arc<dyn KeyValueStorage>,
    notifier: ChangeNotifier<CachedTasks>,
    write_lock: Mutex<()>,
    generation: AtomicU64,
}

impl TaskCache {
    /// Load the stored snapshot, or start from the empty record.
    pub fn open(storage: Arc<dyn KeyValueStorage>) -> Self {
        let initial = load_snapshot(storage.as_ref());
        Self {
            storage,
            notifier: ChangeNotifier::new(initial),
            write_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn read(&self) -> CachedTasks {
        self.notifier.current()
    }

    /// Replace the stored snapshot and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Storage`] when persistence fails; the
    /// in-memory snapshot and subscribers are left untouched in that case.
    pub fn write(&self, next: CachedTasks) -> Result<()> {
        let _guard = self.lock_writes();
        self.persist_and_publish(next)
    }

    /// Number of clears so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Derive the next snapshot from the current one and write it, but only
    /// if no clear happened since `generation` was observed.
    ///
    /// Returns `Ok(None)` without touching the cache when the generation has
    /// moved on.
    ///
    /// # Errors
    ///
    /// Same as [`TaskCache::write`].
    pub fn update_within<F>(&self, generation: u64, update: F) -> Result<Option<CachedTasks>>
    where
        F: FnOnce(&CachedTasks) -> CachedTasks,
    {
        let _guard = self.lock_writes();
        if self.generation() != generation {
            debug!(
                expected = generation,
                current = self.generation(),
                "cache cleared since generation was taken; skipping write"
            );
            return Ok(None);
        }
        let next = update(&self.read());
        self.persist_and_publish(next.clone())?;
        Ok(Some(next))
    }

    /// Reset to the empty record and start a new generation.
    ///
    /// # Errors
    ///
    /// Same as [`TaskCache::write`].
    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock_writes();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.persist_and_publish(CachedTasks::empty())
    }

    fn lock_writes(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist_and_publish(&self, next: CachedTasks) -> Result<()> {
        let value = serde_json::to_value(&next)?;
        self.storage.set(CACHED_TASKS_KEY, value)?;
        debug!(
            tasks = next.tasks.len(),
            refreshing = next.is_refreshing(),
            "cached tasks written"
        );
        self.notifier.publish(next);
        Ok(())
    }

    /// Queue-backed subscription; the current snapshot is delivered first.
    pub fn subscribe(&self) -> Subscription<CachedTasks> {
        self.notifier.subscribe()
    }

    /// Callback subscription driven by its own task.
    pub fn subscribe_with<F>(&self, handler: F) -> Unsubscribe
    where
        F: FnMut(CachedTasks) + Send + 'static,
    {
        self.notifier.subscribe_with(handler)
    }
}

fn load_snapshot(storage: &dyn KeyValueStorage) -> CachedTasks {
    let value = match storage.get(CACHED_TASKS_KEY) {
        Ok(Some(value)) => value,
        Ok(None) => return CachedTasks::empty(),
        Err(e) => {
            warn!("cannot load cached tasks, starting empty: {e}");
            return CachedTasks::empty();
        }
    };

    match serde_json::from_value(value) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("ignoring malformed cached tasks: {e}");
            CachedTasks::empty()
        }
    }
}
