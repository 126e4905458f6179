//! Persisted task snapshot: record shape, storage backends and the store.

pub mod state;
pub mod storage;
pub mod store;

pub use state::{CachedTasks, FetchFailure, now_millis};
pub use storage::{JsonFileStorage, KeyValueStorage, MemoryStorage};
pub use store::{CACHED_TASKS_KEY, TaskCache};
