//! Station Sync: task cache and synchronization engine for a Download
//! Station companion.
//!
//! The engine mirrors the remote task list into a persisted snapshot and
//! keeps consumers consistent with it under polling, user actions and
//! partial failures.
//!
//! # Architecture
//!
//! - **Cache store**: the persisted [`CachedTasks`] record (`cache`)
//! - **Change notifier**: ordered fan-out of every cache write (`notify`)
//! - **Poller**: single-flight fetch and reconcile, on a timer or on demand
//! - **Classifier**: display categories, filters and popup view states
//! - **Mutation actions**: add/pause/resume/delete followed by a fresh poll
//! - **Host bridge**: newline-delimited JSON commands and events over stdio

pub mod actions;
pub mod cache;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod links;
pub mod notify;
pub mod poller;
pub mod remote;
pub mod settings;
pub mod sync_dirs;
pub mod task;

pub use actions::{ActionOutcome, TaskActions};
pub use cache::{CachedTasks, FetchFailure, TaskCache};
pub use classify::{TaskCategory, classify, is_visible};
pub use config::{SyncConfig, VisibleTaskSettings};
pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use notify::{ChangeNotifier, Subscription, Unsubscribe};
pub use poller::{PollOutcome, Poller};
pub use remote::{FetchOutcome, RemoteFailure, TaskSource};
pub use task::{Task, TaskStatus};
