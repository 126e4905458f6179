//! Wiring of settings, cache, poller, actions and link handling.

use crate::actions::TaskActions;
use crate::cache::storage::{JsonFileStorage, KeyValueStorage};
use crate::cache::store::TaskCache;
use crate::classify::{PopupView, popup_view};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::links::LinkInterceptor;
use crate::poller::{PollOutcome, Poller};
use crate::remote::{SynologyClient, TaskSource};
use crate::settings::{SettingsChange, SettingsStore};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct Timer {
    interval: Duration,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// The running synchronization core.
///
/// Construct inside a tokio runtime; [`SyncEngine::start`] begins background
/// polling and [`SyncEngine::shutdown`] stops it.
pub struct SyncEngine {
    settings: Arc<SettingsStore>,
    cache: Arc<TaskCache>,
    source: Arc<dyn TaskSource>,
    poller: Poller,
    links: LinkInterceptor,
    shutdown: CancellationToken,
    timer: Mutex<Option<Timer>>,
}

impl SyncEngine {
    pub fn new(
        settings: Arc<SettingsStore>,
        storage: Arc<dyn KeyValueStorage>,
        source: Arc<dyn TaskSource>,
    ) -> Self {
        let cache = Arc::new(TaskCache::open(storage));
        let poller = Poller::new(Arc::clone(&cache), Arc::clone(&source));
        let links = LinkInterceptor::new(&settings);
        Self {
            settings,
            cache,
            source,
            poller,
            links,
            shutdown: CancellationToken::new(),
            timer: Mutex::new(None),
        }
    }

    /// Engine backed by the given settings and cache files and the DSM client.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file exists but cannot be parsed.
    pub fn open(config_path: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Result<Self> {
        let settings = Arc::new(SettingsStore::load(config_path)?);
        let storage: Arc<dyn KeyValueStorage> = Arc::new(JsonFileStorage::new(cache_path));
        let source: Arc<dyn TaskSource> = Arc::new(SynologyClient::new(Arc::clone(&settings)));
        Ok(Self::new(settings, storage, source))
    }

    /// [`SyncEngine::open`] on the default platform paths.
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::open`].
    pub fn open_default() -> Result<Self> {
        Self::open(
            crate::sync_dirs::config_file(),
            crate::sync_dirs::tasks_cache_file(),
        )
    }

    /// Start the recurring poll timer. Calling it again restarts the timer.
    pub fn start(&self) {
        let interval = self.settings.current().poll_interval();
        self.restart_timer(interval);
    }

    /// Stop background polling and wait for the timer task to exit. An
    /// in-flight fetch still runs to completion.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let timer = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(timer) = timer {
            if let Err(e) = timer.handle.await {
                warn!("poll timer ended abnormally: {e}");
            }
        }
        info!("sync engine stopped");
    }

    #[must_use]
    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<TaskCache> {
        &self.cache
    }

    #[must_use]
    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    #[must_use]
    pub fn links(&self) -> &LinkInterceptor {
        &self.links
    }

    /// Manual refresh; joins an in-flight fetch if there is one.
    pub async fn refresh(&self) -> PollOutcome {
        self.poller.poll().await
    }

    /// Mutation capability, present only while a host URL is configured.
    #[must_use]
    pub fn actions(&self) -> Option<TaskActions> {
        TaskActions::available(
            &self.settings.current(),
            Arc::clone(&self.source),
            self.poller.clone(),
        )
    }

    /// Reset the cached tasks to the empty record.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be written.
    pub fn clear_cache(&self) -> Result<()> {
        info!("clearing cached tasks");
        self.cache.clear()
    }

    /// Persist new settings. A connection change clears the cache and polls
    /// the new station; a new poll interval restarts the running timer.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings or the cleared cache cannot be written.
    pub async fn update_settings(&self, next: SyncConfig) -> Result<SettingsChange> {
        let previous_interval = self.settings.current().poll_interval();
        let change = self.settings.update(next)?;

        if change.connection_changed {
            self.clear_cache()?;
            let outcome = self.poller.poll_fresh().await;
            if !outcome.is_completed() {
                warn!("poll after reconfiguration did not complete");
            }
        }

        let interval = self.settings.current().poll_interval();
        if interval != previous_interval && self.is_timer_running() {
            self.restart_timer(interval);
        }
        Ok(change)
    }

    /// Render-free popup state for the current snapshot and filters.
    #[must_use]
    pub fn view(&self) -> PopupView {
        popup_view(&self.cache.read(), &self.settings.current().visible_tasks)
    }

    /// Link to the Download Station web UI, when configured.
    #[must_use]
    pub fn station_ui_url(&self) -> Option<String> {
        self.settings.current().station_ui_url()
    }

    fn is_timer_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn restart_timer(&self, interval: Duration) {
        if self.shutdown.is_cancelled() {
            warn!("engine is shut down; not starting poll timer");
            return;
        }
        let mut slot = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.take() {
            old.token.cancel();
        }

        let token = self.shutdown.child_token();
        let handle = tokio::spawn(self.poller.clone().run(interval, token.clone()));
        info!("poll timer running every {}s", interval.as_secs());
        *slot = Some(Timer {
            interval,
            token,
            handle,
        });
    }

    /// Interval of the running timer, if any.
    #[must_use]
    pub fn timer_interval(&self) -> Option<Duration> {
        self.timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|t| t.interval)
    }
}
