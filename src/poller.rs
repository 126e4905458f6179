//! Single-flight fetch and reconcile loop.
//!
//! At most one fetch cycle is in flight at any time. A trigger that arrives
//! while a cycle is running joins that cycle and resolves with its outcome
//! instead of issuing another remote call. Each cycle runs on its own tokio
//! task, so it always completes even if every caller stops waiting.

use crate::cache::state::now_millis;
use crate::cache::store::TaskCache;
use crate::remote::{FetchOutcome, TaskSource};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How one fetch cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The fetch result was reconciled and persisted.
    Completed {
        cycle: u64,
        snapshot: crate::cache::CachedTasks,
    },
    /// The cache could not be written; the next tick retries.
    StorageFailed { cycle: u64, message: String },
    /// The cache was cleared while the fetch ran; its result was dropped.
    Discarded { cycle: u64 },
    /// The cycle's task died before reconciling.
    Aborted { cycle: u64, message: String },
}

impl PollOutcome {
    /// Sequence number of the cycle that produced this outcome.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        match self {
            Self::Completed { cycle, .. }
            | Self::StorageFailed { cycle, .. }
            | Self::Discarded { cycle }
            | Self::Aborted { cycle, .. } => *cycle,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<&crate::cache::CachedTasks> {
        match self {
            Self::Completed { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

type CycleFuture = Shared<BoxFuture<'static, PollOutcome>>;

struct InFlight {
    cycle: u64,
    done: CycleFuture,
}

struct PollerInner {
    cache: Arc<TaskCache>,
    source: Arc<dyn TaskSource>,
    next_cycle: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
}

/// Drives fetch cycles against a [`TaskSource`] into a [`TaskCache`].
#[derive(Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

impl Poller {
    pub fn new(cache: Arc<TaskCache>, source: Arc<dyn TaskSource>) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                cache,
                source,
                next_cycle: AtomicU64::new(1),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Fetch and reconcile, joining the in-flight cycle if there is one.
    ///
    /// The trigger registers when this is called, not when the returned
    /// future is first polled. Must be called from within a tokio runtime.
    pub fn poll(&self) -> impl Future<Output = PollOutcome> + Send + 'static {
        self.join_or_start()
    }

    /// Like [`Poller::poll`], but only resolves with a cycle that started
    /// after this call. An older in-flight cycle is waited out first.
    ///
    /// Used after a mutation so the refresh observes its effect.
    pub async fn poll_fresh(&self) -> PollOutcome {
        let floor = self.inner.next_cycle.load(Ordering::SeqCst);
        loop {
            let outcome = self.join_or_start().await;
            if outcome.cycle() >= floor {
                return outcome;
            }
            debug!(
                joined = outcome.cycle(),
                floor, "joined an older cycle; starting a fresh one"
            );
        }
    }

    /// `true` while a cycle is in flight.
    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.lock_slot().is_some()
    }

    /// Number of cycles started so far.
    #[must_use]
    pub fn cycles_started(&self) -> u64 {
        self.inner.next_cycle.load(Ordering::SeqCst) - 1
    }

    /// Poll every `interval` until `cancel` fires. The first poll runs
    /// immediately.
    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        info!("poller started, interval {}s", interval.as_secs());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("poller stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.poll().await {
                        PollOutcome::Completed { .. } | PollOutcome::Discarded { .. } => {}
                        outcome => {
                            warn!(
                                cycle = outcome.cycle(),
                                "scheduled poll did not complete; retrying next tick"
                            );
                        }
                    }
                }
            }
        }
    }

    fn join_or_start(&self) -> CycleFuture {
        let mut slot = self.lock_slot();
        if let Some(in_flight) = slot.as_ref() {
            debug!(cycle = in_flight.cycle, "joining in-flight fetch");
            return in_flight.done.clone();
        }

        let cycle = self.inner.next_cycle.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        // The slot stays locked until `done` is stored, so the task's own
        // cleanup cannot run before the slot is populated.
        let handle = tokio::spawn(async move {
            let outcome = run_cycle(&inner, cycle).await;
            let mut slot = inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if slot.as_ref().is_some_and(|f| f.cycle == cycle) {
                *slot = None;
            }
            outcome
        });

        let done: CycleFuture = handle
            .map(move |joined| {
                joined.unwrap_or_else(|e| {
                    error!(cycle, "fetch cycle task failed: {e}");
                    PollOutcome::Aborted {
                        cycle,
                        message: e.to_string(),
                    }
                })
            })
            .boxed()
            .shared();

        *slot = Some(InFlight {
            cycle,
            done: done.clone(),
        });
        done
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<InFlight>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

async fn run_cycle(inner: &PollerInner, cycle: u64) -> PollOutcome {
    // Everything this cycle writes is bound to the generation it started in.
    let generation = inner.cache.generation();
    match inner
        .cache
        .update_within(generation, |current| current.begin_fetch(now_millis()))
    {
        Ok(Some(_)) => debug!(cycle, generation, "fetch started"),
        Ok(None) => return PollOutcome::Discarded { cycle },
        Err(e) => {
            error!(cycle, "cannot record fetch start: {e}");
            return PollOutcome::StorageFailed {
                cycle,
                message: e.to_string(),
            };
        }
    }

    let fetched = inner.source.fetch_tasks().await;

    let reconciled = inner.cache.update_within(generation, |current| {
        let now = now_millis();
        match fetched {
            FetchOutcome::Tasks(tasks) => {
                debug!(cycle, count = tasks.len(), "fetch succeeded");
                current.complete_with_tasks(tasks, now)
            }
            FetchOutcome::MissingConfig => {
                debug!(cycle, "fetch skipped: connection not configured");
                current.complete_missing_config(now)
            }
            FetchOutcome::Failed(failure) => {
                warn!(cycle, "task fetch failed: {failure}");
                current.complete_with_failure(failure.message(), now)
            }
        }
    });

    match reconciled {
        Ok(Some(snapshot)) => PollOutcome::Completed { cycle, snapshot },
        Ok(None) => {
            info!(cycle, "task cache was cleared during the fetch; discarding its result");
            PollOutcome::Discarded { cycle }
        }
        Err(e) => {
            error!(cycle, "cannot reconcile fetch result: {e}");
            PollOutcome::StorageFailed {
                cycle,
                message: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::MemoryStorage;
    use crate::remote::{ApiNamespace, RemoteFailure};
    use crate::task::{Task, TaskStatus};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Counts fetches; each fetch waits for `release` when gated.
    struct GatedSource {
        fetches: AtomicUsize,
        gate: Option<Arc<Notify>>,
        outcome: Mutex<FetchOutcome>,
    }

    impl GatedSource {
        fn new(outcome: FetchOutcome) -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                gate: None,
                outcome: Mutex::new(outcome),
            }
        }

        fn gated(outcome: FetchOutcome, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(outcome)
            }
        }

        fn set_outcome(&self, outcome: FetchOutcome) {
            *self.outcome.lock().unwrap() = outcome;
        }
    }

    #[async_trait]
    impl TaskSource for GatedSource {
        async fn fetch_tasks(&self) -> FetchOutcome {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.outcome.lock().unwrap().clone()
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

    fn tasks(n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| Task::new(format!("dbid_{i}"), format!("task {i}"), TaskStatus::Waiting))
            .collect()
    }

    fn setup(
        source: GatedSource,
    ) -> (Poller, Arc<TaskCache>, Arc<GatedSource>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let cache = Arc::new(TaskCache::open(storage.clone()));
        let source = Arc::new(source);
        let poller = Poller::new(Arc::clone(&cache), source.clone());
        (poller, cache, source, storage)
    }

    #[tokio::test]
    async fn successful_poll_reconciles_tasks() {
        let (poller, cache, source, _) = setup(GatedSource::new(FetchOutcome::Tasks(tasks(3))));

        let outcome = poller.poll().await;
        assert!(outcome.is_completed());

        let state = cache.read();
        assert_eq!(state.tasks.len(), 3);
        assert_eq!(state.task_fetch_failure_reason, None);
        assert!(state.tasks_last_completed_fetch_timestamp.is_some());
        assert!(!state.is_refreshing());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn initiated_stamp_is_published_before_completion() {
        let gate = Arc::new(Notify::new());
        let (poller, cache, _, _) = setup(GatedSource::gated(
            FetchOutcome::Tasks(tasks(1)),
            Arc::clone(&gate),
        ));
        let mut sub = cache.subscribe();
        assert_eq!(sub.recv().await, Some(crate::cache::CachedTasks::empty()));

        let pending = tokio::spawn({
            let poller = poller.clone();
            async move { poller.poll().await }
        });

        let refreshing = sub.recv().await.expect("fetch start");
        assert!(refreshing.is_refreshing());
        assert!(refreshing.tasks.is_empty());

        gate.notify_one();
        let done = sub.recv().await.expect("fetch completion");
        assert!(!done.is_refreshing());
        assert_eq!(done.tasks.len(), 1);
        assert!(
            done.tasks_last_initiated_fetch_timestamp <= done.tasks_last_completed_fetch_timestamp
        );
        assert!(pending.await.expect("join").is_completed());
    }

    #[tokio::test]
    async fn concurrent_triggers_share_one_fetch() {
        let gate = Arc::new(Notify::new());
        let (poller, _, source, _) = setup(GatedSource::gated(
            FetchOutcome::Tasks(tasks(2)),
            Arc::clone(&gate),
        ));

        let first = poller.poll();
        let second = poller.poll();
        let third = poller.poll();
        assert!(poller.is_fetching());

        gate.notify_one();
        let (a, b, c) = tokio::join!(first, second, third);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(poller.cycles_started(), 1);
    }

    #[tokio::test]
    async fn poll_fresh_waits_out_older_cycle() {
        let gate = Arc::new(Notify::new());
        let (poller, _, source, _) = setup(GatedSource::gated(
            FetchOutcome::Tasks(tasks(1)),
            Arc::clone(&gate),
        ));

        let stale = tokio::spawn({
            let poller = poller.clone();
            async move { poller.poll().await }
        });
        while source.fetches.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let fresh = tokio::spawn({
            let poller = poller.clone();
            async move { poller.poll_fresh().await }
        });

        gate.notify_one();
        let stale = stale.await.expect("join stale");
        while source.fetches.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
        let fresh = fresh.await.expect("join fresh");

        assert_eq!(stale.cycle(), 1);
        assert_eq!(fresh.cycle(), 2);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_failure_keeps_previous_tasks() {
        let (poller, cache, source, _) = setup(GatedSource::new(FetchOutcome::Tasks(tasks(2))));
        poller.poll().await;

        source.set_outcome(FetchOutcome::Failed(RemoteFailure::api(
            119,
            ApiNamespace::DownloadStationTask,
        )));
        poller.poll().await;

        let state = cache.read();
        assert_eq!(state.tasks, tasks(2));
        assert_eq!(
            state
                .task_fetch_failure_reason
                .as_ref()
                .and_then(|f| f.message()),
            Some("SID not found")
        );
    }

    #[tokio::test]
    async fn missing_config_clears_tasks() {
        let (poller, cache, source, _) = setup(GatedSource::new(FetchOutcome::Tasks(tasks(2))));
        poller.poll().await;

        source.set_outcome(FetchOutcome::MissingConfig);
        poller.poll().await;

        let state = cache.read();
        assert!(state.tasks.is_empty());
        assert!(
            state
                .task_fetch_failure_reason
                .as_ref()
                .is_some_and(|f| f.is_missing_config())
        );
    }

    #[tokio::test]
    async fn storage_failure_is_reported_and_next_poll_recovers() {
        let (poller, cache, source, storage) =
            setup(GatedSource::new(FetchOutcome::Tasks(tasks(1))));

        storage.set_fail_writes(true);
        let outcome = poller.poll().await;
        assert!(matches!(outcome, PollOutcome::StorageFailed { .. }));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
        assert!(!poller.is_fetching());

        storage.set_fail_writes(false);
        assert!(poller.poll().await.is_completed());
        assert_eq!(cache.read().tasks.len(), 1);
    }

    #[tokio::test]
    async fn cycle_started_before_clear_cannot_restore_tasks() {
        let gate = Arc::new(Notify::new());
        let (poller, cache, source, _) = setup(GatedSource::gated(
            FetchOutcome::Tasks(tasks(2)),
            Arc::clone(&gate),
        ));

        let stale = poller.poll();
        while source.fetches.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        cache.clear().expect("clear");

        gate.notify_one();
        let outcome = stale.await;
        assert_eq!(outcome, PollOutcome::Discarded { cycle: 1 });
        assert_eq!(cache.read(), crate::cache::CachedTasks::empty());

        source.set_outcome(FetchOutcome::Failed(RemoteFailure::Transport(
            "new host unreachable".to_owned(),
        )));
        gate.notify_one();
        let next = poller.poll().await;
        let state = next.snapshot().expect("second cycle completes");
        assert!(state.tasks.is_empty());
        assert_eq!(
            state
                .task_fetch_failure_reason
                .as_ref()
                .and_then(|f| f.message()),
            Some("new host unreachable")
        );
    }

    #[tokio::test]
    async fn run_polls_until_cancelled() {
        let (poller, cache, source, _) = setup(GatedSource::new(FetchOutcome::Tasks(tasks(1))));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(Duration::from_millis(10), cancel.clone()));

        tokio::time::timeout(Duration::from_secs(2), async {
            while source.fetches.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("two scheduled polls");

        cancel.cancel();
        handle.await.expect("poller task");
        assert_eq!(cache.read().tasks.len(), 1);
    }
}
