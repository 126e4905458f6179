//! Change notification fan-out.
//!
//! A [`ChangeNotifier`] holds the latest published value and a registry of
//! subscribers. Subscribing delivers the current value first, then every
//! later publish in order. Each subscriber owns an unbounded queue, so a slow
//! or panicking consumer never holds up delivery to the others.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct Registry<T> {
    current: T,
    next_id: u64,
    subscribers: Vec<(u64, mpsc::UnboundedSender<T>)>,
}

impl<T> Registry<T> {
    fn remove(&mut self, id: u64) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }
}

/// Publishes successive values of `T` to any number of subscribers.
pub struct ChangeNotifier<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for ChangeNotifier<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: Clone + Send + 'static> ChangeNotifier<T> {
    pub fn new(initial: T) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                current: initial,
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// The most recently published value.
    pub fn current(&self) -> T {
        self.lock().current.clone()
    }

    /// Record `value` as current and queue it for every live subscriber.
    ///
    /// Queueing happens before this returns, so two publishes are seen in the
    /// same order by every subscriber.
    pub fn publish(&self, value: T) {
        let mut registry = self.lock();
        registry.current = value;
        let Registry {
            current,
            subscribers,
            ..
        } = &mut *registry;
        subscribers.retain(|(id, tx)| {
            let alive = tx.send(current.clone()).is_ok();
            if !alive {
                debug!(subscriber = id, "dropping closed subscriber");
            }
            alive
        });
    }

    /// Register a queue-backed subscriber. The current value is already
    /// waiting in the queue when this returns.
    pub fn subscribe(&self) -> Subscription<T> {
        let (rx, handle) = self.register();
        Subscription { rx, handle }
    }

    fn register(&self) -> (mpsc::UnboundedReceiver<T>, Unsubscribe) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        // Receiver is alive on this line, so the send cannot fail.
        let _ = tx.send(registry.current.clone());
        registry.subscribers.push((id, tx));

        (rx, Unsubscribe::new(id, Arc::downgrade(&self.registry)))
    }

    /// Register a callback subscriber driven by its own tokio task.
    ///
    /// The handler runs once immediately with the current value and once per
    /// publish afterwards. A panicking handler is logged and keeps receiving.
    /// Must be called from within a tokio runtime.
    pub fn subscribe_with<F>(&self, mut handler: F) -> Unsubscribe
    where
        F: FnMut(T) + Send + 'static,
    {
        let (mut rx, handle) = self.register();
        let active = Arc::clone(&handle.active);

        tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                if !active.load(Ordering::Acquire) {
                    break;
                }
                if std::panic::catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
                    warn!("change handler panicked; continuing with next update");
                }
            }
        });

        handle
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry<T>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle that stops delivery to one subscriber. Idempotent.
pub struct Unsubscribe {
    id: u64,
    active: Arc<AtomicBool>,
    detach: Box<dyn Fn(u64) + Send + Sync>,
}

impl Unsubscribe {
    fn new<T: Send + 'static>(id: u64, registry: Weak<Mutex<Registry<T>>>) -> Self {
        Self {
            id,
            active: Arc::new(AtomicBool::new(true)),
            detach: Box::new(move |id| {
                if let Some(registry) = registry.upgrade() {
                    registry
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(id);
                }
            }),
        }
    }

    /// Stop further deliveries. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            (self.detach)(self.id);
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Queue-backed subscription. Dropping it unsubscribes.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    handle: Unsubscribe,
}

impl<T> Subscription<T> {
    /// Wait for the next value; `None` once unsubscribed or the notifier is gone.
    pub async fn recv(&mut self) -> Option<T> {
        if !self.handle.is_active() {
            return None;
        }
        self.rx.recv().await
    }

    /// Next queued value without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        if !self.handle.is_active() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(&mut self) {
        self.handle.unsubscribe();
        self.rx.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}
