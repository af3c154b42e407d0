//! Observer registry and the change-notification bridge.
//!
//! Signals carry no queue state. Observers re-query the queue manager when
//! notified, so a slow observer can never act on a stale snapshot.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Registry<T> {
    next_id: AtomicU64,
    handlers: Mutex<BTreeMap<u64, Handler<T>>>,
}

/// A set of handlers notified in registration order.
pub struct Observers<T> {
    inner: Arc<Registry<T>>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                handlers: Mutex::new(BTreeMap::new()),
            }),
        }
    }
}

impl<T: Clone + Send + 'static> Observers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        match self.inner.handlers.lock() {
            Ok(mut handlers) => {
                handlers.insert(id, Arc::new(handler));
            }
            Err(_) => {
                warn!("Observer registry lock poisoned; subscription not registered");
                return Subscription { cancel: None };
            }
        }

        let registry: Weak<Registry<T>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    if let Ok(mut handlers) = registry.handlers.lock() {
                        handlers.remove(&id);
                    }
                }
            })),
        }
    }

    /// Call every handler with `value`. Handlers run outside the registry
    /// lock, so they may subscribe or unsubscribe freely.
    pub fn notify(&self, value: T) {
        let handlers: Vec<Handler<T>> = match self.inner.handlers.lock() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(_) => {
                warn!("Observer registry lock poisoned; dropping notification");
                return;
            }
        };
        for handler in handlers {
            handler(value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.inner.handlers.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unsubscribe token. Dropping it also unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// `false` when the handler was never registered.
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// What changed. Observers decide what to re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncSignal {
    /// An entry was added, removed or changed status.
    QueueChanged,
    /// `last_sync_time` moved forward.
    LastSyncChanged,
    /// A drain cycle recorded at least one failure.
    SyncFailed,
}

#[derive(Default)]
pub struct EventBridge {
    observers: Observers<SyncSignal>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(SyncSignal) + Send + Sync + 'static,
    {
        self.observers.subscribe(handler)
    }

    pub fn emit(&self, signal: SyncSignal) {
        debug!(?signal, observers = self.observers.len(), "Sync signal");
        self.observers.notify(signal);
    }
}
