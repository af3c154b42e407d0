//! Connectivity state with debounced change notification.
//!
//! Raw observations (platform events, the health probe, sync outcomes) land
//! in [`NetworkMonitor::observe`]. `status()` always reflects the latest
//! observation. Subscribers are only told about a transition once the state
//! has stayed put for the debounce window, so a link flapping inside the
//! window produces no duplicate "back online" / "went offline" callbacks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::events::{Observers, Subscription};

/// Default quiet period before a connectivity change is announced.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

struct MonitorInner {
    observed: AtomicBool,
    /// Last state announced to subscribers.
    settled: Mutex<bool>,
    generation: AtomicU64,
    debounce: Duration,
    observers: Observers<bool>,
}

impl MonitorInner {
    fn settle(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let current = self.observed.load(Ordering::SeqCst);
        let changed = match self.settled.lock() {
            Ok(mut settled) if *settled != current => {
                *settled = current;
                true
            }
            Ok(_) => false,
            Err(_) => {
                warn!("Network monitor state lock poisoned");
                false
            }
        };
        if changed {
            if current {
                info!("Network restored");
            } else {
                info!("Network offline");
            }
            self.observers.notify(current);
        }
    }
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl NetworkMonitor {
    /// Starts out online: with no signal yet, assume the network works and
    /// let the first failed sync say otherwise.
    pub fn new(debounce: Duration) -> Self {
        Self::with_initial(true, debounce)
    }

    pub fn with_initial(online: bool, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                observed: AtomicBool::new(online),
                settled: Mutex::new(online),
                generation: AtomicU64::new(0),
                debounce,
                observers: Observers::new(),
            }),
        }
    }

    pub fn status(&self) -> bool {
        self.inner.observed.load(Ordering::SeqCst)
    }

    /// Register for settled transitions; the handler receives the new state.
    pub fn on_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(handler)
    }

    /// Feed one raw connectivity observation.
    pub fn observe(&self, online: bool) {
        let previous = self.inner.observed.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }
        debug!(online, "Connectivity observation changed");

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if self.inner.debounce.is_zero() {
            self.inner.settle(generation);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = self.inner.clone();
                let debounce = self.inner.debounce;
                handle.spawn(async move {
                    tokio::time::sleep(debounce).await;
                    inner.settle(generation);
                });
            }
            // No runtime to time the window with: announce immediately.
            Err(_) => self.inner.settle(generation),
        }
    }

    /// A sync attempt could not reach the server.
    pub fn record_unreachable(&self, reason: &str) {
        if self.status() {
            warn!(reason, "Sync server unreachable; marking network offline");
        }
        self.observe(false);
    }

    /// A sync attempt got an answer from the server.
    pub fn record_reachable(&self) {
        self.observe(true);
    }
}
