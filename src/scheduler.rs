//! Background drain loop.
//!
//! Drains are triggered by a fixed timer, by a settled
//! offline-to-online transition, by `enqueue` while online, and by an
//! explicit [`SchedulerHandle::trigger`]. A timer tick that finds the
//! monitor offline asks the health endpoint first and only drains once the
//! server answers. An optional probe loop feeds the same answer into the
//! network monitor on its own schedule.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::Subscription;
use crate::queue::OfflineQueue;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub sync_interval: Duration,
    /// `None` disables the health probe; connectivity then comes only from
    /// sync outcomes and whatever the host feeds the monitor.
    pub probe_interval: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            probe_interval: Some(DEFAULT_PROBE_INTERVAL),
        }
    }
}

/// Owns the background tasks. Dropping the handle stops them.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    trigger: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
    _network: Subscription,
}

pub struct SyncScheduler;

impl SyncScheduler {
    /// Spawn the drain loop (and the probe loop if configured). Must be
    /// called from inside a tokio runtime.
    pub fn start(queue: OfflineQueue, options: SchedulerOptions) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let trigger = queue.drain_requests();

        let network = {
            let trigger = trigger.clone();
            queue.network().on_change(move |online| {
                if online {
                    trigger.notify_one();
                }
            })
        };

        let mut tasks = vec![tokio::spawn(drain_loop(
            queue.clone(),
            options.sync_interval,
            trigger.clone(),
            cancel.clone(),
        ))];
        if let Some(every) = options.probe_interval {
            tasks.push(tokio::spawn(probe_loop(queue.clone(), every, cancel.clone())));
        }
        // Work left over from a previous session goes out right away.
        if queue.status() {
            trigger.notify_one();
        }

        info!(
            interval_secs = options.sync_interval.as_secs(),
            probe = options.probe_interval.is_some(),
            "Sync scheduler started"
        );
        SchedulerHandle {
            cancel,
            trigger,
            tasks,
            _network: network,
        }
    }
}

impl SchedulerHandle {
    /// Request a drain as soon as the loop is free.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the loops and wait for them. A drain already in progress runs
    /// to completion in its own task.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("Sync scheduler stopped");
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drain_loop(
    queue: OfflineQueue,
    every: Duration,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
) {
    let remote = queue.remote();
    // First tick one period out; startup drains come from `start`.
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = trigger.notified() => {
                debug!("Drain requested");
                queue.drain().await;
            }
            _ = ticker.tick() => {
                // A cached offline state is re-checked here, otherwise a
                // missed reconnect event would park the queue for good.
                if !queue.status() {
                    let reachable = tokio::select! {
                        _ = cancel.cancelled() => break,
                        reachable = remote.health_check() => reachable,
                    };
                    queue.network().observe(reachable);
                    if !reachable {
                        debug!("Still offline; skipping scheduled drain");
                        continue;
                    }
                    info!("Sync server reachable again");
                }
                queue.drain().await;
            }
        }
    }
    debug!("Drain loop exited");
}

async fn probe_loop(queue: OfflineQueue, every: Duration, cancel: CancellationToken) {
    let remote = queue.remote();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let healthy = tokio::select! {
                    _ = cancel.cancelled() => break,
                    healthy = remote.health_check() => healthy,
                };
                queue.network().observe(healthy);
            }
        }
    }
    debug!("Probe loop exited");
}
