//! Offline queue manager: the only component the rest of the POS talks to.
//!
//! `enqueue` writes the entry durably and returns a provisional id without
//! touching the network. `drain` replays queued entries one at a time, in
//! the order the cashier performed them, and deletes each only after its
//! `SYNCED` status has been committed. A drain runs inside its own task so a
//! caller that stops waiting never cuts an entry off mid-attempt.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, error, info, warn};

use crate::api::RemoteApi;
use crate::driver::{SyncDriver, SyncOutcome};
use crate::error::{QueueError, StoreError};
use crate::events::{EventBridge, Subscription, SyncSignal};
use crate::model::{
    DrainSummary, FailureClass, MetadataPatch, QueuedTransaction, SyncMetadata, SyncStatus,
    TransactionKind,
};
use crate::network::NetworkMonitor;
use crate::retry::RetryPolicy;
use crate::store::{QueueStore, Removal};

#[derive(Default)]
struct DrainState {
    cycles: u64,
    last: DrainSummary,
}

struct QueueInner {
    store: QueueStore,
    driver: SyncDriver,
    network: NetworkMonitor,
    events: EventBridge,
    retry: RetryPolicy,
    drain_lock: AsyncMutex<DrainState>,
    drain_requested: Arc<Notify>,
}

/// Handle to the queue manager. Clones share the same queue.
#[derive(Clone)]
pub struct OfflineQueue {
    inner: Arc<QueueInner>,
}

impl OfflineQueue {
    /// Build the manager over an opened store. Entries left `SYNCING` or
    /// `SYNCED` by a previous process are recovered first.
    pub fn new(
        store: QueueStore,
        remote: Arc<dyn RemoteApi>,
        network: NetworkMonitor,
        retry: RetryPolicy,
    ) -> Result<Self, QueueError> {
        store.recover_interrupted()?;
        Ok(Self {
            inner: Arc::new(QueueInner {
                store,
                driver: SyncDriver::new(remote),
                network,
                events: EventBridge::new(),
                retry,
                drain_lock: AsyncMutex::new(DrainState::default()),
                drain_requested: Arc::new(Notify::new()),
            }),
        })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Queue one user action. Returns the provisional id once the entry is
    /// on disk; an `Err` means nothing was queued.
    pub fn enqueue(&self, kind: TransactionKind, payload: Value) -> Result<String, QueueError> {
        let tx = QueuedTransaction::new(kind, payload);
        self.inner.store.put(&tx).map_err(|e| {
            error!(kind = kind.as_str(), error = %e, "Failed to queue transaction");
            QueueError::Enqueue(e)
        })?;

        info!(
            local_id = %tx.local_id,
            kind = kind.as_str(),
            operation = kind.operation(),
            "Transaction queued"
        );
        self.inner.events.emit(SyncSignal::QueueChanged);

        if self.inner.network.status() {
            self.request_drain();
        }
        Ok(tx.local_id)
    }

    /// Replay eligible entries. A call made while another drain is running
    /// waits for that drain and returns its summary.
    pub async fn drain(&self) -> DrainSummary {
        let inner = self.inner.clone();
        match tokio::spawn(async move { inner.drain_exclusive().await }).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "Drain task aborted");
                DrainSummary {
                    remaining: self.inner.store.pending_count().unwrap_or(0),
                    ..DrainSummary::default()
                }
            }
        }
    }

    /// User-initiated "sync now".
    pub async fn sync_now(&self) -> DrainSummary {
        info!("Manual sync requested");
        self.drain().await
    }

    /// Make every `FAILED` entry eligible again and drain.
    pub async fn retry_failed(&self) -> DrainSummary {
        match self.inner.store.reset_failed() {
            Ok(reset) => {
                info!(reset, "Failed queue entries reset for retry");
                if reset > 0 {
                    self.inner.events.emit(SyncSignal::QueueChanged);
                }
            }
            Err(e) => {
                error!(error = %e, "Could not reset failed queue entries");
                self.inner.events.emit(SyncSignal::SyncFailed);
            }
        }
        self.drain().await
    }

    /// Drop a queued entry a human has decided not to resubmit.
    pub fn discard(&self, local_id: &str) -> Result<(), QueueError> {
        let entry = match self.inner.store.remove_if_idle(local_id)? {
            Removal::Removed(entry) => entry,
            Removal::InFlight => return Err(QueueError::InFlight(local_id.to_string())),
            Removal::Missing => return Err(QueueError::NotFound(local_id.to_string())),
        };
        warn!(
            local_id,
            kind = entry.kind.as_str(),
            last_error = entry.last_error.as_deref(),
            "Queued transaction discarded"
        );
        self.inner.events.emit(SyncSignal::QueueChanged);
        Ok(())
    }

    /// Ask the background scheduler for a drain. Requests coalesce.
    pub fn request_drain(&self) {
        self.inner.drain_requested.notify_one();
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current connectivity as seen by the network monitor.
    pub fn status(&self) -> bool {
        self.inner.network.status()
    }

    pub fn pending_count(&self) -> Result<usize, QueueError> {
        Ok(self.inner.store.pending_count()?)
    }

    pub fn last_sync_time(&self) -> Result<Option<chrono::DateTime<Utc>>, QueueError> {
        Ok(self.inner.store.get_metadata()?.last_sync_time)
    }

    pub fn metadata(&self) -> Result<SyncMetadata, QueueError> {
        Ok(self.inner.store.get_metadata()?)
    }

    /// Every entry still in the store, in insertion order.
    pub fn entries(&self) -> Result<Vec<QueuedTransaction>, QueueError> {
        Ok(self.inner.store.get_all()?)
    }

    /// Entries that need attention, with their `last_error`.
    pub fn failed_entries(&self) -> Result<Vec<QueuedTransaction>, QueueError> {
        Ok(self
            .inner
            .store
            .get_all()?
            .into_iter()
            .filter(|t| t.status == SyncStatus::Failed)
            .collect())
    }

    /// Register for change signals; re-query on each call.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(SyncSignal) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    pub(crate) fn remote(&self) -> Arc<dyn RemoteApi> {
        self.inner.driver.remote().clone()
    }

    pub(crate) fn drain_requests(&self) -> Arc<Notify> {
        self.inner.drain_requested.clone()
    }
}

impl QueueInner {
    async fn drain_exclusive(&self) -> DrainSummary {
        let mut state = match self.drain_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Drain already running; waiting for its result");
                let state = self.drain_lock.lock().await;
                return state.last;
            }
        };

        let summary = self.run_cycle().await;
        state.cycles += 1;
        state.last = summary;
        debug!(cycle = state.cycles, ?summary, "Drain cycle finished");
        summary
    }

    fn remaining(&self) -> usize {
        self.store.pending_count().unwrap_or_else(|e| {
            error!(error = %e, "Could not count pending queue entries");
            0
        })
    }

    async fn run_cycle(&self) -> DrainSummary {
        let started = Utc::now();
        let snapshot = match self.store.get_all() {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "Could not load offline queue");
                self.events.emit(SyncSignal::SyncFailed);
                return DrainSummary {
                    remaining: self.remaining(),
                    ..DrainSummary::default()
                };
            }
        };

        let mut eligible: Vec<QueuedTransaction> = snapshot
            .into_iter()
            .filter(|t| t.is_eligible(started, self.retry.max_attempts))
            .collect();
        // Stable: entries sharing a timestamp keep insertion order.
        eligible.sort_by_key(|t| t.created_at);

        if eligible.is_empty() {
            return DrainSummary {
                remaining: self.remaining(),
                ..DrainSummary::default()
            };
        }
        info!(eligible = eligible.len(), "Draining offline queue");

        let mut succeeded = 0usize;
        let mut failed = 0usize;

        for mut tx in eligible {
            match self.sync_one(&mut tx).await {
                Ok(EntryResult::Skipped) => continue,
                Ok(EntryResult::Synced) => succeeded += 1,
                Ok(EntryResult::Failed { halt }) => {
                    failed += 1;
                    if halt {
                        warn!(
                            local_id = %tx.local_id,
                            "Connectivity lost; leaving the rest of the queue for the next cycle"
                        );
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        local_id = %tx.local_id,
                        error = %e,
                        "Queue store write failed mid-drain; stopping cycle"
                    );
                    failed += 1;
                    self.events.emit(SyncSignal::QueueChanged);
                    break;
                }
            }
            self.events.emit(SyncSignal::QueueChanged);
        }

        if succeeded > 0 {
            let patch = MetadataPatch {
                last_sync_time: Some(Utc::now()),
            };
            match self.store.set_metadata(&patch) {
                Ok(()) => self.events.emit(SyncSignal::LastSyncChanged),
                Err(e) => error!(error = %e, "Could not record last sync time"),
            }
        }
        if failed > 0 {
            self.events.emit(SyncSignal::SyncFailed);
        }

        let summary = DrainSummary {
            succeeded,
            failed,
            remaining: self.remaining(),
        };
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            remaining = summary.remaining,
            "Offline queue drain complete"
        );
        summary
    }

    fn write_status(&self, tx: &QueuedTransaction) -> Result<(), StoreError> {
        if !self.store.update(tx)? {
            warn!(
                local_id = %tx.local_id,
                status = tx.status.as_str(),
                "Queue entry vanished while syncing"
            );
        }
        Ok(())
    }

    /// `SYNCING` → attempt → `SYNCED`+removed or `FAILED`. Each transition
    /// is committed before the next step.
    async fn sync_one(&self, tx: &mut QueuedTransaction) -> Result<EntryResult, StoreError> {
        // The snapshot may be stale: a discarded entry must stay discarded.
        if !self.store.claim(&tx.local_id)? {
            debug!(local_id = %tx.local_id, "Queue entry changed since snapshot; skipping");
            return Ok(EntryResult::Skipped);
        }
        tx.status = SyncStatus::Syncing;

        match self.driver.attempt(tx).await {
            SyncOutcome::Success(result) => {
                self.network.record_reachable();
                tx.status = SyncStatus::Synced;
                tx.last_error = None;
                tx.failure = None;
                tx.next_retry_at = None;
                self.write_status(tx)?;
                self.store.remove(&tx.local_id)?;
                let server_id = result.get("_id").and_then(serde_json::Value::as_str);
                info!(
                    local_id = %tx.local_id,
                    kind = tx.kind.as_str(),
                    server_id,
                    "Queued transaction synced"
                );
                Ok(EntryResult::Synced)
            }
            SyncOutcome::RetryableFailure { reason, network } => {
                if network {
                    self.network.record_unreachable(&reason);
                } else {
                    self.network.record_reachable();
                }

                tx.attempts += 1;
                tx.status = SyncStatus::Failed;
                tx.failure = Some(FailureClass::Retryable);
                tx.next_retry_at = Some(self.retry.next_retry_at(
                    tx.attempts,
                    &tx.local_id,
                    Utc::now(),
                ));
                tx.last_error = Some(reason);
                self.write_status(tx)?;

                if self.retry.is_exhausted(tx.attempts) {
                    warn!(
                        local_id = %tx.local_id,
                        attempts = tx.attempts,
                        "Automatic retries exhausted; waiting for manual retry"
                    );
                }
                Ok(EntryResult::Failed {
                    halt: !self.network.status(),
                })
            }
            SyncOutcome::PermanentFailure(reason) => {
                self.network.record_reachable();
                tx.attempts += 1;
                tx.status = SyncStatus::Failed;
                tx.failure = Some(FailureClass::Permanent);
                tx.next_retry_at = None;
                tx.last_error = Some(reason);
                self.write_status(tx)?;
                Ok(EntryResult::Failed { halt: false })
            }
        }
    }
}

enum EntryResult {
    Skipped,
    Synced,
    Failed { halt: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Mutation;
    use crate::error::RemoteError;
    use crate::model::CashDrawerAction;
    use crate::testing::FakeRemote;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;

    fn queue_with(remote: Arc<FakeRemote>, online: bool) -> OfflineQueue {
        OfflineQueue::new(
            QueueStore::in_memory().unwrap(),
            remote,
            NetworkMonitor::with_initial(online, Duration::ZERO),
            RetryPolicy::default(),
        )
        .unwrap()
    }

    fn sale(total: f64) -> Value {
        json!({ "items": [{ "productId": "p-1", "quantity": 1 }], "total": total })
    }

    #[tokio::test]
    async fn test_offline_enqueues_count_as_pending_with_unique_ids() {
        let remote = Arc::new(FakeRemote::new());
        let queue = queue_with(remote.clone(), false);

        let mut ids = HashSet::new();
        for i in 0..7 {
            let id = queue
                .enqueue(TransactionKind::Sale, sale(f64::from(i)))
                .unwrap();
            ids.insert(id);
        }

        assert_eq!(ids.len(), 7);
        assert_eq!(queue.pending_count().unwrap(), 7);
        assert!(remote.calls().is_empty(), "enqueue never calls the network");
    }

    #[tokio::test]
    async fn test_success_removes_and_permanent_failure_keeps_entry() {
        let remote = Arc::new(FakeRemote::new());
        remote.set_rule(|mutation, _| {
            (mutation == Mutation::AddCashOut).then(|| {
                Err(RemoteError::Rejected {
                    message: "insufficient balance".into(),
                    code: Some("BAD_USER_INPUT".into()),
                })
            })
        });
        let queue = queue_with(remote.clone(), true);

        let ok_id = queue.enqueue(TransactionKind::Sale, sale(4.0)).unwrap();
        let bad_id = queue
            .enqueue(
                TransactionKind::CashDrawer(CashDrawerAction::CashOut),
                json!({ "amount": 500 }),
            )
            .unwrap();

        let summary = queue.drain().await;
        assert_eq!(
            summary,
            DrainSummary {
                succeeded: 1,
                failed: 1,
                remaining: 1
            }
        );

        let entries = queue.entries().unwrap();
        assert!(entries.iter().all(|t| t.local_id != ok_id));
        let bad = entries.iter().find(|t| t.local_id == bad_id).unwrap();
        assert_eq!(bad.status, SyncStatus::Failed);
        assert_eq!(bad.failure, Some(FailureClass::Permanent));
        assert_eq!(bad.last_error.as_deref(), Some("insufficient balance"));
        assert_eq!(bad.attempts, 1);
    }

    #[tokio::test]
    async fn test_drain_attempts_in_enqueue_order_across_kinds() {
        let remote = Arc::new(FakeRemote::new());
        let queue = queue_with(remote.clone(), false);

        let first = queue.enqueue(TransactionKind::Sale, sale(1.0)).unwrap();
        let second = queue
            .enqueue(
                TransactionKind::CashDrawer(CashDrawerAction::CashOut),
                json!({ "amount": 20 }),
            )
            .unwrap();
        let third = queue
            .enqueue(TransactionKind::ShiftEvent, json!({ "type": "CLOCK_OUT" }))
            .unwrap();

        let summary = queue.drain().await;
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.remaining, 0);

        let keys: Vec<_> = remote
            .calls()
            .into_iter()
            .map(|c| c.idempotency_key)
            .collect();
        assert_eq!(keys, vec![first, second, third]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_drains_apply_each_entry_once() {
        let remote = Arc::new(FakeRemote::new());
        remote.set_delay(Duration::from_millis(200));
        let queue = queue_with(remote.clone(), false);
        for i in 0..3 {
            queue
                .enqueue(TransactionKind::Sale, sale(f64::from(i)))
                .unwrap();
        }

        let (a, b) = tokio::join!(queue.drain(), queue.drain());

        assert_eq!(a, b, "the waiting call reports the in-flight run");
        assert_eq!(a.succeeded, 3);
        assert_eq!(remote.calls().len(), 3);
        assert!(queue.entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_network_failure_stops_the_cycle() {
        let remote = Arc::new(FakeRemote::new());
        remote.push_result(Err(RemoteError::Transport(
            "Cannot reach sync server at https://pos".into(),
        )));
        let queue = queue_with(remote.clone(), true);
        for i in 0..3 {
            queue
                .enqueue(TransactionKind::Sale, sale(f64::from(i)))
                .unwrap();
        }

        let summary = queue.drain().await;
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.remaining, 3);
        assert_eq!(remote.calls().len(), 1, "later entries were not attempted");
        assert!(!queue.status(), "the failure fed back into the monitor");

        let entries = queue.entries().unwrap();
        assert_eq!(entries[0].status, SyncStatus::Failed);
        assert_eq!(entries[0].failure, Some(FailureClass::Retryable));
        assert!(entries[0].next_retry_at.is_some());
        assert_eq!(entries[1].status, SyncStatus::Pending);
        assert_eq!(entries[2].status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_isolated_server_error_does_not_block_queue() {
        let remote = Arc::new(FakeRemote::new());
        remote.push_result(Err(RemoteError::Status {
            status: 502,
            message: "Sync server error".into(),
        }));
        let queue = queue_with(remote.clone(), true);
        let first = queue.enqueue(TransactionKind::Sale, sale(1.0)).unwrap();
        queue
            .enqueue(TransactionKind::ParkedSale, json!({ "cart": [] }))
            .unwrap();

        let summary = queue.drain().await;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.remaining, 1);

        // Backing off: an immediate second drain leaves it alone.
        let again = queue.drain().await;
        assert_eq!(again.succeeded + again.failed, 0);
        assert_eq!(remote.calls().len(), 2);
        assert_eq!(queue.entries().unwrap()[0].local_id, first);
    }

    #[tokio::test]
    async fn test_retries_stop_after_max_attempts() {
        let remote = Arc::new(FakeRemote::new());
        remote.set_rule(|_, _| {
            Some(Err(RemoteError::Status {
                status: 503,
                message: "Sync server error".into(),
            }))
        });
        let queue = OfflineQueue::new(
            QueueStore::in_memory().unwrap(),
            remote.clone(),
            NetworkMonitor::with_initial(true, Duration::ZERO),
            RetryPolicy {
                base_delay_ms: 0,
                max_delay_ms: 0,
                max_attempts: 2,
            },
        )
        .unwrap();
        queue.enqueue(TransactionKind::Sale, sale(1.0)).unwrap();

        // The jitter keeps next_retry_at a few hundred ms out; wait it off.
        for _ in 0..4 {
            queue.drain().await;
            tokio::time::sleep(Duration::from_millis(800)).await;
        }

        assert_eq!(remote.calls().len(), 2);
        let entry = &queue.entries().unwrap()[0];
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.status, SyncStatus::Failed);
    }

    #[tokio::test]
    async fn test_cash_drawer_rejection_then_retry_failed_fails_again() {
        let remote = Arc::new(FakeRemote::new());
        remote.set_rule(|_, _| {
            Some(Err(RemoteError::Rejected {
                message: "insufficient balance".into(),
                code: None,
            }))
        });
        let queue = queue_with(remote.clone(), true);
        let id = queue
            .enqueue(
                TransactionKind::CashDrawer(CashDrawerAction::CashOut),
                json!({ "amount": 80, "reason": "supplier" }),
            )
            .unwrap();

        queue.drain().await;
        let failed = queue.failed_entries().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("insufficient balance"));
        assert_eq!(queue.pending_count().unwrap(), 1);

        // Not retried automatically.
        queue.drain().await;
        assert_eq!(remote.calls().len(), 1);

        let summary = queue.retry_failed().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(remote.calls().len(), 2);
        let calls = remote.calls();
        assert_eq!(calls[0].input, calls[1].input, "same payload resubmitted");

        let entry = &queue.entries().unwrap()[0];
        assert_eq!(entry.local_id, id);
        assert_eq!(entry.status, SyncStatus::Failed);
        assert_eq!(entry.attempts, 2);
        assert_eq!(queue.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_discard_removes_failed_entry() {
        let remote = Arc::new(FakeRemote::new());
        remote.push_result(Err(RemoteError::Rejected {
            message: "product discontinued".into(),
            code: None,
        }));
        let queue = queue_with(remote, true);
        let id = queue.enqueue(TransactionKind::Sale, sale(3.0)).unwrap();
        queue.drain().await;

        queue.discard(&id).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 0);
        assert!(matches!(
            queue.discard(&id),
            Err(QueueError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_during_drain_is_never_sent() {
        let remote = Arc::new(FakeRemote::new());
        remote.set_delay(Duration::from_millis(500));
        let queue = queue_with(remote.clone(), false);
        let first = queue.enqueue(TransactionKind::Sale, sale(1.0)).unwrap();
        let second = queue.enqueue(TransactionKind::Sale, sale(2.0)).unwrap();

        let draining = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(matches!(
            queue.discard(&first),
            Err(QueueError::InFlight(id)) if id == first
        ));
        queue.discard(&second).unwrap();

        let summary = draining.await.unwrap();
        assert_eq!(
            summary,
            DrainSummary {
                succeeded: 1,
                failed: 0,
                remaining: 0
            }
        );
        let keys: Vec<_> = remote
            .calls()
            .into_iter()
            .map(|c| c.idempotency_key)
            .collect();
        assert_eq!(keys, vec![first]);
        assert!(queue.entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_reports_storage_failure() {
        let store = QueueStore::in_memory().unwrap();
        store.execute_raw("DROP TABLE queued_transactions;");
        let built = OfflineQueue::new(
            store,
            Arc::new(FakeRemote::new()),
            NetworkMonitor::with_initial(false, Duration::ZERO),
            RetryPolicy::default(),
        );
        // Recovery itself touches the table, so construction already fails.
        assert!(matches!(built, Err(QueueError::Store(_))));

        let store = QueueStore::in_memory().unwrap();
        let queue = OfflineQueue::new(
            store,
            Arc::new(FakeRemote::new()),
            NetworkMonitor::with_initial(false, Duration::ZERO),
            RetryPolicy::default(),
        )
        .unwrap();
        queue
            .inner
            .store
            .execute_raw("DROP TABLE queued_transactions;");
        let err = queue
            .enqueue(TransactionKind::Sale, sale(1.0))
            .unwrap_err();
        assert!(matches!(err, QueueError::Enqueue(_)));
    }

    #[tokio::test]
    async fn test_signals_and_last_sync_time() {
        let remote = Arc::new(FakeRemote::new());
        let queue = queue_with(remote, false);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            queue.subscribe(move |s| seen.lock().unwrap().push(s))
        };

        queue.enqueue(TransactionKind::Sale, sale(2.0)).unwrap();
        assert_eq!(queue.last_sync_time().unwrap(), None);
        queue.drain().await;

        assert!(queue.last_sync_time().unwrap().is_some());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&SyncSignal::QueueChanged));
        assert!(seen.contains(&SyncSignal::LastSyncChanged));
        assert!(!seen.contains(&SyncSignal::SyncFailed));
    }

    #[tokio::test]
    async fn test_restart_keeps_queued_entries() {
        let dir = std::env::temp_dir().join(format!("pos_sync_restart_{}", uuid::Uuid::new_v4()));
        let payloads = [sale(1.0), json!({ "amount": 10 }), json!({ "type": "CLOCK_IN" })];
        let kinds = [
            TransactionKind::Sale,
            TransactionKind::CashDrawer(CashDrawerAction::CashIn),
            TransactionKind::ShiftEvent,
        ];
        {
            let queue = OfflineQueue::new(
                QueueStore::open(&dir).unwrap(),
                Arc::new(FakeRemote::new()),
                NetworkMonitor::with_initial(false, Duration::ZERO),
                RetryPolicy::default(),
            )
            .unwrap();
            for (kind, payload) in kinds.iter().zip(payloads.iter()) {
                queue.enqueue(*kind, payload.clone()).unwrap();
            }
        }

        let reopened = QueueStore::open(&dir).unwrap();
        let entries = reopened.get_all().unwrap();
        assert_eq!(entries.len(), 3);
        for ((entry, kind), payload) in entries.iter().zip(kinds).zip(payloads.iter()) {
            assert_eq!(entry.kind, kind);
            assert_eq!(&entry.payload, payload);
            assert_eq!(entry.status, SyncStatus::Pending);
        }

        drop(reopened);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_startup_recovers_interrupted_entry() {
        let store = QueueStore::in_memory().unwrap();
        let mut stuck = QueuedTransaction::new(TransactionKind::Sale, sale(5.0));
        stuck.status = SyncStatus::Syncing;
        store.put(&stuck).unwrap();

        let remote = Arc::new(FakeRemote::new());
        let queue = OfflineQueue::new(
            store,
            remote.clone(),
            NetworkMonitor::with_initial(true, Duration::ZERO),
            RetryPolicy::default(),
        )
        .unwrap();
        assert_eq!(queue.entries().unwrap()[0].status, SyncStatus::Pending);

        let summary = queue.drain().await;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(remote.calls()[0].idempotency_key, stuck.local_id);
    }
}
