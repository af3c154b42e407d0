//! Local durable store for queued transactions and sync metadata.
//!
//! Every call commits before returning. All access goes through the single
//! connection mutex in [`DbState`], so writes to one `local_id` can never
//! interleave.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::db::{self, DbState};
use crate::error::StoreError;
use crate::model::{
    FailureClass, MetadataPatch, QueuedTransaction, SyncMetadata, SyncStatus, TransactionKind,
};

const SELECT_COLUMNS: &str = "local_id, kind, operation, payload, status, attempts, created_at,
     last_error, failure_class, next_retry_at";

/// Entries counted as pending: everything not yet confirmed by the server.
const OUTSTANDING_STATUSES: &str = "('PENDING', 'SYNCING', 'FAILED')";

pub struct QueueStore {
    db: DbState,
}

/// Leftovers from a process that died mid-drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub purged_synced: usize,
    pub reset_syncing: usize,
}

/// Result of [`QueueStore::remove_if_idle`].
#[derive(Debug)]
pub enum Removal {
    Removed(QueuedTransaction),
    InFlight,
    Missing,
}

pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(local_id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            local_id: local_id.to_string(),
            reason: format!("bad timestamp {raw:?}: {e}"),
        })
}

/// Raw column values, decoded outside the rusqlite row callback so decoding
/// errors keep their own type.
struct RawRow {
    local_id: String,
    kind: String,
    operation: Option<String>,
    payload: String,
    status: String,
    attempts: i64,
    created_at: String,
    last_error: Option<String>,
    failure_class: Option<String>,
    next_retry_at: Option<String>,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            local_id: row.get(0)?,
            kind: row.get(1)?,
            operation: row.get(2)?,
            payload: row.get(3)?,
            status: row.get(4)?,
            attempts: row.get(5)?,
            created_at: row.get(6)?,
            last_error: row.get(7)?,
            failure_class: row.get(8)?,
            next_retry_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<QueuedTransaction, StoreError> {
        let corrupt = |reason: String| StoreError::CorruptRow {
            local_id: self.local_id.clone(),
            reason,
        };

        let kind = TransactionKind::from_columns(&self.kind, self.operation.as_deref())
            .ok_or_else(|| corrupt(format!("unknown kind {}/{:?}", self.kind, self.operation)))?;
        let status = SyncStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status {}", self.status)))?;
        let failure = match self.failure_class.as_deref() {
            Some(raw) => Some(
                FailureClass::parse(raw)
                    .ok_or_else(|| corrupt(format!("unknown failure class {raw}")))?,
            ),
            None => None,
        };
        let payload = serde_json::from_str(&self.payload)?;
        let created_at = parse_ts(&self.local_id, &self.created_at)?;
        let next_retry_at = match self.next_retry_at.as_deref() {
            Some(raw) => Some(parse_ts(&self.local_id, raw)?),
            None => None,
        };

        Ok(QueuedTransaction {
            kind,
            payload,
            status,
            attempts: u32::try_from(self.attempts.max(0)).unwrap_or(u32::MAX),
            created_at,
            last_error: self.last_error,
            failure,
            next_retry_at,
            local_id: self.local_id,
        })
    }
}

impl QueueStore {
    pub fn new(db: DbState) -> Self {
        Self { db }
    }

    /// Open the file-backed store inside `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(db::init(data_dir)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(db::open_in_memory()?))
    }

    /// Insert or overwrite by `local_id`. Used to write new entries; status
    /// transitions of existing entries go through [`Self::claim`] and
    /// [`Self::update`].
    ///
    /// On overwrite only the mutable sync fields change; `kind`, `payload`
    /// and `created_at` keep the values written at enqueue.
    pub fn put(&self, tx: &QueuedTransaction) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&tx.payload)?;
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO queued_transactions (
                 local_id, kind, operation, payload, status, attempts, last_error,
                 failure_class, next_retry_at, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(local_id) DO UPDATE SET
                 status = excluded.status,
                 attempts = excluded.attempts,
                 last_error = excluded.last_error,
                 failure_class = excluded.failure_class,
                 next_retry_at = excluded.next_retry_at,
                 updated_at = excluded.updated_at",
            params![
                tx.local_id,
                tx.kind.as_str(),
                tx.kind.operation(),
                payload,
                tx.status.as_str(),
                i64::from(tx.attempts),
                tx.last_error,
                tx.failure.map(|f| f.as_str()),
                tx.next_retry_at.as_ref().map(format_ts),
                format_ts(&tx.created_at),
                format_ts(&Utc::now()),
            ],
        )?;
        debug!(local_id = %tx.local_id, status = tx.status.as_str(), "Queue entry written");
        Ok(())
    }

    /// Move an entry into `SYNCING`, but only while it is still stored as
    /// `PENDING` or `FAILED`. Returns `false` when the row was removed or
    /// claimed since the caller last read it.
    pub fn claim(&self, local_id: &str) -> Result<bool, StoreError> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE queued_transactions
             SET status = 'SYNCING', updated_at = ?2
             WHERE local_id = ?1 AND status IN ('PENDING', 'FAILED')",
            params![local_id, format_ts(&Utc::now())],
        )?;
        Ok(changed > 0)
    }

    /// Write the sync fields of an existing entry. Never inserts, so a row
    /// deleted in the meantime stays deleted; returns whether it existed.
    pub fn update(&self, tx: &QueuedTransaction) -> Result<bool, StoreError> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE queued_transactions
             SET status = ?2,
                 attempts = ?3,
                 last_error = ?4,
                 failure_class = ?5,
                 next_retry_at = ?6,
                 updated_at = ?7
             WHERE local_id = ?1",
            params![
                tx.local_id,
                tx.status.as_str(),
                i64::from(tx.attempts),
                tx.last_error,
                tx.failure.map(|f| f.as_str()),
                tx.next_retry_at.as_ref().map(format_ts),
                format_ts(&Utc::now()),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Delete an entry unless a drain currently holds it in `SYNCING`.
    /// The status check and the delete happen under one lock.
    pub fn remove_if_idle(&self, local_id: &str) -> Result<Removal, StoreError> {
        let conn = self.db.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM queued_transactions WHERE local_id = ?1"),
                params![local_id],
                RawRow::read,
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(Removal::Missing);
        };
        if raw.status == SyncStatus::Syncing.as_str() {
            return Ok(Removal::InFlight);
        }
        let entry = raw.decode()?;
        conn.execute(
            "DELETE FROM queued_transactions WHERE local_id = ?1 AND status <> 'SYNCING'",
            params![local_id],
        )?;
        Ok(Removal::Removed(entry))
    }

    /// All entries in insertion order. Rows that cannot be decoded are
    /// logged and skipped; they still count towards [`Self::pending_count`].
    pub fn get_all(&self) -> Result<Vec<QueuedTransaction>, StoreError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM queued_transactions ORDER BY seq ASC"
        ))?;
        let rows = stmt
            .query_map([], RawRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for raw in rows {
            match raw.decode() {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "Skipping undecodable queue entry"),
            }
        }
        Ok(entries)
    }

    pub fn get(&self, local_id: &str) -> Result<Option<QueuedTransaction>, StoreError> {
        let conn = self.db.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM queued_transactions WHERE local_id = ?1"),
                params![local_id],
                RawRow::read,
            )
            .optional()?;
        raw.map(RawRow::decode).transpose()
    }

    /// Delete one entry. Returns whether a row was removed.
    pub fn remove(&self, local_id: &str) -> Result<bool, StoreError> {
        let conn = self.db.lock()?;
        let removed = conn.execute(
            "DELETE FROM queued_transactions WHERE local_id = ?1",
            params![local_id],
        )?;
        Ok(removed > 0)
    }

    pub fn pending_count(&self) -> Result<usize, StoreError> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM queued_transactions WHERE status IN {OUTSTANDING_STATUSES}"
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Metadata with `pending_count` recomputed from the queue table.
    pub fn get_metadata(&self) -> Result<SyncMetadata, StoreError> {
        let raw_last_sync: Option<String> = {
            let conn = self.db.lock()?;
            conn.query_row(
                "SELECT last_sync_time FROM sync_metadata WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .flatten()
        };
        let last_sync_time = match raw_last_sync {
            Some(raw) => Some(parse_ts("sync_metadata", &raw)?),
            None => None,
        };
        Ok(SyncMetadata {
            last_sync_time,
            pending_count: self.pending_count()?,
        })
    }

    /// Merge `patch` into the metadata row.
    pub fn set_metadata(&self, patch: &MetadataPatch) -> Result<(), StoreError> {
        let Some(last_sync_time) = patch.last_sync_time.as_ref() else {
            return Ok(());
        };
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO sync_metadata (id, last_sync_time, updated_at)
             VALUES (1, ?1, datetime('now'))
             ON CONFLICT(id) DO UPDATE SET
                last_sync_time = excluded.last_sync_time,
                updated_at = excluded.updated_at",
            params![format_ts(last_sync_time)],
        )?;
        Ok(())
    }

    /// Flip every `FAILED` entry back to `PENDING` with its backoff cleared.
    pub fn reset_failed(&self) -> Result<usize, StoreError> {
        let conn = self.db.lock()?;
        let reset = conn.execute(
            "UPDATE queued_transactions
             SET status = 'PENDING',
                 failure_class = NULL,
                 next_retry_at = NULL,
                 updated_at = datetime('now')
             WHERE status = 'FAILED'",
            [],
        )?;
        Ok(reset)
    }

    /// Finish what a killed process left behind: confirmed entries are
    /// deleted, entries caught mid-attempt go back to `PENDING`.
    pub fn recover_interrupted(&self) -> Result<RecoveryReport, StoreError> {
        let conn = self.db.lock()?;
        let purged_synced = conn.execute(
            "DELETE FROM queued_transactions WHERE status = 'SYNCED'",
            [],
        )?;
        let reset_syncing = conn.execute(
            "UPDATE queued_transactions
             SET status = 'PENDING', updated_at = datetime('now')
             WHERE status = 'SYNCING'",
            [],
        )?;
        if purged_synced > 0 || reset_syncing > 0 {
            info!(
                purged_synced,
                reset_syncing, "Recovered queue entries from interrupted sync"
            );
        }
        Ok(RecoveryReport {
            purged_synced,
            reset_syncing,
        })
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) {
        self.db.lock().unwrap().execute_batch(sql).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CashDrawerAction;
    use serde_json::json;

    fn sale(amount: f64) -> QueuedTransaction {
        QueuedTransaction::new(TransactionKind::Sale, json!({ "total": amount }))
    }

    #[test]
    fn test_put_then_get_all_keeps_insertion_order() {
        let store = QueueStore::in_memory().unwrap();
        let a = sale(1.0);
        let b = QueuedTransaction::new(
            TransactionKind::CashDrawer(CashDrawerAction::CashIn),
            json!({ "amount": 50 }),
        );
        let c = sale(3.0);
        for tx in [&a, &b, &c] {
            store.put(tx).unwrap();
        }

        let all = store.get_all().unwrap();
        let ids: Vec<_> = all.iter().map(|t| t.local_id.as_str()).collect();
        assert_eq!(ids, vec![a.local_id.as_str(), b.local_id.as_str(), c.local_id.as_str()]);
        assert_eq!(all[1], b);
    }

    #[test]
    fn test_overwrite_updates_status_but_never_payload() {
        let store = QueueStore::in_memory().unwrap();
        let mut tx = sale(9.5);
        store.put(&tx).unwrap();

        tx.status = SyncStatus::Failed;
        tx.attempts = 2;
        tx.last_error = Some("insufficient stock".into());
        tx.failure = Some(FailureClass::Permanent);
        tx.payload = json!({ "total": 0 });
        store.put(&tx).unwrap();

        let stored = store.get(&tx.local_id).unwrap().expect("entry present");
        assert_eq!(stored.status, SyncStatus::Failed);
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.last_error.as_deref(), Some("insufficient stock"));
        assert_eq!(stored.failure, Some(FailureClass::Permanent));
        assert_eq!(stored.payload, json!({ "total": 9.5 }));
        assert_eq!(store.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_deletes_single_entry() {
        let store = QueueStore::in_memory().unwrap();
        let a = sale(1.0);
        let b = sale(2.0);
        store.put(&a).unwrap();
        store.put(&b).unwrap();

        assert!(store.remove(&a.local_id).unwrap());
        assert!(!store.remove(&a.local_id).unwrap());
        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].local_id, b.local_id);
    }

    #[test]
    fn test_pending_count_ignores_synced_rows() {
        let store = QueueStore::in_memory().unwrap();
        let mut synced = sale(1.0);
        synced.status = SyncStatus::Synced;
        let mut failed = sale(2.0);
        failed.status = SyncStatus::Failed;
        store.put(&synced).unwrap();
        store.put(&failed).unwrap();
        store.put(&sale(3.0)).unwrap();

        assert_eq!(store.pending_count().unwrap(), 2);
        assert_eq!(store.get_metadata().unwrap().pending_count, 2);
    }

    #[test]
    fn test_metadata_merge_write() {
        let store = QueueStore::in_memory().unwrap();
        assert_eq!(store.get_metadata().unwrap().last_sync_time, None);

        let at = Utc::now();
        store
            .set_metadata(&MetadataPatch {
                last_sync_time: Some(at),
            })
            .unwrap();
        store.set_metadata(&MetadataPatch::default()).unwrap();

        let meta = store.get_metadata().unwrap();
        assert_eq!(
            meta.last_sync_time.map(|t| t.timestamp_micros()),
            Some(at.timestamp_micros())
        );
    }

    #[test]
    fn test_recover_interrupted_purges_synced_and_resets_syncing() {
        let store = QueueStore::in_memory().unwrap();
        let mut synced = sale(1.0);
        synced.status = SyncStatus::Synced;
        let mut in_flight = sale(2.0);
        in_flight.status = SyncStatus::Syncing;
        store.put(&synced).unwrap();
        store.put(&in_flight).unwrap();

        let report = store.recover_interrupted().unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                purged_synced: 1,
                reset_syncing: 1
            }
        );

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].local_id, in_flight.local_id);
        assert_eq!(all[0].status, SyncStatus::Pending);
    }

    #[test]
    fn test_reset_failed_clears_backoff() {
        let store = QueueStore::in_memory().unwrap();
        let mut tx = sale(1.0);
        tx.status = SyncStatus::Failed;
        tx.failure = Some(FailureClass::Retryable);
        tx.next_retry_at = Some(Utc::now());
        store.put(&tx).unwrap();

        assert_eq!(store.reset_failed().unwrap(), 1);
        let stored = store.get(&tx.local_id).unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Pending);
        assert_eq!(stored.failure, None);
        assert_eq!(stored.next_retry_at, None);
    }

    #[test]
    fn test_status_writes_never_resurrect_removed_entry() {
        let store = QueueStore::in_memory().unwrap();
        let mut tx = sale(2.0);
        store.put(&tx).unwrap();
        assert!(store.remove(&tx.local_id).unwrap());

        assert!(!store.claim(&tx.local_id).unwrap());
        tx.status = SyncStatus::Failed;
        tx.attempts = 1;
        assert!(!store.update(&tx).unwrap());
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_claim_only_takes_idle_entries() {
        let store = QueueStore::in_memory().unwrap();
        let tx = sale(3.0);
        store.put(&tx).unwrap();

        assert!(store.claim(&tx.local_id).unwrap());
        assert!(!store.claim(&tx.local_id).unwrap(), "already SYNCING");
        let stored = store.get(&tx.local_id).unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Syncing);
        assert_eq!(stored.payload, tx.payload);
    }

    #[test]
    fn test_remove_if_idle_refuses_syncing_entry() {
        let store = QueueStore::in_memory().unwrap();
        let busy = sale(4.0);
        let idle = sale(5.0);
        store.put(&busy).unwrap();
        store.put(&idle).unwrap();
        store.claim(&busy.local_id).unwrap();

        assert!(matches!(
            store.remove_if_idle(&busy.local_id).unwrap(),
            Removal::InFlight
        ));
        assert!(matches!(
            store.remove_if_idle(&idle.local_id).unwrap(),
            Removal::Removed(entry) if entry.local_id == idle.local_id
        ));
        assert!(matches!(
            store.remove_if_idle(&idle.local_id).unwrap(),
            Removal::Missing
        ));
        assert_eq!(store.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = std::env::temp_dir().join(format!(
            "pos_sync_test_reopen_{}",
            uuid::Uuid::new_v4()
        ));
        let entries: Vec<_> = (0..3).map(|i| sale(f64::from(i))).collect();
        {
            let store = QueueStore::open(&dir).unwrap();
            for tx in &entries {
                store.put(tx).unwrap();
            }
        }

        let reopened = QueueStore::open(&dir).unwrap();
        let all = reopened.get_all().unwrap();
        assert_eq!(all.len(), 3);
        for (stored, original) in all.iter().zip(&entries) {
            assert_eq!(stored.local_id, original.local_id);
            assert_eq!(stored.payload, original.payload);
            assert_eq!(stored.status, SyncStatus::Pending);
        }

        drop(reopened);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
