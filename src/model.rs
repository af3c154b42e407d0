//! Queue record types shared by the store, the driver and the queue manager.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Cash drawer operations. Each maps to its own remote mutation while the
/// entry kind stays `CASH_DRAWER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashDrawerAction {
    CashIn,
    CashOut,
    Open,
    Close,
}

impl CashDrawerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CashIn => "CASH_IN",
            Self::CashOut => "CASH_OUT",
            Self::Open => "OPEN",
            Self::Close => "CLOSE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CASH_IN" => Some(Self::CashIn),
            "CASH_OUT" => Some(Self::CashOut),
            "OPEN" => Some(Self::Open),
            "CLOSE" => Some(Self::Close),
            _ => None,
        }
    }
}

/// What an entry represents; selects the remote mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Sale,
    CashDrawer(CashDrawerAction),
    ShiftEvent,
    ParkedSale,
}

impl TransactionKind {
    /// Value persisted in the `kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "SALE",
            Self::CashDrawer(_) => "CASH_DRAWER",
            Self::ShiftEvent => "SHIFT_EVENT",
            Self::ParkedSale => "PARKED_SALE",
        }
    }

    /// Value persisted in the `operation` column, if the kind has one.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::CashDrawer(action) => Some(action.as_str()),
            _ => None,
        }
    }

    /// Rebuild a kind from its persisted columns.
    pub fn from_columns(kind: &str, operation: Option<&str>) -> Option<Self> {
        match kind {
            "SALE" => Some(Self::Sale),
            "CASH_DRAWER" => operation
                .and_then(CashDrawerAction::parse)
                .map(Self::CashDrawer),
            "SHIFT_EVENT" => Some(Self::ShiftEvent),
            "PARKED_SALE" => Some(Self::ParkedSale),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Syncing => "SYNCING",
            Self::Synced => "SYNCED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "SYNCING" => Some(Self::Syncing),
            "SYNCED" => Some(Self::Synced),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Why a `FAILED` entry failed. Only retryable failures are picked up again
/// without a human asking for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    Retryable,
    Permanent,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retryable => "RETRYABLE",
            Self::Permanent => "PERMANENT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "RETRYABLE" => Some(Self::Retryable),
            "PERMANENT" => Some(Self::Permanent),
            _ => None,
        }
    }
}

/// One persisted unit of offline work awaiting server confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTransaction {
    pub local_id: String,
    pub kind: TransactionKind,
    /// Forwarded verbatim as the mutation input. Never rewritten after enqueue.
    pub payload: Value,
    pub status: SyncStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub failure: Option<FailureClass>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl QueuedTransaction {
    /// A fresh `PENDING` entry with a random provisional id.
    pub fn new(kind: TransactionKind, payload: Value) -> Self {
        Self {
            local_id: Uuid::new_v4().to_string(),
            kind,
            payload,
            status: SyncStatus::Pending,
            attempts: 0,
            // Stored with microsecond precision.
            created_at: Utc::now().trunc_subsecs(6),
            last_error: None,
            failure: None,
            next_retry_at: None,
        }
    }

    /// Whether a drain starting at `now` should attempt this entry.
    pub fn is_eligible(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        match self.status {
            SyncStatus::Pending => true,
            SyncStatus::Failed => {
                self.failure == Some(FailureClass::Retryable)
                    && self.attempts < max_attempts
                    && self.next_retry_at.map_or(true, |at| at <= now)
            }
            SyncStatus::Syncing | SyncStatus::Synced => false,
        }
    }
}

/// Installation-wide sync bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Recomputed from the store on every read.
    pub pending_count: usize,
}

/// Partial update for [`SyncMetadata`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Result of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Outstanding entries left in the store after the cycle.
    pub remaining: usize,
}
