//! Applies one queued transaction against the remote API and classifies
//! the outcome.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::{Mutation, RemoteApi};
use crate::error::RemoteError;
use crate::model::{CashDrawerAction, QueuedTransaction, TransactionKind};

/// GraphQL error codes that describe a server-side hiccup rather than a
/// rejection of the payload.
const TRANSIENT_GRAPHQL_CODES: &[&str] = &[
    "INTERNAL_SERVER_ERROR",
    "SERVICE_UNAVAILABLE",
    "TIMEOUT",
    "DEADLINE_EXCEEDED",
];

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Success(Value),
    /// Worth trying again later. `network` is set when no HTTP answer came
    /// back at all, which says something about connectivity.
    RetryableFailure { reason: String, network: bool },
    /// The server rejected the payload; a human has to look at it.
    PermanentFailure(String),
}

/// Mutation a queued transaction is replayed as.
pub fn mutation_for(kind: TransactionKind) -> Mutation {
    match kind {
        TransactionKind::Sale => Mutation::CreateSale,
        TransactionKind::CashDrawer(CashDrawerAction::CashIn) => Mutation::AddCashIn,
        TransactionKind::CashDrawer(CashDrawerAction::CashOut) => Mutation::AddCashOut,
        TransactionKind::CashDrawer(CashDrawerAction::Open) => Mutation::OpenCashDrawer,
        TransactionKind::CashDrawer(CashDrawerAction::Close) => Mutation::CloseCashDrawer,
        TransactionKind::ShiftEvent => Mutation::RecordShiftEvent,
        TransactionKind::ParkedSale => Mutation::CreateParkedSale,
    }
}

pub fn classify_error(err: &RemoteError) -> SyncOutcome {
    let reason = err.to_string();
    match err {
        RemoteError::Transport(_) => SyncOutcome::RetryableFailure {
            reason,
            network: true,
        },
        // Auth problems are not a verdict on the payload; keep the entry
        // retryable until the terminal is reconfigured.
        RemoteError::Status { status, .. }
            if *status >= 500 || matches!(*status, 401 | 403 | 408 | 429) =>
        {
            SyncOutcome::RetryableFailure {
                reason,
                network: false,
            }
        }
        RemoteError::Status { .. } => SyncOutcome::PermanentFailure(reason),
        RemoteError::Rejected { code, message } => {
            let transient = code
                .as_deref()
                .map(|c| TRANSIENT_GRAPHQL_CODES.contains(&c.to_ascii_uppercase().as_str()))
                .unwrap_or(false);
            if transient {
                SyncOutcome::RetryableFailure {
                    reason,
                    network: false,
                }
            } else {
                SyncOutcome::PermanentFailure(message.clone())
            }
        }
        // Usually a captive portal or proxy page in front of the server. If
        // it was a real 2xx the mutation may have landed; the replay carries
        // the same idempotency key, so the server drops the duplicate.
        RemoteError::Decode(_) => SyncOutcome::RetryableFailure {
            reason,
            network: false,
        },
    }
}

pub struct SyncDriver {
    remote: Arc<dyn RemoteApi>,
}

impl SyncDriver {
    pub fn new(remote: Arc<dyn RemoteApi>) -> Self {
        Self { remote }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteApi> {
        &self.remote
    }

    /// One network call; the payload goes out untouched as the mutation
    /// input and `local_id` as the idempotency key.
    pub async fn attempt(&self, tx: &QueuedTransaction) -> SyncOutcome {
        let mutation = mutation_for(tx.kind);
        debug!(
            local_id = %tx.local_id,
            mutation = mutation.field_name(),
            attempt = tx.attempts + 1,
            "Attempting queued transaction"
        );

        match self
            .remote
            .execute(mutation, &tx.payload, &tx.local_id)
            .await
        {
            Ok(result) => SyncOutcome::Success(result),
            Err(err) => {
                let outcome = classify_error(&err);
                warn!(
                    local_id = %tx.local_id,
                    mutation = mutation.field_name(),
                    error = %err,
                    permanent = matches!(outcome, SyncOutcome::PermanentFailure(_)),
                    "Queued transaction sync failed"
                );
                outcome
            }
        }
    }
}
