//! Error types for the sync engine.

use thiserror::Error;

/// Failures of the local SQLite store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("payload encoding: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to create data dir {path}: {source}")]
    DataDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt queue row {local_id}: {reason}")]
    CorruptRow { local_id: String, reason: String },

    #[error("migration v{version} failed: {source}")]
    Migration {
        version: i32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database connection lock poisoned")]
    LockPoisoned,
}

/// Errors surfaced to callers of the queue manager.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The action could not be queued; nothing was persisted.
    #[error("could not queue transaction: {0}")]
    Enqueue(#[source] StoreError),

    #[error("queued transaction {0} not found")]
    NotFound(String),

    #[error("queued transaction {0} is being synced right now")]
    InFlight(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures talking to the remote mutation API.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The request never produced an HTTP response (connect, timeout, reset).
    #[error("{0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    /// The server answered with GraphQL `errors`.
    #[error("{message}")]
    Rejected {
        message: String,
        code: Option<String>,
    },

    #[error("invalid response from sync server: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is missing")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}
