//! Offline transaction queue and sync engine for a point-of-sale terminal.
//!
//! Sales, cash drawer actions, shift events and parked sales are written to
//! a local SQLite queue the moment they happen, whether or not the server is
//! reachable, and replayed against the server's GraphQL mutations in the
//! order they were made once connectivity allows.

pub mod api;
pub mod config;
pub mod db;
pub mod driver;
pub mod error;
pub mod events;
pub mod model;
pub mod network;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use api::{GraphqlClient, Mutation, RemoteApi};
pub use config::SyncConfig;
pub use error::{ConfigError, QueueError, RemoteError, StoreError};
pub use events::{Subscription, SyncSignal};
pub use model::{
    CashDrawerAction, DrainSummary, FailureClass, QueuedTransaction, SyncMetadata, SyncStatus,
    TransactionKind,
};
pub use network::NetworkMonitor;
pub use queue::OfflineQueue;
pub use retry::RetryPolicy;
pub use scheduler::{SchedulerHandle, SchedulerOptions, SyncScheduler};
pub use store::QueueStore;
