//! `PostgreSQL` data layer for rota.
//!
//! ```text
//! Rotation (rota-core)
//!     |
//!     +-- QueueStore --> PgQueueStore
//!         |-- ParticipantStore  (roster, live weights)
//!         |-- SnapshotStore     (snapshots + items, retention)
//!         +-- HistoryStore      (weight-change log)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool, configuration and migrations
//! - [`participant_store`] -- Participant rows and compare-and-set weights
//! - [`snapshot_store`] -- Snapshot headers and batch item writes
//! - [`history_store`] -- Batch history appends and retention
//! - [`queue_store`] -- The [`QueueStore`](rota_core::QueueStore) implementation
//! - [`error`] -- Shared error types

pub mod error;
pub mod history_store;
pub mod participant_store;
pub mod postgres;
pub mod queue_store;
pub mod snapshot_store;

// Re-export primary types for convenience.
pub use error::DbError;
pub use history_store::{HistoryStore, WeightHistoryRow};
pub use participant_store::{ParticipantRow, ParticipantStore};
pub use postgres::{PostgresConfig, PostgresPool};
pub use queue_store::PgQueueStore;
pub use snapshot_store::{SnapshotItemRow, SnapshotRow, SnapshotStore};
