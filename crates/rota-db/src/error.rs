//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`], which wraps the underlying
//! [`sqlx`] errors and the domain conditions a write can hit. At the
//! [`QueueStore`](rota_core::QueueStore) seam it becomes a [`StoreError`].

use rota_core::StoreError;
use rota_types::{ParticipantId, SnapshotId};

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored value does not fit the domain type.
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// A compare-and-set weight update found a different live weight.
    #[error("weight of participant {participant_id} changed (expected {expected}, found {actual})")]
    Conflict {
        /// Participant whose weight moved.
        participant_id: ParticipantId,
        /// Weight the caller expected.
        expected: f64,
        /// Weight found in the table.
        actual: f64,
    },

    /// The targeted snapshot row does not exist.
    #[error("snapshot {0} not found")]
    MissingSnapshot(SnapshotId),

    /// The targeted participant row does not exist.
    #[error("participant {0} not found")]
    MissingParticipant(ParticipantId),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict {
                participant_id,
                expected,
                actual,
            } => Self::Conflict {
                participant_id,
                expected,
                actual,
            },
            DbError::MissingSnapshot(id) => Self::MissingSnapshot(id),
            DbError::MissingParticipant(id) => Self::MissingParticipant(id),
            DbError::OutOfRange(reason) => Self::Corrupt(reason),
            other @ (DbError::Postgres(_) | DbError::Migration(_) | DbError::Config(_)) => {
                Self::Backend(Box::new(other))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_conditions_keep_their_store_variant() {
        let store: StoreError = DbError::MissingSnapshot(SnapshotId(3)).into();
        assert!(matches!(store, StoreError::MissingSnapshot(SnapshotId(3))));

        let store: StoreError = DbError::OutOfRange("position -1".to_owned()).into();
        assert!(matches!(store, StoreError::Corrupt(ref reason) if reason == "position -1"));
    }

    #[test]
    fn driver_failures_become_backend_errors() {
        let store: StoreError = DbError::Config("bad url".to_owned()).into();
        assert!(matches!(store, StoreError::Backend(_)));
        assert!(store.to_string().contains("bad url"));
    }
}
