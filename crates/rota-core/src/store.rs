//! Storage seam between the core and its persistence backends.
//!
//! [`QueueStore`] combines the participant store (live weights, active
//! flags, weight-change log) and the snapshot store (snapshots, items,
//! retention). The core never writes piecemeal: every mutation is shipped
//! as a [`SnapshotDraft`] or a [`SnapshotWrite`] that the backend applies
//! atomically, so a failed call leaves the store at its last committed
//! state.
//!
//! Live-weight writes are compare-and-set. Each [`WeightUpdate`] names the
//! weight the core read; a backend that finds a different value rejects
//! the whole write with [`StoreError::Conflict`].

use std::future::Future;

use chrono::{DateTime, Utc};
use rota_types::{Participant, ParticipantId, Snapshot, SnapshotId, SnapshotItem, WeightHistoryRecord};

/// Two weights closer than this are the same weight.
pub const WEIGHT_TOLERANCE: f64 = 1e-12;

/// Whether two weights are equal within [`WEIGHT_TOLERANCE`].
pub fn same_weight(a: f64, b: f64) -> bool {
    (a - b).abs() <= WEIGHT_TOLERANCE
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by a [`QueueStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A compare-and-set weight update found a different live weight.
    #[error("weight of participant {participant_id} changed concurrently (expected {expected}, found {actual})")]
    Conflict {
        /// Participant whose weight moved.
        participant_id: ParticipantId,
        /// Weight the caller expected.
        expected: f64,
        /// Weight actually stored.
        actual: f64,
    },

    /// The snapshot targeted by a write does not exist.
    #[error("snapshot {0} does not exist")]
    MissingSnapshot(SnapshotId),

    /// The participant targeted by a write does not exist.
    #[error("participant {0} does not exist")]
    MissingParticipant(ParticipantId),

    /// Stored data could not be mapped onto the domain types.
    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    /// The backend itself failed.
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

// ---------------------------------------------------------------------------
// Write payloads
// ---------------------------------------------------------------------------

/// Why a participant's live weight changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightCause {
    /// Recalculated during generation.
    Generated {
        /// Position among the snapshot's regular items.
        relative_position: u32,
    },
    /// Recalculated after a swap inside the snapshot.
    Swapped {
        /// Position among the snapshot's regular items.
        relative_position: u32,
    },
    /// Restored to the item's `weight_before` when the item was deleted.
    RolledBack,
    /// Replayed forward from an edit of an earlier snapshot.
    Cascaded {
        /// The edited snapshot the cascade started from.
        origin: SnapshotId,
        /// Position among the later snapshot's regular items.
        relative_position: u32,
    },
    /// Full reset by an administrator.
    Reset,
}

impl core::fmt::Display for WeightCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Generated { relative_position } => {
                write!(f, "generated, relative position {relative_position}")
            }
            Self::Swapped { relative_position } => {
                write!(f, "swap, relative position {relative_position}")
            }
            Self::RolledBack => f.write_str("rollback after delete"),
            Self::Cascaded {
                origin,
                relative_position,
            } => write!(
                f,
                "cascade from snapshot {origin}, relative position {relative_position}"
            ),
            Self::Reset => f.write_str("reset"),
        }
    }
}

/// Compare-and-set update of one participant's live weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightUpdate {
    /// Participant to update.
    pub participant_id: ParticipantId,
    /// Weight the caller read before computing the new one.
    pub expected: f64,
    /// New live weight.
    pub weight: f64,
}

/// One weight-history record to append.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightChange {
    /// Participant whose weight changed.
    pub participant_id: ParticipantId,
    /// Weight after the change.
    pub weight: f64,
    /// Cause annotation.
    pub cause: WeightCause,
}

impl WeightChange {
    /// Materialize the history record for a given snapshot and time.
    pub fn into_record(
        self,
        snapshot_id: Option<SnapshotId>,
        recorded_at: DateTime<Utc>,
    ) -> WeightHistoryRecord {
        WeightHistoryRecord {
            participant_id: self.participant_id,
            weight: self.weight,
            snapshot_id,
            cause: self.cause.to_string(),
            recorded_at,
        }
    }
}

/// Everything a generation persists, applied in one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotDraft {
    /// Subject label.
    pub subject: String,
    /// Items at positions `1..=N`.
    pub items: Vec<SnapshotItem>,
    /// Live-weight updates of the regular participants.
    pub weights: Vec<WeightUpdate>,
    /// History records; the store stamps them with the new snapshot id.
    pub history: Vec<WeightChange>,
    /// Generation time.
    pub created_at: DateTime<Utc>,
}

/// An atomic rewrite of one existing snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotWrite {
    /// Snapshot being rewritten.
    pub snapshot_id: SnapshotId,
    /// The snapshot's complete new item set.
    pub items: Vec<SnapshotItem>,
    /// Live-weight updates applied alongside.
    pub weights: Vec<WeightUpdate>,
    /// History records, stamped with `snapshot_id`.
    pub history: Vec<WeightChange>,
    /// Change-log line to append, if any.
    pub note: Option<String>,
    /// Edit time; becomes the snapshot's `updated_at`.
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Persistence operations the core relies on.
///
/// Every method is a single short transaction. Mutations that must stay
/// consistent across several snapshots are serialized by the caller, not
/// by the store.
pub trait QueueStore: Send + Sync {
    /// Every participant, active or not, ordered by id.
    fn participants(&self)
    -> impl Future<Output = Result<Vec<Participant>, StoreError>> + Send;

    /// Active participants ordered by id.
    fn active_participants(
        &self,
    ) -> impl Future<Output = Result<Vec<Participant>, StoreError>> + Send;

    /// One participant.
    fn participant(
        &self,
        id: ParticipantId,
    ) -> impl Future<Output = Result<Option<Participant>, StoreError>> + Send;

    /// Register a participant with the default weight, or rename an
    /// existing one. Roster hook; the core never calls it.
    fn register_participant(
        &self,
        id: ParticipantId,
        name: &str,
    ) -> impl Future<Output = Result<Participant, StoreError>> + Send;

    /// Toggle a participant's active flag. Roster hook.
    fn set_active(
        &self,
        id: ParticipantId,
        active: bool,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Set every participant's weight and log one [`WeightCause::Reset`]
    /// record each. Returns the number of participants reset.
    fn reset_weights(
        &self,
        weight: f64,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// A snapshot with its items ordered by position.
    fn snapshot(
        &self,
        id: SnapshotId,
    ) -> impl Future<Output = Result<Option<Snapshot>, StoreError>> + Send;

    /// Whether a participant holds an item in a snapshot. Backs
    /// [`Rotation::contains`](crate::Rotation::contains).
    fn contains_participant(
        &self,
        snapshot_id: SnapshotId,
        participant_id: ParticipantId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Ids of snapshots newer than `after`, ascending, at most `limit`.
    fn later_snapshot_ids(
        &self,
        after: SnapshotId,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<SnapshotId>, StoreError>> + Send;

    /// The newest snapshots, newest first.
    fn recent_snapshots(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Snapshot>, StoreError>> + Send;

    /// Number of retained snapshots.
    fn snapshot_count(&self) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Persist a generated snapshot and its weight effects atomically.
    fn insert_snapshot(
        &self,
        draft: SnapshotDraft,
    ) -> impl Future<Output = Result<SnapshotId, StoreError>> + Send;

    /// Apply a snapshot rewrite atomically.
    fn commit(&self, write: SnapshotWrite)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete the oldest snapshots until at most `keep` remain.
    fn evict_oldest(
        &self,
        keep: usize,
    ) -> impl Future<Output = Result<Vec<SnapshotId>, StoreError>> + Send;

    /// The newest `limit` history records of a participant, oldest first.
    fn weight_history(
        &self,
        participant_id: ParticipantId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<WeightHistoryRecord>, StoreError>> + Send;

    /// Drop all but the newest `keep` history records of each participant.
    fn trim_weight_history(
        &self,
        participants: &[ParticipantId],
        keep: usize,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_annotations_are_readable() {
        assert_eq!(
            WeightCause::Generated {
                relative_position: 2
            }
            .to_string(),
            "generated, relative position 2"
        );
        assert_eq!(
            WeightCause::Cascaded {
                origin: SnapshotId(7),
                relative_position: 1
            }
            .to_string(),
            "cascade from snapshot 7, relative position 1"
        );
        assert_eq!(WeightCause::RolledBack.to_string(), "rollback after delete");
    }

    #[test]
    fn same_weight_tolerates_rounding_noise() {
        assert!(same_weight(0.1 + 0.2, 0.3));
        assert!(!same_weight(1.0, 1.0001));
    }

    #[test]
    fn change_becomes_record() {
        let at = Utc::now();
        let record = WeightChange {
            participant_id: ParticipantId(3),
            weight: 1.25,
            cause: WeightCause::Reset,
        }
        .into_record(None, at);
        assert_eq!(record.cause, "reset");
        assert_eq!(record.snapshot_id, None);
        assert_eq!(record.recorded_at, at);
    }
}
