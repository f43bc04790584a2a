//! Error types for the rota core.
//!
//! All operations return typed errors rather than panicking. Every
//! variant carries the ids and positions needed to render a message for
//! the person who asked, and a failure aborts only the requested
//! operation.

use rota_types::{ItemFlags, ParticipantId, SnapshotId};

use crate::store::StoreError;

/// A referenced record that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Missing {
    /// No snapshot with this id is retained.
    #[error("snapshot {0} not found")]
    Snapshot(SnapshotId),

    /// The snapshot has no item at this position.
    #[error("snapshot {snapshot_id} has no item at position {position}")]
    Position {
        /// Snapshot searched.
        snapshot_id: SnapshotId,
        /// Position requested.
        position: u32,
    },

    /// The roster has no participant with this id.
    #[error("participant {0} not found")]
    Participant(ParticipantId),
}

/// A request that is well-formed but not allowed in the current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidOperation {
    /// Priority, late and added items never move and never change weight.
    #[error("item at position {position} of snapshot {snapshot_id} is pinned ({flags:?}) and cannot be swapped")]
    PinnedItem {
        /// Snapshot edited.
        snapshot_id: SnapshotId,
        /// Position of the pinned item.
        position: u32,
        /// Its flags.
        flags: ItemFlags,
    },

    /// A swap needs two distinct positions.
    #[error("cannot swap position {position} of snapshot {snapshot_id} with itself")]
    SamePosition {
        /// Snapshot edited.
        snapshot_id: SnapshotId,
        /// The repeated position.
        position: u32,
    },

    /// A swap needs at least two regular items.
    #[error("snapshot {snapshot_id} has only {regular} regular item(s); a swap needs two")]
    NotEnoughRegularItems {
        /// Snapshot edited.
        snapshot_id: SnapshotId,
        /// Regular items present.
        regular: u32,
    },

    /// The participant already holds an item in the snapshot.
    #[error("participant {participant_id} is already in snapshot {snapshot_id}")]
    AlreadyPresent {
        /// Snapshot edited.
        snapshot_id: SnapshotId,
        /// The duplicate participant.
        participant_id: ParticipantId,
    },
}

/// Invalid input supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The same participants were listed as both priority and late.
    #[error("participants {participants:?} are listed as both priority and late")]
    OverlappingOverrides {
        /// Ids present in both lists.
        participants: Vec<ParticipantId>,
    },

    /// An added item cannot be both priority and late.
    #[error("an item cannot be both priority and late")]
    ConflictingFlags,

    /// Generation found no active participants.
    #[error("there are no active participants to draw")]
    EmptyPool,
}

/// Coarse classification of a [`RotationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced record is missing.
    NotFound,
    /// The request is not allowed.
    InvalidOperation,
    /// The request input is invalid.
    Validation,
    /// The store failed.
    Store,
}

/// Errors returned by rota operations.
#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    /// A referenced snapshot, position or participant is missing.
    #[error(transparent)]
    NotFound(#[from] Missing),

    /// The operation is not allowed on the targeted items.
    #[error(transparent)]
    InvalidOperation(#[from] InvalidOperation),

    /// The request input is invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The store failed before anything was written.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The local edit was committed but forward propagation stopped early.
    ///
    /// Snapshots before `stopped_at` were already updated and stay so.
    #[error("edit of snapshot {origin} committed, but the cascade stopped at {stopped_at:?} after {applied} step(s): {source}")]
    CascadeIncomplete {
        /// The edited snapshot.
        origin: SnapshotId,
        /// The later snapshot being processed when the failure hit, if any.
        stopped_at: Option<SnapshotId>,
        /// Cascade steps already committed.
        applied: usize,
        /// The underlying failure.
        #[source]
        source: StoreError,
    },
}

impl RotationError {
    /// Coarse classification for front ends.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Store(_) | Self::CascadeIncomplete { .. } => ErrorKind::Store,
        }
    }
}
