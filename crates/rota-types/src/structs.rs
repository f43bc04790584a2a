//! Core entity structs: participants, snapshots, snapshot items and the
//! weight-history log.
//!
//! Every row shape here is fixed: flags are named booleans that are always
//! present, and both weight columns of an item are always populated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{ParticipantId, SnapshotId};

/// Lower bound of a participant's weight.
pub const MIN_WEIGHT: f64 = 0.1;

/// Upper bound of a participant's weight.
pub const MAX_WEIGHT: f64 = 10.0;

/// Weight assigned to new participants and restored by a full reset.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Clamp a weight into `[MIN_WEIGHT, MAX_WEIGHT]`.
///
/// `NaN` collapses to [`MIN_WEIGHT`] so a corrupt value can never leak
/// into the lottery.
pub fn clamp_weight(weight: f64) -> f64 {
    if weight.is_nan() {
        return MIN_WEIGHT;
    }
    weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// A member of the rotation as maintained by the roster collaborator.
///
/// Participants are never destroyed, only deactivated. The core only ever
/// writes `weight`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Participant {
    /// Roster identity.
    pub id: ParticipantId,
    /// Display name.
    pub name: String,
    /// Live weight, always within `[0.1, 10]`.
    pub weight: f64,
    /// Whether the participant takes part in new lotteries.
    pub active: bool,
}

impl Participant {
    /// Create an active participant with the default weight.
    pub fn new(id: ParticipantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            weight: DEFAULT_WEIGHT,
            active: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot items
// ---------------------------------------------------------------------------

/// Override flags carried by every snapshot item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ItemFlags {
    /// Forced to the front of the order.
    pub priority: bool,
    /// Forced to the back of the order.
    pub late: bool,
    /// Appended by an edit after the snapshot was generated.
    pub added_after_creation: bool,
}

impl ItemFlags {
    /// Flags of an item drawn by the lottery.
    pub const REGULAR: Self = Self {
        priority: false,
        late: false,
        added_after_creation: false,
    };

    /// Flags of a forced-first item.
    pub const PRIORITY: Self = Self {
        priority: true,
        late: false,
        added_after_creation: false,
    };

    /// Flags of a forced-last item.
    pub const LATE: Self = Self {
        priority: false,
        late: true,
        added_after_creation: false,
    };

    /// Whether the item takes part in weight recalculation.
    pub const fn is_regular(self) -> bool {
        !self.priority && !self.late && !self.added_after_creation
    }

    /// Return these flags with `added_after_creation` set.
    #[must_use]
    pub const fn added(mut self) -> Self {
        self.added_after_creation = true;
        self
    }
}

/// One line of a snapshot: who stands at which position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SnapshotItem {
    /// 1-based position within the snapshot.
    pub position: u32,
    /// The participant standing here.
    pub participant_id: ParticipantId,
    /// Override flags.
    pub flags: ItemFlags,
    /// Participant's live weight when this item entered the snapshot.
    pub weight_before: f64,
    /// Participant's weight once this item's recalculation was applied.
    /// Equal to `weight_before` for non-regular items.
    pub weight_after: f64,
}

impl SnapshotItem {
    /// Whether this item takes part in weight recalculation.
    pub const fn is_regular(&self) -> bool {
        self.flags.is_regular()
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A persisted turn order together with its items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Snapshot {
    /// Store-assigned identity; larger ids are newer.
    pub id: SnapshotId,
    /// Free-text label supplied at generation (e.g. the lab or lesson).
    pub subject: String,
    /// When the snapshot was generated.
    pub created_at: DateTime<Utc>,
    /// When the snapshot was last edited.
    pub updated_at: DateTime<Utc>,
    /// Human-readable log of edits, oldest first.
    pub changelog: Vec<String>,
    /// Items ordered by position.
    pub items: Vec<SnapshotItem>,
}

impl Snapshot {
    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the snapshot has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The item at a 1-based position.
    pub fn item_at(&self, position: u32) -> Option<&SnapshotItem> {
        self.items.iter().find(|item| item.position == position)
    }

    /// The item belonging to a participant, if present.
    pub fn item_of(&self, participant_id: ParticipantId) -> Option<&SnapshotItem> {
        self.items
            .iter()
            .find(|item| item.participant_id == participant_id)
    }

    /// Whether the participant holds any item in this snapshot.
    pub fn contains(&self, participant_id: ParticipantId) -> bool {
        self.item_of(participant_id).is_some()
    }

    /// Regular items in position order.
    pub fn regular_items(&self) -> impl Iterator<Item = &SnapshotItem> {
        self.items.iter().filter(|item| item.is_regular())
    }

    /// Number of regular items.
    pub fn regular_count(&self) -> u32 {
        u32::try_from(self.regular_items().count()).unwrap_or(u32::MAX)
    }

    /// Largest position in use, or 0 for an empty snapshot.
    pub fn max_position(&self) -> u32 {
        self.items
            .iter()
            .map(|item| item.position)
            .max()
            .unwrap_or(0)
    }

    /// Whether positions are exactly `1..=len` with no gaps or duplicates.
    pub fn is_contiguous(&self) -> bool {
        let mut positions: Vec<u32> = self.items.iter().map(|item| item.position).collect();
        positions.sort_unstable();
        positions
            .iter()
            .zip(1_u32..)
            .all(|(&position, expected)| position == expected)
    }
}

// ---------------------------------------------------------------------------
// Weight history
// ---------------------------------------------------------------------------

/// One entry of a participant's append-only weight log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WeightHistoryRecord {
    /// Whose weight changed.
    pub participant_id: ParticipantId,
    /// The weight after the change.
    pub weight: f64,
    /// Snapshot responsible for the change, if any.
    pub snapshot_id: Option<SnapshotId>,
    /// Free-text cause annotation (e.g. `"cascade, relative position 2"`).
    pub cause: String,
    /// When the change was recorded.
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(position: u32, participant: i64, flags: ItemFlags) -> SnapshotItem {
        SnapshotItem {
            position,
            participant_id: ParticipantId(participant),
            flags,
            weight_before: DEFAULT_WEIGHT,
            weight_after: DEFAULT_WEIGHT,
        }
    }

    fn snapshot(items: Vec<SnapshotItem>) -> Snapshot {
        let now = Utc::now();
        Snapshot {
            id: SnapshotId(1),
            subject: String::from("lab 1"),
            created_at: now,
            updated_at: now,
            changelog: Vec::new(),
            items,
        }
    }

    #[test]
    fn clamp_weight_bounds() {
        assert!((clamp_weight(0.0) - MIN_WEIGHT).abs() < f64::EPSILON);
        assert!((clamp_weight(42.0) - MAX_WEIGHT).abs() < f64::EPSILON);
        assert!((clamp_weight(f64::NAN) - MIN_WEIGHT).abs() < f64::EPSILON);
        assert!((clamp_weight(f64::INFINITY) - MAX_WEIGHT).abs() < f64::EPSILON);
        assert!((clamp_weight(2.5) - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn only_unflagged_items_are_regular() {
        assert!(ItemFlags::REGULAR.is_regular());
        assert!(!ItemFlags::PRIORITY.is_regular());
        assert!(!ItemFlags::LATE.is_regular());
        assert!(!ItemFlags::REGULAR.added().is_regular());
    }

    #[test]
    fn snapshot_lookups() {
        let snap = snapshot(vec![
            item(1, 10, ItemFlags::PRIORITY),
            item(2, 20, ItemFlags::REGULAR),
            item(3, 30, ItemFlags::REGULAR),
        ]);
        assert_eq!(snap.item_at(2).map(|i| i.participant_id), Some(ParticipantId(20)));
        assert!(snap.item_at(4).is_none());
        assert!(snap.contains(ParticipantId(30)));
        assert!(!snap.contains(ParticipantId(40)));
        assert_eq!(snap.regular_count(), 2);
        assert_eq!(snap.max_position(), 3);
    }

    #[test]
    fn contiguity_detects_gaps_and_duplicates() {
        let ok = snapshot(vec![item(2, 1, ItemFlags::REGULAR), item(1, 2, ItemFlags::REGULAR)]);
        assert!(ok.is_contiguous());

        let gap = snapshot(vec![item(1, 1, ItemFlags::REGULAR), item(3, 2, ItemFlags::REGULAR)]);
        assert!(!gap.is_contiguous());

        let dup = snapshot(vec![item(1, 1, ItemFlags::REGULAR), item(1, 2, ItemFlags::REGULAR)]);
        assert!(!dup.is_contiguous());

        assert!(snapshot(Vec::new()).is_contiguous());
    }
}
