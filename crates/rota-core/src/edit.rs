//! Local edits of one existing snapshot.
//!
//! Each planner validates a request against a loaded [`Snapshot`] and the
//! current roster and returns an [`EditPlan`]: the complete rewrite to hand
//! to [`QueueStore::commit`](crate::store::QueueStore::commit) plus the
//! participants whose live weight the rewrite changes. Planners never touch
//! the store, so a rejected request writes nothing.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rota_types::{ItemFlags, Participant, ParticipantId, Snapshot, SnapshotItem};

use crate::error::{InvalidOperation, Missing, RotationError, ValidationError};
use crate::store::{SnapshotWrite, WeightCause, WeightChange, WeightUpdate, same_weight};
use crate::weight::WeightRecalculator;

/// Every participant keyed by id, as read at the start of an edit.
pub type Roster = BTreeMap<ParticipantId, Participant>;

/// A validated edit, ready to commit.
#[derive(Debug, Clone, PartialEq)]
pub struct EditPlan {
    /// The snapshot rewrite.
    pub write: SnapshotWrite,
    /// Participants whose live weight the write changes; seeds the cascade.
    pub touched: BTreeSet<ParticipantId>,
}

fn item_at(snapshot: &Snapshot, position: u32) -> Result<&SnapshotItem, Missing> {
    snapshot.item_at(position).ok_or(Missing::Position {
        snapshot_id: snapshot.id,
        position,
    })
}

fn member(roster: &Roster, id: ParticipantId) -> Result<&Participant, Missing> {
    roster.get(&id).ok_or(Missing::Participant(id))
}

/// Swap the items at positions `a` and `b`, then recalculate every regular
/// item of the snapshot from its own `weight_before`.
///
/// # Errors
///
/// - [`InvalidOperation::SamePosition`] when `a == b`.
/// - [`Missing::Position`] when either position is empty.
/// - [`InvalidOperation::NotEnoughRegularItems`] with fewer than two
///   regular items.
/// - [`InvalidOperation::PinnedItem`] when either item is priority, late or
///   added after creation.
/// - [`Missing::Participant`] when a recalculated participant is not in the
///   roster.
pub fn plan_swap(
    snapshot: &Snapshot,
    a: u32,
    b: u32,
    roster: &Roster,
    recalculator: &WeightRecalculator,
    at: DateTime<Utc>,
) -> Result<EditPlan, RotationError> {
    if a == b {
        return Err(InvalidOperation::SamePosition {
            snapshot_id: snapshot.id,
            position: a,
        }
        .into());
    }
    let first = *item_at(snapshot, a)?;
    let second = *item_at(snapshot, b)?;

    let regular = snapshot.regular_count();
    if regular < 2 {
        return Err(InvalidOperation::NotEnoughRegularItems {
            snapshot_id: snapshot.id,
            regular,
        }
        .into());
    }
    for item in [&first, &second] {
        if !item.is_regular() {
            return Err(InvalidOperation::PinnedItem {
                snapshot_id: snapshot.id,
                position: item.position,
                flags: item.flags,
            }
            .into());
        }
    }

    let note = format!(
        "swapped #{a} {} with #{b} {}",
        display_name(roster, first.participant_id),
        display_name(roster, second.participant_id)
    );

    let mut items = snapshot.items.clone();
    for item in &mut items {
        let source = if item.position == a {
            second
        } else if item.position == b {
            first
        } else {
            continue;
        };
        *item = SnapshotItem {
            position: item.position,
            ..source
        };
    }
    items.sort_by_key(|item| item.position);

    let mut weights = Vec::new();
    let mut history = Vec::new();
    let mut touched = BTreeSet::new();
    let mut relative = 0_u32;
    for item in items.iter_mut().filter(|item| item.is_regular()) {
        relative = relative.saturating_add(1);
        let weight_after = recalculator.new_weight(item.weight_before, relative, regular);
        if same_weight(weight_after, item.weight_after) {
            continue;
        }
        let live = member(roster, item.participant_id)?.weight;
        item.weight_after = weight_after;
        weights.push(WeightUpdate {
            participant_id: item.participant_id,
            expected: live,
            weight: weight_after,
        });
        history.push(WeightChange {
            participant_id: item.participant_id,
            weight: weight_after,
            cause: WeightCause::Swapped {
                relative_position: relative,
            },
        });
        touched.insert(item.participant_id);
    }

    Ok(EditPlan {
        write: SnapshotWrite {
            snapshot_id: snapshot.id,
            items,
            weights,
            history,
            note: Some(note),
            at,
        },
        touched,
    })
}

/// Remove the item at `position`, roll its participant's live weight back
/// to the item's `weight_before` and close the gap.
///
/// Returns the plan and the removed item.
///
/// # Errors
///
/// - [`Missing::Position`] when the position is empty.
/// - [`Missing::Participant`] when the removed participant is not in the
///   roster.
pub fn plan_delete(
    snapshot: &Snapshot,
    position: u32,
    roster: &Roster,
    at: DateTime<Utc>,
) -> Result<(EditPlan, SnapshotItem), RotationError> {
    let removed = *item_at(snapshot, position)?;
    let participant = member(roster, removed.participant_id)?;

    // The rollback is always logged; only a real change is written and
    // cascaded.
    let history = vec![WeightChange {
        participant_id: removed.participant_id,
        weight: removed.weight_before,
        cause: WeightCause::RolledBack,
    }];
    let mut weights = Vec::new();
    let mut touched = BTreeSet::new();
    if !same_weight(participant.weight, removed.weight_before) {
        weights.push(WeightUpdate {
            participant_id: removed.participant_id,
            expected: participant.weight,
            weight: removed.weight_before,
        });
        touched.insert(removed.participant_id);
    }

    let items = snapshot
        .items
        .iter()
        .filter(|item| item.position != position)
        .map(|item| SnapshotItem {
            position: if item.position > position {
                item.position.saturating_sub(1)
            } else {
                item.position
            },
            ..*item
        })
        .collect();

    let plan = EditPlan {
        write: SnapshotWrite {
            snapshot_id: snapshot.id,
            items,
            weights,
            history,
            note: Some(format!("removed #{position} {}", participant.name)),
            at,
        },
        touched,
    };
    Ok((plan, removed))
}

/// Append `participant_id` at the end of the snapshot without changing any
/// weight.
///
/// Only the `priority` and `late` bits of `flags` are honored; the item is
/// always marked as added after creation.
///
/// Returns the plan and the new item.
///
/// # Errors
///
/// - [`ValidationError::ConflictingFlags`] when both priority and late are set.
/// - [`Missing::Participant`] when the participant is not in the roster.
/// - [`InvalidOperation::AlreadyPresent`] when it already holds an item.
pub fn plan_add(
    snapshot: &Snapshot,
    participant_id: ParticipantId,
    flags: ItemFlags,
    roster: &Roster,
    at: DateTime<Utc>,
) -> Result<(EditPlan, SnapshotItem), RotationError> {
    if flags.priority && flags.late {
        return Err(ValidationError::ConflictingFlags.into());
    }
    let participant = member(roster, participant_id)?;
    if snapshot.contains(participant_id) {
        return Err(InvalidOperation::AlreadyPresent {
            snapshot_id: snapshot.id,
            participant_id,
        }
        .into());
    }

    let item = SnapshotItem {
        position: snapshot.max_position().saturating_add(1),
        participant_id,
        flags: ItemFlags {
            priority: flags.priority,
            late: flags.late,
            added_after_creation: false,
        }
        .added(),
        weight_before: participant.weight,
        weight_after: participant.weight,
    };
    let mut items = snapshot.items.clone();
    items.push(item);

    let plan = EditPlan {
        write: SnapshotWrite {
            snapshot_id: snapshot.id,
            items,
            weights: Vec::new(),
            history: Vec::new(),
            note: Some(format!("added #{} {}", item.position, participant.name)),
            at,
        },
        touched: BTreeSet::new(),
    };
    Ok((plan, item))
}

fn display_name(roster: &Roster, id: ParticipantId) -> String {
    roster
        .get(&id)
        .map_or_else(|| id.to_string(), |p| p.name.clone())
}
