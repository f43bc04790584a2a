//! Forward propagation of a weight edit into later snapshots.
//!
//! After a swap or delete changes some participants' live weights, every
//! later snapshot that holds one of those participants as a *regular* item
//! is replayed for that participant only:
//!
//! 1. `weight_before` becomes the participant's current live weight;
//! 2. its rank among the snapshot's regular items is computed fresh;
//! 3. `weight_after` is recalculated and becomes the new live weight.
//!
//! The touched set never grows. Participants merely sharing a later
//! snapshot are left exactly as they were, and so is every snapshot that
//! holds no touched participant as a regular item.
//!
//! Steps commit one snapshot at a time. A failure halfway leaves earlier
//! steps in place and is reported as [`RotationError::CascadeIncomplete`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rota_types::{ParticipantId, Snapshot, SnapshotId};
use tracing::{debug, warn};

use crate::error::RotationError;
use crate::store::{QueueStore, SnapshotWrite, StoreError, WeightCause, WeightChange, WeightUpdate};
use crate::weight::{WeightRecalculator, relative_positions};

/// One participant replayed in one later snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeStep {
    /// The later snapshot rewritten.
    pub snapshot_id: SnapshotId,
    /// The replayed participant.
    pub participant_id: ParticipantId,
    /// Its rank among the snapshot's regular items.
    pub relative_position: u32,
    /// New `weight_before` (the live weight at replay time).
    pub weight_before: f64,
    /// New `weight_after`, now also the live weight.
    pub weight_after: f64,
}

/// What a completed cascade did.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeReport {
    /// The edited snapshot.
    pub origin: SnapshotId,
    /// Participants replayed forward.
    pub touched: BTreeSet<ParticipantId>,
    /// Steps in the order they were committed.
    pub steps: Vec<CascadeStep>,
}

impl CascadeReport {
    /// Distinct later snapshots rewritten.
    pub fn snapshots_rewritten(&self) -> usize {
        self.steps
            .iter()
            .map(|step| step.snapshot_id)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Plan the replay of `touched` in one later snapshot.
///
/// `live` holds the current live weight of every touched participant.
/// Returns `None` when no touched participant is a regular item here.
///
/// # Errors
///
/// [`StoreError::MissingParticipant`] when a replayed participant has no
/// live weight.
pub fn plan_step(
    snapshot: &Snapshot,
    origin: SnapshotId,
    touched: &BTreeSet<ParticipantId>,
    live: &BTreeMap<ParticipantId, f64>,
    recalculator: &WeightRecalculator,
    at: DateTime<Utc>,
) -> Result<Option<(SnapshotWrite, Vec<CascadeStep>)>, StoreError> {
    let total = snapshot.regular_count();
    let ranks: BTreeMap<u32, u32> = relative_positions(&snapshot.items).into_iter().collect();

    let mut items = snapshot.items.clone();
    let mut weights = Vec::new();
    let mut history = Vec::new();
    let mut steps = Vec::new();

    for item in items.iter_mut() {
        if !item.is_regular() || !touched.contains(&item.participant_id) {
            continue;
        }
        let Some(&relative_position) = ranks.get(&item.position) else {
            continue;
        };
        let current = *live
            .get(&item.participant_id)
            .ok_or(StoreError::MissingParticipant(item.participant_id))?;
        let weight_after = recalculator.new_weight(current, relative_position, total);

        item.weight_before = current;
        item.weight_after = weight_after;
        weights.push(WeightUpdate {
            participant_id: item.participant_id,
            expected: current,
            weight: weight_after,
        });
        history.push(WeightChange {
            participant_id: item.participant_id,
            weight: weight_after,
            cause: WeightCause::Cascaded {
                origin,
                relative_position,
            },
        });
        steps.push(CascadeStep {
            snapshot_id: snapshot.id,
            participant_id: item.participant_id,
            relative_position,
            weight_before: current,
            weight_after,
        });
    }

    if steps.is_empty() {
        return Ok(None);
    }
    let write = SnapshotWrite {
        snapshot_id: snapshot.id,
        items,
        weights,
        history,
        note: None,
        at,
    };
    Ok(Some((write, steps)))
}

/// Replay `touched` into every snapshot after `origin`, ascending, visiting
/// at most `limit` of them.
///
/// The caller holds the mutation lock and has already committed the local
/// edit of `origin`.
///
/// # Errors
///
/// [`RotationError::CascadeIncomplete`] when any read or commit fails; the
/// steps committed before the failure stay.
pub async fn run<S: QueueStore>(
    store: &S,
    recalculator: &WeightRecalculator,
    origin: SnapshotId,
    touched: BTreeSet<ParticipantId>,
    limit: Option<usize>,
) -> Result<CascadeReport, RotationError> {
    let mut report = CascadeReport {
        origin,
        touched,
        steps: Vec::new(),
    };
    if report.touched.is_empty() {
        return Ok(report);
    }

    let later = store
        .later_snapshot_ids(origin, limit)
        .await
        .map_err(|source| incomplete(&report, None, source))?;

    for snapshot_id in later {
        match step(store, recalculator, &report, snapshot_id).await {
            Ok(steps) => report.steps.extend(steps),
            Err(source) => {
                warn!(
                    origin = %origin,
                    stopped_at = %snapshot_id,
                    applied = report.steps.len(),
                    error = %source,
                    "Cascade stopped early"
                );
                return Err(incomplete(&report, Some(snapshot_id), source));
            }
        }
    }
    Ok(report)
}

async fn step<S: QueueStore>(
    store: &S,
    recalculator: &WeightRecalculator,
    report: &CascadeReport,
    snapshot_id: SnapshotId,
) -> Result<Vec<CascadeStep>, StoreError> {
    let Some(snapshot) = store.snapshot(snapshot_id).await? else {
        debug!(snapshot = %snapshot_id, "Later snapshot vanished, skipping");
        return Ok(Vec::new());
    };

    let mut live = BTreeMap::new();
    for &participant_id in &report.touched {
        if !snapshot.regular_items().any(|i| i.participant_id == participant_id) {
            continue;
        }
        let participant = store
            .participant(participant_id)
            .await?
            .ok_or(StoreError::MissingParticipant(participant_id))?;
        live.insert(participant_id, participant.weight);
    }
    if live.is_empty() {
        return Ok(Vec::new());
    }

    let Some((write, steps)) = plan_step(
        &snapshot,
        report.origin,
        &report.touched,
        &live,
        recalculator,
        Utc::now(),
    )?
    else {
        return Ok(Vec::new());
    };
    store.commit(write).await?;
    for s in &steps {
        debug!(
            origin = %report.origin,
            snapshot = %s.snapshot_id,
            participant = %s.participant_id,
            relative_position = s.relative_position,
            before = s.weight_before,
            after = s.weight_after,
            "Cascade step"
        );
    }
    Ok(steps)
}

fn incomplete(report: &CascadeReport, stopped_at: Option<SnapshotId>, source: StoreError) -> RotationError {
    RotationError::CascadeIncomplete {
        origin: report.origin,
        stopped_at,
        applied: report.steps.len(),
        source,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rota_types::{ItemFlags, SnapshotItem};

    use super::*;
    use crate::memory::{MemoryStore, numbered_roster};
    use crate::store::{SnapshotDraft, same_weight};
    use crate::testing::FaultyStore;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-4
    }

    fn item(position: u32, id: i64, flags: ItemFlags, before: f64, after: f64) -> SnapshotItem {
        SnapshotItem {
            position,
            participant_id: ParticipantId(id),
            flags,
            weight_before: before,
            weight_after: after,
        }
    }

    fn draft(items: Vec<SnapshotItem>) -> SnapshotDraft {
        SnapshotDraft {
            subject: "lab".to_owned(),
            items,
            weights: Vec::new(),
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn step_replays_only_touched_regular_items() {
        let now = Utc::now();
        let snapshot = Snapshot {
            id: SnapshotId(5),
            subject: "lab".to_owned(),
            created_at: now,
            updated_at: now,
            changelog: Vec::new(),
            items: vec![
                item(1, 2, ItemFlags::PRIORITY, 1.0, 1.0),
                item(2, 3, ItemFlags::REGULAR, 1.0, 0.7165),
                item(3, 1, ItemFlags::REGULAR, 1.0, 1.3956),
                item(4, 4, ItemFlags::LATE, 1.0, 1.0),
            ],
        };
        let touched: BTreeSet<ParticipantId> = [ParticipantId(1), ParticipantId(2)].into();
        let live: BTreeMap<ParticipantId, f64> = [(ParticipantId(1), 2.0)].into();

        let planned = plan_step(
            &snapshot,
            SnapshotId(3),
            &touched,
            &live,
            &WeightRecalculator::default(),
            now,
        );
        let (write, steps) = planned.unwrap().unwrap();

        // Participant 2 is touched but pinned here, so only 1 is replayed.
        assert_eq!(steps.len(), 1);
        let replayed = write.items.get(2);
        assert!(replayed.is_some_and(|i| same_weight(i.weight_before, 2.0)));
        assert!(replayed.is_some_and(|i| approx(i.weight_after, 2.0 * 0.25_f64.exp())));
        assert_eq!(write.items.first(), snapshot.items.first());
        assert_eq!(write.items.get(1), snapshot.items.get(1));
        assert_eq!(write.items.get(3), snapshot.items.get(3));
        assert_eq!(
            write.history.first().map(|h| h.cause),
            Some(WeightCause::Cascaded {
                origin: SnapshotId(3),
                relative_position: 2
            })
        );
    }

    #[test]
    fn step_without_touched_regulars_is_skipped() {
        let now = Utc::now();
        let snapshot = Snapshot {
            id: SnapshotId(2),
            subject: "lab".to_owned(),
            created_at: now,
            updated_at: now,
            changelog: Vec::new(),
            items: vec![
                item(1, 1, ItemFlags::REGULAR.added(), 1.0, 1.0),
                item(2, 2, ItemFlags::REGULAR, 1.0, 1.0),
            ],
        };
        let touched: BTreeSet<ParticipantId> = [ParticipantId(1)].into();
        let planned = plan_step(
            &snapshot,
            SnapshotId(1),
            &touched,
            &BTreeMap::new(),
            &WeightRecalculator::default(),
            now,
        );
        assert!(matches!(planned, Ok(None)));
    }

    #[tokio::test]
    async fn cascade_chains_live_weights_through_later_snapshots() {
        let store = MemoryStore::with_participants(numbered_roster(&["A", "B", "C"]));
        for _ in 0..3 {
            let inserted = store
                .insert_snapshot(draft(vec![
                    item(1, 1, ItemFlags::REGULAR, 1.0, 1.0),
                    item(2, 2, ItemFlags::REGULAR, 1.0, 1.0),
                ]))
                .await;
            assert!(inserted.is_ok());
        }
        let untouched_before = store.snapshot(SnapshotId(2)).await.ok().flatten();

        let touched: BTreeSet<ParticipantId> = [ParticipantId(2)].into();
        let report = run(
            &store,
            &WeightRecalculator::default(),
            SnapshotId(1),
            touched,
            None,
        )
        .await;
        let report = report.unwrap();
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.snapshots_rewritten(), 2);

        // B is last of two regulars each time: 1.0 -> e^0.25 -> e^0.5.
        let second = report.steps.get(1);
        assert!(second.is_some_and(|s| approx(s.weight_before, 0.25_f64.exp())));
        assert!(second.is_some_and(|s| approx(s.weight_after, 0.5_f64.exp())));
        let live = store.participant(ParticipantId(2)).await.ok().flatten();
        assert!(live.is_some_and(|p| approx(p.weight, 0.5_f64.exp())));

        // A's items never move.
        let after = store.snapshot(SnapshotId(2)).await.ok().flatten();
        assert_eq!(
            after.as_ref().and_then(|s| s.item_at(1).copied()),
            untouched_before.as_ref().and_then(|s| s.item_at(1).copied())
        );
        let history = store.weight_history(ParticipantId(2), 10).await.unwrap_or_default();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.cause.starts_with("cascade from snapshot 1")));
    }

    #[tokio::test]
    async fn cascade_respects_the_limit() {
        let store = MemoryStore::with_participants(numbered_roster(&["A", "B"]));
        for _ in 0..4 {
            let inserted = store
                .insert_snapshot(draft(vec![
                    item(1, 1, ItemFlags::REGULAR, 1.0, 1.0),
                    item(2, 2, ItemFlags::REGULAR, 1.0, 1.0),
                ]))
                .await;
            assert!(inserted.is_ok());
        }
        let report = run(
            &store,
            &WeightRecalculator::default(),
            SnapshotId(1),
            [ParticipantId(1)].into(),
            Some(1),
        )
        .await;
        assert_eq!(report.ok().map(|r| r.snapshots_rewritten()), Some(1));
        let last = store.snapshot(SnapshotId(4)).await.ok().flatten();
        assert!(last.is_some_and(|s| s.item_at(1).is_some_and(|i| same_weight(i.weight_after, 1.0))));
    }

    #[tokio::test]
    async fn failure_keeps_earlier_steps_and_reports_where_it_stopped() {
        let mut store = FaultyStore::new(MemoryStore::with_participants(numbered_roster(&[
            "A", "B",
        ])));
        for _ in 0..4 {
            let inserted = store
                .insert_snapshot(draft(vec![
                    item(1, 1, ItemFlags::REGULAR, 1.0, 1.0),
                    item(2, 2, ItemFlags::REGULAR, 1.0, 1.0),
                ]))
                .await;
            assert!(inserted.is_ok());
        }
        store.fail_commit_on = Some(SnapshotId(3));
        let third_before = store.snapshot(SnapshotId(3)).await.unwrap();
        let fourth_before = store.snapshot(SnapshotId(4)).await.unwrap();

        let result = run(
            &store,
            &WeightRecalculator::default(),
            SnapshotId(1),
            [ParticipantId(2)].into(),
            None,
        )
        .await;

        assert!(matches!(
            result,
            Err(RotationError::CascadeIncomplete {
                origin: SnapshotId(1),
                stopped_at: Some(SnapshotId(3)),
                applied: 1,
                source: StoreError::Backend(_),
            })
        ));

        // Snapshot 2 stays rewritten; 3 and 4 are as they were.
        let second = store.snapshot(SnapshotId(2)).await.unwrap().unwrap();
        let replayed = second.item_at(2).unwrap();
        assert!(same_weight(replayed.weight_before, 1.0));
        assert!(approx(replayed.weight_after, 0.25_f64.exp()));
        assert_eq!(store.snapshot(SnapshotId(3)).await.unwrap(), third_before);
        assert_eq!(store.snapshot(SnapshotId(4)).await.unwrap(), fourth_before);

        let live = store.participant(ParticipantId(2)).await.unwrap().unwrap();
        assert!(approx(live.weight, 0.25_f64.exp()));
        let history = store.weight_history(ParticipantId(2), 10).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn empty_touched_set_does_nothing() {
        let store = MemoryStore::new();
        let report = run(
            &store,
            &WeightRecalculator::default(),
            SnapshotId(1),
            BTreeSet::new(),
            None,
        )
        .await;
        assert!(report.is_ok_and(|r| r.steps.is_empty()));
    }
}
