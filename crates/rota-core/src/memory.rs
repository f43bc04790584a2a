//! In-process [`QueueStore`] backed by ordered maps.
//!
//! Used by tests and by deployments that do not need durability. Each
//! method takes the state lock once, so every call is atomic with respect
//! to every other call.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use rota_types::{
    DEFAULT_WEIGHT, Participant, ParticipantId, Snapshot, SnapshotId, WeightHistoryRecord,
};
use tokio::sync::Mutex;

use crate::store::{
    QueueStore, SnapshotDraft, SnapshotWrite, StoreError, WeightCause, WeightChange, WeightUpdate,
    same_weight,
};

#[derive(Debug, Default)]
struct MemoryState {
    participants: BTreeMap<ParticipantId, Participant>,
    snapshots: BTreeMap<SnapshotId, Snapshot>,
    history: BTreeMap<ParticipantId, VecDeque<WeightHistoryRecord>>,
    last_snapshot_id: i64,
}

impl MemoryState {
    /// Check every compare-and-set update before anything is written.
    fn check_weights(&self, updates: &[WeightUpdate]) -> Result<(), StoreError> {
        for update in updates {
            let participant = self
                .participants
                .get(&update.participant_id)
                .ok_or(StoreError::MissingParticipant(update.participant_id))?;
            if !same_weight(participant.weight, update.expected) {
                return Err(StoreError::Conflict {
                    participant_id: update.participant_id,
                    expected: update.expected,
                    actual: participant.weight,
                });
            }
        }
        Ok(())
    }

    fn apply_weights(&mut self, updates: &[WeightUpdate]) {
        for update in updates {
            if let Some(participant) = self.participants.get_mut(&update.participant_id) {
                participant.weight = update.weight;
            }
        }
    }

    fn append_history(
        &mut self,
        changes: Vec<WeightChange>,
        snapshot_id: Option<SnapshotId>,
        at: DateTime<Utc>,
    ) {
        for change in changes {
            self.history
                .entry(change.participant_id)
                .or_default()
                .push_back(change.into_record(snapshot_id, at));
        }
    }
}

/// A [`QueueStore`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with participants.
    pub fn with_participants(participants: impl IntoIterator<Item = Participant>) -> Self {
        let state = MemoryState {
            participants: participants.into_iter().map(|p| (p.id, p)).collect(),
            ..MemoryState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }
}

impl QueueStore for MemoryStore {
    async fn participants(&self) -> Result<Vec<Participant>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.participants.values().cloned().collect())
    }

    async fn active_participants(&self) -> Result<Vec<Participant>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .participants
            .values()
            .filter(|p| p.active)
            .cloned()
            .collect())
    }

    async fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.participants.get(&id).cloned())
    }

    async fn register_participant(
        &self,
        id: ParticipantId,
        name: &str,
    ) -> Result<Participant, StoreError> {
        let mut state = self.state.lock().await;
        let participant = state
            .participants
            .entry(id)
            .and_modify(|p| name.clone_into(&mut p.name))
            .or_insert_with(|| Participant::new(id, name));
        Ok(participant.clone())
    }

    async fn set_active(&self, id: ParticipantId, active: bool) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let participant = state
            .participants
            .get_mut(&id)
            .ok_or(StoreError::MissingParticipant(id))?;
        participant.active = active;
        Ok(())
    }

    async fn reset_weights(&self, weight: f64, at: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut changes = Vec::with_capacity(state.participants.len());
        for participant in state.participants.values_mut() {
            participant.weight = weight;
            changes.push(WeightChange {
                participant_id: participant.id,
                weight,
                cause: WeightCause::Reset,
            });
        }
        let count = changes.len();
        state.append_history(changes, None, at);
        Ok(count)
    }

    async fn snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.snapshots.get(&id).cloned())
    }

    async fn contains_participant(
        &self,
        snapshot_id: SnapshotId,
        participant_id: ParticipantId,
    ) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .get(&snapshot_id)
            .is_some_and(|s| s.contains(participant_id)))
    }

    async fn later_snapshot_ids(
        &self,
        after: SnapshotId,
        limit: Option<usize>,
    ) -> Result<Vec<SnapshotId>, StoreError> {
        let state = self.state.lock().await;
        let later = state
            .snapshots
            .keys()
            .copied()
            .filter(|id| *id > after)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        Ok(later)
    }

    async fn recent_snapshots(&self, limit: usize) -> Result<Vec<Snapshot>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.snapshots.values().rev().take(limit).cloned().collect())
    }

    async fn snapshot_count(&self) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        Ok(state.snapshots.len())
    }

    async fn insert_snapshot(&self, draft: SnapshotDraft) -> Result<SnapshotId, StoreError> {
        let mut state = self.state.lock().await;
        state.check_weights(&draft.weights)?;
        for item in &draft.items {
            if !state.participants.contains_key(&item.participant_id) {
                return Err(StoreError::MissingParticipant(item.participant_id));
            }
        }

        let next = state
            .last_snapshot_id
            .checked_add(1)
            .ok_or_else(|| StoreError::Corrupt(String::from("snapshot id space exhausted")))?;
        let id = SnapshotId(next);
        state.last_snapshot_id = next;

        let mut items = draft.items;
        items.sort_by_key(|item| item.position);
        state.snapshots.insert(
            id,
            Snapshot {
                id,
                subject: draft.subject,
                created_at: draft.created_at,
                updated_at: draft.created_at,
                changelog: Vec::new(),
                items,
            },
        );
        state.apply_weights(&draft.weights);
        state.append_history(draft.history, Some(id), draft.created_at);
        Ok(id)
    }

    async fn commit(&self, write: SnapshotWrite) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.snapshots.contains_key(&write.snapshot_id) {
            return Err(StoreError::MissingSnapshot(write.snapshot_id));
        }
        state.check_weights(&write.weights)?;

        let mut items = write.items;
        items.sort_by_key(|item| item.position);
        if let Some(snapshot) = state.snapshots.get_mut(&write.snapshot_id) {
            snapshot.items = items;
            snapshot.updated_at = write.at;
            if let Some(note) = write.note {
                snapshot.changelog.push(note);
            }
        }
        state.apply_weights(&write.weights);
        state.append_history(write.history, Some(write.snapshot_id), write.at);
        Ok(())
    }

    async fn evict_oldest(&self, keep: usize) -> Result<Vec<SnapshotId>, StoreError> {
        let mut state = self.state.lock().await;
        let mut evicted = Vec::new();
        while state.snapshots.len() > keep {
            match state.snapshots.pop_first() {
                Some((id, _)) => evicted.push(id),
                None => break,
            }
        }
        Ok(evicted)
    }

    async fn weight_history(
        &self,
        participant_id: ParticipantId,
        limit: usize,
    ) -> Result<Vec<WeightHistoryRecord>, StoreError> {
        let state = self.state.lock().await;
        let Some(records) = state.history.get(&participant_id) else {
            return Ok(Vec::new());
        };
        let skip = records.len().saturating_sub(limit);
        Ok(records.iter().skip(skip).cloned().collect())
    }

    async fn trim_weight_history(
        &self,
        participants: &[ParticipantId],
        keep: usize,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for id in participants {
            if let Some(records) = state.history.get_mut(id) {
                while records.len() > keep {
                    records.pop_front();
                }
            }
        }
        Ok(())
    }
}

/// Active participants with ids `1..` and the default weight, in the
/// order the names are given. Handy for seeding tests and demos.
pub fn numbered_roster(names: &[&str]) -> Vec<Participant> {
    names
        .iter()
        .zip(1_i64..)
        .map(|(name, id)| Participant {
            id: ParticipantId(id),
            name: (*name).to_owned(),
            weight: DEFAULT_WEIGHT,
            active: true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rota_types::{ItemFlags, SnapshotItem};

    use super::*;

    fn draft(participants: &[i64]) -> SnapshotDraft {
        SnapshotDraft {
            subject: String::from("lab"),
            items: participants
                .iter()
                .zip(1_u32..)
                .map(|(&id, position)| SnapshotItem {
                    position,
                    participant_id: ParticipantId(id),
                    flags: ItemFlags::REGULAR,
                    weight_before: 1.0,
                    weight_after: 1.0,
                })
                .collect(),
            weights: Vec::new(),
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn snapshot_ids_increase_and_eviction_drops_oldest() {
        let store = MemoryStore::with_participants(numbered_roster(&["a", "b"]));
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(store.insert_snapshot(draft(&[1, 2])).await.unwrap_or(SnapshotId(0)));
        }
        assert_eq!(ids, vec![SnapshotId(1), SnapshotId(2), SnapshotId(3), SnapshotId(4)]);

        let evicted = store.evict_oldest(2).await.unwrap_or_default();
        assert_eq!(evicted, vec![SnapshotId(1), SnapshotId(2)]);
        assert_eq!(store.snapshot_count().await.ok(), Some(2));
        assert!(store.snapshot(SnapshotId(1)).await.ok().flatten().is_none());

        let later = store.later_snapshot_ids(SnapshotId(1), None).await.unwrap_or_default();
        assert_eq!(later, vec![SnapshotId(3), SnapshotId(4)]);
        let capped = store.later_snapshot_ids(SnapshotId(1), Some(1)).await.unwrap_or_default();
        assert_eq!(capped, vec![SnapshotId(3)]);
    }

    #[tokio::test]
    async fn stale_compare_and_set_rejects_the_whole_write() {
        let store = MemoryStore::with_participants(numbered_roster(&["a", "b"]));
        let id = store.insert_snapshot(draft(&[1, 2])).await.unwrap_or(SnapshotId(0));

        let write = SnapshotWrite {
            snapshot_id: id,
            items: Vec::new(),
            weights: vec![
                WeightUpdate {
                    participant_id: ParticipantId(1),
                    expected: 1.0,
                    weight: 2.0,
                },
                WeightUpdate {
                    participant_id: ParticipantId(2),
                    expected: 3.0,
                    weight: 2.0,
                },
            ],
            history: Vec::new(),
            note: Some(String::from("should not land")),
            at: Utc::now(),
        };
        let result = store.commit(write).await;
        assert!(matches!(result, Err(StoreError::Conflict { .. })));

        let snapshot = store.snapshot(id).await.ok().flatten();
        assert_eq!(snapshot.as_ref().map(Snapshot::len), Some(2));
        assert!(snapshot.is_some_and(|s| s.changelog.is_empty()));
        let first = store.participant(ParticipantId(1)).await.ok().flatten();
        assert!(first.is_some_and(|p| same_weight(p.weight, 1.0)));
    }

    #[tokio::test]
    async fn history_is_chronological_and_trimmed() {
        let store = MemoryStore::with_participants(numbered_roster(&["a"]));
        for _ in 0..5 {
            let _ = store.reset_weights(1.0, Utc::now()).await;
        }
        let all = store.weight_history(ParticipantId(1), 10).await.unwrap_or_default();
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w.first().map(|r| r.recorded_at) <= w.get(1).map(|r| r.recorded_at)));

        let newest = store.weight_history(ParticipantId(1), 2).await.unwrap_or_default();
        assert_eq!(newest.len(), 2);

        let _ = store.trim_weight_history(&[ParticipantId(1)], 3).await;
        let kept = store.weight_history(ParticipantId(1), 10).await.unwrap_or_default();
        assert_eq!(kept.len(), 3);
    }

    #[tokio::test]
    async fn register_renames_without_touching_weight() {
        let store = MemoryStore::new();
        let _ = store.register_participant(ParticipantId(9), "Ann").await;
        let _ = store.reset_weights(2.0, Utc::now()).await;
        let renamed = store.register_participant(ParticipantId(9), "Anna").await.ok();
        assert_eq!(renamed.as_ref().map(|p| p.name.as_str()), Some("Anna"));
        assert!(renamed.is_some_and(|p| same_weight(p.weight, 2.0)));

        assert!(store.set_active(ParticipantId(9), false).await.is_ok());
        assert!(store.active_participants().await.unwrap_or_default().is_empty());
        assert!(matches!(
            store.set_active(ParticipantId(1), true).await,
            Err(StoreError::MissingParticipant(_))
        ));
    }
}
