//! Fault-injecting [`QueueStore`] for unit tests.

use chrono::{DateTime, Utc};
use rota_types::{Participant, ParticipantId, Snapshot, SnapshotId, WeightHistoryRecord};

use crate::memory::MemoryStore;
use crate::store::{QueueStore, SnapshotDraft, SnapshotWrite, StoreError};

/// Wraps a [`MemoryStore`] and fails selected calls.
#[derive(Debug)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    /// Commits targeting this snapshot fail.
    pub fail_commit_on: Option<SnapshotId>,
    /// Eviction and history trimming fail.
    pub fail_housekeeping: bool,
}

impl FaultyStore {
    pub const fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_commit_on: None,
            fail_housekeeping: false,
        }
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Backend(format!("injected {what} failure").into())
}

impl QueueStore for FaultyStore {
    async fn participants(&self) -> Result<Vec<Participant>, StoreError> {
        self.inner.participants().await
    }

    async fn active_participants(&self) -> Result<Vec<Participant>, StoreError> {
        self.inner.active_participants().await
    }

    async fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, StoreError> {
        self.inner.participant(id).await
    }

    async fn register_participant(
        &self,
        id: ParticipantId,
        name: &str,
    ) -> Result<Participant, StoreError> {
        self.inner.register_participant(id, name).await
    }

    async fn set_active(&self, id: ParticipantId, active: bool) -> Result<(), StoreError> {
        self.inner.set_active(id, active).await
    }

    async fn reset_weights(&self, weight: f64, at: DateTime<Utc>) -> Result<usize, StoreError> {
        self.inner.reset_weights(weight, at).await
    }

    async fn snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>, StoreError> {
        self.inner.snapshot(id).await
    }

    async fn contains_participant(
        &self,
        snapshot_id: SnapshotId,
        participant_id: ParticipantId,
    ) -> Result<bool, StoreError> {
        self.inner
            .contains_participant(snapshot_id, participant_id)
            .await
    }

    async fn later_snapshot_ids(
        &self,
        after: SnapshotId,
        limit: Option<usize>,
    ) -> Result<Vec<SnapshotId>, StoreError> {
        self.inner.later_snapshot_ids(after, limit).await
    }

    async fn recent_snapshots(&self, limit: usize) -> Result<Vec<Snapshot>, StoreError> {
        self.inner.recent_snapshots(limit).await
    }

    async fn snapshot_count(&self) -> Result<usize, StoreError> {
        self.inner.snapshot_count().await
    }

    async fn insert_snapshot(&self, draft: SnapshotDraft) -> Result<SnapshotId, StoreError> {
        self.inner.insert_snapshot(draft).await
    }

    async fn commit(&self, write: SnapshotWrite) -> Result<(), StoreError> {
        if self.fail_commit_on == Some(write.snapshot_id) {
            return Err(injected("commit"));
        }
        self.inner.commit(write).await
    }

    async fn evict_oldest(&self, keep: usize) -> Result<Vec<SnapshotId>, StoreError> {
        if self.fail_housekeeping {
            return Err(injected("eviction"));
        }
        self.inner.evict_oldest(keep).await
    }

    async fn weight_history(
        &self,
        participant_id: ParticipantId,
        limit: usize,
    ) -> Result<Vec<WeightHistoryRecord>, StoreError> {
        self.inner.weight_history(participant_id, limit).await
    }

    async fn trim_weight_history(
        &self,
        participants: &[ParticipantId],
        keep: usize,
    ) -> Result<(), StoreError> {
        if self.fail_housekeeping {
            return Err(injected("trim"));
        }
        self.inner.trim_weight_history(participants, keep).await
    }
}
