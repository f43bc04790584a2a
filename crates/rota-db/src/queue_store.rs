//! [`QueueStore`] over `PostgreSQL`.
//!
//! Every trait method is one short transaction (or a single statement).
//! Writes that belong together, a snapshot's items with its live-weight
//! updates and history records, are applied in the same transaction, so a
//! failed call leaves no trace.

use chrono::{DateTime, Utc};
use rota_core::store::{QueueStore, SnapshotDraft, SnapshotWrite, StoreError, WeightCause, WeightChange};
use rota_types::{Participant, ParticipantId, Snapshot, SnapshotId, WeightHistoryRecord};

use crate::error::DbError;
use crate::history_store::{self, HistoryStore};
use crate::participant_store::{self, ParticipantStore};
use crate::postgres::PostgresPool;
use crate::snapshot_store::{self, SnapshotStore};

/// Durable [`QueueStore`] backed by a [`PostgresPool`].
#[derive(Debug, Clone)]
pub struct PgQueueStore {
    pool: PostgresPool,
}

impl PgQueueStore {
    /// Wrap a connected pool. Migrations are the caller's business.
    pub const fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &PostgresPool {
        &self.pool
    }

    fn participants_table(&self) -> ParticipantStore<'_> {
        ParticipantStore::new(self.pool.pool())
    }

    fn snapshots_table(&self) -> SnapshotStore<'_> {
        SnapshotStore::new(self.pool.pool())
    }

    fn history_table(&self) -> HistoryStore<'_> {
        HistoryStore::new(self.pool.pool())
    }

    async fn insert_draft(&self, draft: SnapshotDraft) -> Result<SnapshotId, DbError> {
        let mut tx = self.pool.pool().begin().await?;

        participant_store::apply_weights(&mut *tx, &draft.weights).await?;
        let id = snapshot_store::insert_header(&mut *tx, &draft.subject, draft.created_at).await?;
        snapshot_store::replace_items(&mut *tx, id, &draft.items).await?;
        history_store::append(&mut *tx, &records(draft.history, Some(id), draft.created_at)).await?;

        tx.commit().await?;
        tracing::debug!(snapshot = %id, items = draft.items.len(), "Inserted snapshot");
        Ok(id)
    }

    async fn apply_write(&self, write: SnapshotWrite) -> Result<(), DbError> {
        let mut tx = self.pool.pool().begin().await?;

        snapshot_store::touch(&mut *tx, write.snapshot_id, write.note.as_deref(), write.at).await?;
        participant_store::apply_weights(&mut *tx, &write.weights).await?;
        snapshot_store::replace_items(&mut *tx, write.snapshot_id, &write.items).await?;
        history_store::append(&mut *tx, &records(write.history, Some(write.snapshot_id), write.at))
            .await?;

        tx.commit().await?;
        tracing::debug!(
            snapshot = %write.snapshot_id,
            weights = write.weights.len(),
            "Committed snapshot rewrite"
        );
        Ok(())
    }

    async fn reset(&self, weight: f64, at: DateTime<Utc>) -> Result<usize, DbError> {
        let mut tx = self.pool.pool().begin().await?;
        let ids = participant_store::reset_all(&mut *tx, weight).await?;
        let changes = ids
            .iter()
            .map(|&participant_id| WeightChange {
                participant_id,
                weight,
                cause: WeightCause::Reset,
            })
            .collect();
        history_store::append(&mut *tx, &records(changes, None, at)).await?;
        tx.commit().await?;
        Ok(ids.len())
    }
}

fn records(
    changes: Vec<WeightChange>,
    snapshot_id: Option<SnapshotId>,
    at: DateTime<Utc>,
) -> Vec<WeightHistoryRecord> {
    changes
        .into_iter()
        .map(|change| change.into_record(snapshot_id, at))
        .collect()
}

impl QueueStore for PgQueueStore {
    async fn participants(&self) -> Result<Vec<Participant>, StoreError> {
        Ok(self.participants_table().all().await?)
    }

    async fn active_participants(&self) -> Result<Vec<Participant>, StoreError> {
        Ok(self.participants_table().active().await?)
    }

    async fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, StoreError> {
        Ok(self.participants_table().get(id).await?)
    }

    async fn register_participant(
        &self,
        id: ParticipantId,
        name: &str,
    ) -> Result<Participant, StoreError> {
        Ok(self.participants_table().upsert(id, name).await?)
    }

    async fn set_active(&self, id: ParticipantId, active: bool) -> Result<(), StoreError> {
        Ok(self.participants_table().set_active(id, active).await?)
    }

    async fn reset_weights(&self, weight: f64, at: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.reset(weight, at).await?)
    }

    async fn snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.snapshots_table().get(id).await?)
    }

    async fn contains_participant(
        &self,
        snapshot_id: SnapshotId,
        participant_id: ParticipantId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .snapshots_table()
            .contains(snapshot_id, participant_id)
            .await?)
    }

    async fn later_snapshot_ids(
        &self,
        after: SnapshotId,
        limit: Option<usize>,
    ) -> Result<Vec<SnapshotId>, StoreError> {
        Ok(self.snapshots_table().later_ids(after, limit).await?)
    }

    async fn recent_snapshots(&self, limit: usize) -> Result<Vec<Snapshot>, StoreError> {
        Ok(self.snapshots_table().recent(limit).await?)
    }

    async fn snapshot_count(&self) -> Result<usize, StoreError> {
        Ok(self.snapshots_table().count().await?)
    }

    async fn insert_snapshot(&self, draft: SnapshotDraft) -> Result<SnapshotId, StoreError> {
        Ok(self.insert_draft(draft).await?)
    }

    async fn commit(&self, write: SnapshotWrite) -> Result<(), StoreError> {
        Ok(self.apply_write(write).await?)
    }

    async fn evict_oldest(&self, keep: usize) -> Result<Vec<SnapshotId>, StoreError> {
        Ok(self.snapshots_table().evict_oldest(keep).await?)
    }

    async fn weight_history(
        &self,
        participant_id: ParticipantId,
        limit: usize,
    ) -> Result<Vec<WeightHistoryRecord>, StoreError> {
        Ok(self
            .history_table()
            .for_participant(participant_id, limit)
            .await?)
    }

    async fn trim_weight_history(
        &self,
        participants: &[ParticipantId],
        keep: usize,
    ) -> Result<(), StoreError> {
        self.history_table().trim(participants, keep).await?;
        Ok(())
    }
}
