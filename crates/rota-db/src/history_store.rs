//! Weight-history persistence.
//!
//! The log is append-only apart from retention: each participant keeps
//! only its newest records. Appends run inside a caller's transaction as
//! one `UNNEST` insert.

use chrono::{DateTime, Utc};
use rota_types::{ParticipantId, SnapshotId, WeightHistoryRecord};
use sqlx::{PgConnection, PgPool};

use crate::error::DbError;

/// Operations on the `weight_history` table.
pub struct HistoryStore<'a> {
    pool: &'a PgPool,
}

impl<'a> HistoryStore<'a> {
    /// Create a new history store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// The newest `limit` records of a participant, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn for_participant(
        &self,
        participant_id: ParticipantId,
        limit: usize,
    ) -> Result<Vec<WeightHistoryRecord>, DbError> {
        let rows = sqlx::query_as::<_, WeightHistoryRow>(
            r"SELECT id, participant_id, weight, snapshot_id, cause, recorded_at
              FROM (
                SELECT id, participant_id, weight, snapshot_id, cause, recorded_at
                FROM weight_history
                WHERE participant_id = $1
                ORDER BY id DESC
                LIMIT $2
              ) newest
              ORDER BY id",
        )
        .bind(participant_id.into_inner())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(WeightHistoryRecord::from).collect())
    }

    /// Drop all but the newest `keep` records of each listed participant.
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete fails.
    pub async fn trim(&self, participants: &[ParticipantId], keep: usize) -> Result<u64, DbError> {
        if participants.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = participants.iter().copied().map(ParticipantId::into_inner).collect();
        let result = sqlx::query(
            r"DELETE FROM weight_history AS w
              USING (
                SELECT id, row_number() OVER (PARTITION BY participant_id ORDER BY id DESC) AS rank
                FROM weight_history
                WHERE participant_id = ANY($1)
              ) ranked
              WHERE w.id = ranked.id AND ranked.rank > $2",
        )
        .bind(&ids)
        .bind(i64::try_from(keep).unwrap_or(i64::MAX))
        .execute(self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::debug!(deleted, "Trimmed weight history");
        }
        Ok(deleted)
    }
}

/// Append history records inside `conn`'s transaction.
pub(crate) async fn append(
    conn: &mut PgConnection,
    records: &[WeightHistoryRecord],
) -> Result<(), DbError> {
    if records.is_empty() {
        return Ok(());
    }

    let len = records.len();
    let mut participants = Vec::with_capacity(len);
    let mut weights = Vec::with_capacity(len);
    let mut snapshots: Vec<Option<i64>> = Vec::with_capacity(len);
    let mut causes = Vec::with_capacity(len);
    let mut timestamps = Vec::with_capacity(len);

    for record in records {
        participants.push(record.participant_id.into_inner());
        weights.push(record.weight);
        snapshots.push(record.snapshot_id.map(SnapshotId::into_inner));
        causes.push(record.cause.clone());
        timestamps.push(record.recorded_at);
    }

    sqlx::query(
        r"INSERT INTO weight_history (participant_id, weight, snapshot_id, cause, recorded_at)
          SELECT * FROM UNNEST($1::BIGINT[], $2::DOUBLE PRECISION[], $3::BIGINT[], $4::TEXT[], $5::TIMESTAMPTZ[])",
    )
    .bind(&participants)
    .bind(&weights)
    .bind(&snapshots)
    .bind(&causes)
    .bind(&timestamps)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(count = len, "Inserted weight history (batch UNNEST)");
    Ok(())
}

/// A row from the `weight_history` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WeightHistoryRow {
    /// Record id; increases with insertion order.
    pub id: i64,
    /// Participant id.
    pub participant_id: i64,
    /// Weight after the change.
    pub weight: f64,
    /// Snapshot the change belongs to, if any.
    pub snapshot_id: Option<i64>,
    /// Cause annotation.
    pub cause: String,
    /// When the change was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl From<WeightHistoryRow> for WeightHistoryRecord {
    fn from(row: WeightHistoryRow) -> Self {
        Self {
            participant_id: ParticipantId(row.participant_id),
            weight: row.weight,
            snapshot_id: row.snapshot_id.map(SnapshotId),
            cause: row.cause,
            recorded_at: row.recorded_at,
        }
    }
}
