//! Snapshot persistence: headers, item sets and retention.
//!
//! A snapshot is one `snapshots` row plus its `snapshot_items`. Reads go
//! through [`SnapshotStore`]; writes run inside a caller's transaction so
//! that the item set, the live weights and the history land together.
//! Item sets are always replaced whole, with one `UNNEST` insert.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rota_types::{ItemFlags, ParticipantId, Snapshot, SnapshotId, SnapshotItem};
use sqlx::{PgConnection, PgPool};

use crate::error::DbError;

/// Operations on the `snapshots` and `snapshot_items` tables.
pub struct SnapshotStore<'a> {
    pool: &'a PgPool,
}

impl<'a> SnapshotStore<'a> {
    /// Create a new snapshot store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// One snapshot with its items in position order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if a query fails, or
    /// [`DbError::OutOfRange`] if a stored position is invalid.
    pub async fn get(&self, id: SnapshotId) -> Result<Option<Snapshot>, DbError> {
        let header = sqlx::query_as::<_, SnapshotRow>(
            r"SELECT id, subject, created_at, updated_at, changelog
              FROM snapshots
              WHERE id = $1",
        )
        .bind(id.into_inner())
        .fetch_optional(self.pool)
        .await?;

        let Some(header) = header else {
            return Ok(None);
        };
        let mut snapshots = self.assemble(vec![header]).await?;
        Ok(snapshots.pop())
    }

    /// The newest `limit` snapshots, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if a query fails.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Snapshot>, DbError> {
        let headers = sqlx::query_as::<_, SnapshotRow>(
            r"SELECT id, subject, created_at, updated_at, changelog
              FROM snapshots
              ORDER BY id DESC
              LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool)
        .await?;
        self.assemble(headers).await
    }

    /// Whether a participant holds an item in a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn contains(
        &self,
        snapshot_id: SnapshotId,
        participant_id: ParticipantId,
    ) -> Result<bool, DbError> {
        let present: bool = sqlx::query_scalar(
            r"SELECT EXISTS (
                SELECT 1 FROM snapshot_items
                WHERE participant_id = $2 AND snapshot_id = $1
              )",
        )
        .bind(snapshot_id.into_inner())
        .bind(participant_id.into_inner())
        .fetch_one(self.pool)
        .await?;
        Ok(present)
    }

    /// Ids newer than `after`, ascending, at most `limit` (`None` for all).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn later_ids(
        &self,
        after: SnapshotId,
        limit: Option<usize>,
    ) -> Result<Vec<SnapshotId>, DbError> {
        // LIMIT NULL means no limit.
        let limit: Option<i64> = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let ids: Vec<i64> = sqlx::query_scalar(
            r"SELECT id FROM snapshots WHERE id > $1 ORDER BY id LIMIT $2",
        )
        .bind(after.into_inner())
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(ids.into_iter().map(SnapshotId::from).collect())
    }

    /// Number of retained snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn count(&self) -> Result<usize, DbError> {
        let count: i64 = sqlx::query_scalar(r"SELECT COUNT(*) FROM snapshots")
            .fetch_one(self.pool)
            .await?;
        usize::try_from(count)
            .map_err(|e| DbError::OutOfRange(format!("snapshot count {count}: {e}")))
    }

    /// Delete all but the newest `keep` snapshots; items go with them.
    /// Returns the evicted ids, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete fails.
    pub async fn evict_oldest(&self, keep: usize) -> Result<Vec<SnapshotId>, DbError> {
        let mut ids: Vec<i64> = sqlx::query_scalar(
            r"DELETE FROM snapshots
              WHERE id IN (SELECT id FROM snapshots ORDER BY id DESC OFFSET $1)
              RETURNING id",
        )
        .bind(i64::try_from(keep).unwrap_or(i64::MAX))
        .fetch_all(self.pool)
        .await?;
        ids.sort_unstable();

        if !ids.is_empty() {
            tracing::debug!(count = ids.len(), "Evicted snapshots");
        }
        Ok(ids.into_iter().map(SnapshotId::from).collect())
    }

    /// Join item rows onto headers, preserving header order.
    async fn assemble(&self, headers: Vec<SnapshotRow>) -> Result<Vec<Snapshot>, DbError> {
        if headers.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = headers.iter().map(|h| h.id).collect();
        let rows = sqlx::query_as::<_, SnapshotItemRow>(
            r"SELECT snapshot_id, position, participant_id, priority, late,
                     added_after_creation, weight_before, weight_after
              FROM snapshot_items
              WHERE snapshot_id = ANY($1)
              ORDER BY snapshot_id, position",
        )
        .bind(&ids)
        .fetch_all(self.pool)
        .await?;

        let mut items: BTreeMap<i64, Vec<SnapshotItem>> = BTreeMap::new();
        for row in rows {
            let snapshot_id = row.snapshot_id;
            items
                .entry(snapshot_id)
                .or_default()
                .push(SnapshotItem::try_from(row)?);
        }

        Ok(headers
            .into_iter()
            .map(|header| {
                let items = items.remove(&header.id).unwrap_or_default();
                header.into_snapshot(items)
            })
            .collect())
    }
}

/// Insert a snapshot header inside `conn`'s transaction.
pub(crate) async fn insert_header(
    conn: &mut PgConnection,
    subject: &str,
    created_at: DateTime<Utc>,
) -> Result<SnapshotId, DbError> {
    let id: i64 = sqlx::query_scalar(
        r"INSERT INTO snapshots (subject, created_at, updated_at)
          VALUES ($1, $2, $2)
          RETURNING id",
    )
    .bind(subject)
    .bind(created_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(SnapshotId(id))
}

/// Lock a snapshot row, bump `updated_at` and append an optional change-log
/// line.
pub(crate) async fn touch(
    conn: &mut PgConnection,
    id: SnapshotId,
    note: Option<&str>,
    at: DateTime<Utc>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        r"UPDATE snapshots
          SET updated_at = $2,
              changelog = CASE WHEN $3::TEXT IS NULL THEN changelog
                               ELSE array_append(changelog, $3::TEXT) END
          WHERE id = $1",
    )
    .bind(id.into_inner())
    .bind(at)
    .bind(note)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::MissingSnapshot(id));
    }
    Ok(())
}

/// Replace a snapshot's whole item set inside `conn`'s transaction.
pub(crate) async fn replace_items(
    conn: &mut PgConnection,
    id: SnapshotId,
    items: &[SnapshotItem],
) -> Result<(), DbError> {
    sqlx::query(r"DELETE FROM snapshot_items WHERE snapshot_id = $1")
        .bind(id.into_inner())
        .execute(&mut *conn)
        .await?;
    if items.is_empty() {
        return Ok(());
    }

    let len = items.len();
    let mut positions = Vec::with_capacity(len);
    let mut participants = Vec::with_capacity(len);
    let mut priorities = Vec::with_capacity(len);
    let mut lates = Vec::with_capacity(len);
    let mut added = Vec::with_capacity(len);
    let mut befores = Vec::with_capacity(len);
    let mut afters = Vec::with_capacity(len);

    for item in items {
        positions.push(
            i32::try_from(item.position)
                .map_err(|e| DbError::OutOfRange(format!("position {}: {e}", item.position)))?,
        );
        participants.push(item.participant_id.into_inner());
        priorities.push(item.flags.priority);
        lates.push(item.flags.late);
        added.push(item.flags.added_after_creation);
        befores.push(item.weight_before);
        afters.push(item.weight_after);
    }

    sqlx::query(
        r"INSERT INTO snapshot_items (snapshot_id, position, participant_id, priority, late, added_after_creation, weight_before, weight_after)
          SELECT $1, * FROM UNNEST($2::INTEGER[], $3::BIGINT[], $4::BOOLEAN[], $5::BOOLEAN[], $6::BOOLEAN[], $7::DOUBLE PRECISION[], $8::DOUBLE PRECISION[])",
    )
    .bind(id.into_inner())
    .bind(&positions)
    .bind(&participants)
    .bind(&priorities)
    .bind(&lates)
    .bind(&added)
    .bind(&befores)
    .bind(&afters)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(snapshot = %id, count = len, "Wrote snapshot items (batch UNNEST)");
    Ok(())
}

/// A row from the `snapshots` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    /// Snapshot id.
    pub id: i64,
    /// Subject label.
    pub subject: String,
    /// Generation time.
    pub created_at: DateTime<Utc>,
    /// Last edit time.
    pub updated_at: DateTime<Utc>,
    /// Edit log, oldest first.
    pub changelog: Vec<String>,
}

impl SnapshotRow {
    fn into_snapshot(self, items: Vec<SnapshotItem>) -> Snapshot {
        Snapshot {
            id: SnapshotId(self.id),
            subject: self.subject,
            created_at: self.created_at,
            updated_at: self.updated_at,
            changelog: self.changelog,
            items,
        }
    }
}

/// A row from the `snapshot_items` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotItemRow {
    /// Owning snapshot.
    pub snapshot_id: i64,
    /// 1-based position.
    pub position: i32,
    /// Participant id.
    pub participant_id: i64,
    /// Forced to the front.
    pub priority: bool,
    /// Forced to the back.
    pub late: bool,
    /// Appended after generation.
    pub added_after_creation: bool,
    /// Weight when the item entered the snapshot.
    pub weight_before: f64,
    /// Weight after recalculation.
    pub weight_after: f64,
}

impl TryFrom<SnapshotItemRow> for SnapshotItem {
    type Error = DbError;

    fn try_from(row: SnapshotItemRow) -> Result<Self, Self::Error> {
        let position = u32::try_from(row.position).map_err(|e| {
            DbError::OutOfRange(format!(
                "position {} in snapshot {}: {e}",
                row.position, row.snapshot_id
            ))
        })?;
        Ok(Self {
            position,
            participant_id: ParticipantId(row.participant_id),
            flags: ItemFlags {
                priority: row.priority,
                late: row.late,
                added_after_creation: row.added_after_creation,
            },
            weight_before: row.weight_before,
            weight_after: row.weight_after,
        })
    }
}
