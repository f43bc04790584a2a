//! Participant persistence: roster rows and live weights.
//!
//! Live weights are only ever written inside a caller's transaction by
//! [`apply_weights`], which locks the affected rows and checks every
//! compare-and-set expectation before writing anything.

use std::collections::BTreeMap;

use rota_core::store::{WeightUpdate, same_weight};
use rota_types::{Participant, ParticipantId};
use sqlx::{PgConnection, PgPool};

use crate::error::DbError;

/// Operations on the `participants` table.
pub struct ParticipantStore<'a> {
    pool: &'a PgPool,
}

impl<'a> ParticipantStore<'a> {
    /// Create a new participant store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Every participant ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn all(&self) -> Result<Vec<Participant>, DbError> {
        let rows = sqlx::query_as::<_, ParticipantRow>(
            r"SELECT id, name, weight, active FROM participants ORDER BY id",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Participant::from).collect())
    }

    /// Active participants ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn active(&self) -> Result<Vec<Participant>, DbError> {
        let rows = sqlx::query_as::<_, ParticipantRow>(
            r"SELECT id, name, weight, active FROM participants WHERE active ORDER BY id",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Participant::from).collect())
    }

    /// One participant.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn get(&self, id: ParticipantId) -> Result<Option<Participant>, DbError> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            r"SELECT id, name, weight, active FROM participants WHERE id = $1",
        )
        .bind(id.into_inner())
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(Participant::from))
    }

    /// Insert a participant with the default weight, or rename it if the
    /// id is already known. Weight and active flag of an existing row are
    /// kept.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the upsert fails.
    pub async fn upsert(&self, id: ParticipantId, name: &str) -> Result<Participant, DbError> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            r"INSERT INTO participants (id, name) VALUES ($1, $2)
              ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
              RETURNING id, name, weight, active",
        )
        .bind(id.into_inner())
        .bind(name)
        .fetch_one(self.pool)
        .await?;

        tracing::debug!(participant = %id, name, "Upserted participant");
        Ok(row.into())
    }

    /// Toggle the active flag.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingParticipant`] for an unknown id, or
    /// [`DbError::Postgres`] if the update fails.
    pub async fn set_active(&self, id: ParticipantId, active: bool) -> Result<(), DbError> {
        let result = sqlx::query(r"UPDATE participants SET active = $2 WHERE id = $1")
            .bind(id.into_inner())
            .bind(active)
            .execute(self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::MissingParticipant(id));
        }
        tracing::debug!(participant = %id, active, "Set participant active flag");
        Ok(())
    }
}

/// Compare-and-set a batch of live weights inside `conn`'s transaction.
///
/// The affected rows are locked with `FOR UPDATE`; if any row is missing
/// or holds a weight other than the expected one, nothing is written.
pub(crate) async fn apply_weights(
    conn: &mut PgConnection,
    updates: &[WeightUpdate],
) -> Result<(), DbError> {
    if updates.is_empty() {
        return Ok(());
    }
    let ids: Vec<i64> = updates.iter().map(|u| u.participant_id.into_inner()).collect();
    let weights: Vec<f64> = updates.iter().map(|u| u.weight).collect();

    let current: BTreeMap<i64, f64> = sqlx::query_as::<_, (i64, f64)>(
        r"SELECT id, weight FROM participants WHERE id = ANY($1) ORDER BY id FOR UPDATE",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .collect();

    for update in updates {
        let actual = *current
            .get(&update.participant_id.into_inner())
            .ok_or(DbError::MissingParticipant(update.participant_id))?;
        if !same_weight(actual, update.expected) {
            return Err(DbError::Conflict {
                participant_id: update.participant_id,
                expected: update.expected,
                actual,
            });
        }
    }

    sqlx::query(
        r"UPDATE participants AS p SET weight = u.weight
          FROM UNNEST($1::BIGINT[], $2::DOUBLE PRECISION[]) AS u(id, weight)
          WHERE p.id = u.id",
    )
    .bind(&ids)
    .bind(&weights)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(count = updates.len(), "Updated live weights (batch UNNEST)");
    Ok(())
}

/// Set every participant's weight inside `conn`'s transaction. Returns the
/// ids of the rows updated.
pub(crate) async fn reset_all(
    conn: &mut PgConnection,
    weight: f64,
) -> Result<Vec<ParticipantId>, DbError> {
    let ids: Vec<i64> =
        sqlx::query_scalar(r"UPDATE participants SET weight = $1 RETURNING id")
            .bind(weight)
            .fetch_all(&mut *conn)
            .await?;
    Ok(ids.into_iter().map(ParticipantId::from).collect())
}

/// A row from the `participants` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ParticipantRow {
    /// Participant id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Live weight.
    pub weight: f64,
    /// Whether the participant is in the lottery pool.
    pub active: bool,
}

impl From<ParticipantRow> for Participant {
    fn from(row: ParticipantRow) -> Self {
        Self {
            id: ParticipantId(row.id),
            name: row.name,
            weight: row.weight,
            active: row.active,
        }
    }
}
