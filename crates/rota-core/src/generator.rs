//! Snapshot generation: lottery, recalculation, persistence, retention.
//!
//! Generation reads the active roster, draws an order, and turns it into a
//! [`SnapshotDraft`]:
//!
//! - every item records the participant's live weight as `weight_before`;
//! - regular items are ranked among themselves (`1..=M`) and run through
//!   the [`WeightRecalculator`]; the result becomes both the item's
//!   `weight_after` and the participant's new live weight;
//! - priority and late items keep `weight_after == weight_before` and never
//!   touch the recalculator.
//!
//! The draft is persisted in one store call, after which the oldest
//! snapshots beyond the retention limit are evicted.

use chrono::{DateTime, Utc};
use rand::Rng;
use rota_types::{ParticipantId, Snapshot, SnapshotItem};
use tracing::{debug, info, warn};

use crate::config::RotationConfig;
use crate::error::{Missing, RotationError, ValidationError};
use crate::lottery::{Drawn, LotteryEngine, Overrides};
use crate::store::{QueueStore, SnapshotDraft, WeightCause, WeightChange, WeightUpdate};
use crate::weight::WeightRecalculator;

/// Input of a generation, supplied by the caller on every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateRequest {
    /// Free-text label (lesson, lab, date).
    pub subject: String,
    /// Participants forced to the front, in order.
    pub priority: Vec<ParticipantId>,
    /// Participants forced to the back, in order.
    pub late: Vec<ParticipantId>,
}

impl GenerateRequest {
    /// A request without overrides.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            priority: Vec::new(),
            late: Vec::new(),
        }
    }

    /// Set the forced-first list.
    #[must_use]
    pub fn with_priority(mut self, priority: Vec<ParticipantId>) -> Self {
        self.priority = priority;
        self
    }

    /// Set the forced-last list.
    #[must_use]
    pub fn with_late(mut self, late: Vec<ParticipantId>) -> Self {
        self.late = late;
        self
    }

    fn overrides(&self) -> Overrides {
        Overrides {
            priority: self.priority.clone(),
            late: self.late.clone(),
        }
    }
}

/// Turn a lottery outcome into a persistable draft.
pub fn build_draft(
    subject: &str,
    order: &[Drawn],
    recalculator: &WeightRecalculator,
    created_at: DateTime<Utc>,
) -> SnapshotDraft {
    let total_regular =
        u32::try_from(order.iter().filter(|d| d.flags.is_regular()).count()).unwrap_or(u32::MAX);

    let mut items = Vec::with_capacity(order.len());
    let mut weights = Vec::new();
    let mut history = Vec::new();
    let mut relative = 0_u32;

    for (drawn, position) in order.iter().zip(1_u32..) {
        let weight_after = if drawn.flags.is_regular() {
            relative = relative.saturating_add(1);
            let new_weight = recalculator.new_weight(drawn.weight, relative, total_regular);
            weights.push(WeightUpdate {
                participant_id: drawn.participant_id,
                expected: drawn.weight,
                weight: new_weight,
            });
            history.push(WeightChange {
                participant_id: drawn.participant_id,
                weight: new_weight,
                cause: WeightCause::Generated {
                    relative_position: relative,
                },
            });
            new_weight
        } else {
            drawn.weight
        };

        items.push(SnapshotItem {
            position,
            participant_id: drawn.participant_id,
            flags: drawn.flags,
            weight_before: drawn.weight,
            weight_after,
        });
    }

    SnapshotDraft {
        subject: subject.to_owned(),
        items,
        weights,
        history,
        created_at,
    }
}

/// Draw, persist and retain a new snapshot.
///
/// The caller holds the mutation lock.
///
/// # Errors
///
/// - [`ValidationError::EmptyPool`] when nobody is active.
/// - [`ValidationError::OverlappingOverrides`] when the override lists
///   intersect.
/// - [`RotationError::Store`] when the insert fails; nothing is written.
///   Eviction and history trimming run after the insert and only log
///   their failures.
pub async fn generate<S, R>(
    store: &S,
    config: &RotationConfig,
    recalculator: &WeightRecalculator,
    request: &GenerateRequest,
    rng: &mut R,
) -> Result<Snapshot, RotationError>
where
    S: QueueStore,
    R: Rng + ?Sized,
{
    let overrides = request.overrides();
    overrides.validate()?;

    let active = store.active_participants().await?;
    if active.is_empty() {
        return Err(ValidationError::EmptyPool.into());
    }

    let order = LotteryEngine::draw(&active, &overrides, rng)?;
    let draft = build_draft(&request.subject, &order, recalculator, Utc::now());
    for update in &draft.weights {
        debug!(
            participant = %update.participant_id,
            before = update.expected,
            after = update.weight,
            "Recalculated weight"
        );
    }
    let touched: Vec<ParticipantId> = draft.weights.iter().map(|u| u.participant_id).collect();

    let id = store.insert_snapshot(draft).await?;
    info!(
        snapshot = %id,
        subject = %request.subject,
        participants = order.len(),
        regular = touched.len(),
        "Generated snapshot"
    );

    // The snapshot has landed; retention failures are only logged.
    match store.evict_oldest(config.history_limit).await {
        Ok(evicted) if !evicted.is_empty() => info!(
            count = evicted.len(),
            keep = config.history_limit,
            "Evicted snapshots beyond retention"
        ),
        Ok(_) => {}
        Err(err) => warn!(error = %err, snapshot = %id, "Failed to evict old snapshots"),
    }
    if let Err(err) = store
        .trim_weight_history(&touched, config.weight_history_limit)
        .await
    {
        warn!(error = %err, snapshot = %id, "Failed to trim weight history after generation");
    }

    store
        .snapshot(id)
        .await?
        .ok_or_else(|| Missing::Snapshot(id).into())
}
