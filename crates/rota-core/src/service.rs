//! The [`Rotation`] facade that front ends talk to.
//!
//! `Rotation` owns a [`QueueStore`], the configuration and the random
//! source. Every mutation (generate, swap, delete, add, weight reset) runs
//! under one async mutex so that a cascade never observes a half-applied
//! edit from a concurrent request. The same mutex owns the RNG, which is
//! only ever needed while mutating.
//!
//! Reads skip the lock. They may see a cascade in flight, but never a
//! half-written snapshot, since each snapshot rewrite is atomic.

use std::collections::BTreeSet;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rota_types::{
    DEFAULT_WEIGHT, ItemFlags, ParticipantId, Snapshot, SnapshotId, SnapshotItem, SnapshotView,
    WeightHistoryRecord, WeightsView,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cascade::{self, CascadeReport};
use crate::config::RotationConfig;
use crate::edit::{self, Roster};
use crate::error::{Missing, RotationError};
use crate::generator::{self, GenerateRequest};
use crate::store::QueueStore;
use crate::view;
use crate::weight::WeightRecalculator;

/// Result of a swap.
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    /// The edited snapshot as committed.
    pub snapshot: Snapshot,
    /// Participants whose live weight the swap changed.
    pub changed: BTreeSet<ParticipantId>,
    /// What the forward cascade did.
    pub cascade: CascadeReport,
}

/// Result of a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOutcome {
    /// The participant whose item was removed.
    pub removed: ParticipantId,
    /// The removed item as it was stored.
    pub item: SnapshotItem,
    /// The edited snapshot as committed.
    pub snapshot: Snapshot,
    /// What the forward cascade did.
    pub cascade: CascadeReport,
}

/// Turn-order service over a store.
#[derive(Debug)]
pub struct Rotation<S, R = StdRng> {
    store: S,
    config: RotationConfig,
    recalculator: WeightRecalculator,
    rng: Mutex<R>,
}

impl<S: QueueStore> Rotation<S> {
    /// A service drawing from an OS-seeded generator.
    pub fn new(store: S, config: RotationConfig) -> Self {
        Self::with_rng(store, config, StdRng::from_os_rng())
    }
}

impl<S, R> Rotation<S, R>
where
    S: QueueStore,
    R: Rng + Send,
{
    /// A service drawing from `rng`. Seed it for reproducible orders.
    pub fn with_rng(store: S, config: RotationConfig, rng: R) -> Self {
        let recalculator = WeightRecalculator::new(config.elasticity);
        Self {
            store,
            config,
            recalculator,
            rng: Mutex::new(rng),
        }
    }

    /// The underlying store, for roster administration.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The active configuration.
    pub const fn config(&self) -> &RotationConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Draw a new snapshot from the active roster.
    ///
    /// # Errors
    ///
    /// See [`generator::generate`].
    pub async fn generate(&self, request: &GenerateRequest) -> Result<Snapshot, RotationError> {
        let mut rng = self.rng.lock().await;
        generator::generate(
            &self.store,
            &self.config,
            &self.recalculator,
            request,
            &mut *rng,
        )
        .await
    }

    /// Swap two regular items of a snapshot and cascade the weight change.
    ///
    /// # Errors
    ///
    /// Rejections are listed on [`edit::plan_swap`]. A failure after the
    /// local commit is [`RotationError::CascadeIncomplete`].
    pub async fn swap(
        &self,
        snapshot_id: SnapshotId,
        a: u32,
        b: u32,
    ) -> Result<EditOutcome, RotationError> {
        let _lock = self.rng.lock().await;
        let snapshot = self.load(snapshot_id).await?;
        let roster = self.roster().await?;
        let plan = edit::plan_swap(&snapshot, a, b, &roster, &self.recalculator, Utc::now())?;

        let changed = plan.touched.clone();
        self.store.commit(plan.write).await?;
        info!(
            snapshot = %snapshot_id,
            a,
            b,
            changed = changed.len(),
            "Swapped items"
        );

        let logged: Vec<ParticipantId> = changed.iter().copied().collect();
        let cascade = self.cascade(snapshot_id, plan.touched, logged).await?;
        let snapshot = self.load(snapshot_id).await?;
        Ok(EditOutcome {
            snapshot,
            changed,
            cascade,
        })
    }

    /// Remove an item, roll its participant's weight back and cascade.
    ///
    /// # Errors
    ///
    /// Rejections are listed on [`edit::plan_delete`]. A failure after the
    /// local commit is [`RotationError::CascadeIncomplete`].
    pub async fn delete(
        &self,
        snapshot_id: SnapshotId,
        position: u32,
    ) -> Result<DeleteOutcome, RotationError> {
        let _lock = self.rng.lock().await;
        let snapshot = self.load(snapshot_id).await?;
        let roster = self.roster().await?;
        let (plan, item) = edit::plan_delete(&snapshot, position, &roster, Utc::now())?;

        self.store.commit(plan.write).await?;
        info!(
            snapshot = %snapshot_id,
            position,
            participant = %item.participant_id,
            rolled_back = !plan.touched.is_empty(),
            "Deleted item"
        );

        let cascade = self
            .cascade(snapshot_id, plan.touched, vec![item.participant_id])
            .await?;
        let snapshot = self.load(snapshot_id).await?;
        Ok(DeleteOutcome {
            removed: item.participant_id,
            item,
            snapshot,
            cascade,
        })
    }

    /// Append a participant to a snapshot with unchanged weight.
    ///
    /// # Errors
    ///
    /// Rejections are listed on [`edit::plan_add`].
    pub async fn add(
        &self,
        snapshot_id: SnapshotId,
        participant_id: ParticipantId,
        flags: ItemFlags,
    ) -> Result<SnapshotItem, RotationError> {
        let _lock = self.rng.lock().await;
        let snapshot = self.load(snapshot_id).await?;
        let roster = self.roster().await?;
        let (plan, item) = edit::plan_add(&snapshot, participant_id, flags, &roster, Utc::now())?;

        self.store.commit(plan.write).await?;
        info!(
            snapshot = %snapshot_id,
            participant = %participant_id,
            position = item.position,
            "Added item"
        );
        Ok(item)
    }

    /// Put every participant back to the default weight.
    ///
    /// Returns the number of participants reset.
    ///
    /// # Errors
    ///
    /// [`RotationError::Store`] when the store fails.
    pub async fn reset_weights(&self) -> Result<usize, RotationError> {
        let _lock = self.rng.lock().await;
        let count = self.store.reset_weights(DEFAULT_WEIGHT, Utc::now()).await?;
        let ids: Vec<ParticipantId> = self
            .store
            .participants()
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        self.store
            .trim_weight_history(&ids, self.config.weight_history_limit)
            .await?;
        info!(count, weight = DEFAULT_WEIGHT, "Reset all weights");
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// A snapshot with participant names joined in.
    ///
    /// # Errors
    ///
    /// [`Missing::Snapshot`] when the id is not retained.
    pub async fn view(&self, snapshot_id: SnapshotId) -> Result<SnapshotView, RotationError> {
        let snapshot = self.load(snapshot_id).await?;
        let roster = self.roster().await?;
        Ok(view::snapshot_view(&snapshot, &roster))
    }

    /// The newest snapshots, newest first, at most `recent_limit`.
    ///
    /// # Errors
    ///
    /// [`RotationError::Store`] when the store fails.
    pub async fn recent(&self, limit: usize) -> Result<Vec<SnapshotView>, RotationError> {
        let limit = limit.min(self.config.recent_limit);
        let snapshots = self.store.recent_snapshots(limit).await?;
        let roster = self.roster().await?;
        Ok(snapshots
            .iter()
            .map(|snapshot| view::snapshot_view(snapshot, &roster))
            .collect())
    }

    /// Whether a participant holds an item in a snapshot.
    ///
    /// Lets a front end offer only absent participants for an add.
    ///
    /// # Errors
    ///
    /// [`Missing::Snapshot`] when the id is not retained.
    pub async fn contains(
        &self,
        snapshot_id: SnapshotId,
        participant_id: ParticipantId,
    ) -> Result<bool, RotationError> {
        if self.store.contains_participant(snapshot_id, participant_id).await? {
            return Ok(true);
        }
        self.load(snapshot_id).await?;
        Ok(false)
    }

    /// Every participant's live weight, heaviest first.
    ///
    /// # Errors
    ///
    /// [`RotationError::Store`] when the store fails.
    pub async fn weights(&self) -> Result<WeightsView, RotationError> {
        Ok(view::weights_view(self.store.participants().await?))
    }

    /// A participant's recent weight transitions, oldest first.
    ///
    /// # Errors
    ///
    /// [`Missing::Participant`] for an unknown id.
    pub async fn weight_history(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<WeightHistoryRecord>, RotationError> {
        if self.store.participant(participant_id).await?.is_none() {
            return Err(Missing::Participant(participant_id).into());
        }
        Ok(self
            .store
            .weight_history(participant_id, self.config.weight_history_limit)
            .await?)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn load(&self, snapshot_id: SnapshotId) -> Result<Snapshot, RotationError> {
        self.store
            .snapshot(snapshot_id)
            .await?
            .ok_or_else(|| Missing::Snapshot(snapshot_id).into())
    }

    async fn roster(&self) -> Result<Roster, RotationError> {
        Ok(self
            .store
            .participants()
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect())
    }

    /// Run the forward cascade, then trim the history of everyone the edit
    /// logged for (`logged` plus `touched`).
    async fn cascade(
        &self,
        origin: SnapshotId,
        touched: BTreeSet<ParticipantId>,
        logged: Vec<ParticipantId>,
    ) -> Result<CascadeReport, RotationError> {
        let mut ids = logged;
        for id in &touched {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        let report = cascade::run(
            &self.store,
            &self.recalculator,
            origin,
            touched,
            self.config.cascade_limit,
        )
        .await?;
        if !report.steps.is_empty() {
            info!(
                origin = %origin,
                steps = report.steps.len(),
                snapshots = report.snapshots_rewritten(),
                "Cascade applied"
            );
        }
        if let Err(err) = self
            .store
            .trim_weight_history(&ids, self.config.weight_history_limit)
            .await
        {
            warn!(error = %err, "Failed to trim weight history after edit");
        }
        Ok(report)
    }
}
