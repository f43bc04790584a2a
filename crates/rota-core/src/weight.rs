//! The self-balancing weight formula.
//!
//! A participant drawn early loses weight and one drawn late gains it:
//!
//! ```text
//! mid   = (total + 1) / 2
//! delta = (position - mid) / total          -- roughly -0.5 ..= 0.5
//! new   = clamp(current * exp(K * delta), 0.1, 10)
//! ```
//!
//! `position` is always the participant's rank among the snapshot's
//! *regular* items, never its absolute position.

use rota_types::{SnapshotItem, clamp_weight};

/// Default decay elasticity `K`.
pub const DEFAULT_ELASTICITY: f64 = 1.0;

/// Pure mapping from (weight, relative position, pool size) to new weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightRecalculator {
    elasticity: f64,
}

impl Default for WeightRecalculator {
    fn default() -> Self {
        Self::new(DEFAULT_ELASTICITY)
    }
}

impl WeightRecalculator {
    /// Create a recalculator with elasticity `K`.
    pub const fn new(elasticity: f64) -> Self {
        Self { elasticity }
    }

    /// The elasticity `K`.
    pub const fn elasticity(&self) -> f64 {
        self.elasticity
    }

    /// New weight for a participant at `position` (1-based) among
    /// `total_regular` regular items.
    ///
    /// With one regular item or none there is no relative standing and the
    /// weight is returned as is (clamped into range).
    pub fn new_weight(&self, current: f64, position: u32, total_regular: u32) -> f64 {
        if total_regular <= 1 {
            return clamp_weight(current);
        }
        let total = f64::from(total_regular);
        let mid = (total + 1.0) / 2.0;
        let delta = (f64::from(position) - mid) / total;
        clamp_weight(current * (self.elasticity * delta).exp())
    }
}

/// Relative positions of the regular items, as `(absolute, relative)`
/// pairs in position order.
pub fn relative_positions(items: &[SnapshotItem]) -> Vec<(u32, u32)> {
    let mut regular: Vec<u32> = items
        .iter()
        .filter(|item| item.is_regular())
        .map(|item| item.position)
        .collect();
    regular.sort_unstable();
    regular.into_iter().zip(1_u32..).collect()
}
