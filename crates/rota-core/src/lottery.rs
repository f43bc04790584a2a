//! Weighted lottery producing one turn order.
//!
//! The order is `priority ++ weighted permutation of the rest ++ late`.
//! Priority and late participants keep the order the caller listed them in.
//! The middle part is drawn without replacement: each step picks one
//! remaining participant with probability proportional to its weight.
//!
//! Each draw scans the remaining pool, so a full permutation is O(n²).
//! That is fine for classroom-sized pools; a Fenwick tree over cumulative
//! weights would bring a draw down to O(log n) if pools ever grow large.

use std::collections::BTreeSet;

use rand::Rng;
use rota_types::{ItemFlags, Participant, ParticipantId};

use crate::error::ValidationError;

/// Floor applied to weights during a draw so the total is never zero.
pub const DRAW_EPSILON: f64 = 1e-4;

/// Caller-supplied forced-first and forced-last lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Participants forced to the front, in this order.
    pub priority: Vec<ParticipantId>,
    /// Participants forced to the back, in this order.
    pub late: Vec<ParticipantId>,
}

impl Overrides {
    /// Reject participants listed as both priority and late.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let priority: BTreeSet<ParticipantId> = self.priority.iter().copied().collect();
        let overlap: Vec<ParticipantId> = self
            .late
            .iter()
            .copied()
            .filter(|id| priority.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if overlap.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::OverlappingOverrides {
                participants: overlap,
            })
        }
    }
}

/// One slot of a lottery outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drawn {
    /// Who.
    pub participant_id: ParticipantId,
    /// Live weight at draw time.
    pub weight: f64,
    /// Priority, late, or regular.
    pub flags: ItemFlags,
}

/// Stateless lottery over a set of active participants.
#[derive(Debug, Clone, Copy, Default)]
pub struct LotteryEngine;

impl LotteryEngine {
    /// Produce a total order of `participants`.
    ///
    /// Override ids that are not among `participants` are ignored, as are
    /// repeated ids after their first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::OverlappingOverrides`] when an id is in
    /// both override lists.
    pub fn draw<R: Rng + ?Sized>(
        participants: &[Participant],
        overrides: &Overrides,
        rng: &mut R,
    ) -> Result<Vec<Drawn>, ValidationError> {
        overrides.validate()?;

        let mut placed: BTreeSet<ParticipantId> = BTreeSet::new();
        let mut pinned = |ids: &[ParticipantId], flags: ItemFlags| -> Vec<Drawn> {
            ids.iter()
                .filter_map(|id| participants.iter().find(|p| p.id == *id))
                .filter(|p| placed.insert(p.id))
                .map(|p| Drawn {
                    participant_id: p.id,
                    weight: p.weight,
                    flags,
                })
                .collect()
        };
        let head = pinned(&overrides.priority, ItemFlags::PRIORITY);
        let tail = pinned(&overrides.late, ItemFlags::LATE);

        let pool: Vec<Drawn> = participants
            .iter()
            .filter(|p| !placed.contains(&p.id))
            .map(|p| Drawn {
                participant_id: p.id,
                weight: p.weight,
                flags: ItemFlags::REGULAR,
            })
            .collect();

        let mut order = head;
        order.extend(weighted_permutation(pool, rng));
        order.extend(tail);
        Ok(order)
    }
}

/// Draw every candidate without replacement, proportionally to weight.
pub fn weighted_permutation<R: Rng + ?Sized>(mut pool: Vec<Drawn>, rng: &mut R) -> Vec<Drawn> {
    let mut order = Vec::with_capacity(pool.len());
    while !pool.is_empty() {
        let total: f64 = pool.iter().map(|d| d.weight.max(DRAW_EPSILON)).sum();
        let target = rng.random::<f64>() * total;

        // Rounding can leave `target` just past the last boundary.
        let mut chosen = pool.len().saturating_sub(1);
        let mut upto = 0.0;
        for (index, candidate) in pool.iter().enumerate() {
            upto += candidate.weight.max(DRAW_EPSILON);
            if target < upto {
                chosen = index;
                break;
            }
        }
        order.push(pool.remove(chosen));
    }
    order
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn roster(weights: &[f64]) -> Vec<Participant> {
        weights
            .iter()
            .zip(1_i64..)
            .map(|(&weight, id)| Participant {
                id: ParticipantId(id),
                name: format!("p{id}"),
                weight,
                active: true,
            })
            .collect()
    }

    fn ids(order: &[Drawn]) -> Vec<i64> {
        order.iter().map(|d| d.participant_id.0).collect()
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let people = roster(&[1.0, 0.5, 2.0, 1.3, 0.1, 4.0, 1.0]);
        let overrides = Overrides {
            priority: vec![ParticipantId(3)],
            late: vec![ParticipantId(5)],
        };
        let first = LotteryEngine::draw(&people, &overrides, &mut StdRng::seed_from_u64(7));
        let second = LotteryEngine::draw(&people, &overrides, &mut StdRng::seed_from_u64(7));
        assert!(first.is_ok());
        assert_eq!(first.ok(), second.ok());
    }

    #[test]
    fn output_is_a_permutation_with_pins_at_the_ends() {
        let people = roster(&[1.0; 6]);
        let overrides = Overrides {
            priority: vec![ParticipantId(4), ParticipantId(2)],
            late: vec![ParticipantId(6), ParticipantId(1)],
        };
        let order = LotteryEngine::draw(&people, &overrides, &mut StdRng::seed_from_u64(1))
            .unwrap_or_default();
        assert_eq!(order.len(), 6);

        let got = ids(&order);
        assert_eq!(got.first(), Some(&4));
        assert_eq!(got.get(1), Some(&2));
        assert_eq!(got.get(4), Some(&6));
        assert_eq!(got.get(5), Some(&1));

        let mut sorted = got;
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3, 4, 5, 6]);

        assert!(order.iter().take(2).all(|d| d.flags == ItemFlags::PRIORITY));
        assert!(order.iter().skip(2).take(2).all(|d| d.flags == ItemFlags::REGULAR));
        assert!(order.iter().skip(4).all(|d| d.flags == ItemFlags::LATE));
    }

    #[test]
    fn unknown_and_repeated_override_ids_are_ignored() {
        let people = roster(&[1.0, 1.0, 1.0]);
        let overrides = Overrides {
            priority: vec![ParticipantId(99), ParticipantId(2), ParticipantId(2)],
            late: Vec::new(),
        };
        let order = LotteryEngine::draw(&people, &overrides, &mut StdRng::seed_from_u64(3))
            .unwrap_or_default();
        assert_eq!(order.len(), 3);
        assert_eq!(order.first().map(|d| d.participant_id), Some(ParticipantId(2)));
        assert_eq!(
            order.iter().filter(|d| d.flags == ItemFlags::PRIORITY).count(),
            1
        );
    }

    #[test]
    fn overlapping_overrides_are_rejected() {
        let people = roster(&[1.0, 1.0]);
        let overrides = Overrides {
            priority: vec![ParticipantId(1)],
            late: vec![ParticipantId(2), ParticipantId(1)],
        };
        let result = LotteryEngine::draw(&people, &overrides, &mut StdRng::seed_from_u64(0));
        assert!(matches!(
            result,
            Err(ValidationError::OverlappingOverrides { ref participants })
                if participants == &vec![ParticipantId(1)]
        ));
    }

    #[test]
    fn zero_weights_still_draw_everyone() {
        let people = roster(&[0.0, 0.0, 0.0, 0.0]);
        let order = LotteryEngine::draw(&people, &Overrides::default(), &mut StdRng::seed_from_u64(9))
            .unwrap_or_default();
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn heavier_participants_land_first_more_often() {
        const TRIALS: u64 = 4000;
        let mut previous = 0_u64;
        for weight in [0.25, 1.0, 2.5, 6.0] {
            let people = roster(&[weight, 1.0, 1.0, 1.0]);
            let mut firsts = 0_u64;
            for seed in 0..TRIALS {
                let order =
                    LotteryEngine::draw(&people, &Overrides::default(), &mut StdRng::seed_from_u64(seed))
                        .unwrap_or_default();
                if order.first().map(|d| d.participant_id) == Some(ParticipantId(1)) {
                    firsts += 1;
                }
            }
            assert!(
                firsts > previous,
                "weight {weight} landed first {firsts} times, not more than {previous}"
            );
            previous = firsts;
        }
    }
}
