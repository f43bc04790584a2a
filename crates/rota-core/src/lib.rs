//! Weighted lottery, weight recalculation and cascading edits for rota.
//!
//! A *snapshot* is one generated turn order. Generating one draws the
//! active roster by weight and adjusts every regular participant's weight
//! according to where they landed: early draws shrink, late draws grow.
//! Editing an old snapshot replays the affected participants forward
//! through every newer one so live weights stay consistent.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration with environment overrides.
//! - [`error`] -- [`RotationError`] and its typed causes.
//! - [`weight`] -- The self-balancing weight formula.
//! - [`lottery`] -- Weighted permutation with priority and late pins.
//! - [`generator`] -- Turning a draw into a persisted snapshot.
//! - [`edit`] -- Swap, delete and add planners for one snapshot.
//! - [`cascade`] -- Forward replay of an edit into later snapshots.
//! - [`store`] -- The [`QueueStore`] persistence seam.
//! - [`memory`] -- In-process [`QueueStore`].
//! - [`view`] -- Read-model builders.
//! - [`service`] -- The [`Rotation`] facade serializing mutations.
//!
//! [`RotationError`]: error::RotationError
//! [`QueueStore`]: store::QueueStore
//! [`Rotation`]: service::Rotation

pub mod cascade;
pub mod config;
pub mod edit;
pub mod error;
pub mod generator;
pub mod lottery;
pub mod memory;
pub mod service;
pub mod store;
#[cfg(test)]
mod testing;
pub mod view;
pub mod weight;

pub use config::RotationConfig;
pub use error::{ErrorKind, RotationError};
pub use generator::GenerateRequest;
pub use memory::MemoryStore;
pub use service::{DeleteOutcome, EditOutcome, Rotation};
pub use store::{QueueStore, StoreError};
pub use weight::WeightRecalculator;
