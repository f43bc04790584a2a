//! Shared type definitions for the rota turn-order engine.
//!
//! This crate is the single source of truth for the records the core, the
//! persistence layer and the presentation collaborator exchange. Types
//! flow to `TypeScript` via `ts-rs` for front ends that want them.
//!
//! # Modules
//!
//! - [`ids`] -- Typed participant and snapshot identifiers
//! - [`structs`] -- Participants, snapshots, items and weight history
//! - [`views`] -- Denormalized read models for rendering

pub mod ids;
pub mod structs;
pub mod views;

// Re-export all public types at crate root for convenience.
pub use ids::{ParticipantId, SnapshotId};
pub use structs::{
    DEFAULT_WEIGHT, ItemFlags, MAX_WEIGHT, MIN_WEIGHT, Participant, Snapshot, SnapshotItem,
    WeightHistoryRecord, clamp_weight,
};
pub use views::{SnapshotView, ViewEntry, WeightEntry, WeightsView};
