//! Read models handed to the presentation collaborator.
//!
//! These are denormalized (participant names joined in) so the front end
//! can render them without further lookups. `Display` produces the plain
//! text layout used in chat messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{ParticipantId, SnapshotId};
use crate::structs::ItemFlags;

/// Timestamp format used in rendered headers.
const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M";

/// A snapshot with participant names resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SnapshotView {
    /// Snapshot identity.
    pub id: SnapshotId,
    /// Subject label.
    pub subject: String,
    /// Generation time.
    pub created_at: DateTime<Utc>,
    /// Last edit time.
    pub updated_at: DateTime<Utc>,
    /// Edit log, oldest first.
    pub changelog: Vec<String>,
    /// Entries in position order.
    pub entries: Vec<ViewEntry>,
}

/// One rendered line of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ViewEntry {
    /// 1-based position.
    pub position: u32,
    /// Participant identity.
    pub participant_id: ParticipantId,
    /// Display name, or the id when the roster no longer knows it.
    pub name: String,
    /// Override flags.
    pub flags: ItemFlags,
    /// Weight when the item entered the snapshot.
    pub weight_before: f64,
    /// Weight after this item's recalculation.
    pub weight_after: f64,
}

impl ViewEntry {
    /// Marker prefix shown before the name.
    pub const fn marker(&self) -> &'static str {
        if self.flags.priority {
            "⭐ "
        } else if self.flags.late {
            "🐌 "
        } else if self.flags.added_after_creation {
            "➕ "
        } else {
            ""
        }
    }
}

impl core::fmt::Display for SnapshotView {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(
            f,
            "#{} {} (updated {})",
            self.id,
            self.subject,
            self.updated_at.format(TIMESTAMP_FORMAT)
        )?;
        for entry in &self.entries {
            writeln!(f, "{}. {}{}", entry.position, entry.marker(), entry.name)?;
        }
        Ok(())
    }
}

/// One participant's live weight, for the weights screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WeightEntry {
    /// Participant identity.
    pub participant_id: ParticipantId,
    /// Display name.
    pub name: String,
    /// Live weight.
    pub weight: f64,
    /// Whether the participant is in the active pool.
    pub active: bool,
}

/// All participants ordered by weight, heaviest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WeightsView {
    /// Entries, heaviest first.
    pub entries: Vec<WeightEntry>,
}

impl core::fmt::Display for WeightsView {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for entry in &self.entries {
            let status = if entry.active { "" } else { " (inactive)" };
            writeln!(f, "{}: {:.2}{status}", entry.name, entry.weight)?;
        }
        Ok(())
    }
}
