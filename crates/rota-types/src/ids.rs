//! Type-safe identifier wrappers.
//!
//! Participants are identified by the integer id the roster collaborator
//! assigns (typically the chat platform's user id). Snapshots use the
//! monotonically increasing id handed out by the store, so comparing two
//! [`SnapshotId`] values compares their recency.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Generates a newtype wrapper around `i64` with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub i64);

        impl $name {
            /// Return the inner `i64` value.
            pub const fn into_inner(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identifier of a participant in the rotation.
    ParticipantId
}

define_id! {
    /// Identifier of a persisted turn-order snapshot. Larger is newer.
    SnapshotId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_ids_order_by_recency() {
        let older = SnapshotId(3);
        let newer = SnapshotId(11);
        assert!(older < newer);
    }

    #[test]
    fn id_serializes_as_bare_integer() {
        let json = serde_json::to_string(&ParticipantId(5_174_581_416)).ok();
        assert_eq!(json.as_deref(), Some("5174581416"));
        let restored: Result<ParticipantId, _> = serde_json::from_str("42");
        assert_eq!(restored.ok(), Some(ParticipantId(42)));
    }

    #[test]
    fn id_display_matches_inner() {
        let id = SnapshotId(17);
        assert_eq!(id.to_string(), "17");
        assert_eq!(i64::from(id), 17);
    }
}
