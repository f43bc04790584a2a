//! Builders for the read models in [`rota_types::views`].

use rota_types::{Participant, Snapshot, SnapshotView, ViewEntry, WeightEntry, WeightsView};

use crate::edit::Roster;

/// Join participant names into a snapshot.
///
/// Participants the roster no longer knows are shown by id.
pub fn snapshot_view(snapshot: &Snapshot, roster: &Roster) -> SnapshotView {
    let entries = snapshot
        .items
        .iter()
        .map(|item| ViewEntry {
            position: item.position,
            participant_id: item.participant_id,
            name: roster
                .get(&item.participant_id)
                .map_or_else(|| item.participant_id.to_string(), |p| p.name.clone()),
            flags: item.flags,
            weight_before: item.weight_before,
            weight_after: item.weight_after,
        })
        .collect();

    SnapshotView {
        id: snapshot.id,
        subject: snapshot.subject.clone(),
        created_at: snapshot.created_at,
        updated_at: snapshot.updated_at,
        changelog: snapshot.changelog.clone(),
        entries,
    }
}

/// Every participant, heaviest first; ties break by name.
pub fn weights_view(participants: Vec<Participant>) -> WeightsView {
    let mut entries: Vec<WeightEntry> = participants
        .into_iter()
        .map(|p| WeightEntry {
            participant_id: p.id,
            name: p.name,
            weight: p.weight,
            active: p.active,
        })
        .collect();
    entries.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.name.cmp(&b.name)));
    WeightsView { entries }
}
