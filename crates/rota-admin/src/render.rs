//! Turn read models into terminal output.

use anyhow::Context;
use rota_core::cascade::CascadeReport;
use rota_types::{SnapshotItem, SnapshotView, WeightHistoryRecord, WeightsView};
use serde::Serialize;

/// Timestamp layout for history lines.
const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M";

/// Output flavour selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Plain text, the same layout the chat front end posts.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Pick JSON when `json` is set.
    pub const fn from_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Text }
    }
}

/// One snapshot, followed by its edit log in text mode.
pub fn snapshot(view: &SnapshotView, format: Format) -> anyhow::Result<String> {
    match format {
        Format::Json => json(view),
        Format::Text => {
            let mut out = view.to_string();
            if !view.changelog.is_empty() {
                out.push_str("changes:\n");
                for note in &view.changelog {
                    out.push_str("  ");
                    out.push_str(note);
                    out.push('\n');
                }
            }
            Ok(out)
        }
    }
}

/// Several snapshots separated by blank lines.
pub fn snapshots(views: &[SnapshotView], format: Format) -> anyhow::Result<String> {
    match format {
        Format::Json => json(&views),
        Format::Text => {
            if views.is_empty() {
                return Ok("no snapshots\n".to_owned());
            }
            let rendered = views
                .iter()
                .map(|view| snapshot(view, Format::Text))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(rendered.join("\n"))
        }
    }
}

/// The live weight table.
pub fn weights(view: &WeightsView, format: Format) -> anyhow::Result<String> {
    match format {
        Format::Json => json(view),
        Format::Text if view.entries.is_empty() => Ok("no participants\n".to_owned()),
        Format::Text => Ok(view.to_string()),
    }
}

/// A participant's weight log, oldest first.
pub fn history(records: &[WeightHistoryRecord], format: Format) -> anyhow::Result<String> {
    match format {
        Format::Json => json(&records),
        Format::Text => {
            if records.is_empty() {
                return Ok("no weight changes recorded\n".to_owned());
            }
            let mut out = String::new();
            for record in records {
                let snapshot = record
                    .snapshot_id
                    .map_or_else(|| "-".to_owned(), |id| format!("#{id}"));
                out.push_str(&format!(
                    "{} {:.4} {snapshot} {}\n",
                    record.recorded_at.format(TIMESTAMP_FORMAT),
                    record.weight,
                    record.cause
                ));
            }
            Ok(out)
        }
    }
}

/// The item appended by an `add` edit.
pub fn added(item: &SnapshotItem, format: Format) -> anyhow::Result<String> {
    match format {
        Format::Json => json(item),
        Format::Text => Ok(format!(
            "added participant {} at position {} (weight {:.2})\n",
            item.participant_id, item.position, item.weight_after
        )),
    }
}

/// One line summarizing how far an edit reached.
pub fn cascade_summary(changed: usize, report: &CascadeReport) -> String {
    format!(
        "{changed} weight(s) changed in #{}; cascade rewrote {} later snapshot(s) in {} step(s)\n",
        report.origin,
        report.snapshots_rewritten(),
        report.steps.len()
    )
}

fn json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    let mut out = serde_json::to_string_pretty(value).context("failed to encode JSON output")?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};
    use rota_types::{ItemFlags, ParticipantId, SnapshotId, ViewEntry, WeightEntry};

    use super::*;

    fn view(changelog: Vec<String>) -> SnapshotView {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap();
        SnapshotView {
            id: SnapshotId(12),
            subject: "lab 4".to_owned(),
            created_at: at,
            updated_at: at,
            changelog,
            entries: vec![
                ViewEntry {
                    position: 1,
                    participant_id: ParticipantId(5),
                    name: "Ann".to_owned(),
                    flags: ItemFlags::PRIORITY,
                    weight_before: 1.0,
                    weight_after: 1.0,
                },
                ViewEntry {
                    position: 2,
                    participant_id: ParticipantId(6),
                    name: "Bob".to_owned(),
                    flags: ItemFlags::REGULAR,
                    weight_before: 1.0,
                    weight_after: 1.2,
                },
            ],
        }
    }

    #[test]
    fn text_snapshot_lists_changes_after_entries() {
        let out = snapshot(&view(vec!["swapped #1 Ann with #2 Bob".to_owned()]), Format::Text)
            .unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "#12 lab 4 (updated 02.03.2026 09:30)");
        assert_eq!(lines[1], "1. ⭐ Ann");
        assert_eq!(lines[2], "2. Bob");
        assert_eq!(lines[3], "changes:");
        assert_eq!(lines[4], "  swapped #1 Ann with #2 Bob");
    }

    #[test]
    fn unedited_snapshot_has_no_change_section() {
        let out = snapshot(&view(Vec::new()), Format::Text).unwrap();
        assert!(!out.contains("changes:"));
    }

    #[test]
    fn json_output_is_parseable() {
        let out = snapshots(&[view(Vec::new())], Format::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["subject"], "lab 4");
        assert_eq!(parsed[0]["entries"][1]["name"], "Bob");
    }

    #[test]
    fn empty_listings_say_so() {
        assert_eq!(snapshots(&[], Format::Text).unwrap(), "no snapshots\n");
        assert_eq!(
            weights(&WeightsView { entries: Vec::new() }, Format::Text).unwrap(),
            "no participants\n"
        );
        assert_eq!(history(&[], Format::Text).unwrap(), "no weight changes recorded\n");
    }

    #[test]
    fn weights_reuse_the_view_layout() {
        let table = WeightsView {
            entries: vec![WeightEntry {
                participant_id: ParticipantId(1),
                name: "Ann".to_owned(),
                weight: 1.3956,
                active: true,
            }],
        };
        assert_eq!(weights(&table, Format::Text).unwrap(), "Ann: 1.40\n");
    }

    #[test]
    fn history_lines_show_snapshot_and_cause() {
        let records = vec![
            WeightHistoryRecord {
                participant_id: ParticipantId(1),
                weight: 0.7165,
                snapshot_id: Some(SnapshotId(3)),
                cause: "generated, relative position 1".to_owned(),
                recorded_at: Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap(),
            },
            WeightHistoryRecord {
                participant_id: ParticipantId(1),
                weight: 1.0,
                snapshot_id: None,
                cause: "reset".to_owned(),
                recorded_at: Utc.with_ymd_and_hms(2026, 1, 6, 8, 0, 0).unwrap(),
            },
        ];
        let out = history(&records, Format::Text).unwrap();
        assert_eq!(
            out,
            "05.01.2026 08:00 0.7165 #3 generated, relative position 1\n\
             06.01.2026 08:00 1.0000 - reset\n"
        );
    }

    #[test]
    fn cascade_summary_counts_snapshots() {
        let report = CascadeReport {
            origin: SnapshotId(2),
            touched: BTreeSet::from([ParticipantId(1)]),
            steps: Vec::new(),
        };
        assert_eq!(
            cascade_summary(2, &report),
            "2 weight(s) changed in #2; cascade rewrote 0 later snapshot(s) in 0 step(s)\n"
        );
    }
}
