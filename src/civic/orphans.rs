use crate::civic::bill::{METADATA_FILE, PLACEHOLDER_FILE};
use crate::civic::paths::StorePaths;
use crate::civic::util::{file_name_str, subdirs, write_json_atomic};
use crate::civic::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanEntry {
    pub first_seen: String,
    pub last_seen: String,
    pub occurrence_count: u64,
    pub session: String,
    pub vote_count: usize,
    pub event_count: usize,
    pub path: String,
}

pub type OrphanTracking = BTreeMap<String, OrphanEntry>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub placeholders: usize,
    pub resolved: usize,
    pub orphaned: usize,
    pub tracked: usize,
    pub failed: usize,
}

struct Placeholder {
    bill_id: String,
    session: String,
    bill_dir: PathBuf,
}

/// Every `country:us/<branch>/sessions/<s>/bills/<id>/placeholder.json`.
fn find_placeholders(paths: &StorePaths) -> Result<Vec<Placeholder>> {
    let mut out = Vec::new();
    for branch in subdirs(&paths.country_dir())? {
        for session_dir in subdirs(&branch.join("sessions"))? {
            for bill_dir in subdirs(&session_dir.join("bills"))? {
                if bill_dir.join(PLACEHOLDER_FILE).is_file() {
                    out.push(Placeholder {
                        bill_id: file_name_str(&bill_dir).to_string(),
                        session: file_name_str(&session_dir).to_string(),
                        bill_dir,
                    });
                }
            }
        }
    }
    Ok(out)
}

/// `(votes, events)` among the bill's log files, by filename.
fn count_logs(bill_dir: &Path) -> Result<(usize, usize)> {
    let logs = bill_dir.join("logs");
    if !logs.is_dir() {
        return Ok((0, 0));
    }
    let (mut votes, mut events) = (0, 0);
    for entry in fs::read_dir(&logs).with_context(|| format!("failed to read {}", logs.display()))? {
        let name = entry?.file_name().to_string_lossy().to_lowercase();
        if name.contains("vote") {
            votes += 1;
        } else if name.contains("event") {
            events += 1;
        }
    }
    Ok((votes, events))
}

pub fn load_tracking(path: &Path) -> OrphanTracking {
    let Ok(raw) = fs::read_to_string(path) else {
        return OrphanTracking::new();
    };
    match serde_json::from_str(&raw) {
        Ok(tracking) => tracking,
        Err(err) => {
            tracing::warn!(path = %path.display(), "orphan tracking unreadable; starting fresh: {err}");
            OrphanTracking::new()
        }
    }
}

fn relative_to_store(paths: &StorePaths, dir: &Path) -> String {
    dir.strip_prefix(&paths.store_root)
        .unwrap_or(dir)
        .to_string_lossy()
        .into_owned()
}

fn sweep_failed(placeholder: &Placeholder, err: &str) {
    warn::emit(WarnEvent {
        code: "IO",
        stage: "reconcile",
        action: "retry_next_run",
        file: &placeholder.bill_id,
        err,
        ..WarnEvent::default()
    });
}

/// Drop placeholders whose bill has arrived and count the runs each
/// remaining orphan has survived. The tracking file afterwards holds exactly
/// the bills that are orphaned right now.
pub fn reconcile(paths: &StorePaths) -> Result<ReconcileSummary> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut tracking = load_tracking(&paths.orphan_tracking_file);
    let mut seen = BTreeSet::new();
    let mut summary = ReconcileSummary::default();

    for placeholder in find_placeholders(paths)? {
        summary.placeholders += 1;
        if placeholder.bill_dir.join(METADATA_FILE).is_file() {
            let file = placeholder.bill_dir.join(PLACEHOLDER_FILE);
            match fs::remove_file(&file) {
                Ok(()) => {
                    tracing::info!(bill = %placeholder.bill_id, "placeholder resolved");
                    summary.resolved += 1;
                }
                Err(err) => {
                    sweep_failed(&placeholder, &format!("failed to remove {}: {err}", file.display()));
                    summary.failed += 1;
                }
            }
            continue;
        }

        let (vote_count, event_count) = match count_logs(&placeholder.bill_dir) {
            Ok(counts) => counts,
            Err(err) => {
                // Keep the previous entry untouched until the logs are readable.
                sweep_failed(&placeholder, &format!("{err:#}"));
                seen.insert(placeholder.bill_id.clone());
                summary.failed += 1;
                continue;
            }
        };
        if vote_count + event_count == 0 {
            continue;
        }
        if !seen.insert(placeholder.bill_id.clone()) {
            continue;
        }
        summary.orphaned += 1;
        let path = relative_to_store(paths, &placeholder.bill_dir);
        tracking
            .entry(placeholder.bill_id.clone())
            .and_modify(|entry| {
                entry.occurrence_count += 1;
                entry.last_seen = now.clone();
                entry.vote_count = vote_count;
                entry.event_count = event_count;
                entry.session = placeholder.session.clone();
                entry.path = path.clone();
            })
            .or_insert_with(|| OrphanEntry {
                first_seen: now.clone(),
                last_seen: now.clone(),
                occurrence_count: 1,
                session: placeholder.session.clone(),
                vote_count,
                event_count,
                path,
            });
    }

    tracking.retain(|bill_id, _| seen.contains(bill_id));
    summary.tracked = tracking.len();
    write_json_atomic(&paths.orphan_tracking_file, &tracking)?;
    tracing::info!(
        placeholders = summary.placeholders,
        resolved = summary.resolved,
        orphaned = summary.orphaned,
        "orphan sweep finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civic::paths::Jurisdiction;
    use crate::civic::util::write_json;
    use serde_json::json;
    use tempfile::tempdir;

    fn seed_orphan(paths: &StorePaths, juris: &Jurisdiction) -> PathBuf {
        let dir = juris.bill_dir(paths, "104th", "HB 77");
        write_json(&dir.join(PLACEHOLDER_FILE), &json!({"identifier": "HB77", "placeholder": true}))
            .expect("placeholder");
        write_json(&dir.join("logs/20250101T000000Z_vote_event_pass.json"), &json!({})).expect("vote log");
        dir
    }

    #[test]
    fn counts_runs_then_drops_entry_when_bill_arrives() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("il").expect("juris");
        let dir = seed_orphan(&paths, &juris);

        for _ in 0..3 {
            reconcile(&paths).expect("reconcile");
        }
        let tracking = load_tracking(&paths.orphan_tracking_file);
        let entry = tracking.get("HB77").expect("tracked");
        assert_eq!(entry.occurrence_count, 3);
        assert_eq!(entry.vote_count, 1);
        assert_eq!(entry.event_count, 0);
        assert_eq!(entry.session, "104th");
        assert_eq!(entry.path, "country:us/state:il/sessions/104th/bills/HB77");

        write_json(&dir.join(METADATA_FILE), &json!({"identifier": "HB 77"})).expect("metadata");
        let summary = reconcile(&paths).expect("fourth run");
        assert_eq!(summary.resolved, 1);
        assert!(!dir.join(PLACEHOLDER_FILE).exists());
        assert!(load_tracking(&paths.orphan_tracking_file).is_empty());
    }

    #[test]
    fn placeholder_without_logs_is_not_tracked() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("usa").expect("juris");
        let dir = juris.bill_dir(&paths, "119", "HR 9");
        write_json(&dir.join(PLACEHOLDER_FILE), &json!({"identifier": "HR9", "placeholder": true}))
            .expect("placeholder");

        let summary = reconcile(&paths).expect("reconcile");
        assert_eq!(summary.placeholders, 1);
        assert_eq!(summary.tracked, 0);
        assert!(dir.join(PLACEHOLDER_FILE).exists());
    }

    #[test]
    fn entries_for_vanished_placeholders_are_dropped() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let mut stale = OrphanTracking::new();
        stale.insert(
            "SB1".into(),
            OrphanEntry {
                first_seen: "2025-01-01T00:00:00Z".into(),
                last_seen: "2025-01-01T00:00:00Z".into(),
                occurrence_count: 4,
                session: "104th".into(),
                vote_count: 1,
                event_count: 0,
                path: "country:us/state:il/sessions/104th/bills/SB1".into(),
            },
        );
        write_json(&paths.orphan_tracking_file, &stale).expect("seed tracking");

        reconcile(&paths).expect("reconcile");
        assert!(load_tracking(&paths.orphan_tracking_file).is_empty());
    }
}
