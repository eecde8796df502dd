use crate::civic::bill::METADATA_FILE;
use crate::civic::paths::{Jurisdiction, StorePaths, normalize_bill_id};
use crate::civic::sessions::SessionMapping;
use crate::civic::util::{file_name_str, subdirs, write_json_atomic};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillIndexEntry {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_folder: Option<String>,
    pub identifier: String,
}

/// Derived `bill id -> session` lookup over the bills already in the store.
///
/// This is a cache of the store, never a source of truth: a stale copy only
/// defers links until the next rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillIndex {
    pub jurisdiction: String,
    pub bills: BTreeMap<String, BillIndexEntry>,
}

fn read_identifier(metadata: &Path) -> Option<String> {
    let raw = fs::read_to_string(metadata).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed
        .get("identifier")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

impl BillIndex {
    /// Scan `<branch>/sessions/*/bills/*/metadata.json`. Placeholder-only
    /// folders are not indexed.
    pub fn build(paths: &StorePaths, jurisdiction: &Jurisdiction, sessions: &SessionMapping) -> Result<Self> {
        let mut bills: BTreeMap<String, BillIndexEntry> = BTreeMap::new();
        for session_dir in subdirs(&jurisdiction.sessions_root(paths))? {
            let session_id = file_name_str(&session_dir).to_string();
            let info = sessions.get(&session_id);
            for bill_dir in subdirs(&session_dir.join("bills"))? {
                let metadata = bill_dir.join(METADATA_FILE);
                if !metadata.is_file() {
                    continue;
                }
                let folder = file_name_str(&bill_dir).to_string();
                let identifier = read_identifier(&metadata).unwrap_or_else(|| folder.clone());
                let key = normalize_bill_id(&identifier);
                if let Some(existing) = bills.get(&key) {
                    tracing::debug!(
                        bill = %key,
                        kept = %existing.session_id,
                        skipped = %session_id,
                        "bill present in several sessions; first session wins"
                    );
                    continue;
                }
                bills.insert(
                    key,
                    BillIndexEntry {
                        session_id: session_id.clone(),
                        session_name: info.map(|i| i.name.clone()),
                        date_folder: info.map(|i| i.date_folder.clone()),
                        identifier,
                    },
                );
            }
        }
        tracing::debug!(jurisdiction = jurisdiction.code(), bills = bills.len(), "bill index built");
        Ok(Self {
            jurisdiction: jurisdiction.code().to_string(),
            bills,
        })
    }

    /// The persisted index, or `None` when absent, unreadable or built for a
    /// different jurisdiction.
    pub fn load(path: &Path, jurisdiction: &Jurisdiction) -> Option<Self> {
        let raw = fs::read_to_string(path).ok()?;
        let parsed: BillIndex = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(path = %path.display(), "ignoring corrupt bill index: {err}");
                return None;
            }
        };
        (parsed.jurisdiction == jurisdiction.code()).then_some(parsed)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
            .with_context(|| format!("failed to persist bill index {}", path.display()))
    }

    pub fn load_or_build(
        paths: &StorePaths,
        jurisdiction: &Jurisdiction,
        sessions: &SessionMapping,
        force_rebuild: bool,
    ) -> Result<Self> {
        if !force_rebuild {
            if let Some(index) = Self::load(&paths.bill_index_file, jurisdiction) {
                return Ok(index);
            }
        }
        let index = Self::build(paths, jurisdiction, sessions)?;
        index.save(&paths.bill_index_file)?;
        Ok(index)
    }

    pub fn lookup(&self, bill_id: &str) -> Option<&BillIndexEntry> {
        self.bills.get(&normalize_bill_id(bill_id))
    }

    pub fn len(&self) -> usize {
        self.bills.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civic::sessions::SessionInfo;
    use crate::civic::util::write_json;
    use serde_json::json;
    use tempfile::tempdir;

    fn seed_bill(paths: &StorePaths, juris: &Jurisdiction, session: &str, id: &str) {
        let dir = juris.bill_dir(paths, session, id);
        write_json(&dir.join(METADATA_FILE), &json!({"identifier": id})).expect("seed bill");
    }

    #[test]
    fn indexes_primary_bills_only() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("il").expect("juris");
        seed_bill(&paths, &juris, "104th", "HB 1663");
        let placeholder_dir = juris.bill_dir(&paths, "104th", "SB 9");
        write_json(&placeholder_dir.join("placeholder.json"), &json!({"identifier": "SB9", "placeholder": true}))
            .expect("seed placeholder");

        let mut sessions = SessionMapping::new();
        sessions.insert(
            "104th".into(),
            SessionInfo { name: "104th General Assembly".into(), date_folder: "2025-2026".into() },
        );
        let index = BillIndex::build(&paths, &juris, &sessions).expect("build");

        assert_eq!(index.len(), 1);
        let entry = index.lookup("HB1663").expect("hit");
        assert_eq!(entry.session_id, "104th");
        assert_eq!(entry.identifier, "HB 1663");
        assert_eq!(entry.date_folder.as_deref(), Some("2025-2026"));
        assert!(index.lookup("SB 9").is_none());
    }

    #[test]
    fn cached_index_is_reused_until_forced() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("usa").expect("juris");
        let sessions = SessionMapping::new();

        let first = BillIndex::load_or_build(&paths, &juris, &sessions, false).expect("first");
        assert_eq!(first.len(), 0);
        assert!(paths.bill_index_file.exists());

        seed_bill(&paths, &juris, "119", "HR 1");
        let stale = BillIndex::load_or_build(&paths, &juris, &sessions, false).expect("stale");
        assert!(stale.lookup("HR1").is_none());

        let fresh = BillIndex::load_or_build(&paths, &juris, &sessions, true).expect("fresh");
        assert_eq!(fresh.lookup("HR 1").map(|e| e.session_id.as_str()), Some("119"));
    }

    #[test]
    fn index_for_other_jurisdiction_is_ignored() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let il = Jurisdiction::new("il").expect("il");
        let usa = Jurisdiction::new("usa").expect("usa");
        BillIndex::load_or_build(&paths, &il, &SessionMapping::new(), true).expect("il");
        assert!(BillIndex::load(&paths.bill_index_file, &usa).is_none());
        assert!(BillIndex::load(&paths.bill_index_file, &il).is_some());
    }
}
