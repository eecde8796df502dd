use crate::civic::paths::StorePaths;
use crate::civic::record::DateRejection;
use crate::civic::util::{ensure_dir, file_name_str, list_json_files, write_json};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Partition of the error store a rejected record lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingSession,
    UnknownSession,
    InvalidJson,
    MissingIdentifier,
    MissingBillIdentifier,
    EventMissingStartDate,
    EventMissingBillIdentifier,
    UnsafePath,
    Date(DateRejection),
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingSession => "missing_session",
            Self::UnknownSession => "unknown_session",
            Self::InvalidJson => "invalid_json",
            Self::MissingIdentifier => "missing_identifier",
            Self::MissingBillIdentifier => "missing_bill_identifier",
            Self::EventMissingStartDate => "event_missing_start_date",
            Self::EventMissingBillIdentifier => "event_missing_bill_identifier",
            Self::UnsafePath => "unsafe_path",
            Self::Date(DateRejection::NoActionsFound) => "no_actions_found",
            Self::Date(DateRejection::NoDatesInActions) => "no_dates_in_actions",
            Self::Date(DateRejection::InvalidDate) => "invalid_date",
            Self::Date(DateRejection::MissingDate) => "missing_date",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub reason: String,
    pub original_filename: String,
    pub dedup_key: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Written,
    Duplicate,
}

/// Append-only, deduplicating store of rejected records, one folder per
/// reason.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    root: PathBuf,
}

/// The payload's `name` when present, else a content hash.
pub fn dedup_key(payload: &Value) -> String {
    if let Some(name) = payload.get("name").and_then(Value::as_str) {
        if !name.trim().is_empty() {
            return format!("name:{}", name.trim());
        }
    }
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

/// `filename` itself, unless an earlier record with another key holds it;
/// then the key digest goes into the stem so neither record is lost.
fn record_path(dir: &Path, filename: &str, key: &str) -> PathBuf {
    let path = dir.join(filename);
    if !path.exists() {
        return path;
    }
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
    dir.join(format!("{stem}.{}.json", &digest[..12]))
}

impl ErrorSink {
    pub fn new(paths: &StorePaths) -> Self {
        Self {
            root: paths.errors_dir.clone(),
        }
    }

    pub fn reason_dir(&self, reason: RejectReason) -> PathBuf {
        self.root.join(reason.as_str())
    }

    fn existing(&self, reason: RejectReason) -> Result<Vec<(PathBuf, ErrorRecord)>> {
        let mut out = Vec::new();
        for path in list_json_files(&self.reason_dir(reason))? {
            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(existing) = serde_json::from_str::<ErrorRecord>(&raw) else {
                continue;
            };
            out.push((path, existing));
        }
        Ok(out)
    }

    pub fn record(&self, reason: RejectReason, filename: &str, payload: &Value) -> Result<SinkOutcome> {
        let dir = self.reason_dir(reason);
        ensure_dir(&dir)?;

        let key = dedup_key(payload);
        if self.existing(reason)?.iter().any(|(_, r)| r.dedup_key == key) {
            tracing::debug!(reason = reason.as_str(), file = filename, "duplicate error record skipped");
            return Ok(SinkOutcome::Duplicate);
        }

        let record = ErrorRecord {
            reason: reason.as_str().to_string(),
            original_filename: filename.to_string(),
            dedup_key: key,
            payload: payload.clone(),
        };
        let path = record_path(&dir, filename, &record.dedup_key);
        write_json(&path, &record)?;
        tracing::info!(reason = reason.as_str(), file = filename, "record routed to error sink");
        Ok(SinkOutcome::Written)
    }

    /// Remove every record of `filename` that no longer applies. Returns
    /// whether one existed.
    pub fn clear(&self, reason: RejectReason, filename: &str) -> Result<bool> {
        let mut removed = false;
        for path in list_json_files(&self.reason_dir(reason))? {
            let matches = file_name_str(&path) == filename
                || fs::read_to_string(&path)
                    .ok()
                    .and_then(|raw| serde_json::from_str::<ErrorRecord>(&raw).ok())
                    .is_some_and(|r| r.original_filename == filename);
            if matches {
                fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
                removed = true;
            }
        }
        Ok(removed)
    }

    #[cfg(test)]
    pub fn count(&self, reason: RejectReason) -> Result<usize> {
        Ok(list_json_files(&self.reason_dir(reason))?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn same_name_same_reason_collapses() {
        let tmp = tempdir().expect("tempdir");
        let sink = ErrorSink::new(&StorePaths::new(tmp.path()));
        let payload = json!({"name": "Committee hearing"});

        let first = sink
            .record(RejectReason::MissingSession, "event_1.json", &payload)
            .expect("first");
        let second = sink
            .record(RejectReason::MissingSession, "event_2.json", &payload)
            .expect("second");

        assert_eq!(first, SinkOutcome::Written);
        assert_eq!(second, SinkOutcome::Duplicate);
        assert_eq!(sink.count(RejectReason::MissingSession).expect("count"), 1);
    }

    #[test]
    fn same_name_different_reason_is_kept() {
        let tmp = tempdir().expect("tempdir");
        let sink = ErrorSink::new(&StorePaths::new(tmp.path()));
        let payload = json!({"name": "x"});
        sink.record(RejectReason::MissingSession, "a.json", &payload)
            .expect("missing");
        let outcome = sink
            .record(RejectReason::UnknownSession, "a.json", &payload)
            .expect("unknown");
        assert_eq!(outcome, SinkOutcome::Written);
    }

    #[test]
    fn unnamed_payloads_dedupe_by_content() {
        let tmp = tempdir().expect("tempdir");
        let sink = ErrorSink::new(&StorePaths::new(tmp.path()));
        let payload = json!({"error": "Could not parse JSON", "raw": "{oops"});
        sink.record(RejectReason::InvalidJson, "bill_x.json", &payload)
            .expect("first");
        let again = sink
            .record(RejectReason::InvalidJson, "bill_x.json", &payload)
            .expect("again");
        assert_eq!(again, SinkOutcome::Duplicate);

        let other = sink
            .record(RejectReason::InvalidJson, "bill_y.json", &json!({"raw": "[["}))
            .expect("other");
        assert_eq!(other, SinkOutcome::Written);
    }

    #[test]
    fn record_preserves_original_filename_and_clear_removes_it() {
        let tmp = tempdir().expect("tempdir");
        let sink = ErrorSink::new(&StorePaths::new(tmp.path()));
        sink.record(RejectReason::MissingSession, "event_9.json", &json!({"a": 1}))
            .expect("record");

        let path = sink.reason_dir(RejectReason::MissingSession).join("event_9.json");
        let stored: ErrorRecord =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(stored.original_filename, "event_9.json");
        assert_eq!(stored.reason, "missing_session");

        assert!(sink.clear(RejectReason::MissingSession, "event_9.json").expect("clear"));
        assert!(!sink.clear(RejectReason::MissingSession, "event_9.json").expect("clear again"));
    }

    #[test]
    fn reused_filename_with_new_content_keeps_both_records() {
        let tmp = tempdir().expect("tempdir");
        let sink = ErrorSink::new(&StorePaths::new(tmp.path()));
        sink.record(RejectReason::InvalidJson, "bill_x.json", &json!({"raw": "{first"}))
            .expect("first run");
        let later = sink
            .record(RejectReason::InvalidJson, "bill_x.json", &json!({"raw": "{second"}))
            .expect("later run");
        assert_eq!(later, SinkOutcome::Written);
        assert_eq!(sink.count(RejectReason::InvalidJson).expect("count"), 2);

        let first: ErrorRecord = serde_json::from_str(
            &fs::read_to_string(sink.reason_dir(RejectReason::InvalidJson).join("bill_x.json")).expect("read"),
        )
        .expect("parse");
        assert_eq!(first.payload["raw"], "{first");

        assert!(sink.clear(RejectReason::InvalidJson, "bill_x.json").expect("clear"));
        assert_eq!(sink.count(RejectReason::InvalidJson).expect("count"), 0);
    }
}
