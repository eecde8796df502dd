use crate::civic::bill::METADATA_FILE;
use crate::civic::error_sink::{ErrorSink, RejectReason};
use crate::civic::ledger::{Freshness, Ledger};
use crate::civic::paths::{Jurisdiction, StorePaths, bill_path_is_safe};
use crate::civic::record::{BillRecord, Category, Record};
use crate::civic::util::{file_name_str, list_json_files, write_json};
use crate::civic::warn::{self, WarnEvent};
use crate::error::IngestError;
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct LoadedRecord {
    pub filename: String,
    pub record: Record,
}

#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub admitted: Vec<LoadedRecord>,
    pub scanned: usize,
    pub descriptors: usize,
    pub unclassified: usize,
    pub stale: usize,
    pub changed_bills: usize,
    pub rejected: usize,
    pub failed: usize,
    pub archived_events: usize,
}

pub fn is_descriptor(filename: &str) -> bool {
    filename.starts_with("jurisdiction_")
}

/// Why an otherwise stale bill is admitted anyway.
fn changed_bill_reason(paths: &StorePaths, jurisdiction: &Jurisdiction, bill: &BillRecord) -> Option<&'static str> {
    let (Some(identifier), Some(session)) = (bill.identifier.as_deref(), bill.session.as_deref()) else {
        return None;
    };
    if !bill_path_is_safe(session, identifier) {
        return Some("unsafe_path");
    }
    let metadata = jurisdiction.bill_dir(paths, session, identifier).join(METADATA_FILE);
    let Some(stored) = fs::read_to_string(&metadata)
        .ok()
        .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
    else {
        return Some("not_in_store");
    };
    let stored_actions = stored
        .get("actions")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    (stored_actions != bill.actions.len()).then_some("action_count_changed")
}

fn read_payload(path: &Path, filename: &str, sink: &ErrorSink) -> Result<Option<Value>> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            tracing::warn!(file = filename, "input is not valid JSON: {err}");
            sink.record(
                RejectReason::InvalidJson,
                filename,
                &json!({"error": err.to_string(), "raw": raw}),
            )?;
            Ok(None)
        }
    }
}

/// Copy an admitted event into the archive the linker works from.
fn archive_event(paths: &StorePaths, sink: &ErrorSink, filename: &str, payload: &Value) -> Result<()> {
    write_json(&paths.event_archive_dir.join(filename), payload)?;
    if sink.clear(RejectReason::MissingSession, filename)? {
        tracing::debug!(file = filename, "stale missing_session record cleared");
    }
    Ok(())
}

/// Classify, parse and freshness-check one input file. Counters for every
/// outcome other than admission and failure are bumped here.
fn admit(
    paths: &StorePaths,
    jurisdiction: &Jurisdiction,
    path: &Path,
    filename: &str,
    start: &Ledger,
    sink: &ErrorSink,
    summary: &mut LoadSummary,
) -> Result<Option<Record>> {
    if is_descriptor(filename) {
        summary.descriptors += 1;
        return Ok(None);
    }
    let Some(category) = Category::classify(filename) else {
        tracing::info!(file = %filename, "unclassified input skipped");
        summary.unclassified += 1;
        return Ok(None);
    };
    let Some(payload) = read_payload(path, filename, sink)? else {
        summary.rejected += 1;
        return Ok(None);
    };

    let record = Record::from_payload(category, payload);
    match start.check(&record) {
        Freshness::Newer(_) => {}
        Freshness::Stale(date) => {
            let changed = match &record {
                Record::Bill(bill) => changed_bill_reason(paths, jurisdiction, bill),
                _ => None,
            };
            let Some(why) = changed else {
                tracing::debug!(file = %filename, %date, "record not newer than ledger; skipped");
                summary.stale += 1;
                return Ok(None);
            };
            tracing::debug!(file = %filename, why, "older bill admitted");
            summary.changed_bills += 1;
        }
        Freshness::Rejected(reason) => {
            tracing::warn!(file = %filename, reason = reason.as_str(), "record date unusable");
            sink.record(RejectReason::Date(reason), filename, record.payload())?;
            summary.rejected += 1;
            return Ok(None);
        }
    }

    if category == Category::Event {
        archive_event(paths, sink, filename, record.payload())?;
        summary.archived_events += 1;
    }
    Ok(Some(record))
}

/// Read the input folder in filename order and keep only records worth
/// routing. Freshness is judged against `start`, the ledger as it stood when
/// the run began. A file that cannot be read or recorded is warned about,
/// counted as failed and left for the next run.
pub fn load_inputs(
    paths: &StorePaths,
    jurisdiction: &Jurisdiction,
    input_dir: &Path,
    start: &Ledger,
    sink: &ErrorSink,
) -> Result<LoadSummary> {
    if !input_dir.is_dir() {
        return Err(IngestError::InputMissing(input_dir.to_path_buf()).into());
    }

    let mut summary = LoadSummary::default();
    for path in list_json_files(input_dir)? {
        let filename = file_name_str(&path).to_string();
        summary.scanned += 1;
        match admit(paths, jurisdiction, &path, &filename, start, sink, &mut summary) {
            Ok(Some(record)) => summary.admitted.push(LoadedRecord { filename, record }),
            Ok(None) => {}
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "IO",
                    stage: "load",
                    action: "retry_next_run",
                    file: &filename,
                    err: &format!("{err:#}"),
                    ..WarnEvent::default()
                });
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        scanned = summary.scanned,
        admitted = summary.admitted.len(),
        stale = summary.stale,
        rejected = summary.rejected,
        failed = summary.failed,
        unclassified = summary.unclassified,
        "input loaded"
    );
    Ok(summary)
}
