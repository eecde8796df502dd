use crate::civic::bill_index::BillIndex;
use crate::civic::context::{HandleOutcome, HandlerContext};
use crate::civic::error_sink::RejectReason;
use crate::civic::event::{EventLink, handle_event};
use crate::civic::paths::normalize_bill_id;
use crate::civic::record::EventRecord;
use crate::civic::sessions::SessionMapping;
use crate::civic::util::{file_name_str, list_json_files};
use crate::civic::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};

/// Error partitions that stop applying once an event is anchored.
const STALE_ON_LINK: [RejectReason; 3] = [
    RejectReason::MissingSession,
    RejectReason::UnknownSession,
    RejectReason::EventMissingBillIdentifier,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSummary {
    pub archived: usize,
    pub linked_first_pass: usize,
    pub linked_second_pass: usize,
    pub rejected: usize,
    pub unreferenced: usize,
    pub unresolved: usize,
    pub invalid: usize,
    pub failed: usize,
    pub index_rebuilt: bool,
}

impl LinkSummary {
    pub fn linked(&self) -> usize {
        self.linked_first_pass + self.linked_second_pass
    }
}

struct ArchivedEvent {
    path: PathBuf,
    filename: String,
    event: EventRecord,
    candidates: Vec<String>,
}

/// Bills an event points at, in lookup order: the direct reference first,
/// then agenda entries. Duplicates are dropped.
pub fn candidate_bills(event: &EventRecord) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let direct = event.bill_identifier.as_deref().map(normalize_bill_id);
    for id in direct.into_iter().chain(event.referenced_bills()) {
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

fn read_archived(
    ctx: &HandlerContext<'_>,
    path: &Path,
    filename: &str,
    summary: &mut LinkSummary,
) -> Result<Option<(EventRecord, Vec<String>)>> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let payload: Value = match serde_json::from_str(&raw) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(file = %filename, "archived event is not valid JSON: {err}");
            ctx.sink.record(
                RejectReason::InvalidJson,
                filename,
                &json!({"error": err.to_string(), "raw": raw}),
            )?;
            remove_archived(path)?;
            summary.invalid += 1;
            return Ok(None);
        }
    };
    let event = EventRecord::from_payload(payload);
    let candidates = candidate_bills(&event);
    if candidates.is_empty() {
        tracing::debug!(file = %filename, "archived event references no bill; left in archive");
        summary.unreferenced += 1;
        return Ok(None);
    }
    Ok(Some((event, candidates)))
}

/// Archived events that name at least one bill. Unreadable entries are
/// warned about, counted as failed and left in place.
fn read_archive(ctx: &HandlerContext<'_>, summary: &mut LinkSummary) -> Result<Vec<ArchivedEvent>> {
    let mut out = Vec::new();
    for path in list_json_files(&ctx.paths.event_archive_dir)? {
        let filename = file_name_str(&path).to_string();
        summary.archived += 1;
        match read_archived(ctx, &path, &filename, summary) {
            Ok(Some((event, candidates))) => out.push(ArchivedEvent { path, filename, event, candidates }),
            Ok(None) => {}
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "IO",
                    stage: "link_read",
                    action: "retry_next_run",
                    file: &filename,
                    err: &format!("{err:#}"),
                    ..WarnEvent::default()
                });
                summary.failed += 1;
            }
        }
    }
    Ok(out)
}

fn remove_archived(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}

/// First candidate present in the index wins; later candidates are never
/// consulted once one hits.
fn first_hit(index: &BillIndex, candidates: &[String]) -> Option<EventLink> {
    candidates.iter().find_map(|id| {
        index.lookup(id).map(|entry| EventLink {
            session_id: entry.session_id.clone(),
            bill_id: id.clone(),
        })
    })
}

enum Attempt {
    Anchored(HandleOutcome),
    Miss,
}

fn anchor(ctx: &mut HandlerContext<'_>, archived: &ArchivedEvent, link: &EventLink) -> Result<HandleOutcome> {
    let outcome = handle_event(ctx, &archived.filename, &archived.event, Some(link))?;
    remove_archived(&archived.path)?;
    for reason in STALE_ON_LINK {
        if ctx.sink.clear(reason, &archived.filename)? {
            tracing::debug!(file = %archived.filename, reason = reason.as_str(), "stale error record cleared");
        }
    }
    tracing::info!(
        file = %archived.filename,
        bill = %link.bill_id,
        session = %link.session_id,
        saved = outcome.is_saved(),
        "archived event linked"
    );
    Ok(outcome)
}

fn attempt(ctx: &mut HandlerContext<'_>, index: &BillIndex, archived: &ArchivedEvent) -> Result<Attempt> {
    match first_hit(index, &archived.candidates) {
        Some(link) => Ok(Attempt::Anchored(anchor(ctx, archived, &link)?)),
        None => Ok(Attempt::Miss),
    }
}

/// One pass over `events`; returns those that found no bill.
fn run_pass(
    ctx: &mut HandlerContext<'_>,
    index: &BillIndex,
    events: Vec<ArchivedEvent>,
    summary: &mut LinkSummary,
    second_pass: bool,
) -> Vec<ArchivedEvent> {
    let mut deferred = Vec::new();
    for archived in events {
        match attempt(ctx, index, &archived) {
            Ok(Attempt::Anchored(HandleOutcome::Saved)) if second_pass => summary.linked_second_pass += 1,
            Ok(Attempt::Anchored(HandleOutcome::Saved)) => summary.linked_first_pass += 1,
            Ok(Attempt::Anchored(HandleOutcome::Rejected(_))) => summary.rejected += 1,
            Ok(Attempt::Miss) => deferred.push(archived),
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "IO",
                    stage: if second_pass { "link_pass_2" } else { "link_pass_1" },
                    action: "retry_next_run",
                    file: &archived.filename,
                    err: &format!("{err:#}"),
                    ..WarnEvent::default()
                });
                summary.failed += 1;
            }
        }
    }
    deferred
}

/// Attach archived events to their bills.
///
/// Pass 1 uses the persisted bill index (built when absent, or when
/// `force_rebuild` is set). Events that miss are retried once against a
/// freshly rebuilt index, so bills written earlier in the same run are
/// visible. Events that still miss stay archived for the next run.
pub fn link_events(
    ctx: &mut HandlerContext<'_>,
    sessions: &SessionMapping,
    force_rebuild: bool,
) -> Result<LinkSummary> {
    let mut summary = LinkSummary::default();
    let pending = read_archive(ctx, &mut summary)?;
    if pending.is_empty() {
        return Ok(summary);
    }

    let index = BillIndex::load_or_build(ctx.paths, ctx.jurisdiction, sessions, force_rebuild)?;
    let deferred = run_pass(ctx, &index, pending, &mut summary, false);
    if deferred.is_empty() {
        return Ok(summary);
    }

    tracing::info!(deferred = deferred.len(), "rebuilding bill index for second link pass");
    let index = BillIndex::load_or_build(ctx.paths, ctx.jurisdiction, sessions, true)?;
    summary.index_rebuilt = true;
    let unresolved = run_pass(ctx, &index, deferred, &mut summary, true);
    for archived in &unresolved {
        tracing::debug!(file = %archived.filename, candidates = ?archived.candidates, "event unresolved; kept for next run");
    }
    summary.unresolved = unresolved.len();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civic::bill::METADATA_FILE;
    use crate::civic::error_sink::ErrorSink;
    use crate::civic::ledger::Ledger;
    use crate::civic::paths::{Jurisdiction, StorePaths};
    use crate::civic::util::write_json;
    use tempfile::tempdir;

    fn agenda_event(name: &str, date: &str, bills: &[&str]) -> Value {
        let entities: Vec<Value> = bills
            .iter()
            .map(|b| json!({"entity_type": "bill", "name": b}))
            .collect();
        json!({"name": name, "start_date": date, "agenda": [{"related_entities": entities}]})
    }

    fn seed_bill(paths: &StorePaths, juris: &Jurisdiction, session: &str, id: &str) {
        write_json(&juris.bill_dir(paths, session, id).join(METADATA_FILE), &json!({"identifier": id}))
            .expect("seed bill");
    }

    #[test]
    fn candidates_put_direct_reference_first() {
        let mut payload = agenda_event("x", "2025-01-01", &["SB 2", "HB 1", "SB2"]);
        payload["bill_identifier"] = json!("HB 1");
        let event = EventRecord::from_payload(payload);
        assert_eq!(candidate_bills(&event), vec!["HB1".to_string(), "SB2".to_string()]);
    }

    #[test]
    fn stale_index_defers_to_second_pass() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("il").expect("juris");
        let sink = ErrorSink::new(&paths);
        let mut ledger = Ledger::load(&paths);
        let sessions = SessionMapping::new();

        // Persist an index that predates the bill.
        BillIndex::load_or_build(&paths, &juris, &sessions, true).expect("empty index");
        seed_bill(&paths, &juris, "104th", "HB 1663");
        write_json(
            &paths.event_archive_dir.join("event_1.json"),
            &agenda_event("Hearing", "2025-03-01", &["HB 1663"]),
        )
        .expect("archive");
        sink.record(RejectReason::MissingSession, "event_1.json", &json!({"name": "Hearing"}))
            .expect("stale record");

        let mut ctx = HandlerContext { paths: &paths, jurisdiction: &juris, sink: &sink, ledger: &mut ledger };
        let summary = link_events(&mut ctx, &sessions, false).expect("link");

        assert_eq!(summary.linked_first_pass, 0);
        assert_eq!(summary.linked_second_pass, 1);
        assert!(summary.index_rebuilt);
        assert!(!paths.event_archive_dir.join("event_1.json").exists());
        assert_eq!(sink.count(RejectReason::MissingSession).expect("count"), 0);
        assert!(tmp
            .path()
            .join("country:us/state:il/sessions/104th/events/20250301T000000Z_hearing.json")
            .exists());
    }

    #[test]
    fn first_match_wins_over_later_candidates() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("il").expect("juris");
        let sink = ErrorSink::new(&paths);
        let mut ledger = Ledger::load(&paths);
        seed_bill(&paths, &juris, "103rd", "SB 1");
        seed_bill(&paths, &juris, "104th", "HB 2");
        write_json(
            &paths.event_archive_dir.join("event_9.json"),
            &agenda_event("Floor", "2025-05-05", &["HB 2", "SB 1"]),
        )
        .expect("archive");

        let mut ctx = HandlerContext { paths: &paths, jurisdiction: &juris, sink: &sink, ledger: &mut ledger };
        let summary = link_events(&mut ctx, &SessionMapping::new(), true).expect("link");
        assert_eq!(summary.linked(), 1);
        assert!(juris.events_dir(&paths, "104th").join("20250505T000000Z_floor.json").exists());
        assert!(!juris.events_dir(&paths, "103rd").exists());
    }

    #[test]
    fn unresolvable_events_stay_archived() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("il").expect("juris");
        let sink = ErrorSink::new(&paths);
        let mut ledger = Ledger::load(&paths);
        write_json(
            &paths.event_archive_dir.join("event_a.json"),
            &agenda_event("A", "2025-01-01", &["HB 404"]),
        )
        .expect("archive a");
        write_json(&paths.event_archive_dir.join("event_b.json"), &json!({"name": "B"})).expect("archive b");
        fs::write(paths.event_archive_dir.join("event_c.json"), "{oops").expect("archive c");

        let mut ctx = HandlerContext { paths: &paths, jurisdiction: &juris, sink: &sink, ledger: &mut ledger };
        let summary = link_events(&mut ctx, &SessionMapping::new(), false).expect("link");

        assert_eq!(summary.archived, 3);
        assert_eq!(summary.unresolved, 1);
        assert_eq!(summary.unreferenced, 1);
        assert_eq!(summary.invalid, 1);
        assert!(paths.event_archive_dir.join("event_a.json").exists());
        assert!(paths.event_archive_dir.join("event_b.json").exists());
        assert!(!paths.event_archive_dir.join("event_c.json").exists());
        assert_eq!(sink.count(RejectReason::InvalidJson).expect("count"), 1);
    }

    #[test]
    fn unreadable_archive_entry_is_skipped_and_kept() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("il").expect("juris");
        let sink = ErrorSink::new(&paths);
        let mut ledger = Ledger::load(&paths);
        seed_bill(&paths, &juris, "104th", "HB 5");
        fs::create_dir_all(&paths.event_archive_dir).expect("archive dir");
        fs::write(paths.event_archive_dir.join("event_a.json"), b"\xff\xfe not utf8").expect("archive a");
        write_json(
            &paths.event_archive_dir.join("event_b.json"),
            &agenda_event("Markup", "2025-04-04", &["HB 5"]),
        )
        .expect("archive b");

        let mut ctx = HandlerContext { paths: &paths, jurisdiction: &juris, sink: &sink, ledger: &mut ledger };
        let summary = link_events(&mut ctx, &SessionMapping::new(), false).expect("link");

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.linked(), 1);
        assert!(paths.event_archive_dir.join("event_a.json").exists());
        assert!(!paths.event_archive_dir.join("event_b.json").exists());
    }
}
