use crate::civic::bill::handle_bill;
use crate::civic::context::{HandleOutcome, HandlerContext};
use crate::civic::error_sink::RejectReason;
use crate::civic::event::handle_event;
use crate::civic::loader::LoadedRecord;
use crate::civic::record::{Category, Record};
use crate::civic::sessions::{SessionFixProvider, SessionMapping, log_session_fix};
use crate::civic::vote_event::handle_vote_event;
use crate::civic::warn::{self, WarnEvent};
use anyhow::Result;
use std::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Saved(Category),
    Rejected(RejectReason),
    /// Event left in the archive for the linker.
    Deferred,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteSummary {
    pub bills: usize,
    pub votes: usize,
    pub events: usize,
    pub deferred: usize,
    pub rejected: usize,
    pub failed: usize,
    pub sessions_fixed: usize,
}

impl RouteSummary {
    fn tally(&mut self, routed: Routed) {
        match routed {
            Routed::Saved(Category::Bill) => self.bills += 1,
            Routed::Saved(Category::VoteEvent) => self.votes += 1,
            Routed::Saved(Category::Event) => self.events += 1,
            Routed::Rejected(_) => self.rejected += 1,
            Routed::Deferred => self.deferred += 1,
        }
    }
}

/// Session gate plus per-category dispatch for one run.
pub struct Router<'m, 'p> {
    sessions: &'m mut SessionMapping,
    fixer: &'p mut dyn SessionFixProvider,
    allow_session_fix: bool,
    summary: RouteSummary,
}

impl<'m, 'p> Router<'m, 'p> {
    pub fn new(
        sessions: &'m mut SessionMapping,
        fixer: &'p mut dyn SessionFixProvider,
        allow_session_fix: bool,
    ) -> Self {
        Self {
            sessions,
            fixer,
            allow_session_fix,
            summary: RouteSummary::default(),
        }
    }

    /// Known sessions pass; unknown ones may be fixed by the provider when
    /// fixing is allowed.
    fn session_known(&mut self, ctx: &HandlerContext<'_>, filename: &str, session_id: &str) -> Result<bool> {
        if self.sessions.contains_key(session_id) {
            return Ok(true);
        }
        if !self.allow_session_fix {
            return Ok(false);
        }
        let Some(info) = self.fixer.propose(filename, session_id) else {
            return Ok(false);
        };
        log_session_fix(ctx.paths, session_id, &info)?;
        tracing::info!(session = session_id, name = %info.name, "session mapping supplied by operator");
        self.sessions.insert(session_id.to_string(), info);
        self.summary.sessions_fixed += 1;
        Ok(true)
    }

    pub fn route(&mut self, ctx: &mut HandlerContext<'_>, loaded: &LoadedRecord) -> Result<Routed> {
        let filename = loaded.filename.as_str();
        let record = &loaded.record;

        let Some(session_id) = record.session_identifier() else {
            tracing::warn!(file = filename, "record has no legislative_session");
            ctx.sink.record(RejectReason::MissingSession, filename, record.payload())?;
            return Ok(Routed::Rejected(RejectReason::MissingSession));
        };
        if !self.session_known(ctx, filename, session_id)? {
            tracing::warn!(file = filename, session = session_id, "legislative session not resolvable");
            ctx.sink.record(RejectReason::UnknownSession, filename, record.payload())?;
            return Ok(Routed::Rejected(RejectReason::UnknownSession));
        }

        let outcome = match record {
            Record::Bill(bill) => handle_bill(ctx, filename, bill)?,
            Record::VoteEvent(vote) => handle_vote_event(ctx, filename, vote)?,
            Record::Event(event) => {
                if event.bill_identifier.is_none() && !event.referenced_bills().is_empty() {
                    tracing::debug!(file = filename, "event deferred to linker");
                    return Ok(Routed::Deferred);
                }
                let outcome = handle_event(ctx, filename, event, None)?;
                if outcome.is_saved() {
                    let archived = ctx.paths.event_archive_dir.join(filename);
                    if archived.exists() {
                        fs::remove_file(&archived)?;
                    }
                }
                outcome
            }
        };

        Ok(match outcome {
            HandleOutcome::Saved => Routed::Saved(record.category()),
            HandleOutcome::Rejected(reason) => Routed::Rejected(reason),
        })
    }

    /// Route every admitted record. A record whose write fails is logged and
    /// skipped; the batch always runs to the end.
    pub fn route_all(&mut self, ctx: &mut HandlerContext<'_>, records: &[LoadedRecord]) -> RouteSummary {
        for loaded in records {
            match self.route(ctx, loaded) {
                Ok(routed) => self.summary.tally(routed),
                Err(err) => {
                    warn::emit(WarnEvent {
                        code: "IO",
                        stage: "route",
                        action: "skip",
                        file: &loaded.filename,
                        reason: loaded.record.category().ledger_key(),
                        err: &format!("{err:#}"),
                    });
                    self.summary.failed += 1;
                }
            }
        }
        self.summary.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civic::error_sink::ErrorSink;
    use crate::civic::ledger::Ledger;
    use crate::civic::paths::{Jurisdiction, StorePaths};
    use crate::civic::sessions::{DeclineSessionFix, PromptSessionFix, SessionInfo};
    use serde_json::{Value, json};
    use std::io::Cursor;
    use tempfile::tempdir;

    fn loaded(filename: &str, category: Category, payload: Value) -> LoadedRecord {
        LoadedRecord {
            filename: filename.to_string(),
            record: Record::from_payload(category, payload),
        }
    }

    fn mapping() -> SessionMapping {
        let mut m = SessionMapping::new();
        m.insert("119".into(), SessionInfo { name: "119th Congress".into(), date_folder: "2025-2026".into() });
        m
    }

    #[test]
    fn session_gate_sinks_missing_and_unknown() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("usa").expect("juris");
        let sink = ErrorSink::new(&paths);
        let mut ledger = Ledger::load(&paths);
        let mut ctx = HandlerContext { paths: &paths, jurisdiction: &juris, sink: &sink, ledger: &mut ledger };
        let mut sessions = mapping();
        let mut fixer = DeclineSessionFix;
        let mut router = Router::new(&mut sessions, &mut fixer, true);

        let records = vec![
            loaded("bill_a.json", Category::Bill, json!({"identifier": "HR 2"})),
            loaded("bill_b.json", Category::Bill, json!({"identifier": "HR 3", "legislative_session": "118"})),
            loaded(
                "bill_c.json",
                Category::Bill,
                json!({"identifier": "HR 4", "legislative_session": "119", "actions": [{"date": "2025-01-09"}]}),
            ),
        ];
        let summary = router.route_all(&mut ctx, &records);

        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.bills, 1);
        assert_eq!(sink.count(RejectReason::MissingSession).expect("count"), 1);
        assert_eq!(sink.count(RejectReason::UnknownSession).expect("count"), 1);
    }

    #[test]
    fn operator_fix_admits_unknown_session_and_is_logged() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("usa").expect("juris");
        let sink = ErrorSink::new(&paths);
        let mut ledger = Ledger::load(&paths);
        let mut ctx = HandlerContext { paths: &paths, jurisdiction: &juris, sink: &sink, ledger: &mut ledger };
        let mut sessions = mapping();
        let mut fixer = PromptSessionFix::new(Cursor::new("118th Congress\n2023-2024\n"), Vec::new());
        let mut router = Router::new(&mut sessions, &mut fixer, true);

        let record = loaded(
            "bill_b.json",
            Category::Bill,
            json!({"identifier": "HR 3", "legislative_session": "118", "actions": [{"date": "2023-02-01"}]}),
        );
        assert_eq!(router.route(&mut ctx, &record).expect("route"), Routed::Saved(Category::Bill));
        drop(router);

        assert!(sessions.contains_key("118"));
        let log = fs::read_to_string(&paths.session_log_file).expect("session log");
        assert!(log.contains("118\t118th Congress\t2023-2024"));
    }

    #[test]
    fn fix_provider_is_not_consulted_without_flag() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("usa").expect("juris");
        let sink = ErrorSink::new(&paths);
        let mut ledger = Ledger::load(&paths);
        let mut ctx = HandlerContext { paths: &paths, jurisdiction: &juris, sink: &sink, ledger: &mut ledger };
        let mut sessions = mapping();
        let mut fixer = PromptSessionFix::new(Cursor::new("118th Congress\n2023-2024\n"), Vec::new());
        let mut router = Router::new(&mut sessions, &mut fixer, false);

        let record = loaded("bill_b.json", Category::Bill, json!({"identifier": "HR 3", "legislative_session": "118"}));
        assert_eq!(
            router.route(&mut ctx, &record).expect("route"),
            Routed::Rejected(RejectReason::UnknownSession)
        );
    }

    #[test]
    fn agenda_only_event_is_deferred_and_direct_event_leaves_archive() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("usa").expect("juris");
        let sink = ErrorSink::new(&paths);
        let mut ledger = Ledger::load(&paths);
        let mut ctx = HandlerContext { paths: &paths, jurisdiction: &juris, sink: &sink, ledger: &mut ledger };
        let mut sessions = mapping();
        let mut fixer = DeclineSessionFix;
        let mut router = Router::new(&mut sessions, &mut fixer, false);

        let agenda_only = json!({
            "name": "Markup",
            "legislative_session": "119",
            "start_date": "2025-03-01",
            "agenda": [{"related_entities": [{"entity_type": "bill", "name": "HR 1"}]}]
        });
        let direct = json!({
            "name": "Hearing",
            "legislative_session": "119",
            "start_date": "2025-03-02",
            "bill_identifier": "HR 1"
        });
        crate::civic::util::write_json(&paths.event_archive_dir.join("event_1.json"), &agenda_only).expect("archive 1");
        crate::civic::util::write_json(&paths.event_archive_dir.join("event_2.json"), &direct).expect("archive 2");

        let summary = router.route_all(
            &mut ctx,
            &[
                loaded("event_1.json", Category::Event, agenda_only),
                loaded("event_2.json", Category::Event, direct),
            ],
        );
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.events, 1);
        assert!(paths.event_archive_dir.join("event_1.json").exists());
        assert!(!paths.event_archive_dir.join("event_2.json").exists());
        assert_eq!(sink.count(RejectReason::EventMissingBillIdentifier).expect("count"), 0);
    }
}
