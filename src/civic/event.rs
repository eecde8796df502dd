use crate::civic::context::{HandleOutcome, HandlerContext};
use crate::civic::error_sink::RejectReason;
use crate::civic::paths::is_safe_component;
use crate::civic::record::{Category, EventRecord};
use crate::civic::util::{clean_event_name, parse_date, timestamp_tag, write_json};
use anyhow::Result;
use std::path::PathBuf;

/// Where the linker resolved an event's bill reference to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLink {
    pub session_id: String,
    pub bill_id: String,
}

/// Store an event under `sessions/<session>/events/`. With `link` set the
/// session and bill come from the linker instead of the payload.
pub fn handle_event(
    ctx: &mut HandlerContext<'_>,
    filename: &str,
    event: &EventRecord,
    link: Option<&EventLink>,
) -> Result<HandleOutcome> {
    let Some(start) = event.start_date.as_deref().and_then(parse_date) else {
        tracing::warn!(file = filename, "event missing usable start_date");
        ctx.sink.record(RejectReason::EventMissingStartDate, filename, &event.payload)?;
        return Ok(HandleOutcome::Rejected(RejectReason::EventMissingStartDate));
    };

    let bill_id = link
        .map(|l| l.bill_id.as_str())
        .or(event.bill_identifier.as_deref());
    if bill_id.is_none() {
        tracing::warn!(file = filename, "event references no bill");
        ctx.sink.record(RejectReason::EventMissingBillIdentifier, filename, &event.payload)?;
        return Ok(HandleOutcome::Rejected(RejectReason::EventMissingBillIdentifier));
    }

    let session = link
        .map(|l| l.session_id.as_str())
        .or(event.session.as_deref());
    let Some(session) = session else {
        ctx.sink.record(RejectReason::MissingSession, filename, &event.payload)?;
        return Ok(HandleOutcome::Rejected(RejectReason::MissingSession));
    };
    if !is_safe_component(session) {
        tracing::warn!(file = filename, session, "event session would leave the store");
        ctx.sink.record(RejectReason::UnsafePath, filename, &event.payload)?;
        return Ok(HandleOutcome::Rejected(RejectReason::UnsafePath));
    }

    let path = event_path(ctx, session, event, &start);
    write_json(&path, &event.payload)?;
    ctx.ledger.advance(Category::Event, start);
    tracing::debug!(file = filename, session, bill = bill_id, "event saved");
    Ok(HandleOutcome::Saved)
}

fn event_path(
    ctx: &HandlerContext<'_>,
    session: &str,
    event: &EventRecord,
    start: &chrono::NaiveDateTime,
) -> PathBuf {
    let name = clean_event_name(event.name.as_deref().unwrap_or("event"));
    let name = if name.is_empty() { "event".to_string() } else { name };
    ctx.jurisdiction
        .events_dir(ctx.paths, session)
        .join(format!("{}_{name}.json", timestamp_tag(start)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civic::error_sink::ErrorSink;
    use crate::civic::ledger::Ledger;
    use crate::civic::paths::{Jurisdiction, StorePaths};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn direct_reference_lands_in_session_events() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("usa").expect("juris");
        let sink = ErrorSink::new(&paths);
        let mut ledger = Ledger::load(&paths);
        let mut ctx = HandlerContext { paths: &paths, jurisdiction: &juris, sink: &sink, ledger: &mut ledger };

        let event = EventRecord::from_payload(json!({
            "name": "Ways & Means: Markup Session (Part 2)",
            "legislative_session": "119",
            "start_date": "2025-02-01T09:00:00",
            "bill_identifier": "HR 1"
        }));
        assert!(handle_event(&mut ctx, "event_1.json", &event, None).expect("handle").is_saved());
        assert!(tmp
            .path()
            .join("country:us/congress/sessions/119/events/20250201T090000Z_ways_means_markup_session_part_2.json")
            .exists());
        assert_eq!(ledger.get(Category::Event), parse_date("2025-02-01T09:00:00").expect("date"));
    }

    #[test]
    fn link_overrides_session_and_bill() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("il").expect("juris");
        let sink = ErrorSink::new(&paths);
        let mut ledger = Ledger::load(&paths);
        let mut ctx = HandlerContext { paths: &paths, jurisdiction: &juris, sink: &sink, ledger: &mut ledger };

        let event = EventRecord::from_payload(json!({"name": "Hearing", "start_date": "2025-04-01"}));
        let link = EventLink { session_id: "104th".into(), bill_id: "SB12".into() };
        assert!(handle_event(&mut ctx, "event_2.json", &event, Some(&link)).expect("handle").is_saved());
        assert!(tmp
            .path()
            .join("country:us/state:il/sessions/104th/events/20250401T000000Z_hearing.json")
            .exists());
    }

    #[test]
    fn missing_start_date_and_missing_bill_are_distinct_reasons() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let juris = Jurisdiction::new("il").expect("juris");
        let sink = ErrorSink::new(&paths);
        let mut ledger = Ledger::load(&paths);
        let mut ctx = HandlerContext { paths: &paths, jurisdiction: &juris, sink: &sink, ledger: &mut ledger };

        let undated = EventRecord::from_payload(json!({"name": "A", "legislative_session": "104th", "bill_identifier": "HB1"}));
        assert_eq!(
            handle_event(&mut ctx, "event_a.json", &undated, None).expect("a"),
            HandleOutcome::Rejected(RejectReason::EventMissingStartDate)
        );

        let unlinked = EventRecord::from_payload(json!({"name": "B", "legislative_session": "104th", "start_date": "2025-01-01"}));
        assert_eq!(
            handle_event(&mut ctx, "event_b.json", &unlinked, None).expect("b"),
            HandleOutcome::Rejected(RejectReason::EventMissingBillIdentifier)
        );
        assert_eq!(sink.count(RejectReason::EventMissingStartDate).expect("count"), 1);
        assert_eq!(sink.count(RejectReason::EventMissingBillIdentifier).expect("count"), 1);
    }
}
