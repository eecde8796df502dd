use crate::civic::bill::{METADATA_FILE, PLACEHOLDER_FILE};
use crate::civic::context::{HandleOutcome, HandlerContext};
use crate::civic::error_sink::RejectReason;
use crate::civic::paths::{bill_path_is_safe, normalize_bill_id};
use crate::civic::record::{Category, VoteEventRecord};
use crate::civic::util::{ensure_dir, parse_date, slug, tag_or_unknown, write_json};
use anyhow::Result;
use serde_json::json;
use std::path::Path;

/// Create `placeholder.json` unless the bill or a placeholder already exists.
/// Returns true when a new placeholder was written.
pub fn ensure_placeholder(bill_dir: &Path, bill_identifier: &str) -> Result<bool> {
    if bill_dir.join(METADATA_FILE).exists() || bill_dir.join(PLACEHOLDER_FILE).exists() {
        return Ok(false);
    }
    write_json(
        &bill_dir.join(PLACEHOLDER_FILE),
        &json!({"identifier": normalize_bill_id(bill_identifier), "placeholder": true}),
    )?;
    Ok(true)
}

pub fn handle_vote_event(
    ctx: &mut HandlerContext<'_>,
    filename: &str,
    vote: &VoteEventRecord,
) -> Result<HandleOutcome> {
    let Some(bill_identifier) = vote.bill_identifier.as_deref() else {
        tracing::warn!(file = filename, "vote event missing bill_identifier");
        ctx.sink.record(RejectReason::MissingBillIdentifier, filename, &vote.payload)?;
        return Ok(HandleOutcome::Rejected(RejectReason::MissingBillIdentifier));
    };
    let Some(session) = vote.session.as_deref() else {
        ctx.sink.record(RejectReason::MissingSession, filename, &vote.payload)?;
        return Ok(HandleOutcome::Rejected(RejectReason::MissingSession));
    };
    if !bill_path_is_safe(session, bill_identifier) {
        tracing::warn!(file = filename, bill = bill_identifier, session, "vote path would leave the store");
        ctx.sink.record(RejectReason::UnsafePath, filename, &vote.payload)?;
        return Ok(HandleOutcome::Rejected(RejectReason::UnsafePath));
    }

    let bill_dir = ctx.jurisdiction.bill_dir(ctx.paths, session, bill_identifier);
    let logs_dir = bill_dir.join("logs");
    ensure_dir(&logs_dir)?;
    if ensure_placeholder(&bill_dir, bill_identifier)? {
        tracing::info!(bill = bill_identifier, session, "placeholder created for vote reference");
    }

    let tag = tag_or_unknown(vote.start_date.as_deref());
    let result = slug(vote.result.as_deref().unwrap_or("unknown"));
    write_json(&logs_dir.join(format!("{tag}_vote_event_{result}.json")), &vote.payload)?;

    if let Some(start) = vote.start_date.as_deref().and_then(parse_date) {
        ctx.ledger.advance(Category::VoteEvent, start);
    }
    Ok(HandleOutcome::Saved)
}
