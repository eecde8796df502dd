use crate::civic::context::{HandleOutcome, HandlerContext};
use crate::civic::error_sink::RejectReason;
use crate::civic::paths::bill_path_is_safe;
use crate::civic::record::{BillRecord, Category};
use crate::civic::util::{ensure_dir, slug, tag_or_unknown, timestamp_tag, write_json};
use anyhow::Result;
use serde_json::json;
use std::path::Path;

pub const METADATA_FILE: &str = "metadata.json";
pub const PLACEHOLDER_FILE: &str = "placeholder.json";

fn action_log_name(date: Option<&str>, description: Option<&str>) -> String {
    let tag = tag_or_unknown(date);
    let slug = slug(description.unwrap_or("no_description"));
    format!("{tag}_{slug}.json")
}

fn write_action_logs(bill: &BillRecord, identifier: &str, logs_dir: &Path) -> Result<usize> {
    let mut written = 0usize;
    for action in &bill.actions {
        let path = logs_dir.join(action_log_name(
            action.date.as_deref(),
            action.description.as_deref(),
        ));
        write_json(&path, &json!({"action": action.raw, "bill_id": identifier}))?;
        written += 1;
    }
    Ok(written)
}

/// Store a bill snapshot as `metadata.json` plus one log file per action.
pub fn handle_bill(ctx: &mut HandlerContext<'_>, filename: &str, bill: &BillRecord) -> Result<HandleOutcome> {
    let Some(identifier) = bill.identifier.as_deref() else {
        tracing::warn!(file = filename, "bill missing identifier");
        ctx.sink.record(RejectReason::MissingIdentifier, filename, &bill.payload)?;
        return Ok(HandleOutcome::Rejected(RejectReason::MissingIdentifier));
    };
    let Some(session) = bill.session.as_deref() else {
        ctx.sink.record(RejectReason::MissingSession, filename, &bill.payload)?;
        return Ok(HandleOutcome::Rejected(RejectReason::MissingSession));
    };
    if !bill_path_is_safe(session, identifier) {
        tracing::warn!(file = filename, bill = identifier, session, "bill path would leave the store");
        ctx.sink.record(RejectReason::UnsafePath, filename, &bill.payload)?;
        return Ok(HandleOutcome::Rejected(RejectReason::UnsafePath));
    }

    let earliest = match bill.earliest_action() {
        Ok(earliest) => earliest,
        Err(reason) => {
            tracing::warn!(bill = identifier, reason = reason.as_str(), "bill has no usable action dates");
            ctx.sink.record(RejectReason::Date(reason), filename, &bill.payload)?;
            return Ok(HandleOutcome::Rejected(RejectReason::Date(reason)));
        }
    };

    let bill_dir = ctx.jurisdiction.bill_dir(ctx.paths, session, identifier);
    let logs_dir = bill_dir.join("logs");
    ensure_dir(&logs_dir)?;
    ensure_dir(&bill_dir.join("files"))?;
    ctx.ledger.advance(Category::Bill, earliest);
    let tag = timestamp_tag(&earliest);

    write_json(&bill_dir.join(METADATA_FILE), &bill.payload)?;
    let actions = write_action_logs(bill, identifier, &logs_dir)?;
    tracing::debug!(bill = identifier, session, tag, actions, "bill saved");
    Ok(HandleOutcome::Saved)
}
