use anyhow::Result;
use std::io;
use std::path::PathBuf;

use crate::civic::config::load_config;
use crate::civic::paths::{Jurisdiction, resolve_store};
use crate::civic::pipeline::{IngestOptions, IngestSummary, run_ingest};
use crate::civic::record::Category;
use crate::civic::sessions::{DeclineSessionFix, OpenStatesClient, PromptSessionFix, SessionFixProvider};
use crate::commands::{CommandReport, setup_issue};

#[derive(Debug, Clone)]
pub struct IngestCommandOptions {
    pub jurisdiction: String,
    pub input: PathBuf,
    pub store: Option<PathBuf>,
    pub allow_session_fix: bool,
}

fn summarize(report: &mut CommandReport, summary: &IngestSummary) {
    report.detail(format!("bills={}", summary.bills()));
    report.detail(format!("events={}", summary.events()));
    report.detail(format!("votes={}", summary.votes()));
    report.detail(format!(
        "sessions.source={} sessions.count={}",
        summary.session_source.as_str(),
        summary.sessions
    ));
    report.detail(format!(
        "load.scanned={} load.admitted={} load.stale={} load.changed_bills={} load.rejected={} load.failed={} load.unclassified={}",
        summary.load.scanned,
        summary.load.admitted.len(),
        summary.load.stale,
        summary.load.changed_bills,
        summary.load.rejected,
        summary.load.failed,
        summary.load.unclassified
    ));
    report.detail(format!(
        "route.rejected={} route.deferred={} route.failed={} route.sessions_fixed={}",
        summary.route.rejected, summary.route.deferred, summary.route.failed, summary.route.sessions_fixed
    ));
    report.detail(format!(
        "link.pass1={} link.pass2={} link.unresolved={} link.unreferenced={} link.failed={}",
        summary.link.linked_first_pass,
        summary.link.linked_second_pass,
        summary.link.unresolved,
        summary.link.unreferenced,
        summary.link.failed
    ));
    report.detail(format!(
        "orphans.resolved={} orphans.tracked={} orphans.failed={}",
        summary.orphans.resolved, summary.orphans.tracked, summary.orphans.failed
    ));
    report.detail(format!("ledger_file={}", summary.ledger_path.display()));
    for category in Category::ALL {
        report.detail(format!(
            "ledger.{}={}",
            category.ledger_key(),
            summary.ledger.get(category).format("%Y-%m-%dT%H:%M:%S")
        ));
    }
}

pub fn run(opts: &IngestCommandOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("ingest");
    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            setup_issue(&mut report, err)?;
            return Ok(report);
        }
    };
    let paths = resolve_store(opts.store.as_deref())?;
    let jurisdiction = Jurisdiction::new(&opts.jurisdiction)?;
    let allow_session_fix = opts.allow_session_fix || cfg.ingest.allow_session_fix;

    report.detail(format!("store={}", paths.store_root.display()));
    report.detail(format!("input={}", opts.input.display()));
    report.detail(format!("jurisdiction={}", jurisdiction.code()));

    let remote = OpenStatesClient::new(&cfg.sessions)?;
    let mut fixer: Box<dyn SessionFixProvider> = if allow_session_fix {
        Box::new(PromptSessionFix::new(io::stdin().lock(), io::stderr()))
    } else {
        Box::new(DeclineSessionFix)
    };

    let ingest_opts = IngestOptions {
        jurisdiction,
        input_dir: opts.input.clone(),
        allow_session_fix,
    };
    match run_ingest(&paths, &ingest_opts, &remote, fixer.as_mut()) {
        Ok(summary) => summarize(&mut report, &summary),
        Err(err) => setup_issue(&mut report, err)?,
    }
    Ok(report)
}
