use crate::civic::audit;
use crate::civic::context::HandlerContext;
use crate::civic::error_sink::ErrorSink;
use crate::civic::ledger::Ledger;
use crate::civic::linker::{LinkSummary, link_events};
use crate::civic::loader::{LoadSummary, load_inputs};
use crate::civic::lock::StoreLock;
use crate::civic::orphans::{ReconcileSummary, reconcile};
use crate::civic::paths::{Jurisdiction, StorePaths};
use crate::civic::router::{RouteSummary, Router};
use crate::civic::sessions::{self, SessionFixProvider, SessionMapping, SessionSource, SessionSourceKind};
use crate::error::IngestError;
use anyhow::Result;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub jurisdiction: Jurisdiction,
    pub input_dir: PathBuf,
    pub allow_session_fix: bool,
}

#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub session_source: SessionSourceKind,
    pub sessions: usize,
    pub load: LoadSummary,
    pub route: RouteSummary,
    pub link: LinkSummary,
    pub orphans: ReconcileSummary,
    pub ledger: Ledger,
    pub ledger_path: PathBuf,
}

impl IngestSummary {
    pub fn bills(&self) -> usize {
        self.route.bills
    }

    pub fn votes(&self) -> usize {
        self.route.votes
    }

    /// Events stored directly plus those the linker attached.
    pub fn events(&self) -> usize {
        self.route.events + self.link.linked()
    }
}

fn phase_ok(paths: &StorePaths, phase: &str, message: String) {
    audit::record(paths, phase, "ok", &message);
}

/// One full ingest run: ledger load, session warm-up, load, route, link,
/// orphan sweep, ledger flush. Holds the store lock throughout.
pub fn run_ingest(
    paths: &StorePaths,
    opts: &IngestOptions,
    remote: &dyn SessionSource,
    fixer: &mut dyn SessionFixProvider,
) -> Result<IngestSummary> {
    if !opts.input_dir.is_dir() {
        audit::record(paths, "ingest", "error", &format!("input missing: {}", opts.input_dir.display()));
        return Err(IngestError::InputMissing(opts.input_dir.clone()).into());
    }
    let _lock = StoreLock::acquire(paths)?;
    let jurisdiction = &opts.jurisdiction;

    let start = Ledger::load(paths);
    let mut ledger = start.clone();

    let resolved = sessions::resolve(paths, jurisdiction, Some(&opts.input_dir), remote)?;
    let mut mapping = resolved.mapping;
    phase_ok(
        paths,
        "sessions",
        format!("source={} sessions={}", resolved.source.as_str(), mapping.len()),
    );

    let sink = ErrorSink::new(paths);
    let load = load_inputs(paths, jurisdiction, &opts.input_dir, &start, &sink)?;
    phase_ok(
        paths,
        "load",
        format!(
            "scanned={} admitted={} stale={} rejected={} failed={}",
            load.scanned,
            load.admitted.len(),
            load.stale,
            load.rejected,
            load.failed
        ),
    );

    let mut ctx = HandlerContext {
        paths,
        jurisdiction,
        sink: &sink,
        ledger: &mut ledger,
    };
    let route = Router::new(&mut mapping, fixer, opts.allow_session_fix).route_all(&mut ctx, &load.admitted);
    phase_ok(
        paths,
        "route",
        format!(
            "bills={} votes={} events={} deferred={} rejected={} failed={}",
            route.bills, route.votes, route.events, route.deferred, route.rejected, route.failed
        ),
    );

    let link = link_events(&mut ctx, &mapping, false)?;
    phase_ok(
        paths,
        "link",
        format!(
            "pass1={} pass2={} unresolved={} failed={}",
            link.linked_first_pass, link.linked_second_pass, link.unresolved, link.failed
        ),
    );

    let orphans = reconcile(paths)?;
    phase_ok(
        paths,
        "reconcile",
        format!("resolved={} orphaned={}", orphans.resolved, orphans.orphaned),
    );

    let ledger_path = ledger.flush()?;
    phase_ok(paths, "ledger", format!("path={}", ledger_path.display()));

    let session_source = resolved.source;
    Ok(IngestSummary {
        session_source,
        sessions: mapping.len(),
        load,
        route,
        link,
        orphans,
        ledger,
        ledger_path,
    })
}

/// Link pass on its own, over whatever the archive holds.
pub fn run_link(paths: &StorePaths, jurisdiction: &Jurisdiction, force_rebuild: bool) -> Result<LinkSummary> {
    let _lock = StoreLock::acquire(paths)?;
    let mut ledger = Ledger::load(paths);
    let mapping = cached_sessions(paths, jurisdiction);
    let sink = ErrorSink::new(paths);
    let mut ctx = HandlerContext {
        paths,
        jurisdiction,
        sink: &sink,
        ledger: &mut ledger,
    };
    let link = link_events(&mut ctx, &mapping, force_rebuild)?;
    ledger.flush()?;
    phase_ok(
        paths,
        "link",
        format!("linked={} unresolved={}", link.linked(), link.unresolved),
    );
    Ok(link)
}

pub fn run_reconcile(paths: &StorePaths) -> Result<ReconcileSummary> {
    let _lock = StoreLock::acquire(paths)?;
    let summary = reconcile(paths)?;
    phase_ok(
        paths,
        "reconcile",
        format!("resolved={} orphaned={}", summary.resolved, summary.orphaned),
    );
    Ok(summary)
}

/// Session names for index entries. A missing or corrupt cache only costs
/// the display names.
pub fn cached_sessions(paths: &StorePaths, jurisdiction: &Jurisdiction) -> SessionMapping {
    let path = sessions::cache_path(paths, jurisdiction);
    match sessions::load_cache(&path) {
        Ok(Some(mapping)) => mapping,
        Ok(None) => SessionMapping::new(),
        Err(err) => {
            tracing::warn!(cache = %path.display(), "session cache unreadable: {err:#}");
            SessionMapping::new()
        }
    }
}
