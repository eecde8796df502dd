use anyhow::Result;
use std::path::PathBuf;

use crate::civic::bill_index::BillIndex;
use crate::civic::config::{active_env_overrides, load_config, resolve_config_path};
use crate::civic::ledger::Ledger;
use crate::civic::lock::read_lock_info;
use crate::civic::orphans::load_tracking;
use crate::civic::paths::{Jurisdiction, StorePaths, resolve_store};
use crate::civic::pipeline::cached_sessions;
use crate::civic::record::Category;
use crate::civic::util::{file_name_str, list_json_files, subdirs};
use crate::commands::CommandReport;

#[derive(Debug, Clone, Default)]
pub struct StatusOptions {
    pub store: Option<PathBuf>,
    pub jurisdiction: Option<String>,
}

fn error_counts(paths: &StorePaths, report: &mut CommandReport) -> Result<()> {
    let mut total = 0usize;
    for dir in subdirs(&paths.errors_dir)? {
        if dir == paths.event_archive_dir {
            continue;
        }
        let count = list_json_files(&dir)?.len();
        total += count;
        report.detail(format!("errors.{}={count}", file_name_str(&dir)));
    }
    report.detail(format!("errors.total={total}"));
    Ok(())
}

pub fn run(opts: &StatusOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("status");
    let paths = resolve_store(opts.store.as_deref())?;

    report.detail(format!("build_id={}", env!("INGEST_BUILD_ID")));
    report.detail(format!("store={}", paths.store_root.display()));
    report.detail(format!("meta_dir={}", paths.meta_dir.display()));
    match resolve_config_path() {
        Some(path) => report.detail(format!("config_file={} exists={}", path.display(), path.exists())),
        None => report.detail("config_file=unresolved"),
    }
    if let Err(err) = load_config() {
        report.issue(format!("config invalid: {err:#}"));
    }
    let overrides = active_env_overrides();
    if overrides.is_empty() {
        report.detail("env_overrides=none");
    } else {
        report.detail(format!("env_overrides={}", overrides.join(",")));
    }

    let ledger = Ledger::load(&paths);
    for category in Category::ALL {
        report.detail(format!(
            "ledger.{}={}",
            category.ledger_key(),
            ledger.get(category).format("%Y-%m-%dT%H:%M:%S")
        ));
    }

    error_counts(&paths, &mut report)?;
    report.detail(format!(
        "event_archive={}",
        list_json_files(&paths.event_archive_dir)?.len()
    ));
    report.detail(format!(
        "orphans.tracked={}",
        load_tracking(&paths.orphan_tracking_file).len()
    ));

    match read_lock_info(&paths) {
        Some(info) => report.detail(format!(
            "lock=held pid={} build_id={} started_at={}",
            info.pid, info.build_id, info.started_at_epoch_secs
        )),
        None => report.detail("lock=free"),
    }

    if let Some(code) = opts.jurisdiction.as_deref() {
        let jurisdiction = Jurisdiction::new(code)?;
        report.detail(format!("jurisdiction={}", jurisdiction.code()));
        report.detail(format!(
            "sessions.cached={}",
            cached_sessions(&paths, &jurisdiction).len()
        ));
        match BillIndex::load(&paths.bill_index_file, &jurisdiction) {
            Some(index) => report.detail(format!("bill_index.entries={}", index.len())),
            None => report.detail("bill_index=absent"),
        }
    }

    Ok(report)
}
