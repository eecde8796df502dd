use anyhow::Result;
use std::path::PathBuf;

use crate::civic::paths::resolve_store;
use crate::civic::pipeline::run_reconcile;
use crate::commands::{CommandReport, setup_issue};

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub store: Option<PathBuf>,
}

pub fn run(opts: &ReconcileOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("reconcile");
    let paths = resolve_store(opts.store.as_deref())?;
    report.detail(format!("store={}", paths.store_root.display()));

    match run_reconcile(&paths) {
        Ok(summary) => {
            report.detail(format!("placeholders={}", summary.placeholders));
            report.detail(format!("resolved={}", summary.resolved));
            report.detail(format!("orphaned={}", summary.orphaned));
            report.detail(format!("tracked={}", summary.tracked));
            report.detail(format!("failed={}", summary.failed));
            report.detail(format!(
                "tracking_file={}",
                paths.orphan_tracking_file.display()
            ));
        }
        Err(err) => setup_issue(&mut report, err)?,
    }
    Ok(report)
}
