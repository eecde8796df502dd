use anyhow::Result;
use std::path::PathBuf;

use crate::civic::paths::{Jurisdiction, resolve_store};
use crate::civic::pipeline::run_link;
use crate::commands::{CommandReport, setup_issue};

#[derive(Debug, Clone, Default)]
pub struct LinkEventsOptions {
    pub jurisdiction: String,
    pub store: Option<PathBuf>,
    pub force_rebuild: bool,
}

pub fn run(opts: &LinkEventsOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("link-events");
    let paths = resolve_store(opts.store.as_deref())?;
    let jurisdiction = Jurisdiction::new(&opts.jurisdiction)?;
    report.detail(format!("store={}", paths.store_root.display()));
    report.detail(format!("jurisdiction={}", jurisdiction.code()));
    if opts.force_rebuild {
        report.detail("index=force_rebuild");
    }

    match run_link(&paths, &jurisdiction, opts.force_rebuild) {
        Ok(link) => {
            report.detail(format!("archived={}", link.archived));
            report.detail(format!("linked={}", link.linked()));
            report.detail(format!(
                "pass1={} pass2={} index_rebuilt={}",
                link.linked_first_pass, link.linked_second_pass, link.index_rebuilt
            ));
            report.detail(format!(
                "rejected={} unresolved={} unreferenced={} invalid={} failed={}",
                link.rejected, link.unresolved, link.unreferenced, link.invalid, link.failed
            ));
        }
        Err(err) => setup_issue(&mut report, err)?,
    }
    Ok(report)
}
