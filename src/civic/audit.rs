use crate::civic::paths::StorePaths;
use crate::civic::util::{ensure_dir, now_epoch_secs};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn append_event(paths: &StorePaths, phase: &str, status: &str, message: &str) -> Result<()> {
    ensure_dir(&paths.logs_dir)?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = paths.logs_dir.join("audit.log");
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Audit writes never fail a run; a broken log only costs the trail.
pub fn record(paths: &StorePaths, phase: &str, status: &str, message: &str) {
    if let Err(err) = append_event(paths, phase, status, message) {
        tracing::debug!(phase, "audit append failed: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_one_json_line_per_event() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        append_event(&paths, "route", "ok", "bills=1").expect("first");
        append_event(&paths, "link", "ok", "linked=0").expect("second");

        let raw = fs::read_to_string(paths.logs_dir.join("audit.log")).expect("read");
        let events: Vec<AuditEvent> = raw
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].phase, "link");
    }
}
