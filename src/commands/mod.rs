pub mod ingest;
pub mod link_events;
pub mod reconcile;
pub mod status;

use crate::error::IngestError;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

/// Setup failures (missing input, held lock, bad config) become report
/// issues; anything else keeps propagating.
pub fn setup_issue(report: &mut CommandReport, err: anyhow::Error) -> anyhow::Result<()> {
    match err.downcast_ref::<IngestError>() {
        Some(typed) => {
            tracing::error!(code = typed.code().as_str(), "{typed}");
            report.issue(typed.to_string());
            Ok(())
        }
        None => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn issue_marks_report_failed() {
        let mut report = CommandReport::new("reconcile");
        report.detail("placeholders=0");
        assert!(report.ok);
        report.issue("broken");
        assert!(!report.ok);
        assert_eq!(report.details, vec!["placeholders=0".to_string()]);
        assert_eq!(report.issues, vec!["broken".to_string()]);
    }

    #[test]
    fn typed_errors_become_issues() {
        let mut report = CommandReport::new("ingest");
        setup_issue(&mut report, IngestError::InputMissing(PathBuf::from("/in")).into())
            .expect("typed error absorbed");
        assert!(!report.ok);
        assert!(report.issues[0].starts_with("E002_INPUT_MISSING"));

        let other = setup_issue(&mut report, anyhow::anyhow!("disk on fire"));
        assert!(other.is_err());
    }
}
