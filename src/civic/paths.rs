use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

/// Jurisdiction code that selects the federal `congress` branch of the store.
pub const CONGRESS_CODE: &str = "usa";

const META_DIR: &str = ".windycivi";

#[derive(Debug, Clone)]
pub struct StorePaths {
    pub store_root: PathBuf,
    pub meta_dir: PathBuf,
    pub errors_dir: PathBuf,
    pub event_archive_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub bill_index_file: PathBuf,
    pub ledger_file: PathBuf,
    pub session_log_file: PathBuf,
    pub orphan_tracking_file: PathBuf,
    pub logs_dir: PathBuf,
    pub lock_file: PathBuf,
}

impl StorePaths {
    pub fn new(store_root: impl Into<PathBuf>) -> Self {
        let store_root = store_root.into();
        let meta_dir = store_root.join(META_DIR);
        let errors_dir = meta_dir.join("errors");
        Self {
            event_archive_dir: errors_dir.join("event_archive"),
            sessions_dir: meta_dir.join("sessions"),
            bill_index_file: meta_dir.join("bill_session_mapping.json"),
            ledger_file: meta_dir.join("latest_timestamp_seen.txt"),
            session_log_file: meta_dir.join("new_sessions_added.txt"),
            logs_dir: meta_dir.join("logs"),
            lock_file: meta_dir.join("ingest.lock"),
            orphan_tracking_file: store_root.join("orphaned_placeholders_tracking.json"),
            errors_dir,
            meta_dir,
            store_root,
        }
    }

    /// Root under which every jurisdiction branch lives.
    pub fn country_dir(&self) -> PathBuf {
        self.store_root.join("country:us")
    }
}

/// A state (two-letter code) or the federal Congress (`usa`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jurisdiction {
    code: String,
}

impl Jurisdiction {
    pub fn new(code: &str) -> Result<Self> {
        let code = code.trim().to_ascii_lowercase();
        if code.is_empty() {
            anyhow::bail!("jurisdiction code cannot be empty");
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            anyhow::bail!("jurisdiction code contains invalid characters: {code}");
        }
        Ok(Self { code })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_congress(&self) -> bool {
        self.code == CONGRESS_CODE
    }

    pub fn branch_dir(&self, paths: &StorePaths) -> PathBuf {
        if self.is_congress() {
            paths.country_dir().join("congress")
        } else {
            paths.country_dir().join(format!("state:{}", self.code))
        }
    }

    pub fn sessions_root(&self, paths: &StorePaths) -> PathBuf {
        self.branch_dir(paths).join("sessions")
    }

    pub fn session_dir(&self, paths: &StorePaths, session_folder: &str) -> PathBuf {
        self.sessions_root(paths).join(session_folder)
    }

    /// Folder of a bill; a pure function of jurisdiction, session and id.
    pub fn bill_dir(&self, paths: &StorePaths, session_folder: &str, bill_identifier: &str) -> PathBuf {
        self.session_dir(paths, session_folder)
            .join("bills")
            .join(normalize_bill_id(bill_identifier))
    }

    pub fn events_dir(&self, paths: &StorePaths, session_folder: &str) -> PathBuf {
        self.session_dir(paths, session_folder).join("events")
    }
}

/// Strip all whitespace: `"HR 1"` becomes `"HR1"`.
pub fn normalize_bill_id(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Whether a scraped value can name a store folder without leaving its parent.
pub fn is_safe_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && !component.contains("..")
        && !component.chars().any(|c| matches!(c, '/' | '\\' | '\0'))
}

/// Session and normalized bill id both stay inside the session branch.
pub fn bill_path_is_safe(session_folder: &str, bill_identifier: &str) -> bool {
    is_safe_component(session_folder) && is_safe_component(&normalize_bill_id(bill_identifier))
}

fn env_path(var: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => None,
    }
}

/// `--store` wins, then `CIVIC_STORE_DIR`, then the working directory.
pub fn resolve_store(cli_store: Option<&Path>) -> Result<StorePaths> {
    if let Some(path) = cli_store {
        return Ok(StorePaths::new(path));
    }
    if let Some(path) = env_path("CIVIC_STORE_DIR") {
        return Ok(StorePaths::new(path));
    }
    let cwd = env::current_dir()
        .map_err(|err| anyhow::anyhow!("working directory could not be resolved: {err}"))?;
    Ok(StorePaths::new(cwd))
}
