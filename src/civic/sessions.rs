use crate::civic::config::SessionServiceConfig;
use crate::civic::paths::{Jurisdiction, StorePaths};
use crate::civic::util::{ensure_dir, file_name_str, write_json_atomic};
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(alias = "display_name")]
    pub name: String,
    pub date_folder: String,
}

/// `session identifier -> {display name, year-range folder}`.
pub type SessionMapping = BTreeMap<String, SessionInfo>;

/// Where a resolved mapping came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSourceKind {
    Descriptor,
    Cache,
    Remote,
    Unavailable,
}

impl SessionSourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Descriptor => "descriptor",
            Self::Cache => "cache",
            Self::Remote => "remote",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Remote session listing, e.g. `GET /jurisdictions/{code}/sessions`.
pub trait SessionSource {
    fn fetch_sessions(&self, jurisdiction: &str) -> Result<Vec<Value>>;
}

pub struct OpenStatesClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenStatesClient {
    pub fn new(cfg: &SessionServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build session service client")?;
        Ok(Self {
            client,
            base_url: cfg.api_base.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        })
    }
}

impl SessionSource for OpenStatesClient {
    fn fetch_sessions(&self, jurisdiction: &str) -> Result<Vec<Value>> {
        let url = format!("{}/jurisdictions/{}/sessions", self.base_url, jurisdiction);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-KEY", key);
        }
        let response = request
            .send()
            .with_context(|| format!("session listing request failed: {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("session listing returned status {} for {url}", response.status());
        }
        let body: Value = response.json().context("session listing body is not JSON")?;
        Ok(session_entries(&body))
    }
}

/// Accepts a bare list or an object wrapping one.
fn session_entries(body: &Value) -> Vec<Value> {
    if let Some(items) = body.as_array() {
        return items.clone();
    }
    for key in ["legislative_sessions", "results", "sessions"] {
        if let Some(items) = body.get(key).and_then(Value::as_array) {
            return items.clone();
        }
    }
    Vec::new()
}

fn year_prefix(raw: Option<&str>) -> Option<&str> {
    let raw = raw?.trim();
    let year = raw.get(..4)?;
    year.chars().all(|c| c.is_ascii_digit()).then_some(year)
}

/// Entries lacking an identifier, name, start or end year are skipped.
pub fn extract_session_mapping(sessions: &[Value]) -> SessionMapping {
    let mut out = SessionMapping::new();
    for session in sessions {
        let identifier = session.get("identifier").and_then(Value::as_str);
        let name = session.get("name").and_then(Value::as_str);
        let start = year_prefix(session.get("start_date").and_then(Value::as_str));
        let end = year_prefix(session.get("end_date").and_then(Value::as_str));
        let (Some(identifier), Some(name), Some(start), Some(end)) = (identifier, name, start, end)
        else {
            continue;
        };
        out.insert(
            identifier.to_string(),
            SessionInfo {
                name: name.to_string(),
                date_folder: format!("{start}-{end}"),
            },
        );
    }
    out
}

#[derive(Debug, Clone)]
pub struct ResolvedSessions {
    pub mapping: SessionMapping,
    pub source: SessionSourceKind,
}

pub fn cache_path(paths: &StorePaths, jurisdiction: &Jurisdiction) -> PathBuf {
    paths.sessions_dir.join(format!("{}.json", jurisdiction.code()))
}

fn find_descriptor(input_dir: &Path) -> Result<Option<PathBuf>> {
    if !input_dir.is_dir() {
        return Ok(None);
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(input_dir)
        .with_context(|| format!("failed to read {}", input_dir.display()))?
    {
        let path = entry?.path();
        let name = file_name_str(&path);
        if path.is_file() && name.starts_with("jurisdiction_") && name.ends_with(".json") {
            found.push(path);
        }
    }
    found.sort();
    Ok(found.into_iter().next())
}

fn mapping_from_descriptor(path: &Path) -> Result<SessionMapping> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: Value =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(extract_session_mapping(&session_entries(&parsed)))
}

pub fn load_cache(path: &Path) -> Result<Option<SessionMapping>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(parsed))
}

/// Descriptor in the input batch, then cache, then remote listing. A remote
/// failure yields an empty mapping rather than an error.
pub fn resolve(
    paths: &StorePaths,
    jurisdiction: &Jurisdiction,
    input_dir: Option<&Path>,
    remote: &dyn SessionSource,
) -> Result<ResolvedSessions> {
    ensure_dir(&paths.sessions_dir)?;
    let cache = cache_path(paths, jurisdiction);

    if let Some(descriptor) = input_dir.map(find_descriptor).transpose()?.flatten() {
        match mapping_from_descriptor(&descriptor) {
            Ok(mapping) if !mapping.is_empty() => {
                write_json_atomic(&cache, &mapping)?;
                tracing::info!(
                    descriptor = %descriptor.display(),
                    sessions = mapping.len(),
                    "session cache refreshed from jurisdiction descriptor"
                );
                return Ok(ResolvedSessions {
                    mapping,
                    source: SessionSourceKind::Descriptor,
                });
            }
            Ok(_) => {
                tracing::warn!(descriptor = %descriptor.display(), "jurisdiction descriptor lists no usable sessions");
            }
            Err(err) => {
                tracing::warn!(descriptor = %descriptor.display(), "unreadable jurisdiction descriptor: {err:#}");
            }
        }
    }

    match load_cache(&cache) {
        Ok(Some(mapping)) => {
            return Ok(ResolvedSessions {
                mapping,
                source: SessionSourceKind::Cache,
            });
        }
        Ok(None) => {}
        Err(err) => tracing::warn!(cache = %cache.display(), "ignoring corrupt session cache: {err:#}"),
    }

    match remote.fetch_sessions(jurisdiction.code()) {
        Ok(entries) => {
            let mapping = extract_session_mapping(&entries);
            write_json_atomic(&cache, &mapping)?;
            tracing::info!(sessions = mapping.len(), "session cache filled from remote listing");
            Ok(ResolvedSessions {
                mapping,
                source: SessionSourceKind::Remote,
            })
        }
        Err(err) => {
            tracing::warn!(jurisdiction = jurisdiction.code(), "session listing unavailable: {err:#}");
            Ok(ResolvedSessions {
                mapping: SessionMapping::new(),
                source: SessionSourceKind::Unavailable,
            })
        }
    }
}

/// Supplies a mapping for a session the resolver does not know.
pub trait SessionFixProvider {
    fn propose(&mut self, filename: &str, session_id: &str) -> Option<SessionInfo>;
}

/// Never fixes anything; unresolved sessions go to the error sink.
pub struct DeclineSessionFix;

impl SessionFixProvider for DeclineSessionFix {
    fn propose(&mut self, _filename: &str, _session_id: &str) -> Option<SessionInfo> {
        None
    }
}

/// Asks the operator on a terminal. Blank input declines.
pub struct PromptSessionFix<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptSessionFix<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, question: &str) -> Option<String> {
        write!(self.output, "{question}").ok()?;
        self.output.flush().ok()?;
        let mut line = String::new();
        self.input.read_line(&mut line).ok()?;
        let answer = line.trim();
        (!answer.is_empty()).then(|| answer.to_string())
    }
}

impl<R: BufRead, W: Write> SessionFixProvider for PromptSessionFix<R, W> {
    fn propose(&mut self, filename: &str, session_id: &str) -> Option<SessionInfo> {
        let _ = writeln!(
            self.output,
            "unknown legislative session `{session_id}` in {filename}"
        );
        let name = self.ask("session display name (blank to skip): ")?;
        let date_folder = self.ask("session year range, e.g. 2025-2026 (blank to skip): ")?;
        Some(SessionInfo { name, date_folder })
    }
}

/// Record an operator-supplied session so it can be folded into the
/// descriptor later.
pub fn log_session_fix(paths: &StorePaths, session_id: &str, info: &SessionInfo) -> Result<()> {
    ensure_dir(&paths.meta_dir)?;
    let line = format!("{session_id}\t{}\t{}\n", info.name, info.date_folder);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.session_log_file)
        .with_context(|| format!("failed to open {}", paths.session_log_file.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}
