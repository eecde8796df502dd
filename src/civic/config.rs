use crate::error::IngestError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

include!(concat!(env!("OUT_DIR"), "/civic_env_allowlist.rs"));

pub const DEFAULT_SESSIONS_API_BASE: &str = "https://v3.openstates.org";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionServiceConfig {
    pub api_base: String,
    pub timeout_secs: u64,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_SESSIONS_API_BASE.to_string(),
            timeout_secs: 10,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub allow_session_fix: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CivicConfig {
    pub sessions: SessionServiceConfig,
    pub ingest: IngestSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PartialCivicConfig {
    sessions: Option<SessionServiceConfig>,
    ingest: Option<IngestSettings>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn validate(cfg: &CivicConfig) -> Result<()> {
    let base = cfg.sessions.api_base.trim();
    if base.is_empty() {
        return Err(IngestError::InvalidConfig("sessions.api_base cannot be empty".into()).into());
    }
    if !base.starts_with("http://") && !base.starts_with("https://") {
        return Err(IngestError::InvalidConfig(format!(
            "sessions.api_base must be an http(s) URL: {base}"
        ))
        .into());
    }
    if cfg.sessions.timeout_secs == 0 {
        return Err(
            IngestError::InvalidConfig("sessions.timeout_secs must be >= 1".into()).into(),
        );
    }
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Some(custom) = env_non_empty("CIVIC_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }
    Some(dirs::config_dir()?.join("civic-ingest").join("config.toml"))
}

fn merge_file_config(base: &mut CivicConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path).map_err(|err| {
        IngestError::InvalidConfig(format!("failed to read {}: {err}", path.display()))
    })?;
    let parsed: PartialCivicConfig = toml::from_str(&raw).map_err(|err| {
        IngestError::InvalidConfig(format!("failed to parse {}: {err}", path.display()))
    })?;
    if let Some(sessions) = parsed.sessions {
        base.sessions = sessions;
    }
    if let Some(ingest) = parsed.ingest {
        base.ingest = ingest;
    }
    Ok(())
}

pub fn load_config() -> Result<CivicConfig> {
    let mut cfg = CivicConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.sessions.api_base = env_or_string("CIVIC_SESSIONS_API_BASE", &cfg.sessions.api_base);
    cfg.sessions.timeout_secs =
        env_or_u64("CIVIC_SESSIONS_TIMEOUT_SECS", cfg.sessions.timeout_secs);
    cfg.sessions.api_key = env_non_empty("OPENSTATES_API_KEY").or(cfg.sessions.api_key);
    cfg.ingest.allow_session_fix =
        env_or_bool("CIVIC_ALLOW_SESSION_FIX", cfg.ingest.allow_session_fix);

    validate(&cfg)?;
    Ok(cfg)
}

/// Recognised `CIVIC_*` and `OPENSTATES_*` variables that are currently set.
pub fn active_env_overrides() -> Vec<String> {
    GENERATED_ENV_ALLOWLIST
        .iter()
        .filter(|key| env::var_os(**key).is_some())
        .map(|key| (*key).to_string())
        .collect()
}
