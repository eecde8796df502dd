use crate::civic::paths::StorePaths;
use crate::civic::record::{Category, DateRejection, Record};
use crate::civic::util::write_json_atomic;
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

const LEDGER_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Outcome of checking a record against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Newer(NaiveDateTime),
    Stale(NaiveDateTime),
    Rejected(DateRejection),
}

/// Per-category maximum timestamp seen across all ingested records.
///
/// Loaded once per run, advanced in memory by the handlers and flushed at the
/// end. Values only ever move forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    path: PathBuf,
    latest: BTreeMap<Category, NaiveDateTime>,
}

pub fn default_timestamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

impl Ledger {
    /// A missing or corrupt ledger file yields the default epoch for every
    /// category; this never fails.
    pub fn load(paths: &StorePaths) -> Self {
        let path = paths.ledger_file.clone();
        let mut latest: BTreeMap<Category, NaiveDateTime> = Category::ALL
            .iter()
            .map(|c| (*c, default_timestamp()))
            .collect();

        let parsed = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<BTreeMap<String, String>>(&raw).ok());
        match parsed {
            Some(raw) => {
                for category in Category::ALL {
                    let value = raw
                        .get(category.ledger_key())
                        .and_then(|v| NaiveDateTime::parse_from_str(v, LEDGER_FORMAT).ok());
                    if let Some(value) = value {
                        latest.insert(category, value);
                    }
                }
            }
            None => {
                tracing::info!(path = %path.display(), "no usable ledger file; using defaults");
            }
        }

        Self { path, latest }
    }

    pub fn get(&self, category: Category) -> NaiveDateTime {
        self.latest
            .get(&category)
            .copied()
            .unwrap_or_else(default_timestamp)
    }

    pub fn check(&self, record: &Record) -> Freshness {
        match record.primary_date() {
            Ok(date) if date > self.get(record.category()) => Freshness::Newer(date),
            Ok(date) => Freshness::Stale(date),
            Err(reason) => Freshness::Rejected(reason),
        }
    }

    /// Returns true when the stored maximum moved.
    pub fn advance(&mut self, category: Category, timestamp: NaiveDateTime) -> bool {
        let current = self.get(category);
        if timestamp > current {
            tracing::debug!(%category, from = %current, to = %timestamp, "ledger advanced");
            self.latest.insert(category, timestamp);
            return true;
        }
        false
    }

    /// Writes all three maxima in one atomic replace.
    pub fn flush(&self) -> Result<PathBuf> {
        let out: BTreeMap<&str, String> = self
            .latest
            .iter()
            .map(|(category, dt)| (category.ledger_key(), dt.format(LEDGER_FORMAT).to_string()))
            .collect();
        write_json_atomic(&self.path, &out)?;
        Ok(self.path.clone())
    }
}
