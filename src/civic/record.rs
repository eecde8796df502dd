use crate::civic::paths::normalize_bill_id;
use crate::civic::util::parse_date;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Bill,
    VoteEvent,
    Event,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Bill, Category::VoteEvent, Category::Event];

    /// Key used in the ledger file.
    pub fn ledger_key(self) -> &'static str {
        match self {
            Category::Bill => "bills",
            Category::VoteEvent => "vote_events",
            Category::Event => "events",
        }
    }

    /// Filename-substring dispatch. Order matters: `vote_event_` also
    /// contains `event_`.
    pub fn classify(filename: &str) -> Option<Category> {
        if filename.contains("bill_") {
            Some(Category::Bill)
        } else if filename.contains("vote_event_") {
            Some(Category::VoteEvent)
        } else if filename.contains("event_") {
            Some(Category::Event)
        } else {
            None
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ledger_key())
    }
}

/// Why a record's date could not be used by the newness filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRejection {
    NoActionsFound,
    NoDatesInActions,
    InvalidDate,
    MissingDate,
}

impl DateRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoActionsFound => "NO_ACTIONS_FOUND",
            Self::NoDatesInActions => "NO_DATES_IN_ACTIONS",
            Self::InvalidDate => "INVALID_DATE",
            Self::MissingDate => "MISSING_DATE",
        }
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

#[derive(Debug, Clone)]
pub struct Action {
    pub date: Option<String>,
    pub description: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct BillRecord {
    pub identifier: Option<String>,
    pub session: Option<String>,
    pub actions: Vec<Action>,
    pub payload: Value,
}

impl BillRecord {
    pub fn from_payload(payload: Value) -> Self {
        let actions = payload
            .get("actions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|raw| Action {
                        date: str_field(raw, "date"),
                        description: str_field(raw, "description"),
                        raw: raw.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            identifier: str_field(&payload, "identifier"),
            session: str_field(&payload, "legislative_session"),
            actions,
            payload,
        }
    }

    /// Earliest parseable action date.
    pub fn earliest_action(&self) -> Result<NaiveDateTime, DateRejection> {
        if self.actions.is_empty() {
            return Err(DateRejection::NoActionsFound);
        }
        let dates: Vec<&str> = self.actions.iter().filter_map(|a| a.date.as_deref()).collect();
        if dates.is_empty() {
            return Err(DateRejection::NoDatesInActions);
        }
        dates
            .into_iter()
            .filter_map(parse_date)
            .min()
            .ok_or(DateRejection::InvalidDate)
    }
}

#[derive(Debug, Clone)]
pub struct VoteEventRecord {
    pub bill_identifier: Option<String>,
    pub session: Option<String>,
    pub start_date: Option<String>,
    pub result: Option<String>,
    pub payload: Value,
}

impl VoteEventRecord {
    pub fn from_payload(payload: Value) -> Self {
        Self {
            bill_identifier: str_field(&payload, "bill_identifier"),
            session: str_field(&payload, "legislative_session"),
            start_date: str_field(&payload, "start_date"),
            result: str_field(&payload, "result"),
            payload,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub name: Option<String>,
    pub session: Option<String>,
    pub start_date: Option<String>,
    pub bill_identifier: Option<String>,
    pub payload: Value,
}

impl EventRecord {
    pub fn from_payload(payload: Value) -> Self {
        Self {
            name: str_field(&payload, "name"),
            session: str_field(&payload, "legislative_session"),
            start_date: str_field(&payload, "start_date"),
            bill_identifier: str_field(&payload, "bill_identifier"),
            payload,
        }
    }

    /// Bill ids named in `agenda[].related_entities[]`, whitespace stripped,
    /// in document order.
    pub fn referenced_bills(&self) -> Vec<String> {
        let mut out = Vec::new();
        let Some(agenda) = self.payload.get("agenda").and_then(Value::as_array) else {
            return out;
        };
        for item in agenda {
            let Some(entities) = item.get("related_entities").and_then(Value::as_array) else {
                continue;
            };
            for entity in entities {
                if entity.get("entity_type").and_then(Value::as_str) != Some("bill") {
                    continue;
                }
                if let Some(name) = str_field(entity, "name") {
                    let id = normalize_bill_id(&name);
                    if !id.is_empty() {
                        out.push(id);
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
pub enum Record {
    Bill(BillRecord),
    VoteEvent(VoteEventRecord),
    Event(EventRecord),
}

impl Record {
    pub fn from_payload(category: Category, payload: Value) -> Self {
        match category {
            Category::Bill => Record::Bill(BillRecord::from_payload(payload)),
            Category::VoteEvent => Record::VoteEvent(VoteEventRecord::from_payload(payload)),
            Category::Event => Record::Event(EventRecord::from_payload(payload)),
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Record::Bill(_) => Category::Bill,
            Record::VoteEvent(_) => Category::VoteEvent,
            Record::Event(_) => Category::Event,
        }
    }

    pub fn session_identifier(&self) -> Option<&str> {
        match self {
            Record::Bill(r) => r.session.as_deref(),
            Record::VoteEvent(r) => r.session.as_deref(),
            Record::Event(r) => r.session.as_deref(),
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            Record::Bill(r) => &r.payload,
            Record::VoteEvent(r) => &r.payload,
            Record::Event(r) => &r.payload,
        }
    }

    /// The date the newness filter compares against the ledger.
    pub fn primary_date(&self) -> Result<NaiveDateTime, DateRejection> {
        let start_date = match self {
            Record::Bill(r) => return r.earliest_action(),
            Record::VoteEvent(r) => r.start_date.as_deref(),
            Record::Event(r) => r.start_date.as_deref(),
        };
        let raw = start_date.ok_or(DateRejection::MissingDate)?;
        parse_date(raw).ok_or(DateRejection::InvalidDate)
    }
}
