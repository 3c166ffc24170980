//! Harvested report record.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// One harvested issue report, serialized as a single JSONL line.
///
/// Only the identity, report date, status and resolution date are
/// interpreted; every other field is carried in `payload` untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Source URL, unique across the whole store
    #[serde(rename = "url")]
    pub identity: String,

    /// Date the report was filed; decides the shard
    #[serde(rename = "date")]
    pub report_date: NaiveDate,

    /// Status label as shown by the source
    #[serde(default)]
    pub status: Option<String>,

    /// Date the report was closed as resolved
    #[serde(default)]
    pub resolution_date: Option<NaiveDate>,

    /// Descriptive fields (title, author, category, ...)
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Record {
    pub fn new(identity: impl Into<String>, report_date: NaiveDate) -> Self {
        Self {
            identity: identity.into(),
            report_date,
            status: None,
            resolution_date: None,
            payload: Map::new(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Serialize as one shard line (without trailing newline).
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            identity: self.identity.clone(),
            report_date: self.report_date,
            status: self.status.clone(),
            resolution_date: self.resolution_date,
        }
    }
}

/// The tracked fields of a persisted record, decoded without the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordSummary {
    #[serde(rename = "url")]
    pub identity: String,

    #[serde(rename = "date")]
    pub report_date: NaiveDate,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub resolution_date: Option<NaiveDate>,
}

/// Compare two status labels ignoring case and surrounding whitespace.
pub fn same_status(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.trim().to_uppercase() == b.trim().to_uppercase(),
        (None, None) => true,
        _ => false,
    }
}
