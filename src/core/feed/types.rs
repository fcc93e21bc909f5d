use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::observable::{ObservableRef, ObservableValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SipRecord {
    pub asn: String,
    pub as_name: String,
    pub ip: String,
    pub last_seen: DateTime<Utc>,
    pub category: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBatch {
    pub data_lines: usize,
    pub malformed: usize,
    pub stale: usize,
    pub records: Vec<SipRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Upserted {
        ip: ObservableRef,
        asn: ObservableRef,
    },
    Skipped(ObservableValidationError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateReport {
    pub data_lines: usize,
    pub parsed: usize,
    pub malformed: usize,
    pub stale: usize,
    pub upserted: usize,
    pub skipped: usize,
}
