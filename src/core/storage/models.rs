use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::core::observable::Context;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeed {
    pub name: String,
    pub source_url: String,
    pub description: String,
    pub frequency_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedRecord {
    pub name: String,
    pub source_url: String,
    pub description: String,
    pub frequency_secs: i64,
    pub last_run: Option<String>,
    pub failure_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl FeedRecord {
    pub fn last_run_at(&self) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
        self.last_run
            .as_deref()
            .map(|raw| DateTime::parse_from_rfc3339(raw).map(|value| value.with_timezone(&Utc)))
            .transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ObservableRecord {
    pub id: i64,
    pub kind: String,
    pub value: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContextRecord {
    pub id: i64,
    pub observable_id: i64,
    pub source: String,
    pub payload: String,
}

impl ContextRecord {
    pub fn context(&self) -> Result<Context, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TagRecord {
    pub name: String,
    pub first_seen: String,
    pub last_seen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LinkRecord {
    pub id: i64,
    pub src_id: i64,
    pub dst_id: i64,
    pub link_type: String,
    pub active: i64,
    pub first_seen: String,
    pub last_seen: String,
}
