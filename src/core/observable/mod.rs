use std::net::IpAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::storage::repository::StorageError;

pub type Context = serde_json::Map<String, serde_json::Value>;

pub type ObservableId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObservableKind {
    Ip,
    AutonomousSystem,
}

impl ObservableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservableKind::Ip => "ip",
            ObservableKind::AutonomousSystem => "asn",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservableRef {
    pub id: ObservableId,
    pub kind: ObservableKind,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObservableValidationError {
    #[error("'{0}' is not a valid IP address")]
    InvalidIp(String),
    #[error("'{0}' is not a valid autonomous system number")]
    InvalidAsn(String),
}

#[derive(Debug, thiserror::Error)]
pub enum UpsertError {
    #[error(transparent)]
    Validation(#[from] ObservableValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[async_trait]
pub trait ObservableStore: Send + Sync {
    async fn get_or_create_ip(&self, value: &str) -> Result<ObservableRef, UpsertError>;

    async fn get_or_create_asn(&self, value: &str) -> Result<ObservableRef, UpsertError>;

    /// Replaces the first context from the same source whose `dedup_list`
    /// keys all match the new one, otherwise appends.
    async fn add_context(
        &self,
        observable: &ObservableRef,
        context: Context,
        dedup_list: &[&str],
    ) -> Result<(), StorageError>;

    async fn add_source(&self, observable: &ObservableRef, source: &str)
        -> Result<(), StorageError>;

    async fn tag(&self, observable: &ObservableRef, name: &str) -> Result<(), StorageError>;

    async fn active_link_to(
        &self,
        src: &ObservableRef,
        dst: &ObservableRef,
        link_type: &str,
        source: &str,
    ) -> Result<(), StorageError>;
}

pub fn normalize_ip(value: &str) -> Result<String, ObservableValidationError> {
    let trimmed = value.trim();
    trimmed
        .parse::<IpAddr>()
        .map(|address| address.to_string())
        .map_err(|_| ObservableValidationError::InvalidIp(trimmed.to_string()))
}

pub fn normalize_asn(value: &str) -> Result<String, ObservableValidationError> {
    let trimmed = value.trim();
    let digits = match trimmed.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("as") => &trimmed[2..],
        _ => trimmed,
    };
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(ObservableValidationError::InvalidAsn(trimmed.to_string()));
    }
    digits
        .parse::<u32>()
        .map(|number| number.to_string())
        .map_err(|_| ObservableValidationError::InvalidAsn(trimmed.to_string()))
}
