pub mod config;
pub mod core;

pub use crate::config::{AppConfig, FeedConfig, FeedLayout};
pub use crate::core::feed::types::{RecordOutcome, SipRecord, UpdateReport};
pub use crate::core::feed::{DataplaneSipFeed, FeedError};
pub use crate::core::observable::{ObservableStore, ObservableValidationError};
pub use crate::core::storage::repository::{ObservableRepository, StorageError};
pub use crate::core::sync::run_feed;
