pub mod fetcher;
pub mod parser;
pub mod types;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::FeedConfig;
use crate::core::observable::{
    Context, ObservableStore, ObservableValidationError, UpsertError,
};
use crate::core::storage::repository::StorageError;
use fetcher::{build_client, fetch_feed_with_retry, FetchError};
use parser::parse_records;
use types::{RecordOutcome, SipRecord, UpdateReport};

pub const FEED_TAG: &str = "dataplane";
pub const SIP_TAG: &str = "sip";
pub const AS_LINK_TYPE: &str = "AS";
const CONTEXT_DEDUP: [&str; 1] = ["date_added"];

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct DataplaneSipFeed<S> {
    config: FeedConfig,
    client: reqwest::Client,
    store: S,
}

impl<S: ObservableStore> DataplaneSipFeed<S> {
    pub fn new(config: FeedConfig, store: S) -> Result<Self, FeedError> {
        let client = build_client(config.request_timeout)?;
        Ok(Self {
            config,
            client,
            store,
        })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub async fn update(&self, last_run: Option<DateTime<Utc>>) -> Result<UpdateReport, FeedError> {
        let fetched =
            fetch_feed_with_retry(&self.client, &self.config.source_url, self.config.max_retries)
                .await?;
        if !fetched.is_plain_text() {
            tracing::warn!(
                feed = %self.config.name,
                content_type = fetched.content_type.as_deref().unwrap_or_default(),
                "feed is not served as text/plain"
            );
        }
        let batch = parse_records(fetched.text()?, &self.config.layout, last_run);
        tracing::info!(
            feed = %self.config.name,
            lines = batch.data_lines,
            fresh = batch.records.len(),
            stale = batch.stale,
            malformed = batch.malformed,
            "parsed feed"
        );

        let mut report = UpdateReport {
            data_lines: batch.data_lines,
            parsed: batch.records.len() + batch.stale,
            malformed: batch.malformed,
            stale: batch.stale,
            ..UpdateReport::default()
        };
        for record in &batch.records {
            match self.analyze(record).await? {
                RecordOutcome::Upserted { .. } => report.upserted += 1,
                RecordOutcome::Skipped(_) => report.skipped += 1,
            }
        }

        tracing::info!(
            feed = %self.config.name,
            upserted = report.upserted,
            skipped = report.skipped,
            "feed update finished"
        );
        Ok(report)
    }

    pub async fn analyze(&self, record: &SipRecord) -> Result<RecordOutcome, StorageError> {
        let source = self.config.name.as_str();

        let ip = match self.store.get_or_create_ip(&record.ip).await {
            Ok(ip) => ip,
            Err(UpsertError::Validation(error)) => return Ok(self.skip(record, error)),
            Err(UpsertError::Storage(error)) => return Err(error),
        };
        self.store
            .add_context(&ip, ip_context(source, record, Utc::now()), &CONTEXT_DEDUP)
            .await?;
        self.store.add_source(&ip, source).await?;
        self.store.tag(&ip, FEED_TAG).await?;
        self.store.tag(&ip, SIP_TAG).await?;
        self.store.tag(&ip, &record.category).await?;

        let asn = match self.store.get_or_create_asn(&record.asn).await {
            Ok(asn) => asn,
            Err(UpsertError::Validation(error)) => return Ok(self.skip(record, error)),
            Err(UpsertError::Storage(error)) => return Err(error),
        };
        self.store
            .add_context(&asn, asn_context(source, record), &CONTEXT_DEDUP)
            .await?;
        self.store.add_source(&asn, source).await?;
        self.store.tag(&asn, FEED_TAG).await?;
        self.store
            .active_link_to(&asn, &ip, AS_LINK_TYPE, source)
            .await?;

        Ok(RecordOutcome::Upserted { ip, asn })
    }

    fn skip(&self, record: &SipRecord, error: ObservableValidationError) -> RecordOutcome {
        tracing::error!(
            feed = %self.config.name,
            ip = %record.ip,
            asn = %record.asn,
            %error,
            "skipping record"
        );
        RecordOutcome::Skipped(error)
    }
}

fn ip_context(source: &str, record: &SipRecord, date_added: DateTime<Utc>) -> Context {
    let mut context = Context::new();
    context.insert("source".to_string(), json!(source));
    context.insert("last_seen".to_string(), json!(record.last_seen));
    context.insert("date_added".to_string(), json!(date_added));
    context
}

fn asn_context(source: &str, record: &SipRecord) -> Context {
    let mut context = Context::new();
    context.insert("source".to_string(), json!(source));
    context.insert("name".to_string(), json!(record.as_name));
    context
}
