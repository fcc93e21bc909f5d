use chrono::Utc;

use crate::core::feed::types::UpdateReport;
use crate::core::feed::{DataplaneSipFeed, FeedError};
use crate::core::observable::ObservableStore;
use crate::core::storage::models::NewFeed;
use crate::core::storage::repository::{ObservableRepository, StorageError};

pub fn feed_registration<S: ObservableStore>(feed: &DataplaneSipFeed<S>) -> NewFeed {
    let config = feed.config();
    NewFeed {
        name: config.name.clone(),
        source_url: config.source_url.clone(),
        description: config.description.clone(),
        frequency_secs: i64::try_from(config.frequency.as_secs()).unwrap_or(i64::MAX),
    }
}

pub async fn run_feed<S: ObservableStore>(
    feed: &DataplaneSipFeed<S>,
    repository: &ObservableRepository,
) -> Result<UpdateReport, FeedError> {
    let registered = repository.upsert_feed(&feed_registration(feed)).await?;
    let last_run = registered.last_run_at().map_err(StorageError::from)?;
    let started_at = Utc::now();
    tracing::debug!(feed = %registered.name, ?last_run, "starting feed run");

    match feed.update(last_run).await {
        Ok(report) => {
            repository
                .record_feed_success(&registered.name, started_at)
                .await?;
            Ok(report)
        }
        Err(error) => {
            tracing::error!(feed = %registered.name, %error, "feed run failed");
            if let Err(storage_error) = repository.record_feed_failure(&registered.name).await {
                tracing::warn!(
                    feed = %registered.name,
                    error = %storage_error,
                    "could not record feed failure"
                );
            }
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::core::feed::fetcher::FetchError;
    use crate::core::feed::tests::spawn_feed_server;
    use axum::http::StatusCode;

    async fn make_feed(
        source_url: &str,
    ) -> (DataplaneSipFeed<ObservableRepository>, ObservableRepository) {
        let repository = ObservableRepository::connect("sqlite::memory:")
            .await
            .expect("connect must succeed");
        let config = FeedConfig {
            source_url: source_url.to_string(),
            max_retries: 0,
            ..FeedConfig::default()
        };
        let feed = DataplaneSipFeed::new(config, repository.clone()).expect("feed must build");
        (feed, repository)
    }

    #[tokio::test]
    async fn successful_run_advances_last_run() {
        let (url, server_task) = spawn_feed_server(StatusCode::OK).await;
        let (feed, repository) = make_feed(&url).await;
        let before = Utc::now();

        let first = run_feed(&feed, &repository).await.expect("first run");
        let state = repository
            .get_feed("DataplaneSIPRegistr")
            .await
            .expect("get must succeed")
            .expect("feed must be registered");
        let last_run = state
            .last_run_at()
            .expect("timestamp parses")
            .expect("last_run must be set");

        assert_eq!(first.upserted, 4);
        assert!(last_run >= before);
        assert_eq!(state.frequency_secs, 7200);
        assert_eq!(state.source_url, url);

        let second = run_feed(&feed, &repository).await.expect("second run");
        assert_eq!(second.stale, 6);
        assert_eq!(second.upserted + second.skipped, 0);

        server_task.abort();
    }

    #[tokio::test]
    async fn failure_bookkeeping_error_does_not_mask_fetch_error() {
        let (url, server_task) = spawn_feed_server(StatusCode::BAD_GATEWAY).await;
        let (feed, repository) = make_feed(&url).await;
        sqlx::query(
            r#"
            CREATE TRIGGER reject_failure_count
            BEFORE UPDATE OF failure_count ON feeds
            BEGIN
              SELECT RAISE(ABORT, 'failure_count is read-only');
            END
            "#,
        )
        .execute(repository.pool())
        .await
        .expect("trigger must be created");

        let result = run_feed(&feed, &repository).await;

        assert!(matches!(
            result,
            Err(FeedError::Fetch(FetchError::HttpStatus(502)))
        ));

        server_task.abort();
    }

    #[tokio::test]
    async fn failed_run_keeps_last_run_and_counts_failure() {
        let (url, server_task) = spawn_feed_server(StatusCode::BAD_GATEWAY).await;
        let (feed, repository) = make_feed(&url).await;

        let result = run_feed(&feed, &repository).await;
        let state = repository
            .get_feed("DataplaneSIPRegistr")
            .await
            .expect("get must succeed")
            .expect("feed must be registered");

        assert!(result.is_err());
        assert_eq!(state.last_run, None);
        assert_eq!(state.failure_count, 1);

        server_task.abort();
    }
}
