use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use super::models::{ContextRecord, FeedRecord, LinkRecord, NewFeed, ObservableRecord, TagRecord};
use crate::core::observable::{
    normalize_asn, normalize_ip, Context, ObservableId, ObservableKind, ObservableRef,
    ObservableStore, UpsertError,
};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("stored payload is not valid json: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("stored timestamp is invalid: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("context is missing a string `source` field")]
    MissingContextSource,
}

#[derive(Debug, Clone)]
pub struct ObservableRepository {
    pool: SqlitePool,
}

impl ObservableRepository {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn upsert_observable(
        &self,
        kind: ObservableKind,
        value: String,
    ) -> Result<ObservableRef, StorageError> {
        sqlx::query(
            r#"
            INSERT INTO observables (kind, value)
            VALUES (?1, ?2)
            ON CONFLICT(kind, value) DO UPDATE SET
              updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(kind.as_str())
        .bind(&value)
        .execute(&self.pool)
        .await?;

        let id: ObservableId =
            sqlx::query_scalar("SELECT id FROM observables WHERE kind = ?1 AND value = ?2")
                .bind(kind.as_str())
                .bind(&value)
                .fetch_one(&self.pool)
                .await?;

        Ok(ObservableRef { id, kind, value })
    }

    pub async fn find_observable(
        &self,
        kind: ObservableKind,
        value: &str,
    ) -> Result<Option<ObservableRecord>, StorageError> {
        let row = sqlx::query_as::<_, ObservableRecord>(
            r#"
            SELECT id, kind, value, created_at, updated_at
            FROM observables
            WHERE kind = ?1 AND value = ?2
            "#,
        )
        .bind(kind.as_str())
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn count_observables(&self, kind: ObservableKind) -> Result<i64, StorageError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM observables WHERE kind = ?1")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn list_contexts(
        &self,
        observable_id: ObservableId,
    ) -> Result<Vec<ContextRecord>, StorageError> {
        let rows = sqlx::query_as::<_, ContextRecord>(
            r#"
            SELECT id, observable_id, source, payload
            FROM observable_contexts
            WHERE observable_id = ?1
            ORDER BY id
            "#,
        )
        .bind(observable_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_tags(&self, observable_id: ObservableId) -> Result<Vec<TagRecord>, StorageError> {
        let rows = sqlx::query_as::<_, TagRecord>(
            r#"
            SELECT name, first_seen, last_seen
            FROM observable_tags
            WHERE observable_id = ?1
            ORDER BY name
            "#,
        )
        .bind(observable_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_sources(&self, observable_id: ObservableId) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query_scalar(
            "SELECT source FROM observable_sources WHERE observable_id = ?1 ORDER BY source",
        )
        .bind(observable_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_links_from(
        &self,
        src_id: ObservableId,
    ) -> Result<Vec<LinkRecord>, StorageError> {
        let rows = sqlx::query_as::<_, LinkRecord>(
            r#"
            SELECT id, src_id, dst_id, link_type, active, first_seen, last_seen
            FROM links
            WHERE src_id = ?1
            ORDER BY id
            "#,
        )
        .bind(src_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_link_sources(&self, link_id: i64) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query_scalar(
            "SELECT source FROM link_sources WHERE link_id = ?1 ORDER BY source",
        )
        .bind(link_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn upsert_feed(&self, feed: &NewFeed) -> Result<FeedRecord, StorageError> {
        sqlx::query(
            r#"
            INSERT INTO feeds (name, source_url, description, frequency_secs)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(name) DO UPDATE SET
              source_url = excluded.source_url,
              description = excluded.description,
              frequency_secs = excluded.frequency_secs,
              updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&feed.name)
        .bind(&feed.source_url)
        .bind(&feed.description)
        .bind(feed.frequency_secs)
        .execute(&self.pool)
        .await?;

        let record = self
            .get_feed(&feed.name)
            .await?
            .ok_or(StorageError::Database(sqlx::Error::RowNotFound))?;
        Ok(record)
    }

    pub async fn get_feed(&self, name: &str) -> Result<Option<FeedRecord>, StorageError> {
        let row = sqlx::query_as::<_, FeedRecord>(
            r#"
            SELECT name, source_url, description, frequency_secs, last_run, failure_count, created_at, updated_at
            FROM feeds
            WHERE name = ?1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn record_feed_success(
        &self,
        name: &str,
        last_run: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE feeds
            SET last_run = ?1,
                failure_count = 0,
                updated_at = CURRENT_TIMESTAMP
            WHERE name = ?2
            "#,
        )
        .bind(last_run.to_rfc3339())
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_feed_failure(&self, name: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE feeds
            SET failure_count = failure_count + 1,
                updated_at = CURRENT_TIMESTAMP
            WHERE name = ?1
            "#,
        )
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ObservableStore for ObservableRepository {
    async fn get_or_create_ip(&self, value: &str) -> Result<ObservableRef, UpsertError> {
        let value = normalize_ip(value)?;
        Ok(self.upsert_observable(ObservableKind::Ip, value).await?)
    }

    async fn get_or_create_asn(&self, value: &str) -> Result<ObservableRef, UpsertError> {
        let value = normalize_asn(value)?;
        Ok(self
            .upsert_observable(ObservableKind::AutonomousSystem, value)
            .await?)
    }

    async fn add_context(
        &self,
        observable: &ObservableRef,
        context: Context,
        dedup_list: &[&str],
    ) -> Result<(), StorageError> {
        let source = context
            .get("source")
            .and_then(|value| value.as_str())
            .ok_or(StorageError::MissingContextSource)?
            .to_string();
        let payload = serde_json::to_string(&context)?;

        let existing = sqlx::query_as::<_, ContextRecord>(
            r#"
            SELECT id, observable_id, source, payload
            FROM observable_contexts
            WHERE observable_id = ?1 AND source = ?2
            ORDER BY id
            "#,
        )
        .bind(observable.id)
        .bind(&source)
        .fetch_all(&self.pool)
        .await?;

        let mut duplicate = None;
        for record in &existing {
            let stored = record.context()?;
            if dedup_list.iter().all(|key| stored.get(*key) == context.get(*key)) {
                duplicate = Some(record.id);
                break;
            }
        }

        match duplicate {
            Some(context_id) => {
                sqlx::query(
                    r#"
                    UPDATE observable_contexts
                    SET payload = ?1,
                        updated_at = CURRENT_TIMESTAMP
                    WHERE id = ?2
                    "#,
                )
                .bind(&payload)
                .bind(context_id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO observable_contexts (observable_id, source, payload)
                    VALUES (?1, ?2, ?3)
                    "#,
                )
                .bind(observable.id)
                .bind(&source)
                .bind(&payload)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn add_source(
        &self,
        observable: &ObservableRef,
        source: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO observable_sources (observable_id, source)
            VALUES (?1, ?2)
            ON CONFLICT(observable_id, source) DO NOTHING
            "#,
        )
        .bind(observable.id)
        .bind(source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn tag(&self, observable: &ObservableRef, name: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO observable_tags (observable_id, name)
            VALUES (?1, ?2)
            ON CONFLICT(observable_id, name) DO UPDATE SET
              last_seen = CURRENT_TIMESTAMP
            "#,
        )
        .bind(observable.id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_link_to(
        &self,
        src: &ObservableRef,
        dst: &ObservableRef,
        link_type: &str,
        source: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO links (src_id, dst_id, link_type, active)
            VALUES (?1, ?2, ?3, 1)
            ON CONFLICT(src_id, dst_id, link_type) DO UPDATE SET
              active = 1,
              last_seen = CURRENT_TIMESTAMP
            "#,
        )
        .bind(src.id)
        .bind(dst.id)
        .bind(link_type)
        .execute(&self.pool)
        .await?;

        let link_id: i64 = sqlx::query_scalar(
            "SELECT id FROM links WHERE src_id = ?1 AND dst_id = ?2 AND link_type = ?3",
        )
        .bind(src.id)
        .bind(dst.id)
        .bind(link_type)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO link_sources (link_id, source)
            VALUES (?1, ?2)
            ON CONFLICT(link_id, source) DO NOTHING
            "#,
        )
        .bind(link_id)
        .bind(source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
