use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::error::StoreError;
use super::retry::{retry_transient, RetryPolicy};
use super::schema::{COMMENT_COLUMNS, SCHEMA};
use crate::config::DatabaseConfig;
use crate::model::{CanonicalComment, Classification, Sentiment, Source};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable comment store on SQLite.
///
/// Every call opens its own connection and runs on the blocking pool, so any
/// number of monitors, the sentiment worker and the HTTP handlers can share
/// one store. Writes are single immediate transactions.
#[derive(Clone)]
pub struct CommentStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    path: PathBuf,
    busy_timeout: Duration,
    retry: RetryPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total: i64,
    pub vk: i64,
    pub telegram: i64,
    pub processed: i64,
    pub unprocessed: i64,
    /// Records whose sentiment is null, processed or not
    pub undefined_sentiment: i64,
}

impl Statistics {
    pub fn by_source(&self, source: Source) -> i64 {
        match source {
            Source::Vk => self.vk,
            Source::Telegram => self.telegram,
        }
    }
}

/// Sentiment counts over processed comments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SentimentBreakdown {
    pub positive: i64,
    pub negative: i64,
    pub neutral: i64,
    pub undefined: i64,
}

impl SentimentBreakdown {
    pub fn count(&self, sentiment: Sentiment) -> i64 {
        match sentiment {
            Sentiment::Positive => self.positive,
            Sentiment::Negative => self.negative,
            Sentiment::Neutral => self.neutral,
        }
    }
}

/// Query for comments still lacking a sentiment label.
#[derive(Debug, Clone, Copy)]
pub struct UndefinedFilter {
    pub start_date: Option<NaiveDate>,
    /// Inclusive: the whole day is covered
    pub end_date: Option<NaiveDate>,
    pub limit: usize,
}

impl CommentStore {
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let inner = StoreInner {
            path: config.path.clone(),
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            retry: RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.base_delay_ms),
            ),
        };
        inner.init_schema()?;
        info!("Database initialized at {}", config.path.display());

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Stores the comment unless `(source, source_comment_id)` is already
    /// present. Returns `true` when a new row was written.
    pub async fn insert_if_absent(&self, comment: &CanonicalComment) -> Result<bool> {
        let comment = Arc::new(comment.clone());
        let inserted = retry_transient(&self.inner.retry, "insert_if_absent", || {
            let comment = comment.clone();
            self.blocking(move |inner| inner.insert_once(&comment))
        })
        .await?;

        if inserted {
            debug!(
                "Comment saved: {}:{}",
                comment.source, comment.source_comment_id
            );
        } else {
            debug!(
                "Comment already exists: {}:{}",
                comment.source, comment.source_comment_id
            );
        }
        Ok(inserted)
    }

    pub async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<CanonicalComment>> {
        self.blocking(move |inner| inner.fetch_unprocessed(limit)).await
    }

    /// Records a sentiment decision. `None` means "could not classify" and still
    /// marks the comment processed. Returns `false` when `id` does not exist.
    pub async fn update_sentiment(
        &self,
        id: i64,
        classification: Option<Classification>,
    ) -> Result<bool> {
        if let Some(c) = classification {
            if !c.score_in_range() {
                return Err(StoreError::InvalidScore(c.score));
            }
        }

        retry_transient(&self.inner.retry, "update_sentiment", || {
            self.blocking(move |inner| inner.update_once(id, classification))
        })
        .await
    }

    pub async fn get_statistics(&self) -> Result<Statistics> {
        self.blocking(|inner| inner.statistics()).await
    }

    pub async fn get_comment(&self, id: i64) -> Result<Option<CanonicalComment>> {
        self.blocking(move |inner| inner.get_comment(id)).await
    }

    pub async fn fetch_undefined(&self, filter: UndefinedFilter) -> Result<Vec<CanonicalComment>> {
        self.blocking(move |inner| inner.fetch_undefined(filter)).await
    }

    pub async fn recent_comments(&self, limit: usize) -> Result<Vec<CanonicalComment>> {
        self.blocking(move |inner| inner.recent(limit)).await
    }

    pub async fn sentiment_breakdown(&self) -> Result<SentimentBreakdown> {
        self.blocking(|inner| inner.breakdown()).await
    }

    /// Id-ordered page of every stored comment, starting after `after_id`.
    pub async fn fetch_page(&self, after_id: i64, limit: usize) -> Result<Vec<CanonicalComment>> {
        self.blocking(move |inner| inner.page(after_id, limit)).await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreInner) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }
}

impl StoreInner {
    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("SQLite journal mode: {}", mode);
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn insert_once(&self, c: &CanonicalComment) -> Result<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "INSERT INTO comments (
                source, source_comment_id, group_channel_name, author_name, author_id,
                author_username, comment_text, has_media, media_type, post_url,
                post_published_at, comment_url, comment_published_at,
                sentiment, sentiment_score, parsed_at, processed
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT (source_comment_id, source) DO NOTHING",
            params![
                c.source.as_str(),
                c.source_comment_id,
                c.group_channel_name,
                c.author_name,
                c.author_id,
                c.author_username,
                c.comment_text,
                c.has_media,
                c.media_type.map(|m| m.as_str()),
                c.post_url,
                c.post_published_at,
                c.comment_url,
                c.comment_published_at,
                c.sentiment.map(|s| s.as_str()),
                c.sentiment_score,
                c.parsed_at,
                c.processed,
            ],
        )?;

        tx.commit()?;
        Ok(changed == 1)
    }

    fn update_once(&self, id: i64, classification: Option<Classification>) -> Result<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE comments SET sentiment = ?1, sentiment_score = ?2, processed = 1 WHERE id = ?3",
            params![
                classification.map(|c| c.sentiment.as_str()),
                classification.map(|c| c.score),
                id,
            ],
        )?;

        tx.commit()?;
        Ok(changed == 1)
    }

    fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<CanonicalComment>> {
        self.query_comments(
            &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE processed = 0 ORDER BY id LIMIT ?1"),
            params![limit as i64],
        )
    }

    fn get_comment(&self, id: i64) -> Result<Option<CanonicalComment>> {
        let conn = self.connect()?;
        let comment = conn
            .query_row(
                &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1"),
                params![id],
                row_to_comment,
            )
            .optional()?;
        Ok(comment)
    }

    fn fetch_undefined(&self, filter: UndefinedFilter) -> Result<Vec<CanonicalComment>> {
        let from = filter.start_date.map(start_of_day);
        let until = filter
            .end_date
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .map(start_of_day);

        self.query_comments(
            &format!(
                "SELECT {COMMENT_COLUMNS} FROM comments
                 WHERE sentiment IS NULL
                   AND (?1 IS NULL OR comment_published_at >= ?1)
                   AND (?2 IS NULL OR comment_published_at < ?2)
                 ORDER BY comment_published_at DESC, id DESC
                 LIMIT ?3"
            ),
            params![from, until, filter.limit as i64],
        )
    }

    fn recent(&self, limit: usize) -> Result<Vec<CanonicalComment>> {
        self.query_comments(
            &format!(
                "SELECT {COMMENT_COLUMNS} FROM comments
                 ORDER BY comment_published_at DESC, id DESC LIMIT ?1"
            ),
            params![limit as i64],
        )
    }

    fn page(&self, after_id: i64, limit: usize) -> Result<Vec<CanonicalComment>> {
        self.query_comments(
            &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id > ?1 ORDER BY id LIMIT ?2"),
            params![after_id, limit as i64],
        )
    }

    fn statistics(&self) -> Result<Statistics> {
        let conn = self.connect()?;
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(source = 'vk'), 0),
                    COALESCE(SUM(source = 'telegram'), 0),
                    COALESCE(SUM(processed = 1), 0),
                    COALESCE(SUM(processed = 0), 0),
                    COALESCE(SUM(sentiment IS NULL), 0)
             FROM comments",
            [],
            |row| {
                Ok(Statistics {
                    total: row.get(0)?,
                    vk: row.get(1)?,
                    telegram: row.get(2)?,
                    processed: row.get(3)?,
                    unprocessed: row.get(4)?,
                    undefined_sentiment: row.get(5)?,
                })
            },
        )?;
        Ok(stats)
    }

    fn breakdown(&self) -> Result<SentimentBreakdown> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT sentiment, COUNT(*) FROM comments WHERE processed = 1 GROUP BY sentiment",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut breakdown = SentimentBreakdown::default();
        for row in rows {
            let (label, count) = row?;
            match label.as_deref().map(Sentiment::from_str) {
                Some(Ok(Sentiment::Positive)) => breakdown.positive += count,
                Some(Ok(Sentiment::Negative)) => breakdown.negative += count,
                Some(Ok(Sentiment::Neutral)) => breakdown.neutral += count,
                _ => breakdown.undefined += count,
            }
        }
        Ok(breakdown)
    }

    fn query_comments(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<CanonicalComment>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_comment)?;
        let comments = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comments)
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn row_to_comment(row: &Row<'_>) -> rusqlite::Result<CanonicalComment> {
    Ok(CanonicalComment {
        id: Some(row.get(0)?),
        source: parse_column(row, 1)?,
        source_comment_id: row.get(2)?,
        group_channel_name: row.get(3)?,
        author_name: row.get(4)?,
        author_id: row.get(5)?,
        author_username: row.get(6)?,
        comment_text: row.get(7)?,
        has_media: row.get(8)?,
        media_type: parse_optional_column(row, 9)?,
        post_url: row.get(10)?,
        post_published_at: row.get(11)?,
        comment_url: row.get(12)?,
        comment_published_at: row.get(13)?,
        sentiment: parse_optional_column(row, 14)?,
        sentiment_score: row.get(15)?,
        parsed_at: row.get(16)?,
        processed: row.get(17)?,
    })
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn parse_optional_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = String>,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => text.parse().map(Some).map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MediaType, Source};
    use crate::testing::{comment, temp_store};
    use chrono::TimeZone;

    #[tokio::test]
    async fn insert_is_idempotent() {
        let (_dir, store) = temp_store();
        let c = comment(Source::Vk, "555", "Привет");

        assert!(store.insert_if_absent(&c).await.unwrap());
        assert!(!store.insert_if_absent(&c).await.unwrap());

        let stats = store.get_statistics().await.unwrap();
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn same_id_on_different_sources_is_not_a_duplicate() {
        let (_dir, store) = temp_store();
        assert!(store.insert_if_absent(&comment(Source::Vk, "1", "a")).await.unwrap());
        assert!(store.insert_if_absent(&comment(Source::Telegram, "1", "b")).await.unwrap());

        let stats = store.get_statistics().await.unwrap();
        assert_eq!(stats.vk, 1);
        assert_eq!(stats.telegram, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_of_one_key_store_one_row() {
        let (_dir, store) = temp_store();
        let c = comment(Source::Telegram, "chan/77", "race");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let c = c.clone();
                tokio::spawn(async move { store.insert_if_absent(&c).await.unwrap() })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(store.get_statistics().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn sentiment_round_trip() {
        let (_dir, store) = temp_store();
        store.insert_if_absent(&comment(Source::Vk, "1", "Супер")).await.unwrap();
        let id = store.fetch_unprocessed(10).await.unwrap()[0].id.unwrap();

        let updated = store
            .update_sentiment(id, Some(Classification::new(Sentiment::Positive, 0.8)))
            .await
            .unwrap();
        assert!(updated);

        let stored = store.get_comment(id).await.unwrap().unwrap();
        assert_eq!(stored.sentiment, Some(Sentiment::Positive));
        assert_eq!(stored.sentiment_score, Some(0.8));
        assert!(stored.processed);
    }

    #[tokio::test]
    async fn null_sentiment_marks_processed() {
        let (_dir, store) = temp_store();
        store.insert_if_absent(&comment(Source::Vk, "1", "")).await.unwrap();
        let id = store.fetch_unprocessed(10).await.unwrap()[0].id.unwrap();

        assert!(store.update_sentiment(id, None).await.unwrap());

        let stored = store.get_comment(id).await.unwrap().unwrap();
        assert_eq!(stored.sentiment, None);
        assert_eq!(stored.sentiment_score, None);
        assert!(stored.processed);
        assert!(store.fetch_unprocessed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_of_unknown_id_reports_false() {
        let (_dir, store) = temp_store();
        assert!(!store.update_sentiment(999, None).await.unwrap());
    }

    #[tokio::test]
    async fn out_of_range_score_is_rejected() {
        let (_dir, store) = temp_store();
        store.insert_if_absent(&comment(Source::Vk, "1", "x")).await.unwrap();
        let err = store
            .update_sentiment(1, Some(Classification::new(Sentiment::Neutral, 1.5)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidScore(_)));
        assert!(!store.get_comment(1).await.unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn unprocessed_batch_is_in_insertion_order_and_bounded() {
        let (_dir, store) = temp_store();
        for i in 0..5 {
            store
                .insert_if_absent(&comment(Source::Vk, &i.to_string(), "text"))
                .await
                .unwrap();
        }

        let batch = store.fetch_unprocessed(3).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|c| c.source_comment_id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2"]);
    }

    #[tokio::test]
    async fn vk_scenario_moves_one_comment_to_processed() {
        let (_dir, store) = temp_store();
        store.insert_if_absent(&comment(Source::Vk, "555", "Плохо")).await.unwrap();
        let before = store.get_statistics().await.unwrap();

        let batch = store.fetch_unprocessed(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].source_comment_id, "555");

        store
            .update_sentiment(
                batch[0].id.unwrap(),
                Some(Classification::new(Sentiment::Negative, 0.73)),
            )
            .await
            .unwrap();

        let after = store.get_statistics().await.unwrap();
        assert_eq!(after.unprocessed, before.unprocessed - 1);
        assert_eq!(after.processed, before.processed + 1);
    }

    #[tokio::test]
    async fn undefined_filter_respects_inclusive_date_range() {
        let (_dir, store) = temp_store();
        let days = [(1, "early"), (10, "middle"), (20, "late")];
        for (day, id) in days {
            let mut c = comment(Source::Vk, id, id);
            c.comment_published_at = Utc.with_ymd_and_hms(2024, 3, day, 23, 30, 0).unwrap();
            store.insert_if_absent(&c).await.unwrap();
        }
        let labelled = store.fetch_page(0, 10).await.unwrap();
        let late_id = labelled
            .iter()
            .find(|c| c.source_comment_id == "late")
            .and_then(|c| c.id)
            .unwrap();
        store
            .update_sentiment(late_id, Some(Classification::new(Sentiment::Neutral, 0.5)))
            .await
            .unwrap();

        let found = store
            .fetch_undefined(UndefinedFilter {
                start_date: NaiveDate::from_ymd_opt(2024, 3, 5),
                end_date: NaiveDate::from_ymd_opt(2024, 3, 20),
                limit: 100,
            })
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|c| c.source_comment_id.as_str()).collect();
        assert_eq!(ids, vec!["middle"]);

        let all = store
            .fetch_undefined(UndefinedFilter {
                start_date: None,
                end_date: NaiveDate::from_ymd_opt(2024, 3, 10),
                limit: 100,
            })
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|c| c.source_comment_id.as_str()).collect();
        assert_eq!(ids, vec!["middle", "early"]);
    }

    #[tokio::test]
    async fn media_fields_survive_storage() {
        let (_dir, store) = temp_store();
        let mut c = comment(Source::Telegram, "chan/5", "");
        c.has_media = true;
        c.media_type = Some(MediaType::Sticker);
        c.author_username = None;
        store.insert_if_absent(&c).await.unwrap();

        let stored = store.fetch_unprocessed(1).await.unwrap().remove(0);
        assert_eq!(stored.media_type, Some(MediaType::Sticker));
        assert!(stored.has_media);
        assert_eq!(stored.author_username, None);
        assert_eq!(stored.comment_published_at, c.comment_published_at);
    }

    #[tokio::test]
    async fn breakdown_counts_processed_labels() {
        let (_dir, store) = temp_store();
        for i in 1..=3 {
            store
                .insert_if_absent(&comment(Source::Vk, &i.to_string(), "t"))
                .await
                .unwrap();
        }
        store
            .update_sentiment(1, Some(Classification::new(Sentiment::Positive, 0.9)))
            .await
            .unwrap();
        store.update_sentiment(2, None).await.unwrap();

        let breakdown = store.sentiment_breakdown().await.unwrap();
        assert_eq!(breakdown.positive, 1);
        assert_eq!(breakdown.undefined, 1);
        assert_eq!(breakdown.negative + breakdown.neutral, 0);
    }
}
