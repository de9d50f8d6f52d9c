//! JSON endpoints for manual sentiment labeling.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{error, info};

use super::auth::BasicAuth;
use super::state::AppState;
use crate::ingest::MonitorState;
use crate::model::{CanonicalComment, Classification, MediaType, Sentiment, Source};
use crate::storage::{StoreError, UndefinedFilter};

const DEFAULT_MANUAL_SCORE: f64 = 0.95;
const DEFAULT_UNDEFINED_LIMIT: usize = 100;
const MAX_UNDEFINED_LIMIT: usize = 1000;

/// Error body shaped as `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn not_found(id: i64) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("Комментарий с ID {} не найден", id),
        )
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        error!("Database error in API: {}", e);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct CommentView {
    pub id: Option<i64>,
    pub source: Source,
    pub group_channel_name: String,
    pub author_name: String,
    pub author_username: Option<String>,
    pub comment_text: String,
    pub has_media: bool,
    pub media_type: Option<MediaType>,
    pub sentiment: Option<Sentiment>,
    pub sentiment_score: Option<f64>,
    pub comment_published_at: DateTime<Utc>,
    pub post_url: String,
    pub comment_url: String,
}

impl From<CanonicalComment> for CommentView {
    fn from(c: CanonicalComment) -> Self {
        Self {
            id: c.id,
            source: c.source,
            group_channel_name: c.group_channel_name,
            author_name: c.author_name,
            author_username: c.author_username,
            comment_text: c.comment_text,
            has_media: c.has_media,
            media_type: c.media_type,
            sentiment: c.sentiment,
            sentiment_score: c.sentiment_score,
            comment_published_at: c.comment_published_at,
            post_url: c.post_url,
            comment_url: c.comment_url,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    database: String,
    total_comments: i64,
    unprocessed_comments: i64,
    monitors: BTreeMap<&'static str, MonitorState>,
}

pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let stats = state.store.get_statistics().await?;
    Ok(Json(HealthResponse {
        status: "healthy",
        database: state.store.path().display().to_string(),
        total_comments: stats.total,
        unprocessed_comments: stats.unprocessed,
        monitors: state.monitor_states(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UndefinedQuery {
    start_date: Option<String>,
    end_date: Option<String>,
    limit: Option<usize>,
}

fn parse_date(value: Option<&str>, field: &str) -> Result<Option<NaiveDate>, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => NaiveDate::parse_from_str(v, "%Y-%m-%d").map(Some).map_err(|_| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                format!("Неверный формат {}. Используйте YYYY-MM-DD", field),
            )
        }),
    }
}

pub async fn undefined_comments(
    _auth: BasicAuth,
    State(state): State<AppState>,
    Query(query): Query<UndefinedQuery>,
) -> Result<Json<Vec<CommentView>>, ApiError> {
    let filter = UndefinedFilter {
        start_date: parse_date(query.start_date.as_deref(), "start_date")?,
        end_date: parse_date(query.end_date.as_deref(), "end_date")?,
        limit: query
            .limit
            .unwrap_or(DEFAULT_UNDEFINED_LIMIT)
            .clamp(1, MAX_UNDEFINED_LIMIT),
    };

    let comments = state.store.fetch_undefined(filter).await?;
    Ok(Json(comments.into_iter().map(CommentView::from).collect()))
}

pub async fn get_comment(
    _auth: BasicAuth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CommentView>, ApiError> {
    let comment = state
        .store
        .get_comment(id)
        .await?
        .ok_or_else(|| ApiError::not_found(id))?;
    Ok(Json(comment.into()))
}

#[derive(Debug, Deserialize)]
pub struct SentimentUpdate {
    sentiment: Sentiment,
    sentiment_score: Option<f64>,
}

pub async fn update_sentiment(
    auth: BasicAuth,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<SentimentUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let classification = Classification::new(
        update.sentiment,
        update.sentiment_score.unwrap_or(DEFAULT_MANUAL_SCORE),
    );
    if !classification.score_in_range() {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "sentiment_score must be between 0.0 and 1.0",
        ));
    }

    if !state.store.update_sentiment(id, Some(classification)).await? {
        return Err(ApiError::not_found(id));
    }

    info!(
        "Comment {} labeled {} ({:.2}) by {}",
        id, classification.sentiment, classification.score, auth.username
    );
    Ok(Json(json!({
        "success": true,
        "comment_id": id,
        "sentiment": classification.sentiment,
        "sentiment_score": classification.score,
    })))
}

pub async fn stats(_auth: BasicAuth, State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.store.get_statistics().await?;
    Ok(Json(json!({
        "total_comments": stats.total,
        "by_source": {
            "telegram": stats.telegram,
            "vk": stats.vk,
        },
        "by_status": {
            "processed": stats.processed,
            "unprocessed": stats.unprocessed,
        },
        "undefined_sentiment": stats.undefined_sentiment,
    })))
}
