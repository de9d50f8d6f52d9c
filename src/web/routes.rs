use askama::Template;
use axum::extract::State;
use axum::response::Html;

use super::api::ApiError;
use super::auth::BasicAuth;
use super::state::AppState;
use crate::model::{CanonicalComment, Sentiment, Source};
use crate::storage::SentimentBreakdown;
use crate::notify::format::{display_time, truncate_text};

const DASHBOARD_TEXT_CHARS: usize = 400;

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    comments: Vec<CommentRow>,
    total: i64,
    processed: i64,
    unprocessed: i64,
    sources: Vec<(String, i64)>,
    sentiments: Vec<SentimentShare>,
}

struct SentimentShare {
    label: String,
    css: String,
    count: i64,
    percent: String,
}

/// One table row, shared by the dashboard and the live feed.
pub struct CommentRow {
    source: String,
    source_label: String,
    channel: String,
    author: String,
    username: String,
    text: String,
    media: String,
    sentiment_label: String,
    sentiment_css: String,
    score: String,
    date: String,
    url: String,
}

#[derive(Template)]
#[template(path = "comment_row.html")]
struct CommentRowTemplate<'a> {
    c: &'a CommentRow,
}

impl CommentRow {
    pub fn new(c: &CanonicalComment, utc_offset_hours: i32) -> Self {
        let (sentiment_label, sentiment_css) = match c.sentiment {
            Some(s) => (s.label().to_string(), s.css_class().to_string()),
            None if c.processed => ("Не определена".to_string(), "sentiment-undefined".to_string()),
            None => ("В очереди".to_string(), "sentiment-pending".to_string()),
        };

        Self {
            source: c.source.as_str().to_string(),
            source_label: c.source.label().to_string(),
            channel: c.group_channel_name.clone(),
            author: c.author_name.clone(),
            username: c.author_username.clone().unwrap_or_default(),
            text: truncate_text(&c.comment_text, DASHBOARD_TEXT_CHARS),
            media: c.media_type.map(|m| m.to_string()).unwrap_or_default(),
            sentiment_label,
            sentiment_css,
            score: c
                .sentiment_score
                .map(|s| format!("{:.0}%", s * 100.0))
                .unwrap_or_else(|| "—".to_string()),
            date: display_time(c.comment_published_at, utc_offset_hours),
            url: c.comment_url.clone(),
        }
    }

    pub fn render(&self) -> String {
        CommentRowTemplate { c: self }
            .render()
            .unwrap_or_else(|e| format!("<!-- template error: {} -->", e))
    }
}

fn percent(part: i64, whole: i64) -> String {
    if whole > 0 {
        format!("{:.0}%", part as f64 / whole as f64 * 100.0)
    } else {
        "—".to_string()
    }
}

/// Shares of each label among processed comments, undefined included, so the
/// percentages add up.
fn sentiment_shares(breakdown: &SentimentBreakdown) -> Vec<SentimentShare> {
    let processed = breakdown.positive + breakdown.negative + breakdown.neutral + breakdown.undefined;

    let mut shares: Vec<SentimentShare> = Sentiment::all()
        .iter()
        .map(|s| SentimentShare {
            label: s.label().to_string(),
            css: s.css_class().to_string(),
            count: breakdown.count(*s),
            percent: percent(breakdown.count(*s), processed),
        })
        .collect();
    shares.push(SentimentShare {
        label: "Не определена".to_string(),
        css: "sentiment-undefined".to_string(),
        count: breakdown.undefined,
        percent: percent(breakdown.undefined, processed),
    });
    shares
}

pub async fn dashboard(_auth: BasicAuth, State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let stats = state.store.get_statistics().await?;
    let breakdown = state.store.sentiment_breakdown().await?;
    let recent = state.store.recent_comments(state.recent_limit).await?;

    let comments = recent
        .iter()
        .map(|c| CommentRow::new(c, state.utc_offset_hours))
        .collect();

    let sources = Source::all()
        .iter()
        .map(|s| (s.label().to_string(), stats.by_source(*s)))
        .collect();

    let sentiments = sentiment_shares(&breakdown);

    let template = DashboardTemplate {
        comments,
        total: stats.total,
        processed: stats.processed,
        unprocessed: stats.unprocessed,
        sources,
        sentiments,
    };

    Ok(Html(
        template
            .render()
            .unwrap_or_else(|e| format!("Template error: {}", e)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Classification;
    use crate::testing::comment;

    #[test]
    fn row_escapes_comment_text() {
        let c = comment(Source::Telegram, "news/1", "<script>alert(1)</script>");
        let html = CommentRow::new(&c, 3).render();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("В очереди"));
    }

    #[test]
    fn row_shows_classification() {
        let mut c = comment(Source::Vk, "1", "Спасибо");
        let verdict = Classification::new(Sentiment::Positive, 0.84);
        c.sentiment = Some(verdict.sentiment);
        c.sentiment_score = Some(verdict.score);
        c.processed = true;

        let row = CommentRow::new(&c, 3);
        assert_eq!(row.sentiment_label, "Позитив");
        assert_eq!(row.score, "84%");
        assert_eq!(row.date, "15:00 01.05.2024");
    }

    #[test]
    fn shares_use_one_denominator() {
        let breakdown = SentimentBreakdown {
            positive: 2,
            negative: 1,
            neutral: 0,
            undefined: 1,
        };
        let shares = sentiment_shares(&breakdown);
        let percents: Vec<&str> = shares.iter().map(|s| s.percent.as_str()).collect();
        assert_eq!(percents, ["50%", "25%", "0%", "25%"]);
        assert_eq!(shares.last().unwrap().count, 1);
    }

    #[test]
    fn percent_of_nothing() {
        assert_eq!(percent(0, 0), "—");
        assert_eq!(percent(1, 4), "25%");
    }
}
