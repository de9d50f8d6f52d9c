use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::sentiment::{Classification, Sentiment};

/// Platform a comment was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Vk,
    Telegram,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Vk => "vk",
            Source::Telegram => "telegram",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Source::Vk => "VK",
            Source::Telegram => "TG",
        }
    }

    pub fn all() -> &'static [Source] {
        &[Source::Vk, Source::Telegram]
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vk" => Ok(Source::Vk),
            "telegram" => Ok(Source::Telegram),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Photo,
    Video,
    /// Video above the notification size limit
    LargeVideo,
    Sticker,
    Gif,
    Voice,
    Audio,
    Document,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Photo => "photo",
            MediaType::Video => "video",
            MediaType::LargeVideo => "large_video",
            MediaType::Sticker => "sticker",
            MediaType::Gif => "gif",
            MediaType::Voice => "voice",
            MediaType::Audio => "audio",
            MediaType::Document => "document",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(MediaType::Photo),
            "video" => Ok(MediaType::Video),
            "large_video" => Ok(MediaType::LargeVideo),
            "sticker" => Ok(MediaType::Sticker),
            "gif" => Ok(MediaType::Gif),
            "voice" => Ok(MediaType::Voice),
            "audio" => Ok(MediaType::Audio),
            "document" => Ok(MediaType::Document),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

/// The storage-ready shape of a comment, independent of the platform it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalComment {
    /// Row id, `None` until the comment has been stored
    pub id: Option<i64>,
    pub source: Source,
    pub source_comment_id: String,
    pub group_channel_name: String,
    pub author_name: String,
    pub author_id: String,
    pub author_username: Option<String>,
    pub comment_text: String,
    pub has_media: bool,
    pub media_type: Option<MediaType>,
    pub post_url: String,
    pub post_published_at: DateTime<Utc>,
    pub comment_url: String,
    pub comment_published_at: DateTime<Utc>,
    pub sentiment: Option<Sentiment>,
    pub sentiment_score: Option<f64>,
    pub parsed_at: DateTime<Utc>,
    pub processed: bool,
}

impl CanonicalComment {
    pub fn classification(&self) -> Option<Classification> {
        match (self.sentiment, self.sentiment_score) {
            (Some(sentiment), Some(score)) => Some(Classification::new(sentiment, score)),
            _ => None,
        }
    }

    /// True when there is no text worth sending to a classifier.
    pub fn is_text_blank(&self) -> bool {
        self.comment_text.trim().is_empty()
    }
}

/// Emitted by the sentiment worker after a decision has been written back.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedComment {
    pub comment: CanonicalComment,
    pub classification: Option<Classification>,
    pub classified_at: DateTime<Utc>,
}
