use chrono::{DateTime, Utc};
use serde::Serialize;

use super::comment::{CanonicalComment, MediaType, Source};

/// A comment as a platform monitor scraped it. Every field is optional so the
/// normalizer is the single place that decides what is mandatory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RawComment {
    pub source: Option<Source>,
    pub source_comment_id: Option<String>,
    pub group_channel_name: Option<String>,
    pub author_name: Option<String>,
    pub author_id: Option<String>,
    pub author_username: Option<String>,
    pub comment_text: Option<String>,
    pub has_media: Option<bool>,
    pub media_type: Option<MediaType>,
    pub post_url: Option<String>,
    pub post_published_at: Option<DateTime<Utc>>,
    pub comment_url: Option<String>,
    pub comment_published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing mandatory field `{0}`")]
    MissingField(&'static str),
}

pub fn normalize(raw: RawComment) -> Result<CanonicalComment, ValidationError> {
    normalize_at(raw, Utc::now())
}

/// Same as [`normalize`] with an explicit ingestion timestamp.
pub fn normalize_at(
    raw: RawComment,
    parsed_at: DateTime<Utc>,
) -> Result<CanonicalComment, ValidationError> {
    let source = raw.source.ok_or(ValidationError::MissingField("source"))?;
    let source_comment_id = required(raw.source_comment_id, "source_comment_id")?;
    let group_channel_name = required(raw.group_channel_name, "group_channel_name")?;
    let author_name = required(raw.author_name, "author_name")?;
    let author_id = required(raw.author_id, "author_id")?;
    let post_url = required(raw.post_url, "post_url")?;
    let post_published_at = raw
        .post_published_at
        .ok_or(ValidationError::MissingField("post_published_at"))?;
    let comment_url = required(raw.comment_url, "comment_url")?;
    let comment_published_at = raw
        .comment_published_at
        .ok_or(ValidationError::MissingField("comment_published_at"))?;

    let has_media = raw.has_media.unwrap_or(false) || raw.media_type.is_some();

    Ok(CanonicalComment {
        id: None,
        source,
        source_comment_id,
        group_channel_name,
        author_name,
        author_id,
        author_username: raw.author_username.filter(|u| !u.trim().is_empty()),
        comment_text: raw.comment_text.unwrap_or_default(),
        has_media,
        media_type: raw.media_type,
        post_url,
        post_published_at,
        comment_url,
        comment_published_at,
        sentiment: None,
        sentiment_score: None,
        parsed_at,
        processed: false,
    })
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::raw_comment as complete_raw;
    use chrono::TimeZone;

    #[test]
    fn missing_username_defaults_to_none() {
        let mut raw = complete_raw();
        raw.author_username = None;
        let comment = normalize(raw).unwrap();
        assert_eq!(comment.author_username, None);
        assert_eq!(comment.sentiment, None);
        assert_eq!(comment.sentiment_score, None);
        assert!(!comment.processed);
        assert_eq!(comment.id, None);
    }

    #[test]
    fn missing_post_url_is_rejected() {
        let mut raw = complete_raw();
        raw.post_url = None;
        assert_eq!(
            normalize(raw).unwrap_err(),
            ValidationError::MissingField("post_url")
        );
    }

    #[test]
    fn blank_identity_field_counts_as_missing() {
        let mut raw = complete_raw();
        raw.author_id = Some("  ".into());
        assert_eq!(
            normalize(raw).unwrap_err(),
            ValidationError::MissingField("author_id")
        );
    }

    #[test]
    fn each_mandatory_field_is_checked() {
        let cases: Vec<(&str, fn(&mut RawComment))> = vec![
            ("source", |r| r.source = None),
            ("source_comment_id", |r| r.source_comment_id = None),
            ("group_channel_name", |r| r.group_channel_name = None),
            ("author_name", |r| r.author_name = None),
            ("author_id", |r| r.author_id = None),
            ("post_published_at", |r| r.post_published_at = None),
            ("comment_url", |r| r.comment_url = None),
            ("comment_published_at", |r| r.comment_published_at = None),
        ];
        for (field, strip) in cases {
            let mut raw = complete_raw();
            strip(&mut raw);
            assert_eq!(
                normalize(raw).unwrap_err(),
                ValidationError::MissingField(field)
            );
        }
    }

    #[test]
    fn media_only_comment_gets_empty_text() {
        let mut raw = complete_raw();
        raw.comment_text = None;
        raw.has_media = None;
        raw.media_type = Some(MediaType::Photo);
        let comment = normalize(raw).unwrap();
        assert_eq!(comment.comment_text, "");
        assert!(comment.has_media);
        assert!(comment.is_text_blank());
    }

    #[test]
    fn same_input_same_record() {
        let parsed_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let a = normalize_at(complete_raw(), parsed_at).unwrap();
        let b = normalize_at(complete_raw(), parsed_at).unwrap();
        assert_eq!(a, b);
    }
}
