//! Fixtures shared by the unit tests.

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use crate::config::DatabaseConfig;
use crate::model::{normalize, CanonicalComment, RawComment, Source};
use crate::storage::CommentStore;

pub fn raw_comment() -> RawComment {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    RawComment {
        source: Some(Source::Vk),
        source_comment_id: Some("555".into()),
        group_channel_name: Some("Test group".into()),
        author_name: Some("Ivan Petrov".into()),
        author_id: Some("42".into()),
        author_username: Some("@ivan".into()),
        comment_text: Some("Отличный пост".into()),
        has_media: Some(false),
        media_type: None,
        post_url: Some("https://vk.com/wall-1_10".into()),
        post_published_at: Some(at),
        comment_url: Some("https://vk.com/wall-1_10?reply=555".into()),
        comment_published_at: Some(at),
    }
}

pub fn comment(source: Source, source_comment_id: &str, text: &str) -> CanonicalComment {
    let mut raw = raw_comment();
    raw.source = Some(source);
    raw.source_comment_id = Some(source_comment_id.to_string());
    raw.comment_text = Some(text.to_string());
    normalize(raw).unwrap()
}

/// A store on a fresh database file. Keep the `TempDir` alive for the test.
pub fn temp_store() -> (TempDir, CommentStore) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        path: dir.path().join("comments.db"),
        busy_timeout_ms: 2_000,
        max_attempts: 5,
        base_delay_ms: 10,
    };
    let store = CommentStore::open(&config).unwrap();
    (dir, store)
}

