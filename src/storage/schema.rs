//! SQLite schema for the comment store.
//!
//! One table keyed by `(source_comment_id, source)`; the sentiment pair is
//! either fully set or fully null.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,                  -- 'vk' | 'telegram'
    source_comment_id TEXT NOT NULL,       -- platform-native id
    group_channel_name TEXT NOT NULL,
    author_name TEXT NOT NULL,
    author_id TEXT NOT NULL,
    author_username TEXT,
    comment_text TEXT NOT NULL,
    has_media INTEGER NOT NULL DEFAULT 0,
    media_type TEXT,
    post_url TEXT NOT NULL,
    post_published_at DATETIME NOT NULL,
    comment_url TEXT NOT NULL,
    comment_published_at DATETIME NOT NULL,
    sentiment TEXT CHECK (sentiment IN ('positive', 'negative', 'neutral')),
    sentiment_score REAL CHECK (sentiment_score BETWEEN 0.0 AND 1.0),
    parsed_at DATETIME NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    CONSTRAINT uq_source_comment UNIQUE (source_comment_id, source),
    CHECK ((sentiment IS NULL) = (sentiment_score IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_comment_published_at ON comments(comment_published_at);
CREATE INDEX IF NOT EXISTS idx_processed ON comments(processed);
"#;

/// Column list shared by every `SELECT` that maps rows to `CanonicalComment`.
pub const COMMENT_COLUMNS: &str = "id, source, source_comment_id, group_channel_name, \
     author_name, author_id, author_username, comment_text, has_media, media_type, \
     post_url, post_published_at, comment_url, comment_published_at, \
     sentiment, sentiment_score, parsed_at, processed";
