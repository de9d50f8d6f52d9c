use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::api::{CommentPage, Post, VkApi, WallComment};
use crate::config::VkConfig;
use crate::ingest::{FetchBatch, FetchError, PlatformMonitor};
use crate::model::{CanonicalComment, MediaType, RawComment, Source};
use crate::notify::format::{comment_card, escape_html, CommentFormatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    User,
    Group,
}

/// How the configured owner was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerRef {
    /// Wall owner id: positive for users, negative for groups
    Id { id: i64, kind: OwnerKind },
    /// Needs `utils.resolveScreenName`
    ScreenName(String),
}

#[derive(Debug, Clone)]
pub struct Owner {
    pub id: i64,
    pub kind: OwnerKind,
    pub name: String,
}

/// Parses `id123`, `club123`, `public123`, `-123`, `123`, vk.com URLs and
/// bare screen names.
pub fn parse_owner(input: &str) -> OwnerRef {
    let mut s = input.trim();
    for prefix in ["https://", "http://"] {
        s = s.strip_prefix(prefix).unwrap_or(s);
    }
    for prefix in ["m.vk.com/", "vk.com/"] {
        s = s.strip_prefix(prefix).unwrap_or(s);
    }
    let s = s.trim_end_matches('/');

    let numeric = |t: &str| -> Option<i64> {
        if !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()) {
            t.parse().ok()
        } else {
            None
        }
    };

    if let Some(n) = s.strip_prefix('-').and_then(numeric) {
        return OwnerRef::Id {
            id: -n,
            kind: OwnerKind::Group,
        };
    }
    if let Some(n) = s.strip_prefix("id").and_then(numeric) {
        return OwnerRef::Id {
            id: n,
            kind: OwnerKind::User,
        };
    }
    for prefix in ["club", "public"] {
        if let Some(n) = s.strip_prefix(prefix).and_then(numeric) {
            return OwnerRef::Id {
                id: -n,
                kind: OwnerKind::Group,
            };
        }
    }
    if let Some(n) = numeric(s) {
        return OwnerRef::Id {
            id: n,
            kind: OwnerKind::User,
        };
    }

    OwnerRef::ScreenName(s.to_string())
}

fn media_of(comment: &WallComment) -> Option<MediaType> {
    comment
        .attachments
        .first()
        .and_then(|att| match att.kind.as_str() {
            "photo" => Some(MediaType::Photo),
            "video" => Some(MediaType::Video),
            "sticker" => Some(MediaType::Sticker),
            "audio" => Some(MediaType::Audio),
            "audio_message" => Some(MediaType::Voice),
            "doc" => Some(MediaType::Document),
            _ => None,
        })
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Maps one `wall.getComments` item, using the page's profiles and groups
/// for author details.
pub fn comment_to_raw(owner: &Owner, post: &Post, comment: &WallComment, page: &CommentPage) -> RawComment {
    let (author_name, author_id, author_username) = if comment.from_id > 0 {
        let profile = page.profiles.iter().find(|p| p.id == comment.from_id);
        let name = profile
            .map(|p| p.full_name())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());
        let username = profile
            .and_then(|p| p.screen_name.as_deref())
            .filter(|s| !s.is_empty())
            .map(|s| format!("@{s}"));
        (name, comment.from_id.to_string(), username)
    } else {
        let group_id = comment.from_id.abs();
        let name = page
            .groups
            .iter()
            .find(|g| g.id == group_id)
            .map(|g| g.name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Unknown Group".to_string());
        (name, group_id.to_string(), None)
    };

    let post_url = format!("https://vk.com/wall{}_{}", owner.id, post.id);
    let comment_url = format!("{}?reply={}", post_url, comment.id);

    RawComment {
        source: Some(Source::Vk),
        source_comment_id: Some(comment.id.to_string()),
        group_channel_name: Some(owner.name.clone()),
        author_name: Some(author_name),
        author_id: Some(author_id),
        author_username,
        comment_text: Some(comment.text.trim().to_string()),
        has_media: Some(!comment.attachments.is_empty()),
        media_type: media_of(comment),
        post_url: Some(post_url),
        post_published_at: timestamp(post.date),
        comment_url: Some(comment_url),
        comment_published_at: timestamp(comment.date),
    }
}

/// Alert card for VK comments, author linked to the profile.
#[derive(Debug, Clone, Copy)]
pub struct VkFormatter {
    pub utc_offset_hours: i32,
}

impl CommentFormatter for VkFormatter {
    fn format_comment(&self, comment: &CanonicalComment) -> String {
        let author = match comment.author_username.as_deref() {
            Some(username) => format!(
                "<a href=\"https://vk.com/{}\">{}</a>",
                username.trim_start_matches('@'),
                escape_html(&comment.author_name)
            ),
            None => escape_html(&comment.author_name),
        };
        comment_card("🔵 <b>VK</b>", comment, &author, "Открыть комментарий", self.utc_offset_hours)
    }
}

pub struct VkMonitor {
    api: VkApi,
    config: VkConfig,
    owner: Option<Owner>,
    formatter: Arc<VkFormatter>,
}

impl VkMonitor {
    pub fn new(config: &VkConfig, utc_offset_hours: i32) -> Result<Self, FetchError> {
        Ok(Self {
            api: VkApi::new(config)?,
            config: config.clone(),
            owner: None,
            formatter: Arc::new(VkFormatter { utc_offset_hours }),
        })
    }

    async fn resolve_owner(&self) -> Result<Owner, FetchError> {
        let (id, kind) = match parse_owner(&self.config.group_id) {
            OwnerRef::Id { id, kind } => (id, kind),
            OwnerRef::ScreenName(name) => {
                let resolved = self.api.resolve_screen_name(&name).await?.ok_or_else(|| {
                    FetchError::Client(format!("Cannot resolve VK owner: {}", self.config.group_id))
                })?;
                match resolved.kind.as_str() {
                    "user" => (resolved.object_id, OwnerKind::User),
                    "group" | "page" | "event" => (-resolved.object_id, OwnerKind::Group),
                    other => {
                        return Err(FetchError::Client(format!(
                            "VK owner {} is a {}, not a user or group",
                            self.config.group_id, other
                        )))
                    }
                }
            }
        };

        let name = match kind {
            OwnerKind::User => self.api.user(id).await?.map(|u| u.full_name()),
            OwnerKind::Group => self.api.group(id).await?.map(|g| g.name),
        }
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Unknown Owner".to_string());

        Ok(Owner { id, kind, name })
    }
}

#[async_trait]
impl PlatformMonitor for VkMonitor {
    fn source(&self) -> Source {
        Source::Vk
    }

    async fn start(&mut self) -> Result<(), FetchError> {
        let owner = self.resolve_owner().await?;
        info!(
            "VK monitor: watching {:?} {} (id {}), {} posts x {} comments",
            owner.kind, owner.name, owner.id, self.config.posts_to_check, self.config.comments_per_post
        );
        self.owner = Some(owner);
        Ok(())
    }

    async fn fetch_batch(&mut self) -> FetchBatch {
        let owner = self
            .owner
            .as_ref()
            .ok_or_else(|| FetchError::Client("VK monitor used before start".into()))?;

        let posts = self
            .api
            .wall_posts(owner.id, self.config.posts_to_check)
            .await?;
        if posts.is_empty() {
            warn!("[vk] No posts on wall {}", owner.id);
        }

        let mut items = Vec::new();
        for post in &posts {
            let page = self
                .api
                .post_comments(owner.id, post.id, self.config.comments_per_post)
                .await;
            tokio::time::sleep(self.config.request_delay()).await;

            match page {
                Ok(page) => items.extend(
                    page.items
                        .iter()
                        .filter(|c| !c.deleted)
                        .map(|c| Ok(comment_to_raw(owner, post, c, &page))),
                ),
                Err(e) => {
                    warn!("[vk] Comments of post {} unavailable: {}", post.id, e);
                    items.push(Err(e));
                }
            }
        }

        Ok(items)
    }

    fn formatter(&self) -> Arc<dyn CommentFormatter> {
        self.formatter.clone()
    }
}
