use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grammers_client::Client;
use grammers_session::storages::MemorySession;
use grammers_tl_types as tl;
use std::collections::HashMap;
use std::fmt::Display;
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::media::classify_media;
use crate::config::TelegramConfig;
use crate::ingest::{FetchBatch, FetchError, PlatformMonitor};
use crate::model::{CanonicalComment, MediaType, RawComment, Source};
use crate::notify::format::{comment_card, escape_html, CommentFormatter};

/// One discussion reply, flattened from the MTProto payload.
#[derive(Debug, Clone)]
pub struct Reply {
    pub id: i32,
    pub author_name: String,
    pub author_id: i64,
    pub username: Option<String>,
    pub text: String,
    pub has_media: bool,
    pub media_type: Option<MediaType>,
    pub date: Option<DateTime<Utc>>,
}

/// Discussion message ids are only unique within one group, so the channel
/// is part of the stored id.
pub fn reply_to_raw(channel: &str, post_id: i32, post_date: DateTime<Utc>, reply: &Reply) -> RawComment {
    let post_url = format!("https://t.me/{}/{}", channel, post_id);
    RawComment {
        source: Some(Source::Telegram),
        source_comment_id: Some(format!("{}/{}", channel, reply.id)),
        group_channel_name: Some(channel.to_string()),
        author_name: Some(reply.author_name.clone()),
        author_id: Some(reply.author_id.to_string()),
        author_username: reply.username.as_ref().map(|u| format!("@{u}")),
        comment_text: Some(reply.text.clone()),
        has_media: Some(reply.has_media),
        media_type: reply.media_type,
        comment_url: Some(format!("{}?comment={}", post_url, reply.id)),
        post_url: Some(post_url),
        post_published_at: Some(post_date),
        comment_published_at: reply.date,
    }
}

/// Alert card for Telegram discussion replies.
#[derive(Debug, Clone, Copy)]
pub struct TelegramFormatter {
    pub utc_offset_hours: i32,
}

impl CommentFormatter for TelegramFormatter {
    fn format_comment(&self, comment: &CanonicalComment) -> String {
        let author = match comment.author_username.as_deref() {
            Some(username) => format!(
                "<a href=\"https://t.me/{}\">{}</a>",
                username.trim_start_matches('@'),
                escape_html(&comment.author_name)
            ),
            None => escape_html(&comment.author_name),
        };
        comment_card("✈️ <b>TG</b>", comment, &author, "Открыть комментарий", self.utc_offset_hours)
    }
}

fn client_error(e: impl Display) -> FetchError {
    FetchError::Client(e.to_string())
}

/// Reads one answer from stdin on a plain thread. Dropping the future abandons
/// the prompt without tying up a runtime worker.
async fn prompt(question: &str) -> Result<String> {
    println!("{question}");
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let answer = std::io::stdin()
            .read_line(&mut line)
            .map(|_| line.trim().to_string());
        let _ = tx.send(answer);
    });
    Ok(rx.await??)
}

pub struct TelegramMonitor {
    config: TelegramConfig,
    /// Outlives individual connections so a reconnect keeps the sign-in
    session: Arc<MemorySession>,
    client: Option<Client>,
    runner: Option<JoinHandle<()>>,
    formatter: Arc<TelegramFormatter>,
}

impl TelegramMonitor {
    pub fn new(config: &TelegramConfig, utc_offset_hours: i32) -> Self {
        Self {
            config: config.clone(),
            session: Arc::new(MemorySession::default()),
            client: None,
            runner: None,
            formatter: Arc::new(TelegramFormatter { utc_offset_hours }),
        }
    }

    async fn interactive_login(client: &Client, api_hash: &str) -> Result<()> {
        let phone = prompt("Enter your phone number (international format, e.g. +1234567890):").await?;
        let token = client.request_login_code(&phone, api_hash).await?;
        let code = prompt("Enter the code you received:").await?;

        match client.sign_in(&token, &code).await {
            Ok(_) => {}
            Err(grammers_client::SignInError::PasswordRequired(password_token)) => {
                let password = prompt("2FA password required. Enter your password:").await?;
                client.check_password(password_token, password).await?;
            }
            Err(e) => return Err(e.into()),
        }

        info!("Successfully signed in");
        Ok(())
    }

    async fn authorize(&self, client: &Client) -> Result<(), FetchError> {
        if client.is_authorized().await.map_err(client_error)? {
            return Ok(());
        }
        if !std::io::stdin().is_terminal() {
            return Err(FetchError::Client(
                "Telegram account is not signed in and no terminal is attached to sign in from".into(),
            ));
        }

        info!("Not authorized. Starting interactive sign-in...");
        Self::interactive_login(client, &self.config.api_hash)
            .await
            .map_err(|e| FetchError::Client(format!("{e:#}")))
    }

    fn client(&self) -> Result<&Client, FetchError> {
        self.client
            .as_ref()
            .ok_or_else(|| FetchError::Client("Telegram monitor used before start".into()))
    }

    async fn poll_channel(&self, channel_name: &str) -> Result<Vec<RawComment>, FetchError> {
        let client = self.client()?.clone();

        let channel = client
            .resolve_username(channel_name)
            .await
            .map_err(client_error)?
            .ok_or_else(|| FetchError::Client(format!("Channel @{} not found", channel_name)))?;

        let peer_ref = channel
            .to_ref()
            .await
            .map_err(client_error)?
            .ok_or_else(|| FetchError::Client(format!("Cannot get peer ref for @{}", channel_name)))?;

        let mut messages = client
            .iter_messages(peer_ref.clone())
            .limit(self.config.posts_per_channel);

        let mut posts = Vec::new();
        while let Some(msg) = messages.next().await.map_err(client_error)? {
            posts.push((msg.id(), msg.date()));
        }

        let mut raw = Vec::new();
        for (post_id, post_date) in posts {
            let replies = match self.get_replies(&client, peer_ref.clone(), post_id).await {
                Ok(replies) => replies,
                Err(e) => {
                    // Posts without a discussion thread answer with MSG_ID_INVALID
                    debug!("[telegram] No replies for @{}/{}: {}", channel_name, post_id, e);
                    continue;
                }
            };

            // Every poll re-reads the whole window; the store drops what it already has
            raw.extend(
                replies
                    .iter()
                    .map(|reply| reply_to_raw(channel_name, post_id, post_date, reply)),
            );
        }

        Ok(raw)
    }

    async fn get_replies(
        &self,
        client: &Client,
        peer_ref: grammers_session::types::PeerRef,
        post_id: i32,
    ) -> Result<Vec<Reply>, FetchError> {
        let input_peer: tl::enums::InputPeer = peer_ref.into();

        let request = tl::functions::messages::GetReplies {
            peer: input_peer,
            msg_id: post_id,
            offset_id: 0,
            offset_date: 0,
            add_offset: 0,
            limit: self.config.replies_per_post,
            max_id: 0,
            min_id: 0,
            hash: 0,
        };

        let response = client.invoke(&request).await.map_err(client_error)?;

        let replies = match response {
            tl::enums::messages::Messages::Messages(msgs) => {
                extract_replies(&msgs.messages, &msgs.users, &msgs.chats)
            }
            tl::enums::messages::Messages::Slice(msgs) => {
                extract_replies(&msgs.messages, &msgs.users, &msgs.chats)
            }
            tl::enums::messages::Messages::ChannelMessages(msgs) => {
                extract_replies(&msgs.messages, &msgs.users, &msgs.chats)
            }
            _ => Vec::new(),
        };

        Ok(replies)
    }
}

struct AuthorInfo {
    name: String,
    username: Option<String>,
}

fn extract_replies(
    messages: &[tl::enums::Message],
    users: &[tl::enums::User],
    chats: &[tl::enums::Chat],
) -> Vec<Reply> {
    let user_map: HashMap<i64, AuthorInfo> = users
        .iter()
        .filter_map(|u| match u {
            tl::enums::User::User(user) => {
                let name = [user.first_name.as_deref(), user.last_name.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                let name = if name.trim().is_empty() {
                    "Unknown".to_string()
                } else {
                    name
                };
                Some((
                    user.id,
                    AuthorInfo {
                        name,
                        username: user.username.clone(),
                    },
                ))
            }
            _ => None,
        })
        .collect();

    // Comments posted on behalf of a channel
    let channel_map: HashMap<i64, AuthorInfo> = chats
        .iter()
        .filter_map(|c| match c {
            tl::enums::Chat::Channel(channel) => Some((
                channel.id,
                AuthorInfo {
                    name: channel.title.clone(),
                    username: channel.username.clone(),
                },
            )),
            _ => None,
        })
        .collect();

    let mut replies = Vec::new();
    for msg in messages {
        // Service messages are a separate variant and never reach here
        let tl::enums::Message::Message(m) = msg else {
            continue;
        };

        let (has_media, media_type) = classify_media(m.media.as_ref());
        if m.message.trim().is_empty() && !has_media {
            continue;
        }

        let (author_id, info) = match &m.from_id {
            Some(tl::enums::Peer::User(u)) => (u.user_id, user_map.get(&u.user_id)),
            Some(tl::enums::Peer::Channel(c)) => (c.channel_id, channel_map.get(&c.channel_id)),
            _ => (0, None),
        };

        replies.push(Reply {
            id: m.id,
            author_name: info
                .map(|i| i.name.clone())
                .unwrap_or_else(|| "Anonymous".to_string()),
            author_id,
            username: info.and_then(|i| i.username.clone()),
            text: m.message.clone(),
            has_media,
            media_type,
            date: DateTime::from_timestamp(m.date as i64, 0),
        });
    }

    replies
}

#[async_trait]
impl PlatformMonitor for TelegramMonitor {
    fn source(&self) -> Source {
        Source::Telegram
    }

    async fn start(&mut self) -> Result<(), FetchError> {
        if self.client.is_some() {
            return Ok(());
        }

        let pool = grammers_client::sender::SenderPool::new(self.session.clone(), self.config.api_id);
        let client = Client::new(pool.handle);

        // Run the sender pool in background; stop() aborts it if start is cancelled
        let runner = pool.runner;
        self.runner = Some(tokio::spawn(async move {
            runner.run().await;
        }));

        if let Err(e) = self.authorize(&client).await {
            if let Some(runner) = self.runner.take() {
                runner.abort();
            }
            return Err(e);
        }

        info!(
            "Telegram client connected and authorized, watching {:?}",
            self.config.channels
        );
        self.client = Some(client);
        Ok(())
    }

    async fn fetch_batch(&mut self) -> FetchBatch {
        self.client()?;

        let mut items = Vec::new();
        for channel_name in self.config.channels.clone() {
            match self.poll_channel(&channel_name).await {
                Ok(raw) => items.extend(raw.into_iter().map(Ok)),
                Err(e) => {
                    warn!("[telegram] Error polling channel @{}: {}", channel_name, e);
                    items.push(Err(e));
                }
            }
        }
        Ok(items)
    }

    fn formatter(&self) -> Arc<dyn CommentFormatter> {
        self.formatter.clone()
    }

    async fn stop(&mut self) {
        self.client = None;
        if let Some(runner) = self.runner.take() {
            runner.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::normalize;
    use chrono::TimeZone;

    fn reply(id: i32, text: &str) -> Reply {
        Reply {
            id,
            author_name: "Мария".into(),
            author_id: 1001,
            username: Some("maria".into()),
            text: text.into(),
            has_media: false,
            media_type: None,
            date: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap()),
        }
    }

    #[test]
    fn reply_maps_to_canonical_record() {
        let post_date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let record = normalize(reply_to_raw("news", 77, post_date, &reply(901, "Спасибо"))).unwrap();

        assert_eq!(record.source, Source::Telegram);
        assert_eq!(record.source_comment_id, "news/901");
        assert_eq!(record.group_channel_name, "news");
        assert_eq!(record.author_id, "1001");
        assert_eq!(record.author_username.as_deref(), Some("@maria"));
        assert_eq!(record.post_url, "https://t.me/news/77");
        assert_eq!(record.comment_url, "https://t.me/news/77?comment=901");
        assert_eq!(record.post_published_at, post_date);
    }

    #[test]
    fn same_reply_id_in_two_channels_stays_distinct() {
        let post_date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let a = reply_to_raw("news", 1, post_date, &reply(5, "a"));
        let b = reply_to_raw("sport", 1, post_date, &reply(5, "b"));
        assert_ne!(a.source_comment_id, b.source_comment_id);
    }

    #[test]
    fn media_only_reply_is_kept() {
        let post_date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut r = reply(3, "");
        r.has_media = true;
        r.media_type = Some(MediaType::Sticker);
        let record = normalize(reply_to_raw("news", 1, post_date, &r)).unwrap();
        assert!(record.has_media);
        assert_eq!(record.comment_text, "");
        assert_eq!(record.media_type, Some(MediaType::Sticker));
    }

    #[test]
    fn notification_uses_tg_badge() {
        let post_date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let record = normalize(reply_to_raw("news", 77, post_date, &reply(901, "a < b"))).unwrap();
        let html = TelegramFormatter { utc_offset_hours: 3 }.format_comment(&record);

        assert!(html.starts_with("✈️ <b>TG</b> | news"));
        assert!(html.contains("<a href=\"https://t.me/maria\">Мария</a>"));
        assert!(html.contains("<blockquote>a &lt; b</blockquote>"));
        assert!(html.contains("https://t.me/news/77?comment=901"));
    }
}
