//! Telegram Bot API alerts for classified comments.

pub mod format;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::model::{ClassifiedComment, Source};
use format::{comment_card, escape_html, CommentFormatter};

const MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("alert not delivered after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct BotErrorBody {
    parameters: Option<ResponseParameters>,
}

#[derive(Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

pub struct Notifier {
    client: Client,
    url: String,
    chat_id: String,
    utc_offset_hours: i32,
    retry_delay: Duration,
    formatters: HashMap<Source, Arc<dyn CommentFormatter>>,
}

impl Notifier {
    pub fn new(
        api_base: &str,
        bot_token: &str,
        chat_id: &str,
        utc_offset_hours: i32,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), bot_token),
            chat_id: chat_id.to_string(),
            utc_offset_hours,
            retry_delay: Duration::from_secs(2),
            formatters: HashMap::new(),
        })
    }

    /// Pause between attempts after a network or HTTP failure.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Uses `formatter` for comments from `source`.
    pub fn with_formatter(mut self, source: Source, formatter: Arc<dyn CommentFormatter>) -> Self {
        self.formatters.insert(source, formatter);
        self
    }

    /// Alert body: the platform's comment card followed by the sentiment.
    /// Sources without a running monitor get a plain card.
    pub fn render(&self, event: &ClassifiedComment) -> String {
        let comment = &event.comment;
        let card = match self.formatters.get(&comment.source) {
            Some(formatter) => formatter.format_comment(comment),
            None => comment_card(
                &format!("<b>{}</b>", comment.source.label()),
                comment,
                &escape_html(&comment.author_name),
                "Открыть комментарий",
                self.utc_offset_hours,
            ),
        };
        format!("{}\n\n{}", card, format::sentiment_line(event.classification))
    }

    /// Delivers queued alerts one at a time until `cancel` fires or every
    /// sender is gone. An alert still in flight at cancellation is dropped.
    pub async fn run(self, mut alerts: mpsc::Receiver<ClassifiedComment>, cancel: CancellationToken) {
        info!("Notifier started");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = alerts.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Alert for comment {:?} dropped on shutdown", event.comment.id);
                    break;
                }
                result = self.notify(&event) => {
                    if let Err(e) = result {
                        error!("Alert for comment {:?} failed: {}", event.comment.id, e);
                    }
                }
            }
        }

        info!("Notifier stopped");
    }

    pub async fn notify(&self, event: &ClassifiedComment) -> Result<(), NotifyError> {
        self.send(&self.render(event)).await
    }

    /// `sendMessage` with HTML parse mode. A 429 waits for `retry_after`,
    /// other failures wait `retry_delay`.
    pub async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: false,
        };

        let mut last = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.client.post(&self.url).json(&body).send().await {
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = response
                        .json::<BotErrorBody>()
                        .await
                        .ok()
                        .and_then(|b| b.parameters)
                        .and_then(|p| p.retry_after)
                        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                    warn!("Bot API rate limit hit, waiting {}s", retry_after);
                    last = "rate limited".to_string();
                    tokio::time::sleep(Duration::from_secs(retry_after)).await;
                    continue;
                }
                Ok(response) if response.status().is_success() => {
                    debug!("Alert delivered");
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    last = format!("Bot API returned {}: {}", status, text);
                }
                Err(e) => last = e.to_string(),
            }

            warn!(
                "Failed to send alert (attempt {}/{}): {}",
                attempt, MAX_ATTEMPTS, last
            );
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(NotifyError::Exhausted {
            attempts: MAX_ATTEMPTS,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Classification, Sentiment};
    use crate::testing::comment;
    use crate::vk::VkFormatter;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Serves a fake Bot API that answers with `reply(call_number)`.
    async fn fake_bot<F>(reply: F) -> (String, Arc<AtomicU32>)
    where
        F: Fn(u32) -> (AxumStatus, serde_json::Value) + Clone + Send + Sync + 'static,
    {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/bottoken/sendMessage",
            post(move |Json(_body): Json<serde_json::Value>| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let (status, body) = reply(n);
                async move { (status, Json(body)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), calls)
    }

    #[tokio::test]
    async fn rate_limit_is_retried_after_wait() {
        let (base, calls) = fake_bot(|n| {
            if n == 1 {
                (
                    AxumStatus::TOO_MANY_REQUESTS,
                    serde_json::json!({"ok": false, "parameters": {"retry_after": 0}}),
                )
            } else {
                (AxumStatus::OK, serde_json::json!({"ok": true}))
            }
        })
        .await;
        let notifier = Notifier::new(&base, "token", "-100", 3).unwrap();

        notifier.send("hello").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_three_failures() {
        let (base, calls) = fake_bot(|_| {
            (
                AxumStatus::BAD_GATEWAY,
                serde_json::json!({"ok": false}),
            )
        })
        .await;
        let notifier = Notifier::new(&base, "token", "-100", 3)
            .unwrap()
            .with_retry_delay(Duration::ZERO);

        let err = notifier.send("hello").await.unwrap_err();
        assert!(matches!(err, NotifyError::Exhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    fn negative(source: Source) -> ClassifiedComment {
        ClassifiedComment {
            comment: comment(source, "555", "Ужасно"),
            classification: Some(Classification::new(Sentiment::Negative, 0.9)),
            classified_at: Utc::now(),
        }
    }

    #[test]
    fn render_uses_registered_formatter() {
        let notifier = Notifier::new("http://localhost", "token", "-100", 3)
            .unwrap()
            .with_formatter(Source::Vk, Arc::new(VkFormatter { utc_offset_hours: 3 }));

        let text = notifier.render(&negative(Source::Vk));
        assert!(text.starts_with("🔵 <b>VK</b>"));
        assert!(text.ends_with("🔴 Тональность: <b>Негатив</b> (90%)"));
    }

    #[test]
    fn unregistered_source_gets_plain_card() {
        let notifier = Notifier::new("http://localhost", "token", "-100", 3)
            .unwrap()
            .with_formatter(Source::Vk, Arc::new(VkFormatter { utc_offset_hours: 3 }));

        let text = notifier.render(&negative(Source::Telegram));
        assert!(text.starts_with("<b>TG</b> | Test group"));
        assert!(text.contains("<blockquote>Ужасно</blockquote>"));
    }

    #[tokio::test]
    async fn run_delivers_queued_alerts() {
        let (base, calls) = fake_bot(|_| (AxumStatus::OK, serde_json::json!({"ok": true}))).await;
        let notifier = Notifier::new(&base, "token", "-100", 3).unwrap();
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        tx.send(negative(Source::Vk)).await.unwrap();
        tx.send(negative(Source::Telegram)).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), notifier.run(rx, cancel))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_interrupts_rate_limit_wait() {
        let (base, calls) = fake_bot(|_| {
            (
                AxumStatus::TOO_MANY_REQUESTS,
                serde_json::json!({"ok": false, "parameters": {"retry_after": 3600}}),
            )
        })
        .await;
        let notifier = Notifier::new(&base, "token", "-100", 3).unwrap();
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        tx.send(negative(Source::Vk)).await.unwrap();

        let handle = tokio::spawn(notifier.run(rx, cancel.clone()));
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
