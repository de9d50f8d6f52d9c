use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{ClassifyError, SentimentClassifier};
use crate::config::SentimentConfig;
use crate::model::{Classification, Sentiment};

/// YandexGPT completion API prompted to answer with a JSON verdict.
pub struct YandexClassifier {
    client: Client,
    api_url: String,
    api_key: String,
    folder_id: String,
    model_uri: String,
    temperature: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRequest<'a> {
    model_uri: &'a str,
    completion_options: CompletionOptions,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionOptions {
    stream: bool,
    temperature: f32,
    max_tokens: String,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    text: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    result: Option<CompletionResult>,
}

#[derive(Deserialize)]
struct CompletionResult {
    alternatives: Option<Vec<Alternative>>,
}

#[derive(Deserialize)]
struct Alternative {
    message: Option<AlternativeMessage>,
}

#[derive(Deserialize)]
struct AlternativeMessage {
    text: Option<String>,
}

#[derive(Deserialize)]
struct Verdict {
    sentiment: String,
    confidence: f64,
}

const SYSTEM_PROMPT: &str = r#"Ты анализируешь тональность комментариев из социальных сетей (VK и Telegram).

Определи тональность комментария:
- positive: одобрение, благодарность, радость, поддержка
- negative: недовольство, жалоба, оскорбление, злость, сарказм с негативом
- neutral: вопрос, констатация факта, реакция без явной оценки

confidence: число от 0.0 до 1.0, насколько ты уверен в оценке.

Ответь ТОЛЬКО JSON без пояснений:
{"sentiment": "<positive|negative|neutral>", "confidence": <0.0-1.0>}"#;

/// Pulls the verdict out of the model's reply. Code fences and surrounding
/// prose are tolerated; unknown labels and non-JSON replies give `None`.
pub fn parse_verdict(reply: &str) -> Option<Classification> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }

    let verdict: Verdict = serde_json::from_str(&reply[start..=end]).ok()?;
    let sentiment: Sentiment = verdict.sentiment.parse().ok()?;
    if verdict.confidence.is_nan() {
        return None;
    }
    Some(Classification::new(sentiment, verdict.confidence.clamp(0.0, 1.0)))
}

impl YandexClassifier {
    pub fn new(config: &SentimentConfig, api_key: &str, folder_id: &str) -> Result<Self, ClassifyError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: api_key.to_string(),
            folder_id: folder_id.to_string(),
            model_uri: format!("gpt://{}/{}/latest", folder_id, config.model),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl SentimentClassifier for YandexClassifier {
    fn name(&self) -> &'static str {
        "yandexgpt"
    }

    async fn classify(&self, text: &str) -> Result<Option<Classification>, ClassifyError> {
        let request = CompletionRequest {
            model_uri: &self.model_uri,
            completion_options: CompletionOptions {
                stream: false,
                temperature: self.temperature,
                max_tokens: "100".to_string(),
            },
            messages: vec![
                Message {
                    role: "system",
                    text: SYSTEM_PROMPT,
                },
                Message { role: "user", text },
            ],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .header("x-folder-id", &self.folder_id)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion: CompletionResponse = response.json().await?;
        let reply = completion
            .result
            .and_then(|r| r.alternatives)
            .and_then(|a| a.into_iter().next())
            .and_then(|a| a.message)
            .and_then(|m| m.text)
            .ok_or(ClassifyError::EmptyResponse)?;

        let verdict = parse_verdict(&reply);
        match verdict {
            Some(c) => debug!("YandexGPT verdict: {} ({:.2})", c.sentiment, c.score),
            None => warn!("Unusable YandexGPT reply: {}", reply),
        }
        Ok(verdict)
    }
}
