use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process-wide settings, built once in `main` and handed to each component.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Absent section disables the VK monitor
    pub vk: Option<VkConfig>,
    /// Absent section disables the Telegram monitor
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub sentiment: SentimentConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VkConfig {
    /// `id123`, `club123`, `-123`, a screen name or a vk.com URL
    pub group_id: String,
    #[serde(default = "default_posts_to_check")]
    pub posts_to_check: u32,
    #[serde(default = "default_comments_per_post")]
    pub comments_per_post: u32,
    #[serde(default = "default_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_vk_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_vk_api_base")]
    pub api_base: String,
    #[serde(default = "default_vk_api_version")]
    pub api_version: String,
    // Loaded from env
    #[serde(skip)]
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub channels: Vec<String>,
    #[serde(default = "default_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_posts_per_channel")]
    pub posts_per_channel: usize,
    #[serde(default = "default_replies_per_post")]
    pub replies_per_post: i32,
    // Loaded from env
    #[serde(skip)]
    pub api_id: i32,
    #[serde(skip)]
    pub api_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentimentConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_sentiment_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_yandex_model")]
    pub model: String,
    #[serde(default = "default_yandex_api_url")]
    pub api_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    // Loaded from env
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(skip)]
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub alert_chat_id: Option<String>,
    #[serde(default = "default_bot_api_base")]
    pub api_base: String,
    // Loaded from env
    #[serde(skip)]
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
    // Loaded from env
    #[serde(skip)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Offset applied to timestamps in notifications (Moscow time by default)
    #[serde(default = "default_display_utc_offset_hours")]
    pub display_utc_offset_hours: i32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("comments.db")
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_posts_to_check() -> u32 {
    10
}
fn default_comments_per_post() -> u32 {
    20
}
fn default_interval_secs() -> u64 {
    60
}
fn default_vk_request_delay_ms() -> u64 {
    400
}
fn default_vk_api_base() -> String {
    "https://api.vk.com/method/".to_string()
}
fn default_vk_api_version() -> String {
    "5.131".to_string()
}
fn default_posts_per_channel() -> usize {
    20
}
fn default_replies_per_post() -> i32 {
    50
}
fn default_batch_size() -> usize {
    10
}
fn default_sentiment_request_delay_ms() -> u64 {
    500
}
fn default_yandex_model() -> String {
    "yandexgpt-lite".to_string()
}
fn default_yandex_api_url() -> String {
    "https://llm.api.cloud.yandex.net/foundationModels/v1/completion".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_bot_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_username() -> String {
    "admin".to_string()
}
fn default_recent_limit() -> usize {
    50
}
fn default_shutdown_timeout_secs() -> u64 {
    10
}
fn default_display_utc_offset_hours() -> i32 {
    3
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            interval_secs: default_interval_secs(),
            request_delay_ms: default_sentiment_request_delay_ms(),
            model: default_yandex_model(),
            api_url: default_yandex_api_url(),
            temperature: default_temperature(),
            api_key: None,
            folder_id: None,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            alert_chat_id: None,
            api_base: default_bot_api_base(),
            bot_token: None,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            recent_limit: default_recent_limit(),
            password: String::new(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            display_utc_offset_hours: default_display_utc_offset_hours(),
        }
    }
}

impl VkConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl TelegramConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl SentimentConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// Yandex credentials, when both halves are configured.
    pub fn yandex_credentials(&self) -> Option<(&str, &str)> {
        match (self.api_key.as_deref(), self.folder_id.as_deref()) {
            (Some(key), Some(folder)) => Some((key, folder)),
            _ => None,
        }
    }
}

impl RuntimeConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::from_toml_str(&config_text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.apply_env(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Fills secrets from the environment. `env` is injected so tests never
    /// touch the real process environment.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(vk) = self.vk.as_mut() {
            vk.access_token = env("VK_ACCESS_TOKEN").unwrap_or_default();
        }

        if let Some(tg) = self.telegram.as_mut() {
            if let Some(api_id) = env("TG_API_ID") {
                tg.api_id = api_id
                    .trim()
                    .parse()
                    .context("TG_API_ID must be an integer")?;
            }
            tg.api_hash = env("TG_API_HASH").unwrap_or_default();
        }

        self.sentiment.api_key = env("YANDEX_API_KEY");
        self.sentiment.folder_id = env("YANDEX_FOLDER_ID");

        self.notify.bot_token = env("BOT_TOKEN");
        if let Some(chat_id) = env("ALERT_CHAT_ID") {
            self.notify.alert_chat_id = Some(chat_id);
        }

        self.web.password = env("API_PASSWORD").unwrap_or_default();

        Ok(())
    }

    /// Every configuration problem, so the operator can fix them in one go.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.database.max_attempts == 0 {
            errors.push("database.max_attempts must be at least 1".to_string());
        }

        if let Some(vk) = &self.vk {
            if vk.group_id.trim().is_empty() {
                errors.push("vk.group_id is required for VK monitoring".to_string());
            }
            if vk.access_token.is_empty() {
                errors.push("VK_ACCESS_TOKEN is required for VK monitoring".to_string());
            }
        }

        if let Some(tg) = &self.telegram {
            if tg.channels.iter().all(|c| c.trim().is_empty()) {
                errors.push("telegram.channels must list at least one channel".to_string());
            }
            if tg.api_id == 0 {
                errors.push("TG_API_ID is required for Telegram monitoring".to_string());
            }
            if tg.api_hash.is_empty() {
                errors.push("TG_API_HASH is required for Telegram monitoring".to_string());
            }
        }

        if self.sentiment.api_key.is_some() != self.sentiment.folder_id.is_some() {
            errors.push("YANDEX_API_KEY and YANDEX_FOLDER_ID must be set together".to_string());
        }
        if self.sentiment.batch_size == 0 {
            errors.push("sentiment.batch_size must be at least 1".to_string());
        }

        if self.notify.bot_token.is_some() && self.notify.alert_chat_id.is_none() {
            errors.push("ALERT_CHAT_ID is required when BOT_TOKEN is set".to_string());
        }

        if self.web.password.is_empty() {
            errors.push("API_PASSWORD is required for the labeling API".to_string());
        }

        errors
    }
}
