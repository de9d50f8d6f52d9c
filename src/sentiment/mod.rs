//! Sentiment classification and the worker that writes decisions back.

pub mod keywords;
pub mod worker;
pub mod yandex;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SentimentConfig;
use crate::model::Classification;

pub use keywords::KeywordClassifier;
pub use worker::SentimentWorker;
pub use yandex::YandexClassifier;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("classifier returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("classifier response had no text")]
    EmptyResponse,
}

/// One text in, one decision out. `Ok(None)` means the text could not be
/// classified.
#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, text: &str) -> Result<Option<Classification>, ClassifyError>;
}

/// YandexGPT when credentials are configured, the keyword heuristic otherwise.
pub fn from_config(config: &SentimentConfig) -> Result<Arc<dyn SentimentClassifier>, ClassifyError> {
    match config.yandex_credentials() {
        Some((api_key, folder_id)) => {
            info!("Sentiment: YandexGPT model {}", config.model);
            Ok(Arc::new(YandexClassifier::new(config, api_key, folder_id)?))
        }
        None => {
            warn!("Sentiment: no Yandex credentials, falling back to keyword heuristic");
            Ok(Arc::new(KeywordClassifier))
        }
    }
}
