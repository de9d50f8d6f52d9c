//! Platform-independent half of comment ingestion: the monitor contract and
//! the polling loop that feeds the store.

pub mod driver;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::model::{RawComment, Source};
use crate::notify::format::CommentFormatter;

pub use driver::{CycleReport, Ingestor};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("unexpected payload: {0}")]
    Parse(String),

    #[error("client error: {0}")]
    Client(String),
}

/// One fetch window. Outer error aborts the cycle, inner errors cost one item
/// (for example a single post whose comments could not be read).
pub type FetchBatch = Result<Vec<Result<RawComment, FetchError>>, FetchError>;

/// What a platform has to provide so the shared loop can poll it.
#[async_trait]
pub trait PlatformMonitor: Send + Sync {
    fn source(&self) -> Source;

    /// Connects and resolves whatever the monitor needs before polling.
    async fn start(&mut self) -> Result<(), FetchError>;

    /// Reads the newest comments within the configured window.
    async fn fetch_batch(&mut self) -> FetchBatch;

    /// Alert layout for this platform's comments.
    fn formatter(&self) -> Arc<dyn CommentFormatter>;

    async fn stop(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Idle,
    Fetching,
    Normalizing,
    Persisting,
    Sleeping,
    Stopped,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Idle => "idle",
            MonitorState::Fetching => "fetching",
            MonitorState::Normalizing => "normalizing",
            MonitorState::Persisting => "persisting",
            MonitorState::Sleeping => "sleeping",
            MonitorState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
