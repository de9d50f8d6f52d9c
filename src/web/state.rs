use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::config::WebConfig;
use crate::ingest::MonitorState;
use crate::model::{ClassifiedComment, Source};
use crate::storage::CommentStore;

#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone)]
pub struct AppState {
    pub store: CommentStore,
    pub tx: broadcast::Sender<ClassifiedComment>,
    pub monitors: Arc<Vec<(Source, watch::Receiver<MonitorState>)>>,
    pub credentials: Arc<Credentials>,
    pub recent_limit: usize,
    /// Offset for timestamps shown on the dashboard
    pub utc_offset_hours: i32,
}

impl AppState {
    pub fn new(store: CommentStore, tx: broadcast::Sender<ClassifiedComment>, config: &WebConfig) -> Self {
        Self {
            store,
            tx,
            monitors: Arc::new(Vec::new()),
            credentials: Arc::new(Credentials {
                username: config.username.clone(),
                password: config.password.clone(),
            }),
            recent_limit: config.recent_limit,
            utc_offset_hours: 0,
        }
    }

    pub fn with_utc_offset(mut self, hours: i32) -> Self {
        self.utc_offset_hours = hours;
        self
    }

    pub fn with_monitor(mut self, source: Source, state: watch::Receiver<MonitorState>) -> Self {
        Arc::make_mut(&mut self.monitors).push((source, state));
        self
    }

    /// Current loop state of every running monitor, keyed by source name.
    pub fn monitor_states(&self) -> BTreeMap<&'static str, MonitorState> {
        self.monitors
            .iter()
            .map(|(source, rx)| (source.as_str(), *rx.borrow()))
            .collect()
    }
}
