use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{FetchError, MonitorState, PlatformMonitor};
use crate::model::normalize;
use crate::storage::CommentStore;

/// Outcome of one fetch-normalize-persist pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Drives one platform monitor on a fixed cadence.
pub struct Ingestor {
    monitor: Box<dyn PlatformMonitor>,
    store: CommentStore,
    interval: Duration,
    state: watch::Sender<MonitorState>,
}

impl Ingestor {
    pub fn new(monitor: Box<dyn PlatformMonitor>, store: CommentStore, interval: Duration) -> Self {
        let (state, _) = watch::channel(MonitorState::Idle);
        Self {
            monitor,
            store,
            interval,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: MonitorState) {
        self.state.send_replace(state);
    }

    /// Runs a single cycle. Only a batch-level fetch failure is returned;
    /// per-item failures are logged and counted.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<CycleReport, FetchError> {
        let source = self.monitor.source();
        let mut report = CycleReport::default();

        self.set_state(MonitorState::Fetching);
        let batch = self.monitor.fetch_batch().await?;

        self.set_state(MonitorState::Normalizing);
        let mut records = Vec::with_capacity(batch.len());
        for item in batch {
            let raw = match item {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("[{}] Skipping unreadable item: {}", source, e);
                    report.failed += 1;
                    continue;
                }
            };
            report.fetched += 1;
            match normalize(raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("[{}] Dropping comment: {}", source, e);
                    report.failed += 1;
                }
            }
        }

        self.set_state(MonitorState::Persisting);
        for record in &records {
            if cancel.is_cancelled() {
                debug!("[{}] Stop requested mid-cycle", source);
                break;
            }
            match self.store.insert_if_absent(record).await {
                Ok(true) => {
                    report.inserted += 1;
                    debug!(
                        "[{}] New comment {} in {}",
                        source, record.source_comment_id, record.group_channel_name
                    );
                }
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    error!(
                        "[{}] Failed to save comment {}: {}",
                        source, record.source_comment_id, e
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Polls until `cancel` fires, then stops the monitor.
    pub async fn run(mut self, cancel: CancellationToken) {
        let source = self.monitor.source();

        loop {
            // Sign-in may wait on an operator, so start races the stop request
            let started = tokio::select! {
                _ = cancel.cancelled() => None,
                result = self.monitor.start() => Some(result),
            };
            match started {
                None => {
                    self.monitor.stop().await;
                    self.set_state(MonitorState::Stopped);
                    return;
                }
                Some(Ok(())) => break,
                Some(Err(e)) => {
                    error!("[{}] Monitor failed to start: {}", source, e);
                    self.set_state(MonitorState::Sleeping);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.set_state(MonitorState::Stopped);
                            return;
                        }
                        _ = tokio::time::sleep(self.interval) => {}
                    }
                }
            }
        }
        info!("[{}] Monitor started, polling every {:?}", source, self.interval);

        while !cancel.is_cancelled() {
            match self.run_cycle(&cancel).await {
                Ok(report) if report.inserted > 0 || report.failed > 0 => info!(
                    "[{}] Cycle done: {} fetched, {} new, {} duplicates, {} failed",
                    source, report.fetched, report.inserted, report.duplicates, report.failed
                ),
                Ok(report) => debug!("[{}] Cycle done, nothing new: {:?}", source, report),
                Err(e) => error!("[{}] Cycle aborted: {}", source, e),
            }

            self.set_state(MonitorState::Sleeping);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.monitor.stop().await;
        self.set_state(MonitorState::Stopped);
        info!("[{}] Monitor stopped", source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::FetchBatch;
    use crate::config::DatabaseConfig;
    use crate::model::{CanonicalComment, RawComment, Source};
    use crate::notify::format::CommentFormatter;
    use crate::testing::{raw_comment, temp_store};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    struct TextOnly;

    impl CommentFormatter for TextOnly {
        fn format_comment(&self, comment: &CanonicalComment) -> String {
            comment.comment_text.clone()
        }
    }

    #[derive(Default)]
    struct ScriptedMonitor {
        batches: Mutex<VecDeque<FetchBatch>>,
        stopped: Arc<AtomicBool>,
        /// Start never returns, like a sign-in nobody answers
        stuck_on_start: bool,
    }

    impl ScriptedMonitor {
        fn with(batches: Vec<FetchBatch>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl PlatformMonitor for ScriptedMonitor {
        fn source(&self) -> Source {
            Source::Vk
        }

        async fn start(&mut self) -> Result<(), FetchError> {
            if self.stuck_on_start {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn fetch_batch(&mut self) -> FetchBatch {
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        fn formatter(&self) -> Arc<dyn CommentFormatter> {
            Arc::new(TextOnly)
        }

        async fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn raw(id: &str) -> RawComment {
        RawComment {
            source_comment_id: Some(id.to_string()),
            ..raw_comment()
        }
    }

    fn mixed_batch() -> FetchBatch {
        Ok(vec![
            Ok(raw("1")),
            Ok(RawComment {
                post_url: None,
                ..raw("2")
            }),
            Err(FetchError::Parse("post 7 comments".into())),
            Ok(raw("3")),
        ])
    }

    #[tokio::test]
    async fn cycle_isolates_bad_items_and_dedups() {
        let (_dir, store) = temp_store();
        let monitor = ScriptedMonitor::with(vec![mixed_batch(), mixed_batch()]);
        let mut ingestor = Ingestor::new(Box::new(monitor), store.clone(), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let first = ingestor.run_cycle(&cancel).await.unwrap();
        assert_eq!(
            first,
            CycleReport {
                fetched: 3,
                inserted: 2,
                duplicates: 0,
                failed: 2
            }
        );

        let second = ingestor.run_cycle(&cancel).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(store.get_statistics().await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn batch_failure_aborts_only_the_cycle() {
        let (_dir, store) = temp_store();
        let monitor = ScriptedMonitor::with(vec![
            Err(FetchError::Api {
                code: 5,
                message: "User authorization failed".into(),
            }),
            Ok(vec![Ok(raw("9"))]),
        ]);
        let mut ingestor = Ingestor::new(Box::new(monitor), store.clone(), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        assert!(matches!(
            ingestor.run_cycle(&cancel).await,
            Err(FetchError::Api { code: 5, .. })
        ));
        assert_eq!(store.get_statistics().await.unwrap().total, 0);

        let report = ingestor.run_cycle(&cancel).await.unwrap();
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn cancelled_cycle_persists_nothing() {
        let (_dir, store) = temp_store();
        let monitor = ScriptedMonitor::with(vec![mixed_batch()]);
        let mut ingestor = Ingestor::new(Box::new(monitor), store.clone(), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = ingestor.run_cycle(&cancel).await.unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(store.get_statistics().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn failed_insert_is_stored_on_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = CommentStore::open(&DatabaseConfig {
            path: dir.path().join("comments.db"),
            busy_timeout_ms: 50,
            max_attempts: 2,
            base_delay_ms: 10,
        })
        .unwrap();
        // Monitors hand back their whole window on every poll
        let monitor = ScriptedMonitor::with(vec![Ok(vec![Ok(raw("42"))]), Ok(vec![Ok(raw("42"))])]);
        let mut ingestor = Ingestor::new(Box::new(monitor), store.clone(), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let writer = rusqlite::Connection::open(store.path()).unwrap();
        writer.execute_batch("BEGIN IMMEDIATE").unwrap();
        let first = ingestor.run_cycle(&cancel).await.unwrap();
        assert_eq!(first.inserted, 0);
        assert_eq!(first.failed, 1);
        writer.execute_batch("COMMIT").unwrap();
        drop(writer);

        let second = ingestor.run_cycle(&cancel).await.unwrap();
        assert_eq!(second.inserted, 1);
        let stats = store.get_statistics().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.unprocessed, 1);
    }

    #[tokio::test]
    async fn cancel_interrupts_a_pending_start() {
        let (_dir, store) = temp_store();
        let monitor = ScriptedMonitor {
            stuck_on_start: true,
            ..ScriptedMonitor::default()
        };
        let stopped = monitor.stopped.clone();
        let ingestor = Ingestor::new(Box::new(monitor), store, Duration::from_secs(3600));
        let state = ingestor.subscribe();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(ingestor.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(*state.borrow(), MonitorState::Stopped);
    }

    #[tokio::test]
    async fn run_stops_monitor_on_cancel() {
        let (_dir, store) = temp_store();
        let monitor = ScriptedMonitor::with(vec![Ok(vec![Ok(raw("1"))])]);
        let stopped = monitor.stopped.clone();
        let ingestor = Ingestor::new(Box::new(monitor), store.clone(), Duration::from_secs(3600));
        let mut state = ingestor.subscribe();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(ingestor.run(cancel.clone()));
        state
            .wait_for(|s| *s == MonitorState::Sleeping)
            .await
            .unwrap();
        cancel.cancel();
        handle.await.unwrap();

        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(*state.borrow(), MonitorState::Stopped);
        assert_eq!(store.get_statistics().await.unwrap().total, 1);
    }
}
