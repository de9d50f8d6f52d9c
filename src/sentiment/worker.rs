use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::SentimentClassifier;
use crate::config::SentimentConfig;
use crate::model::{CanonicalComment, Classification, ClassifiedComment};
use crate::storage::{CommentStore, StoreError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub classified: usize,
    pub undecided: usize,
    pub write_failures: usize,
}

impl BatchReport {
    pub fn written(&self) -> usize {
        self.classified + self.undecided
    }
}

/// Totals for a full re-classification pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReclassifyReport {
    pub seen: usize,
    pub classified: usize,
    pub undecided: usize,
    pub failed: usize,
}

/// Reads unprocessed comments, classifies them and writes the decision back.
pub struct SentimentWorker {
    store: CommentStore,
    classifier: Arc<dyn SentimentClassifier>,
    events: broadcast::Sender<ClassifiedComment>,
    alerts: Option<mpsc::Sender<ClassifiedComment>>,
    batch_size: usize,
    request_delay: Duration,
    idle_interval: Duration,
}

impl SentimentWorker {
    pub fn new(
        store: CommentStore,
        classifier: Arc<dyn SentimentClassifier>,
        events: broadcast::Sender<ClassifiedComment>,
        config: &SentimentConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            events,
            alerts: None,
            batch_size: config.batch_size.max(1),
            request_delay: config.request_delay(),
            idle_interval: config.interval(),
        }
    }

    /// Queues every classified comment for the notifier task. A full queue
    /// drops the alert instead of stalling classification.
    pub fn with_alerts(mut self, alerts: mpsc::Sender<ClassifiedComment>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    async fn decide(&self, comment: &CanonicalComment) -> Option<Classification> {
        // Media-only and empty comments never reach the classifier
        if comment.is_text_blank() {
            return None;
        }

        let decision = match self.classifier.classify(&comment.comment_text).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    "{} failed on comment {:?}: {}",
                    self.classifier.name(),
                    comment.id,
                    e
                );
                None
            }
        };
        tokio::time::sleep(self.request_delay).await;
        decision
    }

    /// One pass over at most `batch_size` unprocessed comments. Only a failed
    /// fetch is returned as an error; each record is handled on its own.
    pub async fn process_batch(&self, cancel: &CancellationToken) -> Result<BatchReport, StoreError> {
        let comments = self.store.fetch_unprocessed(self.batch_size).await?;
        let mut report = BatchReport {
            fetched: comments.len(),
            ..BatchReport::default()
        };
        if comments.is_empty() {
            debug!("No unprocessed comments");
            return Ok(report);
        }

        info!("Classifying {} comments", comments.len());
        for mut comment in comments {
            if cancel.is_cancelled() {
                break;
            }
            let Some(id) = comment.id else {
                continue;
            };

            let classification = self.decide(&comment).await;
            match self.store.update_sentiment(id, classification).await {
                Ok(true) => {
                    match classification {
                        Some(c) => {
                            report.classified += 1;
                            info!("Comment {}: {} ({:.2})", id, c.sentiment, c.score);
                        }
                        None => {
                            report.undecided += 1;
                            info!("Comment {}: sentiment undefined", id);
                        }
                    }
                    comment.sentiment = classification.map(|c| c.sentiment);
                    comment.sentiment_score = classification.map(|c| c.score);
                    comment.processed = true;
                    self.publish(ClassifiedComment {
                        comment,
                        classification,
                        classified_at: Utc::now(),
                    });
                }
                Ok(false) => warn!("Comment {} disappeared before write-back", id),
                Err(e) => {
                    // Left unprocessed, the next batch picks it up again
                    error!("Failed to store sentiment for comment {}: {}", id, e);
                    report.write_failures += 1;
                }
            }
        }

        Ok(report)
    }

    fn publish(&self, event: ClassifiedComment) {
        if let Some(alerts) = &self.alerts {
            match alerts.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(dropped)) => {
                    warn!("Alert queue full, skipping alert for comment {:?}", dropped.comment.id)
                }
                Err(TrySendError::Closed(_)) => debug!("Notifier is gone, alert skipped"),
            }
        }
        if self.events.send(event).is_err() {
            debug!("No live subscribers for classified comments");
        }
    }

    /// Classifies every stored comment again in id order, `page_size` at a
    /// time. Nothing is published and no alerts are sent.
    pub async fn reclassify_all(
        &self,
        page_size: usize,
        cancel: &CancellationToken,
    ) -> Result<ReclassifyReport, StoreError> {
        let mut report = ReclassifyReport::default();
        let mut after_id = 0;

        loop {
            let page = self.store.fetch_page(after_id, page_size.max(1)).await?;
            let Some(last) = page.last().and_then(|c| c.id) else {
                break;
            };
            after_id = last;

            for comment in &page {
                if cancel.is_cancelled() {
                    return Ok(report);
                }
                let Some(id) = comment.id else {
                    continue;
                };
                report.seen += 1;

                let classification = self.decide(comment).await;
                match self.store.update_sentiment(id, classification).await {
                    Ok(_) if classification.is_some() => report.classified += 1,
                    Ok(_) => report.undecided += 1,
                    Err(e) => {
                        error!("Failed to store sentiment for comment {}: {}", id, e);
                        report.failed += 1;
                    }
                }
            }
            info!(
                "Reclassified {} comments so far (last id {})",
                report.seen, after_id
            );
        }

        Ok(report)
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Sentiment worker started with {} (batch {}, idle {:?})",
            self.classifier.name(),
            self.batch_size,
            self.idle_interval
        );

        while !cancel.is_cancelled() {
            let idle = match self.process_batch(&cancel).await {
                Ok(report) => report.written() == 0,
                Err(e) => {
                    error!("Failed to fetch unprocessed comments: {}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.idle_interval) => {}
                }
            }
        }

        info!("Sentiment worker stopped");
    }
}
