use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::formats::{ScrapeState, ScrapeStatus};

/// In-memory progress records keyed by subject, shared between request
/// handlers and workers. Process lifetime only.
#[derive(Debug, Default)]
pub struct StatusTracker {
    records: RwLock<HashMap<String, ScrapeStatus>>,
}

#[derive(Debug)]
pub enum Begin {
    Started(RunHandle),
    AlreadyRunning(ScrapeStatus),
}

impl StatusTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts a run for `subject` unless one is still in flight.
    pub async fn begin(self: &Arc<Self>, subject: &str) -> Begin {
        let mut records = self.records.write().await;
        if let Some(current) = records.get(subject)
            && !current.status.is_terminal()
        {
            return Begin::AlreadyRunning(current.clone());
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        records.insert(
            subject.to_owned(),
            ScrapeStatus {
                subject: subject.to_owned(),
                run_id: run_id.clone(),
                status: ScrapeState::Initializing,
                message: "initializing".to_owned(),
                total_reviews: 0,
                processed_reviews: 0,
                partial: false,
                error: None,
                summary_error: None,
                started_at: Utc::now(),
                finished_at: None,
            },
        );

        Begin::Started(RunHandle {
            tracker: Arc::clone(self),
            subject: subject.to_owned(),
            run_id,
        })
    }

    pub async fn get(&self, subject: &str) -> Option<ScrapeStatus> {
        self.records.read().await.get(subject).cloned()
    }

    async fn apply(&self, subject: &str, run_id: &str, f: impl FnOnce(&mut ScrapeStatus)) -> bool {
        let mut records = self.records.write().await;
        let Some(status) = records.get_mut(subject) else {
            return false;
        };
        if status.run_id != run_id || status.status.is_terminal() {
            tracing::debug!(
                subject,
                run_id,
                "ignore status update for finished or stale run"
            );
            return false;
        }
        f(status);
        true
    }
}

/// Write access to one run's status record. Updates after the run reached a
/// terminal state, or after another run replaced it, are dropped.
#[derive(Debug, Clone)]
pub struct RunHandle {
    tracker: Arc<StatusTracker>,
    subject: String,
    run_id: String,
}

impl RunHandle {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn snapshot(&self) -> Option<ScrapeStatus> {
        self.tracker
            .get(&self.subject)
            .await
            .filter(|status| status.run_id == self.run_id)
    }

    pub async fn processing(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        self.tracker
            .apply(&self.subject, &self.run_id, |status| {
                status.status = ScrapeState::Processing;
                status.message = message;
            })
            .await
    }

    pub async fn set_total(&self, total: usize, message: impl Into<String>) -> bool {
        let message = message.into();
        self.tracker
            .apply(&self.subject, &self.run_id, |status| {
                status.status = ScrapeState::Processing;
                status.total_reviews = total;
                status.message = message;
            })
            .await
    }

    pub async fn set_processed(&self, processed: usize, message: impl Into<String>) -> bool {
        let message = message.into();
        self.tracker
            .apply(&self.subject, &self.run_id, |status| {
                status.processed_reviews = processed;
                status.message = message;
            })
            .await
    }

    pub async fn mark_partial(&self) -> bool {
        self.tracker
            .apply(&self.subject, &self.run_id, |status| status.partial = true)
            .await
    }

    pub async fn summary_failed(&self, error: impl Into<String>) -> bool {
        let error = error.into();
        self.tracker
            .apply(&self.subject, &self.run_id, |status| {
                status.summary_error = Some(error);
            })
            .await
    }

    pub async fn complete(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        self.tracker
            .apply(&self.subject, &self.run_id, |status| {
                status.status = ScrapeState::Completed;
                status.message = message;
                status.finished_at = Some(Utc::now());
            })
            .await
    }

    pub async fn fail(&self, message: impl Into<String>, error: impl Into<String>) -> bool {
        let message = message.into();
        let error = error.into();
        self.tracker
            .apply(&self.subject, &self.run_id, |status| {
                status.status = ScrapeState::Error;
                status.message = message;
                status.error = Some(error);
                status.finished_at = Some(Utc::now());
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start(tracker: &Arc<StatusTracker>, subject: &str) -> RunHandle {
        match tracker.begin(subject).await {
            Begin::Started(handle) => handle,
            Begin::AlreadyRunning(status) => panic!("unexpected running status: {status:?}"),
        }
    }

    #[tokio::test]
    async fn lifecycle_reaches_completed() {
        let tracker = StatusTracker::new();
        let run = start(&tracker, "Example Bistro").await;

        let status = tracker.get("Example Bistro").await.unwrap();
        assert_eq!(status.status, ScrapeState::Initializing);

        assert!(run.processing("connecting").await);
        assert!(run.set_total(12, "parsing 12 reviews").await);
        assert!(run.set_processed(3, "processed 3/12").await);
        assert!(run.complete("done").await);

        let status = tracker.get("Example Bistro").await.unwrap();
        assert_eq!(status.status, ScrapeState::Completed);
        assert_eq!(status.total_reviews, 12);
        assert_eq!(status.processed_reviews, 3);
        assert!(status.finished_at.is_some());
    }

    #[tokio::test]
    async fn terminal_state_is_sticky() {
        let tracker = StatusTracker::new();
        let run = start(&tracker, "cafe").await;
        assert!(run.fail("boom", "session crashed").await);

        assert!(!run.processing("still going").await);
        assert!(!run.complete("done").await);
        assert!(!run.set_processed(5, "late").await);

        let status = tracker.get("cafe").await.unwrap();
        assert_eq!(status.status, ScrapeState::Error);
        assert_eq!(status.error.as_deref(), Some("session crashed"));
        assert_eq!(status.processed_reviews, 0);
    }

    #[tokio::test]
    async fn second_begin_is_rejected_while_running() {
        let tracker = StatusTracker::new();
        let run = start(&tracker, "cafe").await;
        run.processing("scrolling").await;

        match tracker.begin("cafe").await {
            Begin::AlreadyRunning(status) => assert_eq!(status.run_id, run.run_id()),
            Begin::Started(_) => panic!("second run must not start"),
        }

        // Other subjects are independent.
        start(&tracker, "bakery").await;
    }

    #[tokio::test]
    async fn finished_subject_can_run_again_and_old_handle_is_stale() {
        let tracker = StatusTracker::new();
        let first = start(&tracker, "cafe").await;
        first.complete("done").await;

        let second = start(&tracker, "cafe").await;
        assert_ne!(first.run_id(), second.run_id());

        assert!(!first.fail("late failure", "stale").await);
        let status = tracker.get("cafe").await.unwrap();
        assert_eq!(status.run_id, second.run_id());
        assert_eq!(status.status, ScrapeState::Initializing);
        assert!(first.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn unknown_subject_has_no_status() {
        let tracker = StatusTracker::new();
        assert!(tracker.get("nowhere").await.is_none());
    }
}
