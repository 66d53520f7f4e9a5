use std::sync::Arc;

use anyhow::Context as _;

use crate::app::queue::InProcessQueue;
use crate::app::runner::ScrapeRunner;
use crate::app::status::{Begin, RunHandle, StatusTracker};
use crate::browser::BrowserLauncher;
use crate::browser::chromium::ChromiumLauncher;
use crate::collect::Collector;
use crate::config::{AppConfig, Secrets};
use crate::distill::DistillationBackend;
use crate::formats::{AnalysisResult, ScrapeStatus, StoredReview};
use crate::freshness;
use crate::store::reviews::ReviewRepository;

#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    /// The run was accepted. Background triggers carry the initial status,
    /// foreground ones the final status.
    Started(ScrapeStatus),
    /// The subject was analyzed within the cooldown window.
    NotDue,
    AlreadyRunning(ScrapeStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Scrape,
    Redistill,
}

/// Trigger and query surface shared by the HTTP app and the CLI.
pub struct ReviewService {
    tracker: Arc<StatusTracker>,
    queue: InProcessQueue,
    runner: Arc<ScrapeRunner>,
    cooldown_days: u32,
}

/// Trimmed subject key, or `None` when blank.
pub fn normalize_subject(raw: &str) -> Option<&str> {
    let subject = raw.trim();
    (!subject.is_empty()).then_some(subject)
}

impl ReviewService {
    pub fn new(
        runner: Arc<ScrapeRunner>,
        tracker: Arc<StatusTracker>,
        max_concurrency: usize,
        cooldown_days: u32,
    ) -> Self {
        Self {
            tracker,
            queue: InProcessQueue::new(max_concurrency),
            runner,
            cooldown_days,
        }
    }

    /// Wires Chrome, the configured store and the configured distillation backend.
    pub fn from_config(config: &AppConfig, secrets: &Secrets) -> anyhow::Result<Self> {
        let store = crate::store::open(&config.store, secrets).context("open document store")?;
        let repository = ReviewRepository::new(store, &config.store);
        let backend = DistillationBackend::from_config(&config.distill, secrets)
            .context("configure distillation backend")?;
        let launcher: Arc<dyn BrowserLauncher> =
            Arc::new(ChromiumLauncher::new(config.browser.clone()));
        let collector = Collector::new(launcher, config.browser.clone());

        let runner = Arc::new(ScrapeRunner::new(collector, backend, repository));
        Ok(Self::new(
            runner,
            StatusTracker::new(),
            config.server.max_concurrency,
            config.freshness.cooldown_days,
        ))
    }

    pub fn repository(&self) -> &ReviewRepository {
        self.runner.repository()
    }

    pub async fn is_due(&self, subject: &str) -> anyhow::Result<bool> {
        let subject = require_subject(subject)?;
        freshness::should_scrape(self.repository(), subject, self.cooldown_days).await
    }

    /// Starts a scrape in the background unless the subject is fresh (and
    /// `force` is off) or already running. Returns without awaiting the run.
    pub async fn trigger(&self, subject: &str, force: bool) -> anyhow::Result<TriggerOutcome> {
        self.start(subject, RunKind::Scrape, force, false).await
    }

    /// Like [`Self::trigger`] but runs to completion before returning.
    pub async fn scrape_now(&self, subject: &str, force: bool) -> anyhow::Result<TriggerOutcome> {
        self.start(subject, RunKind::Scrape, force, true).await
    }

    /// Re-runs distillation over stored reviews. Not gated by freshness.
    pub async fn redistill(&self, subject: &str, wait: bool) -> anyhow::Result<TriggerOutcome> {
        self.start(subject, RunKind::Redistill, true, wait).await
    }

    async fn start(
        &self,
        subject: &str,
        kind: RunKind,
        force: bool,
        wait: bool,
    ) -> anyhow::Result<TriggerOutcome> {
        let subject = require_subject(subject)?;

        if !force
            && !freshness::should_scrape(self.repository(), subject, self.cooldown_days)
                .await
                .context("freshness check")?
        {
            tracing::info!(subject, "scrape not due");
            return Ok(TriggerOutcome::NotDue);
        }

        let run = match self.tracker.begin(subject).await {
            Begin::Started(run) => run,
            Begin::AlreadyRunning(status) => {
                tracing::info!(subject, run_id = %status.run_id, "run already in progress");
                return Ok(TriggerOutcome::AlreadyRunning(status));
            }
        };
        tracing::info!(subject, run_id = run.run_id(), ?kind, "run accepted");

        if wait {
            execute(&self.runner, &run, kind).await;
        } else {
            let runner = Arc::clone(&self.runner);
            let background = run.clone();
            self.queue.spawn(async move {
                execute(&runner, &background, kind).await;
            });
        }

        let status = run
            .snapshot()
            .await
            .ok_or_else(|| anyhow::anyhow!("status record for {subject} disappeared"))?;
        Ok(TriggerOutcome::Started(status))
    }

    pub async fn reviews(&self, subject: &str) -> anyhow::Result<Vec<StoredReview>> {
        let subject = require_subject(subject)?;
        self.repository().list_reviews(subject).await
    }

    pub async fn analysis(&self, subject: &str) -> anyhow::Result<Option<AnalysisResult>> {
        let subject = require_subject(subject)?;
        self.repository().get_analysis(subject).await
    }

    pub async fn status(&self, subject: &str) -> Option<ScrapeStatus> {
        let subject = normalize_subject(subject)?;
        self.tracker.get(subject).await
    }
}

async fn execute(runner: &ScrapeRunner, run: &RunHandle, kind: RunKind) {
    match kind {
        RunKind::Scrape => runner.run_scrape(run).await,
        RunKind::Redistill => runner.run_redistill(run).await,
    }
}

fn require_subject(raw: &str) -> anyhow::Result<&str> {
    normalize_subject(raw).ok_or_else(|| anyhow::anyhow!("subject must not be empty"))
}
