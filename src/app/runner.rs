use anyhow::Context as _;

use crate::app::status::RunHandle;
use crate::collect::Collector;
use crate::distill::{Distillation, DistillationBackend};
use crate::incremental;
use crate::store::reviews::ReviewRepository;

/// Executes one run end to end and owns its terminal status transition.
pub struct ScrapeRunner {
    collector: Collector,
    backend: DistillationBackend,
    repository: ReviewRepository,
}

impl ScrapeRunner {
    pub fn new(
        collector: Collector,
        backend: DistillationBackend,
        repository: ReviewRepository,
    ) -> Self {
        Self {
            collector,
            backend,
            repository,
        }
    }

    pub fn repository(&self) -> &ReviewRepository {
        &self.repository
    }

    /// Collect, filter against the watermark, persist, distill. Failures end
    /// up in the status record, never in the caller.
    pub async fn run_scrape(&self, run: &RunHandle) {
        if let Err(err) = self.try_scrape(run).await {
            tracing::error!(
                subject = run.subject(),
                run_id = run.run_id(),
                ?err,
                "scrape failed"
            );
            run.fail("scrape failed", format!("{err:#}")).await;
        }
    }

    /// Rebuilds the analysis from already stored reviews without scraping.
    pub async fn run_redistill(&self, run: &RunHandle) {
        if let Err(err) = self.try_redistill(run).await {
            tracing::error!(
                subject = run.subject(),
                run_id = run.run_id(),
                ?err,
                "distillation failed"
            );
            run.fail("distillation failed", format!("{err:#}")).await;
        }
    }

    async fn try_scrape(&self, run: &RunHandle) -> anyhow::Result<()> {
        let subject = run.subject();
        let watermark = self
            .repository
            .watermark(subject)
            .await
            .context("read watermark")?;

        let collection = self
            .collector
            .collect(subject, run)
            .await
            .context("collect reviews")?;
        if collection.reveal.is_partial() {
            tracing::warn!(
                subject,
                iterations = collection.reveal.iterations,
                "review list still growing at scroll cap; collection is partial"
            );
            run.mark_partial().await;
        }

        let collected = collection.records.len();
        let fresh = incremental::filter_new(collection.records, watermark);
        tracing::info!(
            subject,
            discovered = collection.discovered,
            collected,
            fresh = fresh.len(),
            "reviews collected"
        );

        run.processing(format!("saving {} new reviews", fresh.len()))
            .await;
        self.repository
            .append_reviews(&fresh)
            .await
            .context("save reviews")?;

        // The analysis covers every stored review, not just this run's additions.
        let stored = self
            .repository
            .stored_records(subject)
            .await
            .context("load stored reviews")?;
        run.processing(format!("analyzing {} stored reviews", stored.len()))
            .await;
        let distillation = self.backend.distill(&stored).await;
        self.save_analysis(run, &distillation, true).await?;

        run.complete(format!(
            "completed: {} new reviews collected, {} analyzed",
            fresh.len(),
            stored.len()
        ))
        .await;
        tracing::info!(
            subject,
            fresh = fresh.len(),
            analyzed = stored.len(),
            "scrape completed"
        );
        Ok(())
    }

    async fn try_redistill(&self, run: &RunHandle) -> anyhow::Result<()> {
        let subject = run.subject();
        let records = self
            .repository
            .stored_records(subject)
            .await
            .context("load stored reviews")?;
        if records.is_empty() {
            anyhow::bail!("no stored reviews for {subject}");
        }

        run.set_total(
            records.len(),
            format!("analyzing {} stored reviews", records.len()),
        )
        .await;
        let distillation = self.backend.distill(&records).await;
        self.save_analysis(run, &distillation, false).await?;

        run.complete(format!("completed: {} stored reviews analyzed", records.len()))
            .await;
        tracing::info!(subject, reviews = records.len(), "distillation completed");
        Ok(())
    }

    async fn save_analysis(
        &self,
        run: &RunHandle,
        distillation: &Distillation,
        scraped: bool,
    ) -> anyhow::Result<()> {
        let summary = distillation.narrative.summary();
        if summary.is_none() {
            let shown = distillation.narrative.display_text();
            tracing::warn!(
                subject = run.subject(),
                summary = %shown,
                "analysis saved without summary"
            );
            run.summary_failed(shown).await;
        }

        self.repository
            .upsert_analysis(run.subject(), &distillation.findings, summary, scraped)
            .await
            .context("save analysis")
    }
}
