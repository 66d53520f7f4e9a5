use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::config::StoreSettings;
use crate::formats::{AnalysisResult, Findings, ReviewRecord, StoredReview};
use crate::store::{Document, DocumentStore, document_id};

const SUBJECT_FIELD: &str = "subject";
const COLLECTED_AT_FIELD: &str = "collected_at";
const ANALYZED_AT_FIELD: &str = "analyzed_at";
const LAST_SCRAPED_FIELD: &str = "last_scraped";

/// Reviews and analyses for subjects, over any [`DocumentStore`].
#[derive(Clone)]
pub struct ReviewRepository {
    store: Arc<dyn DocumentStore>,
    reviews_collection: String,
    analysis_collection: String,
}

impl ReviewRepository {
    pub fn new(store: Arc<dyn DocumentStore>, settings: &StoreSettings) -> Self {
        Self {
            store,
            reviews_collection: settings.reviews_collection.clone(),
            analysis_collection: settings.analysis_collection.clone(),
        }
    }

    /// Appends `records` in one batch. Each stored review gets the write time
    /// as `collected_at`.
    pub async fn append_reviews(&self, records: &[ReviewRecord]) -> anyhow::Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let documents = records
            .iter()
            .map(to_document)
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.store
            .append(&self.reviews_collection, documents, COLLECTED_AT_FIELD)
            .await
            .context("append reviews")?;
        Ok(records.len())
    }

    /// Stored reviews for `subject`, oldest batch first, DOM order within a batch.
    pub async fn list_reviews(&self, subject: &str) -> anyhow::Result<Vec<StoredReview>> {
        let documents = self
            .store
            .query_eq(&self.reviews_collection, SUBJECT_FIELD, &json!(subject))
            .await
            .with_context(|| format!("query reviews for {subject}"))?;

        let mut reviews = documents
            .into_iter()
            .map(|document| {
                serde_json::from_value::<StoredReview>(Value::Object(document))
                    .context("decode stored review")
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        reviews.sort_by(|a, b| {
            a.collected_at
                .cmp(&b.collected_at)
                .then(a.index.cmp(&b.index))
        });
        Ok(reviews)
    }

    /// Stored reviews rebuilt as pipeline input for re-distillation.
    pub async fn stored_records(&self, subject: &str) -> anyhow::Result<Vec<ReviewRecord>> {
        let reviews = self.list_reviews(subject).await?;
        Ok(reviews
            .into_iter()
            .map(|review| ReviewRecord {
                index: review.index,
                reviewer: review.reviewer,
                rating: review.rating,
                comment: review.comment,
                subject: subject.to_owned(),
                authored_text: review.authored_text,
                authored_at: review.authored_at,
            })
            .collect())
    }

    pub async fn get_analysis(&self, subject: &str) -> anyhow::Result<Option<AnalysisResult>> {
        let Some(document) = self
            .store
            .get(&self.analysis_collection, &document_id(subject))
            .await
            .with_context(|| format!("read analysis for {subject}"))?
        else {
            return Ok(None);
        };
        let analysis = serde_json::from_value(Value::Object(document)).context("decode analysis")?;
        Ok(Some(analysis))
    }

    /// Merge-upserts the analysis for `subject`. `analyzed_at` is always set to
    /// the write time; `last_scraped` only when this analysis followed a scrape.
    pub async fn upsert_analysis(
        &self,
        subject: &str,
        findings: &Findings,
        summary: Option<&str>,
        scraped: bool,
    ) -> anyhow::Result<()> {
        let mut fields = Document::new();
        fields.insert(SUBJECT_FIELD.to_owned(), json!(subject));
        fields.insert(
            "findings".to_owned(),
            serde_json::to_value(findings).context("serialize findings")?,
        );
        fields.insert("summary".to_owned(), json!(summary));

        let mut stamps = vec![ANALYZED_AT_FIELD];
        if scraped {
            stamps.push(LAST_SCRAPED_FIELD);
        }
        self.store
            .merge(
                &self.analysis_collection,
                &document_id(subject),
                fields,
                &stamps,
            )
            .await
            .with_context(|| format!("write analysis for {subject}"))
    }

    /// Time of the last scrape that produced an analysis for `subject`.
    pub async fn watermark(&self, subject: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self
            .get_analysis(subject)
            .await?
            .and_then(|analysis| analysis.last_scraped))
    }
}

fn to_document(record: &ReviewRecord) -> anyhow::Result<Document> {
    match serde_json::to_value(record).context("serialize review")? {
        Value::Object(document) => Ok(document),
        other => anyhow::bail!("review serialized to non-object: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::NO_RATING;
    use crate::store::memory::MemoryDocumentStore;

    fn repository() -> ReviewRepository {
        ReviewRepository::new(
            Arc::new(MemoryDocumentStore::new()),
            &StoreSettings::default(),
        )
    }

    fn record(subject: &str, index: usize, comment: &str) -> ReviewRecord {
        ReviewRecord {
            index,
            reviewer: format!("user {index}"),
            rating: NO_RATING.to_owned(),
            comment: comment.to_owned(),
            subject: subject.to_owned(),
            authored_text: Some("2 days ago".to_owned()),
            authored_at: None,
        }
    }

    #[tokio::test]
    async fn reviews_are_scoped_and_ordered() -> anyhow::Result<()> {
        let repo = repository();
        assert_eq!(repo.append_reviews(&[]).await?, 0);
        repo.append_reviews(&[
            record("cafe", 3, "c"),
            record("cafe", 1, "a"),
            record("bakery", 1, "x"),
        ])
        .await?;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        repo.append_reviews(&[record("cafe", 1, "later")]).await?;

        let reviews = repo.list_reviews("cafe").await?;
        let comments = reviews
            .iter()
            .map(|r| r.comment.as_str())
            .collect::<Vec<_>>();
        assert_eq!(comments, vec!["a", "c", "later"]);
        assert!(reviews.iter().all(|r| r.collected_at.is_some()));
        assert_eq!(reviews[0].authored_text.as_deref(), Some("2 days ago"));

        assert!(repo.list_reviews("nowhere").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn analysis_upsert_sets_watermark_only_after_scrape() -> anyhow::Result<()> {
        let repo = repository();
        assert!(repo.get_analysis("cafe").await?.is_none());
        assert!(repo.watermark("cafe").await?.is_none());

        let findings = Findings {
            positives: vec!["great food".into()],
            ..Findings::default()
        };
        repo.upsert_analysis("cafe", &findings, None, false).await?;
        let analysis = repo.get_analysis("cafe").await?.unwrap();
        assert_eq!(analysis.findings, findings);
        assert!(analysis.analyzed_at.is_some());
        assert!(repo.watermark("cafe").await?.is_none());

        repo.upsert_analysis("cafe", &findings, Some("評分：8/10"), true)
            .await?;
        let analysis = repo.get_analysis("cafe").await?.unwrap();
        assert_eq!(analysis.subject, "cafe");
        assert_eq!(analysis.summary.as_deref(), Some("評分：8/10"));
        assert_eq!(repo.watermark("cafe").await?, analysis.last_scraped);
        assert!(analysis.last_scraped.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn missing_summary_clears_a_stale_one() -> anyhow::Result<()> {
        let repo = repository();
        let findings = Findings::default();
        repo.upsert_analysis("cafe", &findings, Some("old"), true)
            .await?;
        repo.upsert_analysis("cafe", &findings, None, true).await?;
        assert_eq!(repo.get_analysis("cafe").await?.unwrap().summary, None);
        Ok(())
    }
}
