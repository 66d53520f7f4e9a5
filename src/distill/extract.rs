use std::collections::HashSet;

use crate::distill::qa::QaService;
use crate::formats::{Findings, ReviewRecord};

pub const POSITIVES_QUESTION: &str =
    "根據這段評論,這家餐廳實際表現好的地方有哪些?請列出具體的優點。若無則回答「無優點」";
pub const NEGATIVES_QUESTION: &str =
    "根據這段評論,這家餐廳實際表現不好的地方有哪些?請列出具體的缺點。若無則回答「無缺點」";
pub const RECOMMENDATIONS_QUESTION: &str =
    "根據這段評論,有哪些值得一試的餐點或特色菜?請列出具體菜名。若無則回答「無推薦」";

pub const NO_POSITIVES: &str = "無優點";
pub const NO_NEGATIVES: &str = "無缺點";
pub const NO_RECOMMENDATIONS: &str = "無推薦";

const PROGRESS_EVERY: usize = 10;

/// Ordered, exact-string deduplicated answers for one category.
#[derive(Debug, Default)]
struct Category {
    sentinel: &'static str,
    items: Vec<String>,
    seen: HashSet<String>,
}

impl Category {
    fn new(sentinel: &'static str) -> Self {
        Self {
            sentinel,
            ..Self::default()
        }
    }

    fn accept(&mut self, answer: String) {
        if answer.is_empty() || answer == self.sentinel || self.seen.contains(&answer) {
            return;
        }
        self.seen.insert(answer.clone());
        self.items.push(answer);
    }
}

/// Runs the question triplet against every non-empty comment. A record whose
/// queries fail contributes nothing to any category.
pub async fn extract(qa: &dyn QaService, records: &[ReviewRecord]) -> Findings {
    let mut positives = Category::new(NO_POSITIVES);
    let mut negatives = Category::new(NO_NEGATIVES);
    let mut recommendations = Category::new(NO_RECOMMENDATIONS);

    let total = records.len();
    for (offset, record) in records.iter().enumerate() {
        let position = offset + 1;
        let context = record.comment.as_str();
        if context.is_empty() {
            continue;
        }

        match ask_triplet(qa, context).await {
            Ok((good, bad, dishes)) => {
                positives.accept(good);
                negatives.accept(bad);
                recommendations.accept(dishes);
            }
            Err(err) => {
                tracing::warn!(index = record.index, ?err, "QA failed; skip review");
                continue;
            }
        }

        if position % PROGRESS_EVERY == 0 {
            tracing::info!(processed = position, total, "QA progress");
        }
    }

    Findings {
        positives: positives.items,
        negatives: negatives.items,
        recommendations: recommendations.items,
    }
}

async fn ask_triplet(
    qa: &dyn QaService,
    context: &str,
) -> anyhow::Result<(String, String, String)> {
    let good = qa.answer(POSITIVES_QUESTION, context).await?;
    let bad = qa.answer(NEGATIVES_QUESTION, context).await?;
    let dishes = qa.answer(RECOMMENDATIONS_QUESTION, context).await?;
    Ok((good.answer, bad.answer, dishes.answer))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::formats::NO_RATING;
    use crate::testing::{QaFn, answer};

    fn record(index: usize, comment: &str) -> ReviewRecord {
        ReviewRecord {
            index,
            reviewer: format!("user {index}"),
            rating: NO_RATING.to_owned(),
            comment: comment.to_owned(),
            subject: "Example Bistro".to_owned(),
            authored_text: None,
            authored_at: None,
        }
    }

    /// Answers by keyword, falling back to each category's sentinel.
    fn keyword_qa() -> impl QaService {
        QaFn::new(|question, context| {
            let text = match question {
                POSITIVES_QUESTION if context.contains("great") => "great food",
                POSITIVES_QUESTION => NO_POSITIVES,
                NEGATIVES_QUESTION if context.contains("bad") => "bad service",
                NEGATIVES_QUESTION => NO_NEGATIVES,
                _ if context.contains("noodles") => "beef noodles",
                _ => NO_RECOMMENDATIONS,
            };
            Ok(answer(text))
        })
    }

    #[tokio::test]
    async fn sentinels_and_duplicates_are_dropped() {
        let records = vec![
            record(1, "great food"),
            record(2, "bad service"),
            record(3, "great food again, try the noodles"),
            record(4, "bad service and great food"),
        ];

        let findings = extract(&keyword_qa(), &records).await;

        assert_eq!(findings.positives, vec!["great food"]);
        assert_eq!(findings.negatives, vec!["bad service"]);
        assert_eq!(findings.recommendations, vec!["beef noodles"]);
    }

    #[tokio::test]
    async fn empty_comments_are_never_queried() {
        let contexts = Mutex::new(Vec::new());
        let qa = QaFn::new(|_question, context| {
            contexts.lock().unwrap().push(context.to_owned());
            Ok(answer(context))
        });

        let records = vec![
            record(1, "great food"),
            record(2, "bad service"),
            record(3, ""),
        ];
        let findings = extract(&qa, &records).await;
        drop(qa);

        let contexts = contexts.into_inner().unwrap();
        assert_eq!(contexts.len(), 6);
        assert!(contexts.iter().all(|c| !c.is_empty()));
        assert_eq!(findings.positives, vec!["great food", "bad service"]);
    }

    #[tokio::test]
    async fn failing_record_contributes_nothing() {
        let qa = QaFn::new(|question, context| {
            if context == "flaky" && question == RECOMMENDATIONS_QUESTION {
                anyhow::bail!("service unavailable");
            }
            Ok(answer(&format!("{context}!")))
        });

        let records = vec![record(1, "flaky"), record(2, "solid")];
        let findings = extract(&qa, &records).await;

        assert_eq!(findings.positives, vec!["solid!"]);
        assert_eq!(findings.negatives, vec!["solid!"]);
        assert_eq!(findings.recommendations, vec!["solid!"]);
    }

    #[tokio::test]
    async fn empty_answers_are_ignored() {
        let qa = QaFn::new(|_question, _context| Ok(answer("")));
        let findings = extract(&qa, &[record(1, "fine")]).await;
        assert!(findings.is_empty());
    }
}
