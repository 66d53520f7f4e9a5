use crate::distill::llm::{LlmRequest, LlmService, SamplingParams};
use crate::formats::Findings;

const INSTRUCTIONS: &str =
    "你是一位專業的餐廳評論家，請以簡潔直接的方式分析餐廳評論。避免使用「從評論可以看出」等引導語。";

/// Prefix of the diagnostic text shown in place of a narrative.
pub const FAILURE_PREFIX: &str = "GPT 總結時發生錯誤";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrativeOutcome {
    Summary(String),
    Failed(String),
}

impl NarrativeOutcome {
    /// The narrative, or a diagnostic string embedding the failure.
    pub fn display_text(&self) -> String {
        match self {
            Self::Summary(text) => text.clone(),
            Self::Failed(error) => format!("{FAILURE_PREFIX}: {error}"),
        }
    }

    pub fn summary(&self) -> Option<&str> {
        match self {
            Self::Summary(text) => Some(text),
            Self::Failed(_) => None,
        }
    }
}

pub async fn summarize(
    llm: &dyn LlmService,
    findings: &Findings,
    sampling: SamplingParams,
) -> NarrativeOutcome {
    let input = match build_prompt(findings) {
        Ok(input) => input,
        Err(err) => return NarrativeOutcome::Failed(format!("{err:#}")),
    };
    let request = LlmRequest {
        instructions: INSTRUCTIONS.to_owned(),
        input,
        sampling,
    };

    match llm.generate(&request).await {
        Ok(text) => {
            tracing::info!(chars = text.chars().count(), "summary completed");
            NarrativeOutcome::Summary(text.trim().to_owned())
        }
        Err(err) => {
            tracing::warn!(?err, "summary failed");
            NarrativeOutcome::Failed(format!("{err:#}"))
        }
    }
}

fn build_prompt(findings: &Findings) -> anyhow::Result<String> {
    let positives = serde_json::to_string(&findings.positives)?;
    let negatives = serde_json::to_string(&findings.negatives)?;
    let recommendations = serde_json::to_string(&findings.recommendations)?;
    Ok(format!(
        r#"分析以下餐廳評論的優點、缺點和推薦項目清單，並提供一個簡潔的總結。請直接給出分析結果，不要使用「從評論中可以看出」之類的引導語。評分請先單獨列出，並同時整合在內容中。

優點：
{positives}

缺點：
{negatives}

推薦必點：
{recommendations}

要求：
1. 請直接陳述分析結果
2. 保持專業客觀的語氣
3. 重點摘要餐廳的特色和服務
4. 整體評分(滿分10分)請先列出，並再自然地融入描述中
5. 最後總結這家餐廳適合什麼樣的消費者，並用一段話總結一下整體感受
"#
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LlmFn;

    fn findings() -> Findings {
        Findings {
            positives: vec!["great food".into()],
            negatives: vec!["bad service".into()],
            recommendations: Vec::new(),
        }
    }

    #[tokio::test]
    async fn summary_is_trimmed_and_prompt_carries_lists() {
        let llm = LlmFn::new(|request| {
            assert!(request.input.contains(r#"["great food"]"#));
            assert!(request.input.contains("滿分10分"));
            assert_eq!(request.sampling.max_output_tokens, Some(1024));
            Ok("  評分：7/10\n\n適合想吃家常菜的客人。\n".to_owned())
        });
        let sampling = SamplingParams {
            max_output_tokens: Some(1024),
            ..SamplingParams::with_temperature(0.7)
        };

        let outcome = summarize(&llm, &findings(), sampling).await;
        assert_eq!(
            outcome,
            NarrativeOutcome::Summary("評分：7/10\n\n適合想吃家常菜的客人。".to_owned())
        );
        assert_eq!(
            outcome.summary(),
            Some("評分：7/10\n\n適合想吃家常菜的客人。")
        );
    }

    #[tokio::test]
    async fn failure_is_reported_not_thrown() {
        let llm = LlmFn::new(|_request| anyhow::bail!("quota exceeded"));
        let outcome = summarize(&llm, &findings(), SamplingParams::with_temperature(0.7)).await;

        assert_eq!(outcome.summary(), None);
        assert_eq!(outcome.display_text(), "GPT 總結時發生錯誤: quota exceeded");
    }
}
