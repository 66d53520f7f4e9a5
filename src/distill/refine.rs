use anyhow::Context as _;
use serde::Deserialize;

use crate::distill::llm::{LlmRequest, LlmService, SamplingParams};
use crate::formats::Findings;

const INSTRUCTIONS: &str = "你是一個專業的餐廳評論分析專家。請以 JSON 格式回傳分析結果。";

/// Strict response shape: all three lists must be present.
#[derive(Debug, Deserialize)]
struct RefinedLists {
    positives: Vec<String>,
    negatives: Vec<String>,
    recommendations: Vec<String>,
}

/// Asks the model to drop irrelevant, misfiled, or vague entries and merge
/// near-duplicates. Any failure returns `findings` untouched.
pub async fn refine(
    llm: &dyn LlmService,
    findings: Findings,
    sampling: SamplingParams,
) -> Findings {
    let input = match build_prompt(&findings) {
        Ok(input) => input,
        Err(err) => {
            tracing::warn!(?err, "refine prompt; keep extracted findings");
            return findings;
        }
    };
    let request = LlmRequest {
        instructions: INSTRUCTIONS.to_owned(),
        input,
        sampling,
    };

    match request_refined(llm, &request).await {
        Ok(refined) => {
            tracing::info!(
                positives = refined.positives.len(),
                negatives = refined.negatives.len(),
                recommendations = refined.recommendations.len(),
                "refinement completed"
            );
            refined
        }
        Err(err) => {
            tracing::warn!(?err, "refinement failed; keep extracted findings");
            findings
        }
    }
}

async fn request_refined(llm: &dyn LlmService, request: &LlmRequest) -> anyhow::Result<Findings> {
    let raw = llm.generate(request).await.context("refinement request")?;
    parse_refined(&raw)
}

fn build_prompt(findings: &Findings) -> anyhow::Result<String> {
    let positives = serde_json::to_string(&findings.positives)?;
    let negatives = serde_json::to_string(&findings.negatives)?;
    let recommendations = serde_json::to_string(&findings.recommendations)?;
    Ok(format!(
        r#"請以 JSON 格式回答。請仔細分析以下餐廳評論中提取出的內容，並進行二次篩選，確保內容的準確性和相關性。

原始優點列表:
{positives}

原始缺點列表:
{negatives}

原始推薦列表:
{recommendations}

請執行以下任務：
1. 移除不相關或重複的內容
2. 確保每個類別的內容確實屬於該類別
3. 整合相似的描述
4. 移除模糊不清的評價

請以 JSON 格式返回結果，格式如下：
{{
   "positives": ["優點1", "優點2", ...],
   "negatives": ["缺點1", "缺點2", ...],
   "recommendations": ["推薦1", "推薦2", ...]
}}
"#
    ))
}

fn parse_refined(raw: &str) -> anyhow::Result<Findings> {
    let json = extract_json_object(raw)?;
    let lists: RefinedLists = serde_json::from_str(json).context("parse refined findings")?;
    Ok(Findings {
        positives: lists.positives,
        negatives: lists.negatives,
        recommendations: lists.recommendations,
    })
}

/// Slices the outermost `{...}` span, tolerating code fences and chatter.
fn extract_json_object(text: &str) -> anyhow::Result<&str> {
    let start = text
        .find('{')
        .ok_or_else(|| anyhow::anyhow!("missing `{{`"))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| anyhow::anyhow!("missing `}}`"))?;
    if end <= start {
        anyhow::bail!("invalid json object span");
    }
    Ok(&text[start..=end])
}
