//! Text distillation: extractive QA per review, then LLM refinement and an
//! LLM-written narrative over the aggregated findings.

pub mod extract;
pub mod llm;
pub mod narrative;
pub mod qa;
pub mod refine;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::config::{DistillSettings, LlmEngine, Secrets};
use crate::formats::{Findings, ReviewRecord};
use llm::{GeminiService, LlmService, OpenaiService, SamplingParams};
use narrative::NarrativeOutcome;
use qa::{HttpQaService, QaService};

/// Per-stage sampling for one generative engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingProfile {
    pub refine: SamplingParams,
    pub narrative: SamplingParams,
}

impl SamplingProfile {
    pub fn openai() -> Self {
        Self {
            refine: SamplingParams::with_temperature(0.3),
            narrative: SamplingParams {
                max_output_tokens: Some(1024),
                ..SamplingParams::with_temperature(0.7)
            },
        }
    }

    pub fn gemini() -> Self {
        let params = SamplingParams {
            temperature: 0.3,
            max_output_tokens: Some(8192),
            top_p: Some(0.5),
            top_k: Some(10),
        };
        Self {
            refine: params,
            narrative: params,
        }
    }

    pub fn for_engine(engine: LlmEngine) -> Self {
        match engine {
            LlmEngine::Openai => Self::openai(),
            LlmEngine::Gemini => Self::gemini(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distillation {
    pub findings: Findings,
    pub narrative: NarrativeOutcome,
}

/// The capability pair a run distills through, selected by configuration.
#[derive(Clone)]
pub struct DistillationBackend {
    pub qa: Arc<dyn QaService>,
    pub llm: Arc<dyn LlmService>,
    pub sampling: SamplingProfile,
}

impl DistillationBackend {
    pub fn new(
        qa: Arc<dyn QaService>,
        llm: Arc<dyn LlmService>,
        sampling: SamplingProfile,
    ) -> Self {
        Self { qa, llm, sampling }
    }

    pub fn from_config(settings: &DistillSettings, secrets: &Secrets) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .context("build http client")?;

        let qa: Arc<dyn QaService> = Arc::new(HttpQaService::new(
            client.clone(),
            &settings.qa_endpoint,
            secrets.qa_token.clone(),
        ));

        let llm: Arc<dyn LlmService> = match settings.llm_engine {
            LlmEngine::Openai => {
                let api_key = secrets
                    .openai_api_key
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
                Arc::new(OpenaiService::new(
                    client,
                    &settings.openai_base_url,
                    api_key,
                    &settings.openai_model,
                ))
            }
            LlmEngine::Gemini => {
                let api_key = secrets
                    .gemini_api_key
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("GEMINI_API_KEY is not set"))?;
                Arc::new(GeminiService::new(
                    client,
                    &settings.gemini_base_url,
                    api_key,
                    &settings.gemini_model,
                ))
            }
        };

        Ok(Self::new(qa, llm, SamplingProfile::for_engine(settings.llm_engine)))
    }

    /// Extract, refine, summarize. Never fails: every stage degrades on its own.
    pub async fn distill(&self, records: &[ReviewRecord]) -> Distillation {
        tracing::info!(reviews = records.len(), "extract findings");
        let extracted = extract::extract(self.qa.as_ref(), records).await;

        tracing::info!("refine findings");
        let findings = refine::refine(self.llm.as_ref(), extracted, self.sampling.refine).await;

        tracing::info!("summarize findings");
        let narrative =
            narrative::summarize(self.llm.as_ref(), &findings, self.sampling.narrative).await;

        Distillation {
            findings,
            narrative,
        }
    }
}
