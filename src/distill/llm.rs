use anyhow::Context as _;
use async_trait::async_trait;

/// Sampling knobs shared by the generative backends. `None` leaves the
/// provider default in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

impl SamplingParams {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            max_output_tokens: None,
            top_p: None,
            top_k: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// System-level instructions.
    pub instructions: String,
    pub input: String,
    pub sampling: SamplingParams,
}

#[async_trait]
pub trait LlmService: Send + Sync {
    async fn generate(&self, request: &LlmRequest) -> anyhow::Result<String>;
}

// =============================================================================
// OpenAI Responses API
// =============================================================================

pub fn responses_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/responses")
}

#[derive(Debug, Clone)]
pub struct OpenaiService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenaiService {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: String, model: &str) -> Self {
        Self {
            client,
            endpoint: responses_endpoint(base_url),
            api_key,
            model: model.to_owned(),
        }
    }
}

#[async_trait]
impl LlmService for OpenaiService {
    async fn generate(&self, request: &LlmRequest) -> anyhow::Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "instructions": request.instructions,
            "input": request.input,
            "text": { "format": { "type": "text" } },
            "store": false,
        });

        // NOTE: GPT-5 models reject sampling params like `temperature`.
        if !self.model.starts_with("gpt-5")
            && let Some(obj) = body.as_object_mut()
        {
            let sampling = &request.sampling;
            obj.insert(
                "temperature".to_owned(),
                serde_json::json!(sampling.temperature),
            );
            if let Some(top_p) = sampling.top_p {
                obj.insert("top_p".to_owned(), serde_json::json!(top_p));
            }
            if let Some(max) = sampling.max_output_tokens {
                obj.insert("max_output_tokens".to_owned(), serde_json::json!(max));
            }
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        let raw = response.text().await.context("read OpenAI response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("OpenAI API error ({status}): {message}");
        }

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse OpenAI response")?;
        extract_output_text(&value).context("extract output text")
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_output_text(value: &serde_json::Value) -> anyhow::Result<String> {
    let output = value
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `output` array in response"))?;

    let mut text = String::new();
    for item in output {
        if item.get("type").and_then(|v| v.as_str()) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(|v| v.as_array()) else {
            continue;
        };
        for part in content {
            if part.get("type").and_then(|v| v.as_str()) != Some("output_text") {
                continue;
            }
            if let Some(part_text) = part.get("text").and_then(|v| v.as_str()) {
                text.push_str(part_text);
            }
        }
    }

    if text.trim().is_empty() {
        anyhow::bail!("OpenAI output text is empty");
    }
    Ok(text)
}

// =============================================================================
// Gemini generateContent
// =============================================================================

#[derive(Debug, Clone)]
pub struct GeminiService {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiService {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: String, model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            model: model.to_owned(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl LlmService for GeminiService {
    async fn generate(&self, request: &LlmRequest) -> anyhow::Result<String> {
        let sampling = &request.sampling;
        let mut generation_config = serde_json::json!({
            "temperature": sampling.temperature,
        });
        if let Some(obj) = generation_config.as_object_mut() {
            if let Some(max) = sampling.max_output_tokens {
                obj.insert("maxOutputTokens".to_owned(), serde_json::json!(max));
            }
            if let Some(top_p) = sampling.top_p {
                obj.insert("topP".to_owned(), serde_json::json!(top_p));
            }
            if let Some(top_k) = sampling.top_k {
                obj.insert("topK".to_owned(), serde_json::json!(top_k));
            }
        }

        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": request.instructions }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.input }] }],
            "generationConfig": generation_config,
        });

        let endpoint = self.endpoint();
        let response = self
            .client
            .post(&endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;

        let status = response.status();
        let raw = response.text().await.context("read Gemini response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("Gemini API error ({status}): {message}");
        }

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse Gemini response")?;
        extract_candidate_text(&value).context("extract candidate text")
    }
}

fn extract_candidate_text(value: &serde_json::Value) -> anyhow::Result<String> {
    let parts = value
        .get("candidates")
        .and_then(|v| v.as_array())
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `candidates[0].content.parts` in response"))?;

    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
        .collect::<String>();
    if text.trim().is_empty() {
        anyhow::bail!("Gemini output text is empty");
    }
    Ok(text)
}
