use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One extractive answer: a span selected from the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaAnswer {
    pub answer: String,
    #[serde(default)]
    pub score: f64,
}

#[async_trait]
pub trait QaService: Send + Sync {
    async fn answer(&self, question: &str, context: &str) -> anyhow::Result<QaAnswer>;
}

/// Client for a hosted question-answering endpoint speaking the
/// `{"inputs": {"question", "context"}}` request shape.
#[derive(Debug, Clone)]
pub struct HttpQaService {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpQaService {
    pub fn new(client: reqwest::Client, endpoint: &str, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.to_owned(),
            token,
        }
    }
}

#[async_trait]
impl QaService for HttpQaService {
    async fn answer(&self, question: &str, context: &str) -> anyhow::Result<QaAnswer> {
        let body = serde_json::json!({
            "inputs": { "question": question, "context": context },
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        let raw = response.text().await.context("read QA response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("QA service error ({status}): {message}");
        }

        parse_answer(&raw)
    }
}

/// Accepts either a single answer object or a ranked array (first wins).
fn parse_answer(raw: &str) -> anyhow::Result<QaAnswer> {
    let value: serde_json::Value = serde_json::from_str(raw).context("parse QA response")?;
    let best = match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("QA response has no answers"))?,
        other => other,
    };
    serde_json::from_value(best).context("decode QA answer")
}

fn parse_error_message(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    match value.get("error")? {
        serde_json::Value::String(message) => Some(message.clone()),
        other => Some(other.get("message")?.as_str()?.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_and_ranked_array() -> anyhow::Result<()> {
        let single =
            parse_answer(r#"{"answer":"friendly staff","score":0.82,"start":3,"end":17}"#)?;
        assert_eq!(single.answer, "friendly staff");
        assert!((single.score - 0.82).abs() < f64::EPSILON);

        let ranked =
            parse_answer(r#"[{"answer":"noodles","score":0.6},{"answer":"rice","score":0.1}]"#)?;
        assert_eq!(ranked.answer, "noodles");
        Ok(())
    }

    #[test]
    fn empty_array_is_an_error() {
        assert!(parse_answer("[]").is_err());
        assert!(parse_answer("not json").is_err());
    }

    #[test]
    fn error_message_shapes() {
        assert_eq!(
            parse_error_message(r#"{"error":"model is loading"}"#).as_deref(),
            Some("model is loading")
        );
        assert_eq!(
            parse_error_message(r#"{"error":{"message":"bad token"}}"#).as_deref(),
            Some("bad token")
        );
        assert_eq!(parse_error_message("oops"), None);
    }
}
