use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;

/// One request as seen by the stub.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

type Handler = dyn Fn(&Recorded) -> (u16, Value) + Send + Sync;

/// Local HTTP server answering every POST with whatever `handler` returns.
pub struct ServiceStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ServiceStub {
    pub fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> (u16, Value) + Send + Sync + 'static,
    {
        let handler: Arc<Handler> = Arc::new(handler);
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start stub server");
        let base_url = format!("http://{}", server.server_addr());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                if request.method() != &tiny_http::Method::Post {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }
                let Ok(body) = serde_json::from_str::<Value>(&body) else {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid json").with_status_code(400),
                    );
                    continue;
                };

                let recorded = Recorded {
                    path: request.url().to_string(),
                    headers: request
                        .headers()
                        .iter()
                        .map(|h| (h.field.to_string(), h.value.to_string()))
                        .collect(),
                    body,
                };
                let (status, reply) = handler(&recorded);
                seen.lock().unwrap().push(recorded);

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let response = tiny_http::Response::from_string(reply.to_string())
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for ServiceStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Hosted-QA shape: echoes the context as the answer for the positives
/// question when it mentions "great", for negatives when it mentions "bad",
/// and returns the category sentinel otherwise.
pub fn qa_reply(request: &Recorded) -> (u16, Value) {
    use reviewdigest::distill::extract;

    let question = request
        .body
        .pointer("/inputs/question")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let context = request
        .body
        .pointer("/inputs/context")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let answer = match question {
        extract::POSITIVES_QUESTION if context.contains("great") => context,
        extract::NEGATIVES_QUESTION if context.contains("bad") => context,
        extract::POSITIVES_QUESTION => extract::NO_POSITIVES,
        extract::NEGATIVES_QUESTION => extract::NO_NEGATIVES,
        _ => extract::NO_RECOMMENDATIONS,
    };
    (
        200,
        serde_json::json!([{ "answer": answer, "score": 0.9, "start": 0, "end": answer.len() }]),
    )
}

/// Text the LLM stubs produce: the refine prompt gets its lists back
/// unchanged, anything else gets `summary`.
pub fn llm_text(input: &str, summary: &str) -> String {
    if input.contains("原始優點列表") {
        serde_json::json!({
            "positives": ["great food"],
            "negatives": ["bad service"],
            "recommendations": [],
        })
        .to_string()
    } else {
        summary.to_owned()
    }
}

pub fn openai_reply(request: &Recorded, summary: &str) -> (u16, Value) {
    if request.path != "/v1/responses" {
        return (404, serde_json::json!({ "error": { "message": "not found" } }));
    }
    let input = request
        .body
        .get("input")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let text = llm_text(input, summary);
    (
        200,
        serde_json::json!({
            "id": "resp_stub",
            "object": "response",
            "output": [{
                "type": "message",
                "role": "assistant",
                "content": [{ "type": "output_text", "text": text }],
            }],
        }),
    )
}

pub fn gemini_reply(request: &Recorded, summary: &str) -> (u16, Value) {
    let input = request
        .body
        .pointer("/contents/0/parts/0/text")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let text = llm_text(input, summary);
    (
        200,
        serde_json::json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": "STOP",
            }],
        }),
    )
}
