//! In-process stand-ins for the browser and the hosted model services.
//!
//! Used by unit tests and the integration suite to drive the pipeline without
//! Chrome or network access.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::browser::{
    BrowserLauncher, BrowserSession, NodeHandle, SCROLL_HEIGHT_JS, SCROLL_TO_BOTTOM_JS, Selector,
    selectors,
};
use crate::distill::llm::{LlmRequest, LlmService};
use crate::distill::qa::{QaAnswer, QaService};

// =============================================================================
// Scripted browser
// =============================================================================

#[derive(Debug, Clone)]
pub struct ScriptedReview {
    reviewer: Option<String>,
    rating: Option<String>,
    comment: Option<String>,
    authored: Option<String>,
    truncated: bool,
}

impl ScriptedReview {
    pub fn new(reviewer: &str, comment: &str) -> Self {
        Self {
            reviewer: Some(reviewer.to_owned()),
            rating: Some("5 stars".to_owned()),
            comment: Some(comment.to_owned()),
            authored: None,
            truncated: false,
        }
    }

    pub fn without_reviewer(mut self) -> Self {
        self.reviewer = None;
        self
    }

    pub fn with_rating(mut self, label: &str) -> Self {
        self.rating = Some(label.to_owned());
        self
    }

    pub fn without_rating(mut self) -> Self {
        self.rating = None;
        self
    }

    pub fn without_comment(mut self) -> Self {
        self.comment = None;
        self
    }

    pub fn with_authored(mut self, text: &str) -> Self {
        self.authored = Some(text.to_owned());
        self
    }

    /// The comment renders cut short until its expand control is clicked.
    pub fn with_truncated_comment(mut self, full: &str) -> Self {
        self.comment = Some(full.to_owned());
        self.truncated = true;
        self
    }
}

#[derive(Debug)]
struct ScriptState {
    reviews: Vec<ScriptedReview>,
    growth_steps: u32,
    tab_click_failures: u32,
    has_tab: bool,
    fail_launch: bool,

    navigated: bool,
    searched: bool,
    tab_open: bool,
    height: u64,
    launches: u32,
    closed: bool,
    typed: Vec<String>,
    scrolls: u32,
    tab_clicks: u32,
    expanded: HashSet<usize>,
}

/// A fake reviews panel: search box, reviews tab, a scroll container whose
/// height grows for a fixed number of scrolls, and a list of review nodes.
#[derive(Debug, Clone)]
pub struct ScriptedBrowser {
    state: Arc<Mutex<ScriptState>>,
    gate: Option<Arc<Semaphore>>,
}

/// Holds every launch of a gated [`ScriptedBrowser`] until opened.
#[derive(Debug, Clone)]
pub struct LaunchGate {
    semaphore: Arc<Semaphore>,
}

impl LaunchGate {
    pub fn open(&self) {
        self.semaphore.close();
    }
}

impl ScriptedBrowser {
    pub fn new(reviews: Vec<ScriptedReview>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                reviews,
                growth_steps: 0,
                tab_click_failures: 0,
                has_tab: true,
                fail_launch: false,
                navigated: false,
                searched: false,
                tab_open: false,
                height: 1000,
                launches: 0,
                closed: false,
                typed: Vec::new(),
                scrolls: 0,
                tab_clicks: 0,
                expanded: HashSet::new(),
            })),
            gate: None,
        }
    }

    /// Launches block until the returned gate is opened.
    pub fn with_launch_gate(mut self) -> (Self, LaunchGate) {
        let semaphore = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&semaphore));
        (self, LaunchGate { semaphore })
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        lock(&self.state)
    }

    /// Number of scrolls that still append content.
    pub fn with_growth_steps(self, steps: u32) -> Self {
        self.lock().growth_steps = steps;
        self
    }

    pub fn with_tab_click_failures(self, failures: u32) -> Self {
        self.lock().tab_click_failures = failures;
        self
    }

    pub fn without_reviews_tab(self) -> Self {
        self.lock().has_tab = false;
        self
    }

    pub fn failing_launch(self) -> Self {
        self.lock().fail_launch = true;
        self
    }

    pub fn launches(&self) -> u32 {
        self.lock().launches
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn typed_queries(&self) -> Vec<String> {
        self.lock().typed.clone()
    }

    pub fn scroll_count(&self) -> u32 {
        self.lock().scrolls
    }

    pub fn tab_click_attempts(&self) -> u32 {
        self.lock().tab_clicks
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BrowserLauncher for ScriptedBrowser {
    async fn launch(&self) -> anyhow::Result<Box<dyn BrowserSession>> {
        if let Some(gate) = &self.gate {
            // A closed semaphore means the gate is open.
            let _ = gate.acquire().await;
        }
        let mut state = self.lock();
        if state.fail_launch {
            anyhow::bail!("chrome executable not found");
        }
        state.launches += 1;
        state.closed = false;
        Ok(Box::new(ScriptedSession {
            state: Arc::clone(&self.state),
            nodes: Vec::new(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    SearchInput,
    Tab,
    Container,
    Review(usize),
    Expand(usize),
    Reviewer(usize),
    Rating(usize),
    Comment(usize),
    Authored(usize),
}

struct ScriptedSession {
    state: Arc<Mutex<ScriptState>>,
    nodes: Vec<Node>,
}

impl ScriptedSession {
    fn node(&self, handle: NodeHandle) -> anyhow::Result<Node> {
        self.nodes
            .get(handle.0)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown node handle: {}", handle.0))
    }

    fn register(&mut self, nodes: Vec<Node>) -> Vec<NodeHandle> {
        nodes
            .into_iter()
            .map(|node| {
                self.nodes.push(node);
                NodeHandle(self.nodes.len() - 1)
            })
            .collect()
    }

    fn lookup(&self, scope: Option<NodeHandle>, selector: &Selector) -> anyhow::Result<Vec<Node>> {
        let state = lock(&self.state);
        if state.closed {
            anyhow::bail!("session closed");
        }

        let Some(scope) = scope else {
            let found = match selector {
                Selector::Id(id) if id == selectors::SEARCH_INPUT_ID && state.navigated => {
                    vec![Node::SearchInput]
                }
                Selector::XPath(xpath) if xpath == selectors::REVIEWS_CONTAINER_XPATH => {
                    if state.tab_open {
                        vec![Node::Container]
                    } else {
                        Vec::new()
                    }
                }
                Selector::XPath(xpath) if xpath.starts_with("//button") => {
                    if state.has_tab && state.searched {
                        vec![Node::Tab]
                    } else {
                        Vec::new()
                    }
                }
                Selector::Css(css) if css == selectors::REVIEW_NODE_CSS && state.tab_open => {
                    (0..state.reviews.len()).map(Node::Review).collect()
                }
                _ => Vec::new(),
            };
            return Ok(found);
        };

        let Node::Review(i) = self.node(scope)? else {
            return Ok(Vec::new());
        };
        let review = &state.reviews[i];
        let Selector::Css(css) = selector else {
            anyhow::bail!("scoped lookups must use css: {selector}");
        };
        let found = match css.as_str() {
            selectors::EXPAND_BUTTON_CSS if review.truncated && !state.expanded.contains(&i) => {
                Some(Node::Expand(i))
            }
            selectors::REVIEWER_CSS => review.reviewer.as_ref().map(|_| Node::Reviewer(i)),
            selectors::RATING_CSS => review.rating.as_ref().map(|_| Node::Rating(i)),
            selectors::COMMENT_CSS => review.comment.as_ref().map(|_| Node::Comment(i)),
            selectors::AUTHORED_CSS => review.authored.as_ref().map(|_| Node::Authored(i)),
            _ => None,
        };
        Ok(found.into_iter().collect())
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&mut self, _url: &str) -> anyhow::Result<()> {
        self.nodes.clear();
        lock(&self.state).navigated = true;
        Ok(())
    }

    async fn find(
        &mut self,
        scope: Option<NodeHandle>,
        selector: &Selector,
    ) -> anyhow::Result<Option<NodeHandle>> {
        let mut found = self.lookup(scope, selector)?;
        found.truncate(1);
        Ok(self.register(found).into_iter().next())
    }

    async fn find_all(
        &mut self,
        scope: Option<NodeHandle>,
        selector: &Selector,
    ) -> anyhow::Result<Vec<NodeHandle>> {
        let found = self.lookup(scope, selector)?;
        Ok(self.register(found))
    }

    async fn click(&mut self, node: NodeHandle) -> anyhow::Result<()> {
        let node = self.node(node)?;
        let mut state = lock(&self.state);
        match node {
            Node::Tab => {
                state.tab_clicks += 1;
                if state.tab_clicks <= state.tab_click_failures {
                    anyhow::bail!("element is not interactable");
                }
                state.tab_open = true;
            }
            Node::Expand(i) => {
                state.expanded.insert(i);
            }
            _ => {}
        }
        Ok(())
    }

    async fn send_keys(&mut self, node: NodeHandle, text: &str) -> anyhow::Result<()> {
        if self.node(node)? != Node::SearchInput {
            anyhow::bail!("element does not accept keys");
        }
        lock(&self.state).typed.push(text.to_owned());
        Ok(())
    }

    async fn press_enter(&mut self, node: NodeHandle) -> anyhow::Result<()> {
        if self.node(node)? == Node::SearchInput {
            lock(&self.state).searched = true;
        }
        Ok(())
    }

    async fn text(&mut self, node: NodeHandle) -> anyhow::Result<String> {
        let node = self.node(node)?;
        let state = lock(&self.state);
        let text = match node {
            Node::Reviewer(i) => state.reviews[i].reviewer.clone(),
            Node::Comment(i) => {
                let review = &state.reviews[i];
                review.comment.clone().map(|comment| {
                    if review.truncated && !state.expanded.contains(&i) {
                        let head = comment.chars().take(8).collect::<String>();
                        format!("{head}…")
                    } else {
                        comment
                    }
                })
            }
            Node::Authored(i) => state.reviews[i].authored.clone(),
            _ => Some(String::new()),
        };
        text.ok_or_else(|| anyhow::anyhow!("node has no text"))
    }

    async fn attribute(&mut self, node: NodeHandle, name: &str) -> anyhow::Result<Option<String>> {
        let node = self.node(node)?;
        let state = lock(&self.state);
        match node {
            Node::Rating(i) if name == selectors::RATING_ATTRIBUTE => {
                Ok(state.reviews[i].rating.clone())
            }
            _ => Ok(None),
        }
    }

    async fn call_function(
        &mut self,
        node: NodeHandle,
        function_declaration: &str,
    ) -> anyhow::Result<serde_json::Value> {
        if self.node(node)? != Node::Container {
            anyhow::bail!("scripts only run against the reviews container");
        }
        let mut state = lock(&self.state);
        match function_declaration {
            SCROLL_TO_BOTTOM_JS => {
                state.scrolls += 1;
                if state.scrolls <= state.growth_steps {
                    state.height += 400;
                }
                Ok(serde_json::Value::Null)
            }
            SCROLL_HEIGHT_JS => Ok(serde_json::json!(state.height)),
            other => anyhow::bail!("unexpected script: {other}"),
        }
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.nodes.clear();
        lock(&self.state).closed = true;
        Ok(())
    }
}

// =============================================================================
// Model service stand-ins
// =============================================================================

/// Extractive QA backed by a closure over `(question, context)`.
pub struct QaFn<F>(F);

impl<F> QaFn<F>
where
    F: Fn(&str, &str) -> anyhow::Result<QaAnswer> + Send + Sync,
{
    pub fn new(answer: F) -> Self {
        Self(answer)
    }
}

#[async_trait]
impl<F> QaService for QaFn<F>
where
    F: Fn(&str, &str) -> anyhow::Result<QaAnswer> + Send + Sync,
{
    async fn answer(&self, question: &str, context: &str) -> anyhow::Result<QaAnswer> {
        (self.0)(question, context)
    }
}

/// Generative model backed by a closure over the request.
pub struct LlmFn<F>(F);

impl<F> LlmFn<F>
where
    F: Fn(&LlmRequest) -> anyhow::Result<String> + Send + Sync,
{
    pub fn new(generate: F) -> Self {
        Self(generate)
    }
}

#[async_trait]
impl<F> LlmService for LlmFn<F>
where
    F: Fn(&LlmRequest) -> anyhow::Result<String> + Send + Sync,
{
    async fn generate(&self, request: &LlmRequest) -> anyhow::Result<String> {
        (self.0)(request)
    }
}

pub fn answer(text: &str) -> QaAnswer {
    QaAnswer {
        answer: text.to_owned(),
        score: 0.9,
    }
}
