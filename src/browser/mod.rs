//! Browser automation boundary used by the collector.
//!
//! A session hands out opaque [`NodeHandle`]s; the collector never sees the
//! underlying driver types, which keeps it testable against a scripted DOM.

pub mod chromium;

use async_trait::async_trait;

/// How an element is located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Id(String),
    Css(String),
    XPath(String),
}

impl Selector {
    pub fn id(id: &str) -> Self {
        Self::Id(id.to_owned())
    }

    pub fn css(css: &str) -> Self {
        Self::Css(css.to_owned())
    }

    pub fn xpath(xpath: &str) -> Self {
        Self::XPath(xpath.to_owned())
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Css(css) => write!(f, "css:{css}"),
            Self::XPath(xpath) => write!(f, "xpath:{xpath}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub usize);

/// Scroll an element to its current bottom.
pub const SCROLL_TO_BOTTOM_JS: &str = "function() { this.scrollTop = this.scrollHeight; }";
/// Measure an element's content height.
pub const SCROLL_HEIGHT_JS: &str = "function() { return this.scrollHeight; }";

#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> anyhow::Result<()>;

    /// First match under `scope` (or the document), `None` when absent.
    async fn find(
        &mut self,
        scope: Option<NodeHandle>,
        selector: &Selector,
    ) -> anyhow::Result<Option<NodeHandle>>;

    async fn find_all(
        &mut self,
        scope: Option<NodeHandle>,
        selector: &Selector,
    ) -> anyhow::Result<Vec<NodeHandle>>;

    async fn click(&mut self, node: NodeHandle) -> anyhow::Result<()>;

    async fn send_keys(&mut self, node: NodeHandle, text: &str) -> anyhow::Result<()>;

    async fn press_enter(&mut self, node: NodeHandle) -> anyhow::Result<()>;

    async fn text(&mut self, node: NodeHandle) -> anyhow::Result<String>;

    async fn attribute(&mut self, node: NodeHandle, name: &str) -> anyhow::Result<Option<String>>;

    /// Calls `function_declaration` with `this` bound to `node`.
    async fn call_function(
        &mut self,
        node: NodeHandle,
        function_declaration: &str,
    ) -> anyhow::Result<serde_json::Value>;

    /// Tears the session down. Called exactly once on every exit path.
    async fn close(&mut self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> anyhow::Result<Box<dyn BrowserSession>>;
}

/// Structural selectors for the map application's reviews panel.
pub mod selectors {
    pub const SEARCH_INPUT_ID: &str = "searchboxinput";
    pub const REVIEWS_CONTAINER_XPATH: &str =
        r#"//*[@id="QA0Szd"]/div/div/div[1]/div[2]/div/div[1]/div/div/div[2]"#;
    pub const REVIEW_NODE_CSS: &str = "div.jftiEf.fontBodyMedium";
    pub const EXPAND_BUTTON_CSS: &str = "button.w8nwRe.kyuRq";
    pub const REVIEWER_CSS: &str = "div.d4r55";
    pub const RATING_CSS: &str = "span.kvMYJc";
    pub const RATING_ATTRIBUTE: &str = "aria-label";
    pub const COMMENT_CSS: &str = "span.wiI7pd";
    pub const AUTHORED_CSS: &str = "span.rsqaWe";

    pub fn reviews_tab_xpath(label: &str) -> String {
        format!("//button[.//div[text()='{label}']]")
    }
}
