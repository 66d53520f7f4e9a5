use anyhow::Context as _;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures::StreamExt as _;
use tokio::task::JoinHandle;

use crate::browser::{BrowserLauncher, BrowserSession, NodeHandle, Selector};
use crate::config::BrowserSettings;

#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    settings: BrowserSettings,
}

impl ChromiumLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> anyhow::Result<Box<dyn BrowserSession>> {
        let config = browser_config(&self.settings)?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .context("launch headless browser")?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    tracing::debug!(%err, "browser handler event error");
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                let _ = browser.close().await;
                handler_task.abort();
                return Err(err).context("open browser page");
            }
        };

        tracing::debug!(
            width = self.settings.window_width,
            height = self.settings.window_height,
            "browser session started"
        );

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task: Some(handler_task),
            nodes: Vec::new(),
        }))
    }
}

/// The page viewport defaults to 800x600 unless set; keep it equal to the window.
fn viewport(settings: &BrowserSettings) -> Viewport {
    Viewport {
        width: settings.window_width,
        height: settings.window_height,
        ..Viewport::default()
    }
}

fn browser_config(settings: &BrowserSettings) -> anyhow::Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .window_size(settings.window_width, settings.window_height)
        .viewport(viewport(settings))
        .no_sandbox()
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage");
    if let Some(executable) = settings.chrome_executable.as_deref() {
        builder = builder.chrome_executable(executable);
    }
    builder
        .build()
        .map_err(|err| anyhow::anyhow!("build browser config: {err}"))
}

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: Option<JoinHandle<()>>,
    nodes: Vec<Element>,
}

impl ChromiumSession {
    fn node(&self, handle: NodeHandle) -> anyhow::Result<&Element> {
        self.nodes
            .get(handle.0)
            .ok_or_else(|| anyhow::anyhow!("unknown node handle: {}", handle.0))
    }

    fn register(&mut self, elements: Vec<Element>) -> Vec<NodeHandle> {
        elements
            .into_iter()
            .map(|element| {
                self.nodes.push(element);
                NodeHandle(self.nodes.len() - 1)
            })
            .collect()
    }

    async fn query(
        &self,
        scope: Option<NodeHandle>,
        selector: &Selector,
    ) -> anyhow::Result<Vec<Element>> {
        let elements = match (scope, selector) {
            (None, Selector::Id(id)) => self.page.find_elements(format!("#{id}")).await,
            (None, Selector::Css(css)) => self.page.find_elements(css.as_str()).await,
            (None, Selector::XPath(xpath)) => self.page.find_xpaths(xpath.as_str()).await,
            (Some(scope), Selector::Id(id)) => {
                self.node(scope)?.find_elements(format!("#{id}")).await
            }
            (Some(scope), Selector::Css(css)) => {
                self.node(scope)?.find_elements(css.as_str()).await
            }
            (Some(_), Selector::XPath(_)) => {
                anyhow::bail!("scoped xpath lookups are not supported: {selector}")
            }
        };
        elements.with_context(|| format!("query {selector}"))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> anyhow::Result<()> {
        self.nodes.clear();
        self.page
            .goto(url)
            .await
            .with_context(|| format!("navigate: {url}"))?;
        self.page
            .wait_for_navigation()
            .await
            .with_context(|| format!("wait for navigation: {url}"))?;
        Ok(())
    }

    async fn find(
        &mut self,
        scope: Option<NodeHandle>,
        selector: &Selector,
    ) -> anyhow::Result<Option<NodeHandle>> {
        let mut elements = self.query(scope, selector).await?;
        if elements.is_empty() {
            return Ok(None);
        }
        elements.truncate(1);
        Ok(self.register(elements).into_iter().next())
    }

    async fn find_all(
        &mut self,
        scope: Option<NodeHandle>,
        selector: &Selector,
    ) -> anyhow::Result<Vec<NodeHandle>> {
        let elements = self.query(scope, selector).await?;
        Ok(self.register(elements))
    }

    async fn click(&mut self, node: NodeHandle) -> anyhow::Result<()> {
        self.node(node)?.click().await.context("click")?;
        Ok(())
    }

    async fn send_keys(&mut self, node: NodeHandle, text: &str) -> anyhow::Result<()> {
        let element = self.node(node)?;
        element.focus().await.context("focus")?;
        element.type_str(text).await.context("type text")?;
        Ok(())
    }

    async fn press_enter(&mut self, node: NodeHandle) -> anyhow::Result<()> {
        self.node(node)?
            .press_key("Enter")
            .await
            .context("press enter")?;
        Ok(())
    }

    async fn text(&mut self, node: NodeHandle) -> anyhow::Result<String> {
        let text = self.node(node)?.inner_text().await.context("inner text")?;
        Ok(text.unwrap_or_default())
    }

    async fn attribute(&mut self, node: NodeHandle, name: &str) -> anyhow::Result<Option<String>> {
        self.node(node)?
            .attribute(name)
            .await
            .with_context(|| format!("attribute {name}"))
    }

    async fn call_function(
        &mut self,
        node: NodeHandle,
        function_declaration: &str,
    ) -> anyhow::Result<serde_json::Value> {
        let returns = self
            .node(node)?
            .call_js_fn(function_declaration, false)
            .await
            .context("call js function")?;
        Ok(returns.result.value.unwrap_or(serde_json::Value::Null))
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.nodes.clear();
        let closed = self.browser.close().await.context("close browser");
        if closed.is_ok() {
            let _ = self.browser.wait().await;
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        tracing::debug!("browser session closed");
        closed.map(|_| ())
    }
}
