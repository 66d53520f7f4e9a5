use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::app::status::RunHandle;
use crate::browser::{
    BrowserLauncher, BrowserSession, NodeHandle, SCROLL_HEIGHT_JS, SCROLL_TO_BOTTOM_JS, Selector,
    selectors,
};
use crate::config::BrowserSettings;
use crate::formats::{NO_RATING, ReviewRecord};

/// How the reveal loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealOutcome {
    pub iterations: u32,
    /// True when the container stopped growing before the iteration cap.
    pub stalled: bool,
}

impl RevealOutcome {
    /// The cap was hit while content was still being appended.
    pub fn is_partial(&self) -> bool {
        !self.stalled
    }
}

#[derive(Debug, Clone)]
pub struct Collection {
    pub records: Vec<ReviewRecord>,
    /// Review nodes present in the DOM after revealing, including ones that failed to parse.
    pub discovered: usize,
    pub reveal: RevealOutcome,
}

pub struct Collector {
    launcher: Arc<dyn BrowserLauncher>,
    settings: BrowserSettings,
}

impl Collector {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, settings: BrowserSettings) -> Self {
        Self { launcher, settings }
    }

    /// Drives one browser session through search, the reviews tab, the reveal
    /// loop and per-node extraction. The session is closed on every path.
    pub async fn collect(&self, subject: &str, run: &RunHandle) -> anyhow::Result<Collection> {
        let mut session = self
            .launcher
            .launch()
            .await
            .context("start browser session")?;

        let result = self
            .collect_in_session(session.as_mut(), subject, run)
            .await;

        if let Err(err) = session.close().await {
            tracing::warn!(subject, ?err, "failed to close browser session");
        }
        result
    }

    async fn collect_in_session(
        &self,
        session: &mut dyn BrowserSession,
        subject: &str,
        run: &RunHandle,
    ) -> anyhow::Result<Collection> {
        let settings = &self.settings;
        let timeout = settings.element_timeout();
        let poll = settings.poll_interval();

        run.processing("connecting to the map application").await;
        tracing::info!(subject, url = %settings.landing_url, "open landing page");
        session
            .navigate(&settings.landing_url)
            .await
            .context("open landing page")?;
        tokio::time::sleep(settings.navigation_settle()).await;

        tracing::info!(subject, "search for subject");
        let search_input = wait_for(
            session,
            &Selector::id(selectors::SEARCH_INPUT_ID),
            timeout,
            poll,
        )
        .await
        .context("locate search input")?;
        session
            .send_keys(search_input, subject)
            .await
            .context("type search query")?;
        session
            .press_enter(search_input)
            .await
            .context("submit search query")?;
        tokio::time::sleep(settings.navigation_settle()).await;

        tracing::info!(subject, "open reviews tab");
        let tab = Selector::XPath(selectors::reviews_tab_xpath(&settings.reviews_tab_label));
        wait_and_click(session, &tab, timeout, poll)
            .await
            .context("open reviews tab")?;
        tokio::time::sleep(settings.navigation_settle()).await;

        let container = wait_for(
            session,
            &Selector::xpath(selectors::REVIEWS_CONTAINER_XPATH),
            timeout,
            poll,
        )
        .await
        .context("locate reviews container")?;

        let reveal = self.reveal(session, container, run).await;
        tracing::info!(
            subject,
            iterations = reveal.iterations,
            stalled = reveal.stalled,
            "reveal loop finished"
        );

        let nodes = session
            .find_all(None, &Selector::css(selectors::REVIEW_NODE_CSS))
            .await
            .context("list review nodes")?;
        let total = nodes.len();
        run.set_total(total, format!("parsing {total} reviews"))
            .await;
        tracing::info!(subject, total, "review nodes found");

        let now = Utc::now();
        let mut records = Vec::with_capacity(total);
        for (offset, node) in nodes.into_iter().enumerate() {
            let index = offset + 1;
            match self.extract_node(session, node, subject, index, now).await {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(subject, index, ?err, "skip review node");
                }
            }
            run.set_processed(index, format!("processed {index}/{total} reviews"))
                .await;
        }

        Ok(Collection {
            records,
            discovered: total,
            reveal,
        })
    }

    /// Scrolls the virtualized container until its height stops growing or the
    /// iteration cap is reached. Script failures end the loop early.
    async fn reveal(
        &self,
        session: &mut dyn BrowserSession,
        container: NodeHandle,
        run: &RunHandle,
    ) -> RevealOutcome {
        let max = self.settings.max_scroll_iterations;
        let mut last_height = match scroll_height(session, container).await {
            Ok(height) => height,
            Err(err) => {
                tracing::warn!(?err, "measure reviews container");
                return RevealOutcome {
                    iterations: 0,
                    stalled: false,
                };
            }
        };

        for iteration in 1..=max {
            if let Err(err) = session.call_function(container, SCROLL_TO_BOTTOM_JS).await {
                tracing::warn!(iteration, ?err, "scroll reviews container");
                return RevealOutcome {
                    iterations: iteration,
                    stalled: false,
                };
            }
            run.processing(format!("loading more reviews ({iteration}/{max})"))
                .await;

            match wait_for_growth(
                session,
                container,
                last_height,
                self.settings.scroll_stall(),
                self.settings.poll_interval(),
            )
            .await
            {
                Ok(Some(height)) => last_height = height,
                Ok(None) => {
                    return RevealOutcome {
                        iterations: iteration,
                        stalled: true,
                    };
                }
                Err(err) => {
                    tracing::warn!(iteration, ?err, "measure reviews container");
                    return RevealOutcome {
                        iterations: iteration,
                        stalled: false,
                    };
                }
            }
        }

        RevealOutcome {
            iterations: max,
            stalled: false,
        }
    }

    async fn extract_node(
        &self,
        session: &mut dyn BrowserSession,
        node: NodeHandle,
        subject: &str,
        index: usize,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ReviewRecord> {
        match session
            .find(Some(node), &Selector::css(selectors::EXPAND_BUTTON_CSS))
            .await
        {
            Ok(Some(button)) => match session.click(button).await {
                Ok(()) => tokio::time::sleep(self.settings.expand_settle()).await,
                Err(err) => tracing::debug!(index, ?err, "expand review text"),
            },
            Ok(None) => {}
            Err(err) => tracing::debug!(index, ?err, "look up expand control"),
        }

        let reviewer_node = session
            .find(Some(node), &Selector::css(selectors::REVIEWER_CSS))
            .await
            .context("look up reviewer")?
            .ok_or_else(|| anyhow::anyhow!("reviewer name not found"))?;
        let reviewer = session
            .text(reviewer_node)
            .await
            .context("read reviewer")?
            .trim()
            .to_owned();

        let rating = optional_attribute(
            session,
            node,
            selectors::RATING_CSS,
            selectors::RATING_ATTRIBUTE,
        )
        .await
        .map(|label| label.trim().to_owned())
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| NO_RATING.to_owned());

        let comment = optional_text(session, node, selectors::COMMENT_CSS)
            .await
            .map(|text| text.trim().to_owned())
            .unwrap_or_default();

        let authored_text = optional_text(session, node, selectors::AUTHORED_CSS)
            .await
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty());
        let authored_at = authored_text
            .as_deref()
            .and_then(|text| crate::review_time::parse_authored(text, now));

        Ok(ReviewRecord {
            index,
            reviewer,
            rating,
            comment,
            subject: subject.to_owned(),
            authored_text,
            authored_at,
        })
    }
}

async fn optional_node(
    session: &mut dyn BrowserSession,
    node: NodeHandle,
    css: &str,
) -> Option<NodeHandle> {
    match session.find(Some(node), &Selector::css(css)).await {
        Ok(found) => found,
        Err(err) => {
            tracing::debug!(css, ?err, "optional field lookup failed");
            None
        }
    }
}

/// Text of the first `css` match under `node`; any failure yields `None`.
async fn optional_text(
    session: &mut dyn BrowserSession,
    node: NodeHandle,
    css: &str,
) -> Option<String> {
    let field = optional_node(session, node, css).await?;
    match session.text(field).await {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::debug!(css, ?err, "optional field read failed");
            None
        }
    }
}

async fn optional_attribute(
    session: &mut dyn BrowserSession,
    node: NodeHandle,
    css: &str,
    name: &str,
) -> Option<String> {
    let field = optional_node(session, node, css).await?;
    match session.attribute(field, name).await {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(css, name, ?err, "optional attribute read failed");
            None
        }
    }
}

/// Polls for `selector` until it appears or `timeout` elapses.
pub async fn wait_for(
    session: &mut dyn BrowserSession,
    selector: &Selector,
    timeout: Duration,
    poll: Duration,
) -> anyhow::Result<NodeHandle> {
    let deadline = Instant::now() + timeout;
    loop {
        match session.find(None, selector).await {
            Ok(Some(node)) => return Ok(node),
            Ok(None) => {}
            Err(err) => tracing::debug!(%selector, ?err, "lookup failed; retrying"),
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timed out after {timeout:?} waiting for {selector}");
        }
        tokio::time::sleep(poll).await;
    }
}

/// Polls until `selector` exists and accepts a click, or `timeout` elapses.
pub async fn wait_and_click(
    session: &mut dyn BrowserSession,
    selector: &Selector,
    timeout: Duration,
    poll: Duration,
) -> anyhow::Result<NodeHandle> {
    let deadline = Instant::now() + timeout;
    loop {
        match session.find(None, selector).await {
            Ok(Some(node)) => match session.click(node).await {
                Ok(()) => return Ok(node),
                Err(err) => tracing::debug!(%selector, ?err, "not clickable yet"),
            },
            Ok(None) => {}
            Err(err) => tracing::debug!(%selector, ?err, "lookup failed; retrying"),
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timed out after {timeout:?} waiting to click {selector}");
        }
        tokio::time::sleep(poll).await;
    }
}

async fn scroll_height(session: &mut dyn BrowserSession, node: NodeHandle) -> anyhow::Result<u64> {
    let value = session
        .call_function(node, SCROLL_HEIGHT_JS)
        .await
        .context("measure scroll height")?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|h| *h >= 0.0).map(|h| h as u64))
        .ok_or_else(|| anyhow::anyhow!("scroll height is not a number: {value}"))
}

/// Waits up to `stall` for the container to grow past `last_height`.
async fn wait_for_growth(
    session: &mut dyn BrowserSession,
    node: NodeHandle,
    last_height: u64,
    stall: Duration,
    poll: Duration,
) -> anyhow::Result<Option<u64>> {
    let deadline = Instant::now() + stall;
    loop {
        tokio::time::sleep(poll).await;
        let height = scroll_height(session, node).await?;
        if height > last_height {
            return Ok(Some(height));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
    }
}
