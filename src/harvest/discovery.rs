//! Detail-URL discovery on an infinite-scroll listing.
//!
//! Discovery is strictly sequential: one page, one scroll loop, one seen-set.
//! Each round costs a single batched script evaluation regardless of how many
//! items are rendered.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::canonical::canonicalize;
use crate::config::DiscoveryConfig;
use crate::harvest::traits::{FetchError, PageCursor};
use crate::model::DetailUrl;
use crate::progress::{Milestone, ProgressTracker};
use crate::rate_gate::BlockedError;
use crate::traits::PageError;

/// What one scroll step reported back from the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollOutcome {
    pub found: bool,
    #[serde(default)]
    pub scrolled: bool,
    #[serde(default)]
    pub near_bottom: bool,
    #[serde(default)]
    pub container: Option<String>,
}

/// The page operations discovery needs.
#[async_trait]
pub trait ListingSource: Send {
    /// Navigates to the listing and waits (best effort) for the first item.
    async fn open(&mut self, url: &str) -> Result<(), FetchError>;

    /// Every item URL currently rendered, in document order.
    async fn extract_links(&mut self) -> Result<Vec<String>, PageError>;

    /// Scrolls the item container by one viewport.
    async fn scroll(&mut self) -> Result<ScrollOutcome, PageError>;
}

/// [`ListingSource`] over a live page.
pub struct PageListing<'a> {
    cursor: PageCursor<'a>,
    config: &'a DiscoveryConfig,
    links_script: String,
    scroll_script: String,
}

impl<'a> PageListing<'a> {
    pub fn new(cursor: PageCursor<'a>, config: &'a DiscoveryConfig) -> Self {
        Self {
            links_script: links_script(&config.item_selector, &config.link_selector),
            scroll_script: scroll_script(&config.item_selector, &config.container_selectors),
            cursor,
            config,
        }
    }
}

#[async_trait]
impl ListingSource for PageListing<'_> {
    async fn open(&mut self, url: &str) -> Result<(), FetchError> {
        self.cursor.open(url).await?;
        let wait = self.config.list_wait();
        let ready = self.cursor.page().wait_for(&self.config.item_selector, wait);
        match self.cursor.within(wait, "wait for listing items", ready).await {
            Ok(()) => debug!("Listing items rendered"),
            Err(e) => warn!(error = %e, "Listing items not seen yet, continuing anyway"),
        }
        Ok(())
    }

    async fn extract_links(&mut self) -> Result<Vec<String>, PageError> {
        let links = self.cursor.page().evaluate_strings(&self.links_script);
        self.cursor.bounded("extract listing links", links).await
    }

    async fn scroll(&mut self) -> Result<ScrollOutcome, PageError> {
        let scrolled = self.cursor.page().evaluate(&self.scroll_script);
        let value = self.cursor.bounded("scroll listing", scrolled).await?;
        Ok(serde_json::from_value(value)?)
    }
}

fn js_string(value: &str) -> String {
    // A JSON string literal is a valid JS string literal.
    serde_json::Value::from(value).to_string()
}

fn links_script(item_selector: &str, link_selector: &str) -> String {
    format!(
        r#"() => Array.from(document.querySelectorAll({item}))
    .map(item => item.querySelector({link}))
    .filter(link => link && link.href)
    .map(link => link.href)"#,
        item = js_string(item_selector),
        link = js_string(link_selector),
    )
}

fn scroll_script(item_selector: &str, container_selectors: &[String]) -> String {
    let fallbacks = serde_json::Value::from(container_selectors.to_vec()).to_string();
    format!(
        r#"() => {{
    let container = null;
    const item = document.querySelector({item});
    for (let el = item ? item.parentElement : null; el && el !== document.body; el = el.parentElement) {{
        const overflow = window.getComputedStyle(el).overflowY;
        if ((overflow === 'auto' || overflow === 'scroll') && el.scrollHeight > el.clientHeight) {{
            container = el;
            break;
        }}
    }}
    if (!container) {{
        for (const selector of {fallbacks}) {{
            container = document.querySelector(selector);
            if (container) break;
        }}
    }}
    if (!container) return {{ found: false }};
    const before = container.scrollTop;
    container.scrollBy({{ top: container.clientHeight, behavior: 'auto' }});
    const after = container.scrollTop;
    return {{
        found: true,
        scrolled: after > before,
        nearBottom: after + container.clientHeight + 300 >= container.scrollHeight,
        container: container.tagName + '.' + Array.from(container.classList).slice(0, 2).join('.'),
    }};
}}"#,
        item = js_string(item_selector),
        fallbacks = fallbacks,
    )
}

/// Order-preserving, capped set of canonical URLs.
struct SeenUrls<'a> {
    seen: HashSet<String>,
    urls: Vec<DetailUrl>,
    limit: usize,
    aliases: &'a [String],
}

impl<'a> SeenUrls<'a> {
    fn new(limit: usize, aliases: &'a [String]) -> Self {
        Self {
            seen: HashSet::new(),
            urls: Vec::new(),
            limit,
            aliases,
        }
    }

    fn is_full(&self) -> bool {
        self.urls.len() >= self.limit
    }

    /// Appends unseen URLs in encounter order; returns how many were new.
    fn merge(&mut self, raw: Vec<String>) -> usize {
        let before = self.urls.len();
        for candidate in raw {
            if self.is_full() {
                break;
            }
            let Some(url) = canonicalize(&candidate, self.aliases) else {
                continue;
            };
            if self.seen.insert(url.clone()) {
                self.urls.push(DetailUrl::new(url));
            }
        }
        self.urls.len() - before
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub urls: Vec<DetailUrl>,
    /// Scroll rounds performed after the initial extraction.
    pub rounds: usize,
}

pub struct UrlHarvester {
    config: DiscoveryConfig,
    stop: CancellationToken,
}

impl UrlHarvester {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            stop: CancellationToken::new(),
        }
    }

    pub fn with_stop(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    /// Collects up to `limit` detail URLs from `listing_url`.
    ///
    /// Never fails except when the listing itself is walled; every other
    /// problem ends in whatever was accumulated so far.
    #[instrument(skip(self, source, progress))]
    pub async fn harvest<S>(
        &self,
        source: &mut S,
        listing_url: &str,
        limit: usize,
        progress: Option<&ProgressTracker>,
    ) -> Result<Discovery, BlockedError>
    where
        S: ListingSource,
    {
        let mut found = SeenUrls::new(limit, &self.config.alias_suffixes);
        let mut discovery = Discovery::default();

        match source.open(listing_url).await {
            Ok(()) => {}
            Err(FetchError::Blocked(blocked)) => return Err(blocked),
            Err(e) => {
                warn!(error = %e, "Could not load listing");
                return Ok(discovery);
            }
        }
        if let Some(progress) = progress {
            progress.milestone(Milestone::ListingLoaded);
        }

        tokio::time::sleep(self.config.initial_settle()).await;
        match source.extract_links().await {
            Ok(raw) => {
                let added = found.merge(raw);
                info!(added, "Extracted initially rendered URLs");
            }
            Err(e) => warn!(error = %e, "Initial URL extraction failed"),
        }

        let mut stalled = 0;
        while !found.is_full() && discovery.rounds < self.config.max_rounds {
            if self.stop.is_cancelled() {
                info!("Stop requested, ending discovery");
                break;
            }
            discovery.rounds += 1;

            match source.scroll().await {
                Ok(outcome) if !outcome.found => warn!("No scrollable listing container found"),
                Ok(outcome) => debug!(
                    round = discovery.rounds,
                    scrolled = outcome.scrolled,
                    near_bottom = outcome.near_bottom,
                    container = outcome.container.as_deref().unwrap_or("?"),
                    "Scrolled listing"
                ),
                Err(e) => debug!(round = discovery.rounds, error = %e, "Scroll failed"),
            }
            tokio::time::sleep(self.config.scroll_settle()).await;

            let added = match source.extract_links().await {
                Ok(raw) => found.merge(raw),
                Err(e) => {
                    warn!(round = discovery.rounds, error = %e, "URL extraction failed this round");
                    0
                }
            };

            if added == 0 {
                stalled += 1;
                debug!(round = discovery.rounds, stalled, "No new URLs");
                if stalled >= self.config.stall_rounds {
                    info!(stalled, "Listing stopped producing URLs");
                    break;
                }
            } else {
                stalled = 0;
                info!(
                    round = discovery.rounds,
                    collected = found.urls.len(),
                    limit,
                    "Discovery progress"
                );
            }
        }

        discovery.urls = found.urls;
        info!(urls = discovery.urls.len(), rounds = discovery.rounds, "Discovery finished");
        Ok(discovery)
    }
}
