//! In-memory browser for tests.
//!
//! Pages are registered by exact URL. Every context tracks which page it
//! currently shows, so an extractor that navigates twice (company page, then
//! about page) sees both.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::session::SavedSession;
use crate::traits::{Browser, PageError, PageSession, PageState};

#[derive(Debug, Clone, Default)]
pub struct FakePage {
    texts: HashMap<String, Vec<String>>,
    attrs: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    fail_first: usize,
    redirect: Option<String>,
    title: Option<String>,
    latency: Duration,
    hanging: bool,
    scripts: Vec<(String, Value)>,
    listing: Vec<Vec<String>>,
}

impl FakePage {
    /// A job detail page with only a title.
    pub fn job(title: &str) -> Self {
        Self::default().with_text("h1", title)
    }

    /// An infinite-scroll listing: round `n` is what is rendered after `n` scrolls.
    pub fn listing(rounds: Vec<Vec<String>>) -> Self {
        Self {
            listing: rounds,
            ..Self::default()
        }
    }

    /// Appends one element matching `selector`.
    pub fn with_text(mut self, selector: &str, text: &str) -> Self {
        self.texts.entry(selector.to_string()).or_default().push(text.to_string());
        self
    }

    pub fn with_attr(mut self, selector: &str, attr: &str, value: &str) -> Self {
        self.attrs
            .entry(format!("{selector}@{attr}"))
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn failing_selector(mut self, selector: &str) -> Self {
        self.failing.insert(selector.to_string());
        self
    }

    /// The first `n` navigations to this page fail; `usize::MAX` fails forever.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn redirecting_to(mut self, url: &str) -> Self {
        self.redirect = Some(url.to_string());
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Loads normally, then never answers `wait_for` or `evaluate`.
    pub fn hanging(mut self) -> Self {
        self.hanging = true;
        self
    }

    /// Any evaluated script containing `marker` returns `result`.
    pub fn with_script(mut self, marker: &str, result: Value) -> Self {
        self.scripts.push((marker.to_string(), result));
        self
    }
}

#[derive(Default)]
struct Shared {
    pages: Mutex<HashMap<String, FakePage>>,
    navigations: Mutex<HashMap<String, usize>>,
    sessions: Mutex<Vec<bool>>,
    open: AtomicUsize,
    peak: AtomicUsize,
    created: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeBrowser {
    shared: Arc<Shared>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_page(&self, url: &str, page: FakePage) {
        self.shared.pages.lock().unwrap().insert(url.to_string(), page);
    }

    /// Navigations to `url`, failed ones included.
    pub fn navigations(&self, url: &str) -> usize {
        self.shared.navigations.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn open_contexts(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    pub fn peak_open(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }

    pub fn contexts_created(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// Whether each created context was seeded with a session, in creation order.
    pub fn sessions_seen(&self) -> Vec<bool> {
        self.shared.sessions.lock().unwrap().clone()
    }

    /// A fresh context already showing `url`.
    pub async fn open_page(&self, url: &str) -> Box<dyn PageSession> {
        let page = self.new_context(None).await.expect("context");
        page.navigate(url, Duration::from_secs(1)).await.expect("registered page");
        page
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_context(
        &self,
        session: Option<&SavedSession>,
    ) -> Result<Box<dyn PageSession>, PageError> {
        self.shared.sessions.lock().unwrap().push(session.is_some());
        self.shared.created.fetch_add(1, Ordering::SeqCst);
        let open = self.shared.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(FakeContext {
            shared: Arc::clone(&self.shared),
            current: Mutex::new(None),
            scrolls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeContext {
    shared: Arc<Shared>,
    current: Mutex<Option<FakePage>>,
    scrolls: AtomicUsize,
    closed: AtomicBool,
}

impl FakeContext {
    fn current(&self) -> Result<FakePage, PageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PageError::Closed);
        }
        self.current
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PageError::Context("nothing loaded".into()))
    }

    fn check(page: &FakePage, selector: &str) -> Result<(), PageError> {
        if page.failing.contains(selector) {
            return Err(PageError::Script(format!("selector {selector} detached")));
        }
        Ok(())
    }
}

#[async_trait]
impl PageSession for FakeContext {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<PageState, PageError> {
        let count = {
            let mut navigations = self.shared.navigations.lock().unwrap();
            let count = navigations.entry(url.to_string()).or_default();
            *count += 1;
            *count
        };
        let page = self.shared.pages.lock().unwrap().get(url).cloned();
        let Some(page) = page else {
            return Err(PageError::Navigation(format!("net::ERR_NAME_NOT_RESOLVED at {url}")));
        };

        tokio::time::sleep(page.latency).await;
        if count <= page.fail_first {
            return Err(PageError::Navigation(format!("net::ERR_CONNECTION_RESET at {url}")));
        }

        let state = PageState {
            final_url: page.redirect.clone().unwrap_or_else(|| url.to_string()),
            title: page.title.clone(),
        };
        self.scrolls.store(0, Ordering::SeqCst);
        *self.current.lock().unwrap() = Some(page);
        Ok(state)
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), PageError> {
        let page = self.current()?;
        if page.hanging {
            return std::future::pending().await;
        }
        if !page.listing.is_empty() || page.texts.contains_key(selector) {
            Ok(())
        } else {
            Err(PageError::timeout(format!("wait for {selector}"), timeout))
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value, PageError> {
        let page = self.current()?;
        if page.hanging {
            return std::future::pending().await;
        }
        if let Some((_, result)) = page.scripts.iter().find(|(marker, _)| script.contains(marker.as_str())) {
            return Ok(result.clone());
        }
        if script.contains("scrollBy") {
            self.scrolls.fetch_add(1, Ordering::SeqCst);
            return Ok(json!({
                "found": !page.listing.is_empty(),
                "scrolled": true,
                "nearBottom": false,
                "container": "DIV.fake-list",
            }));
        }
        match page.listing.len() {
            0 => Err(PageError::Script("no fake result for script".into())),
            len => {
                let round = self.scrolls.load(Ordering::SeqCst).min(len - 1);
                Ok(json!(page.listing[round]))
            }
        }
    }

    async fn text(&self, selector: &str) -> Result<Option<String>, PageError> {
        let page = self.current()?;
        Self::check(&page, selector)?;
        Ok(page.texts.get(selector).and_then(|t| t.first().cloned()))
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>, PageError> {
        let page = self.current()?;
        Self::check(&page, selector)?;
        Ok(page.texts.get(selector).cloned().unwrap_or_default())
    }

    async fn attributes(&self, selector: &str, name: &str) -> Result<Vec<String>, PageError> {
        let page = self.current()?;
        Self::check(&page, selector)?;
        Ok(page
            .attrs
            .get(&format!("{selector}@{name}"))
            .cloned()
            .unwrap_or_default())
    }

    async fn close(&self) -> Result<(), PageError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_rounds_advance_with_scrolls() {
        let browser = FakeBrowser::new();
        browser.add_page(
            "https://www.example.com/list",
            FakePage::listing(vec![vec!["a".into()], vec!["a".into(), "b".into()]]),
        );
        let page = browser.open_page("https://www.example.com/list").await;

        assert_eq!(page.evaluate_strings("links").await.unwrap(), vec!["a"]);
        page.evaluate("el.scrollBy()").await.unwrap();
        page.evaluate("el.scrollBy()").await.unwrap();
        assert_eq!(page.evaluate_strings("links").await.unwrap(), vec!["a", "b"]);

        page.close().await.unwrap();
        page.close().await.unwrap();
        assert_eq!(browser.open_contexts(), 0);
    }
}
