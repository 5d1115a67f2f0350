//! Fetches one detail page into a record.
//!
//! Every attempt gets its own browsing context, seeded with the saved
//! session and closed before the attempt returns, whatever the outcome.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::config::FetchConfig;
use crate::harvest::retry::RetryPolicy;
use crate::harvest::traits::{FetchError, FetchFailure, PageCursor, RecordExtractor};
use crate::rate_gate::{BlockedError, RateGate};
use crate::session::SavedSession;
use crate::traits::{Browser, PageError, PageSession};

/// Result of a best-effort enrichment fetch.
#[derive(Debug)]
pub enum Enrichment<R> {
    Found(R),
    /// Retries exhausted; the caller keeps its record as is.
    Unavailable,
    /// The site walled us; the caller should stop issuing fetches.
    Blocked(BlockedError),
}

pub struct DetailFetcher {
    browser: Arc<dyn Browser>,
    gate: Arc<RateGate>,
    session: Option<SavedSession>,
    navigation_timeout: Duration,
    attempt_timeout: Duration,
}

impl DetailFetcher {
    pub fn new(browser: Arc<dyn Browser>, gate: Arc<RateGate>, config: &FetchConfig) -> Self {
        Self {
            browser,
            gate,
            session: None,
            navigation_timeout: config.navigation_timeout(),
            attempt_timeout: config.attempt_timeout(),
        }
    }

    pub fn with_session(mut self, session: Option<SavedSession>) -> Self {
        self.session = session;
        self
    }

    /// Fetches `url` with `extractor`, retrying per `policy`.
    #[instrument(skip(self, extractor, policy), fields(kind = extractor.kind()))]
    pub async fn fetch<X>(
        &self,
        url: &str,
        extractor: &X,
        policy: &RetryPolicy,
    ) -> Result<X::Record, FetchFailure>
    where
        X: RecordExtractor,
    {
        policy
            .run(url, |attempt| self.attempt(url, extractor, attempt))
            .await
    }

    /// Like [`fetch`](Self::fetch), but failure is a sentinel rather than an error.
    pub async fn fetch_enrichment<X>(
        &self,
        url: &str,
        extractor: &X,
        policy: &RetryPolicy,
    ) -> Enrichment<X::Record>
    where
        X: RecordExtractor,
    {
        match self.fetch(url, extractor, policy).await {
            Ok(record) => Enrichment::Found(record),
            Err(FetchFailure {
                last: FetchError::Blocked(blocked),
                ..
            }) => Enrichment::Blocked(blocked),
            Err(failure) => {
                warn!(url, error = %failure, "Enrichment unavailable");
                Enrichment::Unavailable
            }
        }
    }

    async fn attempt<X>(&self, url: &str, extractor: &X, attempt: u32) -> Result<X::Record, FetchError>
    where
        X: RecordExtractor,
    {
        debug!(url, attempt, "Opening browsing context");
        let page = timeout(
            self.navigation_timeout,
            self.browser.new_context(self.session.as_ref()),
        )
        .await
        .map_err(|_| PageError::timeout("open browsing context", self.navigation_timeout))??;

        let outcome = match timeout(self.attempt_timeout, self.read(page.as_ref(), url, extractor)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::AttemptTimeout {
                timeout_ms: self.attempt_timeout.as_millis() as u64,
            }),
        };

        match timeout(self.navigation_timeout, page.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(url, error = %e, "Failed to close browsing context"),
            Err(_) => debug!(url, "Closing browsing context timed out"),
        }
        outcome
    }

    async fn read<X>(&self, page: &dyn PageSession, url: &str, extractor: &X) -> Result<X::Record, FetchError>
    where
        X: RecordExtractor,
    {
        let cursor = PageCursor::new(page, &self.gate, self.navigation_timeout);
        cursor.open(url).await?;

        let record = extractor.extract(&cursor, url).await?;
        if extractor.usable_fields(&record) == 0 {
            return Err(FetchError::EmptyRecord {
                url: url.to_string(),
            });
        }
        Ok(record)
    }
}
