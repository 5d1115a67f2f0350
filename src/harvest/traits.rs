//! Core traits and error types for detail fetching.
//!
//! - Extraction strategies via [`RecordExtractor`]
//! - Rate-gated navigation for extractors via [`PageCursor`]
//! - Per-attempt [`FetchError`] and exhausted-retry [`FetchFailure`]

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use crate::rate_gate::{BlockedError, RateGate};
use crate::traits::{PageError, PageSession, PageState};

// ============================================================================
// Error Types
// ============================================================================

/// Why a single fetch attempt failed.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Page(#[from] PageError),

    /// Not retried; the whole harvest should stop.
    #[error(transparent)]
    Blocked(#[from] BlockedError),

    /// The page loaded but nothing we know how to read was on it.
    #[error("No usable fields extracted from {url}")]
    EmptyRecord { url: String },

    #[error("Attempt timed out after {timeout_ms}ms")]
    AttemptTimeout { timeout_ms: u64 },
}

impl FetchError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, FetchError::Blocked(_))
    }
}

/// A fetch that is not going to succeed: retries exhausted or blocked.
#[derive(Error, Debug)]
#[error("Gave up on {url} after {attempts} attempt(s): {last}")]
pub struct FetchFailure {
    pub url: String,
    pub attempts: u32,
    #[source]
    pub last: FetchError,
}

impl FetchFailure {
    pub fn is_blocked(&self) -> bool {
        self.last.is_blocked()
    }
}

// ============================================================================
// Navigation handle
// ============================================================================

/// An open page plus the rules every navigation on it must follow.
pub struct PageCursor<'a> {
    page: &'a dyn PageSession,
    gate: &'a RateGate,
    navigation_timeout: Duration,
}

impl<'a> PageCursor<'a> {
    pub fn new(page: &'a dyn PageSession, gate: &'a RateGate, navigation_timeout: Duration) -> Self {
        Self {
            page,
            gate,
            navigation_timeout,
        }
    }

    pub fn page(&self) -> &'a dyn PageSession {
        self.page
    }

    /// Navigates through the rate gate with a hard timeout.
    pub async fn open(&self, url: &str) -> Result<PageState, FetchError> {
        self.gate.before_navigate().await?;

        let state = timeout(
            self.navigation_timeout,
            self.page.navigate(url, self.navigation_timeout),
        )
        .await
        .map_err(|_| PageError::timeout(format!("navigate {url}"), self.navigation_timeout))??;

        self.gate.after_navigate(&state)?;
        Ok(state)
    }

    /// Runs one page operation under the navigation timeout.
    pub async fn bounded<T, F>(&self, operation: &str, query: F) -> Result<T, PageError>
    where
        F: Future<Output = Result<T, PageError>>,
    {
        self.within(self.navigation_timeout, operation, query).await
    }

    /// Runs one page operation under `limit`; elapsing is a [`PageError::Timeout`].
    pub async fn within<T, F>(&self, limit: Duration, operation: &str, query: F) -> Result<T, PageError>
    where
        F: Future<Output = Result<T, PageError>>,
    {
        timeout(limit, query)
            .await
            .map_err(|_| PageError::timeout(operation, limit))?
    }
}

// ============================================================================
// Extraction Strategy
// ============================================================================

/// Turns an already opened detail page into a record.
///
/// The same fetch and retry scaffolding serves every entity kind; only the
/// extractor differs. Individual fields must degrade to `None` on failure;
/// an `Err` is reserved for failures of the page itself (navigation, block).
#[async_trait]
pub trait RecordExtractor: Send + Sync {
    type Record: Send + 'static;

    /// Short name used in logs (e.g. `"job"`, `"company"`).
    fn kind(&self) -> &'static str;

    /// Fields that carry scraped data. Zero means the attempt failed.
    fn usable_fields(&self, record: &Self::Record) -> usize;

    async fn extract(
        &self,
        cursor: &PageCursor<'_>,
        url: &str,
    ) -> Result<Self::Record, FetchError>;
}
