//! Harvest configuration.
//!
//! Every section is `#[serde(default)]`, so a config file only needs the keys
//! it wants to override. Durations are stored as milliseconds.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::harvest::retry::{Backoff, RetryPolicy};

/// Upper bound for the per-harvest admission gate.
pub const MAX_CONCURRENCY: usize = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub discovery: DiscoveryConfig,
    pub fetch: FetchConfig,
    pub rate: RateConfig,
    pub batch: BatchConfig,
    /// Saved cookie state; a missing file means unauthenticated fetches.
    pub session_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Marks one rendered listing item.
    pub item_selector: String,
    /// Detail link inside an item.
    pub link_selector: String,
    /// Tried in order when no scrollable ancestor of an item exists.
    pub container_selectors: Vec<String>,
    pub alias_suffixes: Vec<String>,
    pub list_wait_ms: u64,
    pub initial_settle_ms: u64,
    pub scroll_settle_ms: u64,
    pub max_rounds: usize,
    /// Consecutive rounds without a new URL before giving up.
    pub stall_rounds: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            item_selector: "li[data-occludable-job-id]".to_string(),
            link_selector: "a[href*=\"/jobs/view/\"]".to_string(),
            container_selectors: vec![
                "div.jobs-search-results-list".to_string(),
                "div[class*=\"scaffold-layout__list\"]".to_string(),
                "div.scaffold-layout__list-container".to_string(),
            ],
            alias_suffixes: Vec::new(),
            list_wait_ms: 5_000,
            initial_settle_ms: 2_000,
            scroll_settle_ms: 4_000,
            max_rounds: 50,
            stall_rounds: 5,
        }
    }
}

impl DiscoveryConfig {
    pub fn list_wait(&self) -> Duration {
        Duration::from_millis(self.list_wait_ms)
    }

    pub fn initial_settle(&self) -> Duration {
        Duration::from_millis(self.initial_settle_ms)
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub navigation_timeout_ms: u64,
    /// Bounds a whole attempt: context, navigation(s) and extraction.
    pub attempt_timeout_ms: u64,
    pub primary_retries: u32,
    pub enrichment_retries: u32,
    pub backoff_ms: u64,
    /// Wait after opening a company's about page before reading it.
    pub about_settle_ms: u64,
    /// Host fragment a company link must contain to count as the company URL.
    pub company_host: String,
    pub company_alias_suffixes: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 45_000,
            attempt_timeout_ms: 120_000,
            primary_retries: 2,
            enrichment_retries: 1,
            backoff_ms: 2_000,
            about_settle_ms: 1_000,
            company_host: "linkedin.com".to_string(),
            company_alias_suffixes: vec!["/life".to_string()],
        }
    }
}

impl FetchConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn about_settle(&self) -> Duration {
        Duration::from_millis(self.about_settle_ms)
    }

    pub fn primary_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.primary_retries,
            Backoff::Fixed(Duration::from_millis(self.backoff_ms)),
        )
    }

    pub fn enrichment_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.enrichment_retries,
            Backoff::Fixed(Duration::from_millis(self.backoff_ms)),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Minimum spacing between any two navigations of one harvest.
    pub min_spacing_ms: u64,
    /// Path fragments of pages that mean "stop, we are being walled".
    pub blocked_url_markers: Vec<String>,
    /// Title words or phrases with the same meaning, matched case-insensitively as whole words.
    pub blocked_title_markers: Vec<String>,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            min_spacing_ms: 500,
            blocked_url_markers: vec![
                "/authwall".to_string(),
                "/checkpoint".to_string(),
                "/uas/login".to_string(),
                "/login".to_string(),
            ],
            blocked_title_markers: vec![
                "security verification".to_string(),
                "sign in".to_string(),
                "too many requests".to_string(),
            ],
        }
    }
}

impl RateConfig {
    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub item_limit: usize,
    pub concurrency: usize,
    pub listing_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            item_limit: 25,
            concurrency: 3,
            listing_delay_ms: 3_000,
        }
    }
}

impl BatchConfig {
    pub fn listing_delay(&self) -> Duration {
        Duration::from_millis(self.listing_delay_ms)
    }
}

impl HarvestConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.item_selector.trim().is_empty() {
            return Err(ConfigError::Invalid("discovery.item_selector is empty".into()));
        }
        if self.discovery.link_selector.trim().is_empty() {
            return Err(ConfigError::Invalid("discovery.link_selector is empty".into()));
        }
        if self.discovery.stall_rounds == 0 {
            return Err(ConfigError::Invalid("discovery.stall_rounds must be at least 1".into()));
        }
        if self.fetch.navigation_timeout_ms == 0 || self.fetch.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid("fetch timeouts must be non-zero".into()));
        }
        if self.batch.item_limit == 0 {
            return Err(ConfigError::Invalid("batch.item_limit must be at least 1".into()));
        }
        if !(1..=MAX_CONCURRENCY).contains(&self.batch.concurrency) {
            return Err(ConfigError::Invalid(format!(
                "batch.concurrency must be between 1 and {MAX_CONCURRENCY}"
            )));
        }
        Ok(())
    }
}
