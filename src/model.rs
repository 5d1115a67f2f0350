use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::canonical::build_search_url;
use crate::config::MAX_CONCURRENCY;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("Listing URL is not a valid absolute URL: {0}")]
    InvalidUrl(String),
    #[error("Item limit must be at least 1")]
    ZeroLimit,
    #[error("Concurrency must be between 1 and {max}, got {got}")]
    Concurrency { got: usize, max: usize },
}

/// One harvest invocation. Validated once, then never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRequest {
    listing_url: String,
    item_limit: usize,
    concurrency: usize,
}

impl ListingRequest {
    pub fn new(
        listing_url: impl Into<String>,
        item_limit: usize,
        concurrency: usize,
    ) -> Result<Self, RequestError> {
        let listing_url = listing_url.into();
        if url::Url::parse(&listing_url).is_err() {
            return Err(RequestError::InvalidUrl(listing_url));
        }
        if item_limit == 0 {
            return Err(RequestError::ZeroLimit);
        }
        if !(1..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(RequestError::Concurrency {
                got: concurrency,
                max: MAX_CONCURRENCY,
            });
        }
        Ok(Self {
            listing_url,
            item_limit,
            concurrency,
        })
    }

    /// Builds the listing URL from search terms against `base`.
    pub fn from_search(
        base: &str,
        keywords: Option<&str>,
        location: Option<&str>,
        item_limit: usize,
        concurrency: usize,
    ) -> Result<Self, RequestError> {
        let url = build_search_url(base, keywords, location)
            .map_err(|_| RequestError::InvalidUrl(base.to_string()))?;
        Self::new(url, item_limit, concurrency)
    }

    pub fn listing_url(&self) -> &str {
        &self.listing_url
    }

    pub fn item_limit(&self) -> usize {
        self.item_limit
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// Canonical absolute URL of a detail page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetailUrl(String);

impl DetailUrl {
    /// Wraps an already canonical URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DetailUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A job posting. The enrichment fields stay `None` until a company fetch
/// succeeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub url: String,
    pub title: Option<String>,
    pub company: Option<String>,
    pub company_url: Option<String>,
    pub location: Option<String>,
    pub posted: Option<String>,
    pub applicants: Option<String>,
    pub description: Option<String>,

    pub company_overview: Option<String>,
    pub industry: Option<String>,
    pub company_size: Option<String>,
    pub headquarters: Option<String>,
    pub founded: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub company_type: Option<String>,
    pub specialties: Option<String>,
}

impl JobRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Number of scraped primary fields that came back non-empty.
    pub fn usable_fields(&self) -> usize {
        [
            &self.title,
            &self.company,
            &self.company_url,
            &self.location,
            &self.posted,
            &self.applicants,
            &self.description,
        ]
        .iter()
        .filter(|field| field.is_some())
        .count()
    }

    pub fn is_enriched(&self) -> bool {
        [
            &self.company_overview,
            &self.industry,
            &self.company_size,
            &self.headquarters,
            &self.founded,
            &self.website,
            &self.phone,
            &self.company_type,
            &self.specialties,
        ]
        .iter()
        .any(|field| field.is_some())
    }

    /// Adds company fields. Never clears what the job page already gave us.
    pub fn merge_company(&mut self, company: CompanyRecord) {
        if self.company.is_none() {
            self.company = company.name;
        }
        self.company_overview = company.overview;
        self.industry = company.industry;
        self.company_size = company.size;
        self.headquarters = company.headquarters;
        self.founded = company.founded;
        self.website = company.website;
        self.phone = company.phone;
        self.company_type = company.company_type;
        self.specialties = company.specialties;
    }
}

/// Company details read from a company page and its about page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub url: String,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub headquarters: Option<String>,
    pub founded: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub company_type: Option<String>,
    pub specialties: Option<String>,
}

impl CompanyRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn usable_fields(&self) -> usize {
        [
            &self.name,
            &self.overview,
            &self.industry,
            &self.size,
            &self.headquarters,
            &self.founded,
            &self.website,
            &self.phone,
            &self.company_type,
            &self.specialties,
        ]
        .iter()
        .filter(|field| field.is_some())
        .count()
    }
}

/// Where one discovered URL ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    Discovered,
    PrimaryFetchPending,
    PrimaryFetched,
    PrimaryDropped,
    /// Never admitted because the harvest was stopped or aborted first.
    NotAdmitted,
    EnrichmentPending,
    Enriched,
    EnrichmentSkipped,
}

impl RecordState {
    /// Whether a record in this state belongs in the result.
    pub fn is_included(self) -> bool {
        matches!(self, RecordState::Enriched | RecordState::EnrichmentSkipped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlOutcome {
    pub url: DetailUrl,
    pub state: RecordState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestCounts {
    pub discovered: usize,
    /// Primary tasks admitted through the gate.
    pub attempted: usize,
    pub succeeded: usize,
    pub dropped: usize,
    pub not_admitted: usize,
    pub enrichment_attempted: usize,
    pub enriched: usize,
    pub enrichment_failed: usize,
    /// No company URL, or never admitted.
    pub enrichment_skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestStats {
    pub discovery_duration_ms: u64,
    pub fetch_duration_ms: u64,
    pub enrichment_duration_ms: u64,
    pub total_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// The site answered with a login wall or similar anti-automation page.
    Blocked { url: String, signal: String },
    /// The caller raised the stop signal.
    Stopped,
}

/// Records in discovery order plus what happened on the way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestResult {
    pub records: Vec<JobRecord>,
    pub counts: HarvestCounts,
    pub outcomes: Vec<UrlOutcome>,
    pub stats: HarvestStats,
    pub aborted: Option<AbortReason>,
}

impl HarvestResult {
    pub fn is_blocked(&self) -> bool {
        matches!(self.aborted, Some(AbortReason::Blocked { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_request_validation() {
        assert!(ListingRequest::new("https://example.com/jobs", 5, 2).is_ok());
        assert_eq!(
            ListingRequest::new("https://example.com/jobs", 0, 2),
            Err(RequestError::ZeroLimit)
        );
        assert_eq!(
            ListingRequest::new("https://example.com/jobs", 5, 11),
            Err(RequestError::Concurrency { got: 11, max: 10 })
        );
        assert!(matches!(
            ListingRequest::new("not a url", 5, 2),
            Err(RequestError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_from_search() {
        let request = ListingRequest::from_search(
            "https://example.com/jobs/search/",
            Some("rust"),
            None,
            10,
            3,
        )
        .unwrap();
        assert_eq!(request.listing_url(), "https://example.com/jobs/search/?keywords=rust");
    }

    #[test]
    fn test_merge_company_keeps_job_company_name() {
        let mut job = JobRecord::new("https://example.com/jobs/view/1");
        job.company = Some("Acme".into());

        let mut company = CompanyRecord::new("https://example.com/company/acme");
        company.name = Some("Acme Corp".into());
        company.industry = Some("Software".into());
        job.merge_company(company);

        assert_eq!(job.company.as_deref(), Some("Acme"));
        assert_eq!(job.industry.as_deref(), Some("Software"));
        assert!(job.is_enriched());
    }

    #[test]
    fn test_usable_fields_ignores_url() {
        let job = JobRecord::new("https://example.com/jobs/view/1");
        assert_eq!(job.usable_fields(), 0);
        assert!(!job.is_enriched());
    }
}
