//! Extraction strategies for the entity kinds we harvest.
//!
//! - `job` - job posting detail pages (primary records)
//! - `company` - company pages and their about section (enrichment)

mod company;
mod job;

pub use company::{classify_label, CompanyExtractor, OverviewField, OverviewRow};
pub use job::{parse_applicants, parse_posted, pick_company_url, JobExtractor};

use std::future::Future;
use tracing::debug;

use crate::traits::PageError;

/// Awaits one field query; any failure or blank value becomes `None`.
pub(crate) async fn field<F>(name: &str, query: F) -> Option<String>
where
    F: Future<Output = Result<Option<String>, PageError>>,
{
    match query.await {
        Ok(value) => clean(value),
        Err(e) => {
            debug!(field = name, error = %e, "Field extraction failed");
            None
        }
    }
}

/// Like [`field`] for multi-element queries; failure yields no elements.
pub(crate) async fn all<F>(name: &str, query: F) -> Vec<String>
where
    F: Future<Output = Result<Vec<String>, PageError>>,
{
    match query.await {
        Ok(values) => values,
        Err(e) => {
            debug!(field = name, error = %e, "Field extraction failed");
            Vec::new()
        }
    }
}

pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
