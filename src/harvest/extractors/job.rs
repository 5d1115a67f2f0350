use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use super::{all, clean, field};
use crate::canonical::canonicalize;
use crate::config::FetchConfig;
use crate::harvest::traits::{FetchError, PageCursor, RecordExtractor};
use crate::model::JobRecord;

const TITLE: &str = "h1";
const COMPANY_NAME: &str = ".job-details-jobs-unified-top-card__company-name";
const COMPANY_LINK: &str = "a[href*=\"/company/\"]";
const LOCATION: &str = ".job-details-jobs-unified-top-card__bullet";
const SPANS: &str = "span";
const DESCRIPTION: &str = ".jobs-description__content";
const DESCRIPTION_FALLBACK: &str = "article";

static RELATIVE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+\s+(?:minute|hour|day|week|month|year)s?\s+ago)").expect("valid regex")
});
static POSTED_PHRASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)posted\s+(.*?ago)").expect("valid regex"));
static APPLICANTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)((?:over\s+)?(?:\d+,?)+\s+applicants?)").expect("valid regex")
});

/// Reads a job posting detail page.
#[derive(Debug, Clone)]
pub struct JobExtractor {
    company_host: String,
    company_aliases: Vec<String>,
}

impl Default for JobExtractor {
    fn default() -> Self {
        Self::new(&FetchConfig::default())
    }
}

impl JobExtractor {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            company_host: config.company_host.clone(),
            company_aliases: config.company_alias_suffixes.clone(),
        }
    }
}

#[async_trait]
impl RecordExtractor for JobExtractor {
    type Record = JobRecord;

    fn kind(&self) -> &'static str {
        "job"
    }

    fn usable_fields(&self, record: &JobRecord) -> usize {
        record.usable_fields()
    }

    async fn extract(&self, cursor: &PageCursor<'_>, url: &str) -> Result<JobRecord, FetchError> {
        let page = cursor.page();

        let company = match field("company", page.text(COMPANY_NAME)).await {
            Some(name) => Some(name),
            None => all("company", page.texts(COMPANY_LINK))
                .await
                .into_iter()
                .find_map(|text| clean(Some(text))),
        };
        let hrefs = all("company_url", page.attributes(COMPANY_LINK, "href")).await;
        let spans = all("spans", page.texts(SPANS)).await;
        let description = match field("description", page.text(DESCRIPTION)).await {
            Some(text) => Some(text),
            None => field("description", page.text(DESCRIPTION_FALLBACK)).await,
        };

        Ok(JobRecord {
            title: field("title", page.text(TITLE)).await,
            company,
            company_url: pick_company_url(&hrefs, url, &self.company_host, &self.company_aliases),
            location: field("location", page.text(LOCATION)).await,
            posted: parse_posted(&spans),
            applicants: parse_applicants(&spans),
            description,
            ..JobRecord::new(url)
        })
    }
}

/// Relative posting time such as "3 days ago".
pub fn parse_posted(texts: &[String]) -> Option<String> {
    texts.iter().find_map(|text| {
        if let Some(m) = RELATIVE_TIME.captures(text).and_then(|c| c.get(1)) {
            return Some(m.as_str().trim().to_string());
        }
        let lower = text.to_lowercase();
        if lower.contains("posted") && lower.contains("ago") {
            return POSTED_PHRASE
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string());
        }
        None
    })
}

/// Applicant count such as "Over 100 applicants".
pub fn parse_applicants(texts: &[String]) -> Option<String> {
    texts
        .iter()
        .filter(|text| text.to_lowercase().contains("applicant"))
        .find_map(|text| APPLICANTS.captures(text).and_then(|c| c.get(1)))
        .map(|m| m.as_str().trim().to_string())
}

/// First company link on the site's own host, canonicalized.
pub fn pick_company_url(
    hrefs: &[String],
    page_url: &str,
    host: &str,
    aliases: &[String],
) -> Option<String> {
    let base = Url::parse(page_url).ok();
    hrefs.iter().find_map(|href| {
        let absolute = match &base {
            Some(base) => base.join(href.trim()).ok()?,
            None => Url::parse(href.trim()).ok()?,
        };
        let on_host = absolute.host_str().is_some_and(|h| h.contains(host));
        if !on_host || !absolute.path().contains("/company/") {
            return None;
        }
        canonicalize(absolute.as_str(), aliases)
    })
}
