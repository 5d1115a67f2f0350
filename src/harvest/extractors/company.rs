use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{clean, field};
use crate::canonical::canonicalize;
use crate::config::FetchConfig;
use crate::harvest::traits::{FetchError, PageCursor, RecordExtractor};
use crate::model::CompanyRecord;

const NAME: &str = "h1";

/// First paragraph of the section headed "Overview" or "About".
const OVERVIEW_SCRIPT: &str = r#"() => {
    for (const section of document.querySelectorAll('section')) {
        const heading = section.querySelector('h2');
        if (!heading) continue;
        const text = heading.innerText.toLowerCase();
        if (!text.includes('overview') && !text.includes('about')) continue;
        const paragraph = section.querySelector('p');
        if (paragraph && paragraph.innerText.trim()) return [paragraph.innerText.trim()];
    }
    return [];
}"#;

/// Label/value rows of every `dl`, one round trip for the whole page.
const DETAILS_SCRIPT: &str = r#"() => {
    const rows = [];
    for (const dl of document.querySelectorAll('dl')) {
        let label = null;
        for (const child of dl.children) {
            const tag = child.tagName.toLowerCase();
            if (tag === 'dt') {
                const h3 = child.querySelector('h3');
                label = (h3 ? h3.innerText : child.innerText).trim().toLowerCase();
            } else if (tag === 'dd' && label) {
                const link = child.querySelector('a');
                rows.push({
                    label,
                    value: child.innerText.trim(),
                    href: link ? link.getAttribute('href') : null,
                });
            }
        }
    }
    return rows;
}"#;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OverviewRow {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub href: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverviewField {
    Website,
    Phone,
    Headquarters,
    Founded,
    Industry,
    CompanyType,
    CompanySize,
    Specialties,
}

/// Maps an about-page label to the field it fills. Order matters:
/// "company type" must win over the generic "company size" match.
pub fn classify_label(label: &str) -> Option<OverviewField> {
    let label = label.trim().to_lowercase();
    let has = |needle: &str| label.contains(needle);

    if has("website") || has("url") {
        Some(OverviewField::Website)
    } else if has("phone") {
        Some(OverviewField::Phone)
    } else if has("headquarters") || has("location") || has("address") {
        Some(OverviewField::Headquarters)
    } else if has("founded") || has("year") {
        Some(OverviewField::Founded)
    } else if has("industr") {
        Some(OverviewField::Industry)
    } else if has("company type") || (has("type") && has("company")) {
        Some(OverviewField::CompanyType)
    } else if has("size") || has("employee") {
        Some(OverviewField::CompanySize)
    } else if has("specialt") || has("expertise") {
        Some(OverviewField::Specialties)
    } else {
        None
    }
}

/// Reads a company page, then its about page.
#[derive(Debug, Clone)]
pub struct CompanyExtractor {
    about_settle: Duration,
    aliases: Vec<String>,
}

impl Default for CompanyExtractor {
    fn default() -> Self {
        Self::new(&FetchConfig::default())
    }
}

impl CompanyExtractor {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            about_settle: config.about_settle(),
            aliases: config.company_alias_suffixes.clone(),
        }
    }

    fn about_url(&self, url: &str) -> String {
        let base = canonicalize(url, &self.aliases)
            .unwrap_or_else(|| url.trim_end_matches('/').to_string());
        format!("{base}/about/")
    }
}

#[async_trait]
impl RecordExtractor for CompanyExtractor {
    type Record = CompanyRecord;

    fn kind(&self) -> &'static str {
        "company"
    }

    fn usable_fields(&self, record: &CompanyRecord) -> usize {
        record.usable_fields()
    }

    async fn extract(&self, cursor: &PageCursor<'_>, url: &str) -> Result<CompanyRecord, FetchError> {
        let page = cursor.page();
        let mut record = CompanyRecord::new(url);
        record.name = field("name", page.text(NAME)).await;

        let about = self.about_url(url);
        match cursor.open(&about).await {
            Ok(_) => {}
            Err(e) if e.is_blocked() => return Err(e),
            Err(e) => {
                warn!(url = %about, error = %e, "About page unavailable, keeping company name only");
                return Ok(record);
            }
        }
        tokio::time::sleep(self.about_settle).await;

        record.overview = match page.evaluate_strings(OVERVIEW_SCRIPT).await {
            Ok(paragraphs) => paragraphs.into_iter().find_map(|p| clean(Some(p))),
            Err(e) => {
                debug!(error = %e, "Overview extraction failed");
                None
            }
        };

        match page.evaluate(DETAILS_SCRIPT).await {
            Ok(value) => match serde_json::from_value::<Vec<OverviewRow>>(value) {
                Ok(rows) => rows.iter().for_each(|row| apply_row(&mut record, row)),
                Err(e) => debug!(error = %e, "Unexpected overview rows"),
            },
            Err(e) => debug!(error = %e, "Overview details extraction failed"),
        }

        Ok(record)
    }
}

/// Fills the field a row maps to, keeping the first value seen.
fn apply_row(record: &mut CompanyRecord, row: &OverviewRow) {
    let value = row.value.trim();
    let lower = value.to_lowercase();
    if value.is_empty() || lower.contains("linkedin members") || lower.contains("associated members") {
        return;
    }
    let Some(kind) = classify_label(&row.label) else {
        return;
    };
    let href = row.href.as_deref().map(str::trim).filter(|h| !h.is_empty());

    let (slot, value) = match kind {
        OverviewField::Website => (
            &mut record.website,
            href.filter(|h| !h.starts_with("tel:")).unwrap_or(value).to_string(),
        ),
        OverviewField::Phone => (
            &mut record.phone,
            href.and_then(|h| h.strip_prefix("tel:")).unwrap_or(value).to_string(),
        ),
        OverviewField::Headquarters => (&mut record.headquarters, value.to_string()),
        OverviewField::Founded => (&mut record.founded, value.to_string()),
        OverviewField::Industry => (&mut record.industry, value.to_string()),
        OverviewField::CompanyType => (&mut record.company_type, value.to_string()),
        OverviewField::CompanySize => (&mut record.size, value.to_string()),
        OverviewField::Specialties => (&mut record.specialties, value.to_string()),
    };
    if slot.is_none() {
        *slot = Some(value);
    }
}
