//! Persistence seam for harvested records and the listing queue.
//!
//! The real backend is a document database; [`MemoryStore`] is the in-process
//! implementation used by tests and dry runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::model::JobRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unknown listing: {0}")]
    UnknownListing(String),
    #[error("Store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Pending,
    Scraped,
    Failed,
}

/// One queued listing URL and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingEntry {
    pub url: String,
    pub engine_name: String,
    pub source_name: String,
    #[serde(default)]
    pub platform: Option<String>,
    pub status: ListingStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl ListingEntry {
    pub fn pending(url: impl Into<String>, engine_name: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            engine_name: engine_name.into(),
            source_name: source_name.into(),
            platform: None,
            status: ListingStatus::Pending,
            error: None,
        }
    }
}

/// A job record as stored. Absent fields are stored as empty strings so every
/// document has the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDocument {
    pub engine_name: String,
    pub source_name: String,
    pub search_url: String,
    pub job_url: String,
    pub job_title: String,
    pub job_description: String,
    pub posted_at: String,
    pub applicants: String,
    pub location: String,
    pub company_name: String,
    pub company_url: String,
    pub company_overview: String,
    pub company_industry: String,
    pub company_size: String,
    pub company_headquarters: String,
    pub company_founded: String,
    pub company_website: String,
    pub company_phone: String,
    pub company_type: String,
    pub company_specialties: String,
    /// Unix seconds.
    pub scraped_at: u64,
}

impl JobDocument {
    pub fn from_record(record: &JobRecord, listing: &ListingEntry, scraped_at: u64) -> Self {
        let text = |field: &Option<String>| field.clone().unwrap_or_default();
        Self {
            engine_name: listing.engine_name.clone(),
            source_name: listing.source_name.clone(),
            search_url: listing.url.clone(),
            job_url: record.url.clone(),
            job_title: text(&record.title),
            job_description: text(&record.description),
            posted_at: text(&record.posted),
            applicants: text(&record.applicants),
            location: text(&record.location),
            company_name: text(&record.company),
            company_url: text(&record.company_url),
            company_overview: text(&record.company_overview),
            company_industry: text(&record.industry),
            company_size: text(&record.company_size),
            company_headquarters: text(&record.headquarters),
            company_founded: text(&record.founded),
            company_website: text(&record.website),
            company_phone: text(&record.phone),
            company_type: text(&record.company_type),
            company_specialties: text(&record.specialties),
            scraped_at,
        }
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Listings still to be harvested (pending, or failed on an earlier run).
    async fn pending_listings(&self) -> Result<Vec<ListingEntry>, StoreError>;

    /// Inserts or replaces documents keyed by job URL. Returns how many were written.
    async fn upsert_documents(&self, documents: &[JobDocument]) -> Result<usize, StoreError>;

    async fn mark_listing(
        &self,
        url: &str,
        status: ListingStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    listings: Vec<ListingEntry>,
    documents: Vec<JobDocument>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listings(listings: Vec<ListingEntry>) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                listings,
                documents: Vec::new(),
            }),
        }
    }

    pub async fn documents(&self) -> Vec<JobDocument> {
        self.state.read().await.documents.clone()
    }

    pub async fn listing(&self, url: &str) -> Option<ListingEntry> {
        self.state
            .read()
            .await
            .listings
            .iter()
            .find(|l| l.url == url)
            .cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn pending_listings(&self) -> Result<Vec<ListingEntry>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .listings
            .iter()
            .filter(|l| l.status != ListingStatus::Scraped)
            .cloned()
            .collect())
    }

    async fn upsert_documents(&self, documents: &[JobDocument]) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        for document in documents {
            match state.documents.iter_mut().find(|d| d.job_url == document.job_url) {
                Some(existing) => {
                    debug!(job_url = %document.job_url, "Replacing stored document");
                    *existing = document.clone();
                }
                None => state.documents.push(document.clone()),
            }
        }
        Ok(documents.len())
    }

    async fn mark_listing(
        &self,
        url: &str,
        status: ListingStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let listing = state
            .listings
            .iter_mut()
            .find(|l| l.url == url)
            .ok_or_else(|| StoreError::UnknownListing(url.to_string()))?;
        listing.status = status;
        listing.error = error;
        Ok(())
    }
}
