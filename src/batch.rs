//! Drains the listing queue through the pipeline, one listing at a time.

use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::harvest::ConcurrentHarvestPipeline;
use crate::model::{AbortReason, ListingRequest};
use crate::store::{unix_now, JobDocument, ListingEntry, ListingStatus, RecordStore, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Listings the runner started on.
    pub listings: usize,
    pub scraped: usize,
    pub failed: usize,
    pub documents: usize,
    /// The site walled us; remaining listings were left pending.
    pub blocked: bool,
    pub stopped: bool,
}

pub struct BatchRunner<S> {
    pipeline: ConcurrentHarvestPipeline,
    store: Arc<S>,
}

impl<S> BatchRunner<S>
where
    S: RecordStore,
{
    pub fn new(pipeline: ConcurrentHarvestPipeline, store: Arc<S>) -> Self {
        Self { pipeline, store }
    }

    pub fn pipeline(&self) -> &ConcurrentHarvestPipeline {
        &self.pipeline
    }

    /// Harvests every pending listing. Only store failures are errors; a
    /// listing that yields nothing is marked failed and the batch moves on.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<BatchSummary, StoreError> {
        let listings = self.store.pending_listings().await?;
        let mut summary = BatchSummary::default();
        if listings.is_empty() {
            info!("No pending listings");
            return Ok(summary);
        }
        info!(listings = listings.len(), "Starting batch");

        let stop = self.pipeline.stop_token();
        let delay = self.pipeline.config().batch.listing_delay();

        for (index, listing) in listings.iter().enumerate() {
            if stop.is_cancelled() {
                summary.stopped = true;
                break;
            }
            if index > 0 && !delay.is_zero() {
                tokio::select! {
                    _ = stop.cancelled() => {
                        summary.stopped = true;
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            summary.listings += 1;
            info!(index = index + 1, total = listings.len(), url = %listing.url, "Processing listing");
            match self.harvest_listing(listing, &mut summary).await? {
                Some(AbortReason::Blocked { url, signal }) => {
                    error!(url = %url, signal = %signal, "Blocked, leaving the remaining listings pending");
                    summary.blocked = true;
                    break;
                }
                Some(AbortReason::Stopped) => {
                    summary.stopped = true;
                    break;
                }
                None => {}
            }
        }

        info!(
            listings = summary.listings,
            scraped = summary.scraped,
            failed = summary.failed,
            documents = summary.documents,
            "Batch finished"
        );
        Ok(summary)
    }

    async fn harvest_listing(
        &self,
        listing: &ListingEntry,
        summary: &mut BatchSummary,
    ) -> Result<Option<AbortReason>, StoreError> {
        let batch = &self.pipeline.config().batch;
        let request = match ListingRequest::new(listing.url.as_str(), batch.item_limit, batch.concurrency) {
            Ok(request) => request,
            Err(e) => {
                warn!(url = %listing.url, error = %e, "Rejecting listing");
                summary.failed += 1;
                self.store
                    .mark_listing(&listing.url, ListingStatus::Failed, Some(e.to_string()))
                    .await?;
                return Ok(None);
            }
        };

        let result = self.pipeline.run(&request).await;
        if result.records.is_empty() {
            let reason = match &result.aborted {
                Some(AbortReason::Blocked { signal, .. }) => format!("blocked: {signal}"),
                Some(AbortReason::Stopped) => return Ok(Some(AbortReason::Stopped)),
                None => "no records harvested".to_string(),
            };
            summary.failed += 1;
            self.store
                .mark_listing(&listing.url, ListingStatus::Failed, Some(reason))
                .await?;
            return Ok(result.aborted);
        }

        let scraped_at = unix_now();
        let documents: Vec<JobDocument> = result
            .records
            .iter()
            .map(|record| JobDocument::from_record(record, listing, scraped_at))
            .collect();
        summary.documents += self.store.upsert_documents(&documents).await?;
        summary.scraped += 1;
        self.store
            .mark_listing(&listing.url, ListingStatus::Scraped, None)
            .await?;
        info!(url = %listing.url, documents = documents.len(), "Listing stored");
        Ok(result.aborted)
    }
}
