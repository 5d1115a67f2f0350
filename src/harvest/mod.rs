//! Harvest module - listing discovery, detail fetching and the concurrent pipeline.
//!
//! - **Discovery**: [`UrlHarvester`] scrolls a listing into a deduplicated URL list
//! - **Fetching**: [`DetailFetcher`] with a [`RecordExtractor`] per entity kind
//! - **Retry**: [`RetryPolicy`] shared by both fetch stages
//! - **Pipeline**: [`ConcurrentHarvestPipeline`] ties the stages together

pub mod discovery;
pub mod extractors;
pub mod fetcher;
pub mod pipeline;
pub mod retry;
pub mod traits;

// Re-export commonly used types
pub use discovery::{Discovery, ListingSource, PageListing, ScrollOutcome, UrlHarvester};
pub use extractors::{CompanyExtractor, JobExtractor};
pub use fetcher::{DetailFetcher, Enrichment};
pub use pipeline::ConcurrentHarvestPipeline;
pub use retry::{Backoff, RetryPolicy};
pub use traits::{FetchError, FetchFailure, PageCursor, RecordExtractor};
