pub mod batch;
pub mod canonical;
pub mod config;
pub mod executor;
pub mod harvest;
pub mod model;
pub mod progress;
pub mod rate_gate;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-export common types for convenience
pub use batch::{BatchRunner, BatchSummary};
pub use config::{ConfigError, HarvestConfig};
pub use executor::*;
pub use harvest::{ConcurrentHarvestPipeline, DetailFetcher, UrlHarvester};
pub use model::*;
pub use progress::{Milestone, ProgressSink, ProgressTracker};
pub use rate_gate::{BlockedError, RateGate};
pub use session::SavedSession;
pub use store::{JobDocument, ListingEntry, ListingStatus, MemoryStore, RecordStore, StoreError};
pub use traits::*;
