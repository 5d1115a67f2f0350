//! Progress reporting for one harvest.
//!
//! The pipeline reports [`Milestone`]s; [`ProgressTracker`] turns them into a
//! percent exactly once and keeps it monotonically non-decreasing before
//! handing it to the caller's [`ProgressSink`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::model::HarvestResult;

/// Receives lifecycle events for one harvest. Implementations must be cheap;
/// they are called from the orchestrating task.
pub trait ProgressSink: Send + Sync {
    fn on_start(&self, kind: &str, target: &str);
    fn on_progress(&self, message: &str, percent: u8);
    fn on_complete(&self, kind: &str, result: &HarvestResult);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_start(&self, _kind: &str, _target: &str) {}
    fn on_progress(&self, _message: &str, _percent: u8) {}
    fn on_complete(&self, _kind: &str, _result: &HarvestResult) {}
}

/// Emits every event as a `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_start(&self, kind: &str, target: &str) {
        info!(kind, target, "Harvest started");
    }

    fn on_progress(&self, message: &str, percent: u8) {
        info!(percent, "{}", message);
    }

    fn on_complete(&self, kind: &str, result: &HarvestResult) {
        info!(
            kind,
            records = result.records.len(),
            dropped = result.counts.dropped,
            enriched = result.counts.enriched,
            "Harvest complete"
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started { kind: String, target: String },
    Progress { message: String, percent: u8 },
    Completed { kind: String, records: usize },
}

/// Forwards events over a channel, e.g. to a UI thread.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn on_start(&self, kind: &str, target: &str) {
        let _ = self.tx.send(ProgressEvent::Started {
            kind: kind.to_string(),
            target: target.to_string(),
        });
    }

    fn on_progress(&self, message: &str, percent: u8) {
        let _ = self.tx.send(ProgressEvent::Progress {
            message: message.to_string(),
            percent,
        });
    }

    fn on_complete(&self, kind: &str, result: &HarvestResult) {
        let _ = self.tx.send(ProgressEvent::Completed {
            kind: kind.to_string(),
            records: result.records.len(),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    ListingLoaded,
    DiscoveryComplete { found: usize },
    Fetched { done: usize, total: usize },
    Enriched { done: usize, total: usize },
    Done { records: usize },
}

impl Milestone {
    /// Discovery owns 0–30, detail fetching 30–70, enrichment 70–100.
    pub fn percent(&self) -> u8 {
        match *self {
            Milestone::ListingLoaded => 10,
            Milestone::DiscoveryComplete { .. } => 30,
            Milestone::Fetched { done, total } => 30 + scaled(done, total, 40),
            Milestone::Enriched { done, total } => 70 + scaled(done, total, 29),
            Milestone::Done { .. } => 100,
        }
    }

    pub fn message(&self) -> String {
        match *self {
            Milestone::ListingLoaded => "Loaded listing".to_string(),
            Milestone::DiscoveryComplete { found } => format!("Found {found} detail URLs"),
            Milestone::Fetched { done, total } => format!("Fetched {done}/{total} details"),
            Milestone::Enriched { done, total } => format!("Enriched {done}/{total} records"),
            Milestone::Done { records } => format!("Harvest complete: {records} records"),
        }
    }
}

fn scaled(done: usize, total: usize, span: u8) -> u8 {
    if total == 0 {
        return span;
    }
    let done = done.min(total);
    ((done * span as usize) / total) as u8
}

/// Per-harvest wrapper that owns the percent math.
pub struct ProgressTracker {
    sink: Arc<dyn ProgressSink>,
    high_water: AtomicU8,
}

impl ProgressTracker {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            high_water: AtomicU8::new(0),
        }
    }

    pub fn start(&self, kind: &str, target: &str) {
        self.sink.on_start(kind, target);
    }

    pub fn milestone(&self, milestone: Milestone) {
        let candidate = milestone.percent();
        let previous = self.high_water.fetch_max(candidate, Ordering::SeqCst);
        self.sink
            .on_progress(&milestone.message(), previous.max(candidate));
    }

    pub fn complete(&self, kind: &str, result: &HarvestResult) {
        self.sink.on_complete(kind, result);
    }
}
