//! Concurrent harvest pipeline.
//!
//! [`ConcurrentHarvestPipeline`] runs three stages for one listing:
//! 1. **Discovery**: scroll the listing and collect detail URLs (sequential)
//! 2. **Primary fetch**: one task per URL behind an [`AdmissionGate`]
//! 3. **Enrichment**: one task per record with a company URL, behind a fresh gate
//!
//! Records never leave the orchestrating task. Fetch tasks return their
//! result tagged with the slot it belongs to, so output order is discovery
//! order and an enrichment task can only ever add to its record.

use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::HarvestConfig;
use crate::executor::AdmissionGate;
use crate::harvest::discovery::{Discovery, PageListing, UrlHarvester};
use crate::harvest::extractors::{CompanyExtractor, JobExtractor};
use crate::harvest::fetcher::{DetailFetcher, Enrichment};
use crate::harvest::traits::{FetchError, FetchFailure, PageCursor};
use crate::model::{
    AbortReason, CompanyRecord, DetailUrl, HarvestCounts, HarvestResult, JobRecord,
    ListingRequest, RecordState, UrlOutcome,
};
use crate::progress::{Milestone, NoopProgress, ProgressSink, ProgressTracker};
use crate::rate_gate::{BlockedError, RateGate};
use crate::session::SavedSession;
use crate::traits::Browser;

const KIND: &str = "jobs";

// ============================================================================
// Task results
// ============================================================================

enum Primary {
    NotAdmitted,
    Fetched(JobRecord),
    Dropped(FetchFailure),
}

enum Secondary {
    NotAdmitted,
    Done(Enrichment<CompanyRecord>),
}

/// State shared by every stage of one run.
struct Run {
    fetcher: Arc<DetailFetcher>,
    stop: CancellationToken,
    tracker: ProgressTracker,
    blocked: Option<BlockedError>,
}

impl Run {
    /// Records the first block and closes admission for the rest of the run.
    fn abort_blocked(&mut self, err: BlockedError) {
        self.stop.cancel();
        if self.blocked.is_none() {
            error!(url = %err.url, signal = %err.signal, "Blocked, aborting harvest");
            self.blocked = Some(err);
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Discovers, fetches and enriches the records behind one listing URL.
///
/// Each [`run`](Self::run) gets its own rate gate and its own child of the
/// stop token, so a block in one run does not poison the next. Cancelling
/// [`stop_token`](Self::stop_token) closes admission in every stage of the
/// current run; tasks already fetching finish on their own timeouts.
///
/// # Example
///
/// ```ignore
/// use job_harvester::{ConcurrentHarvestPipeline, HarvestConfig, ListingRequest};
///
/// let pipeline = ConcurrentHarvestPipeline::new(browser, HarvestConfig::default());
/// let request = ListingRequest::new("https://www.linkedin.com/jobs/search/?keywords=rust", 25, 3)?;
/// let result = pipeline.run(&request).await;
/// println!("{} records", result.records.len());
/// ```
pub struct ConcurrentHarvestPipeline {
    browser: Arc<dyn Browser>,
    config: HarvestConfig,
    session: Option<SavedSession>,
    progress: Arc<dyn ProgressSink>,
    stop: CancellationToken,
}

impl ConcurrentHarvestPipeline {
    /// Creates a pipeline, loading the saved session named in `config` if any.
    pub fn new(browser: Arc<dyn Browser>, config: HarvestConfig) -> Self {
        let session = config
            .session_file
            .as_deref()
            .and_then(SavedSession::load_optional);
        Self {
            browser,
            config,
            session,
            progress: Arc::new(NoopProgress),
            stop: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_session(mut self, session: Option<SavedSession>) -> Self {
        self.session = session;
        self
    }

    pub fn with_stop_token(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Harvests one listing. Never fails: problems show up as dropped
    /// records, counters and [`HarvestResult::aborted`].
    #[instrument(
        skip(self, request),
        fields(listing = request.listing_url(), limit = request.item_limit(), concurrency = request.concurrency())
    )]
    pub async fn run(&self, request: &ListingRequest) -> HarvestResult {
        let start = Instant::now();
        let gate = Arc::new(RateGate::new(&self.config.rate));
        let fetcher = DetailFetcher::new(Arc::clone(&self.browser), Arc::clone(&gate), &self.config.fetch)
            .with_session(self.session.clone());
        let mut run = Run {
            fetcher: Arc::new(fetcher),
            stop: self.stop.child_token(),
            tracker: ProgressTracker::new(Arc::clone(&self.progress)),
            blocked: None,
        };
        let mut result = HarvestResult::default();
        run.tracker.start(KIND, request.listing_url());

        // ====================================================================
        // Stage A: Discovery
        // ====================================================================

        info!("Starting discovery");
        let stage = Instant::now();
        let urls = match self.discover(&run, &gate, request).await {
            Ok(discovery) => discovery.urls,
            Err(blocked) => {
                run.abort_blocked(blocked);
                Vec::new()
            }
        };
        result.stats.discovery_duration_ms = elapsed_ms(stage);
        result.counts.discovered = urls.len();
        run.tracker.milestone(Milestone::DiscoveryComplete { found: urls.len() });
        info!(
            urls = urls.len(),
            duration_ms = result.stats.discovery_duration_ms,
            "Discovery completed"
        );

        // ====================================================================
        // Stage B: Primary fetch
        // ====================================================================

        let stage = Instant::now();
        let mut states = vec![RecordState::Discovered; urls.len()];
        let fetched = self
            .fetch_primary(&mut run, &urls, request.concurrency(), &mut states, &mut result.counts)
            .await;
        result.stats.fetch_duration_ms = elapsed_ms(stage);
        info!(
            succeeded = result.counts.succeeded,
            dropped = result.counts.dropped,
            not_admitted = result.counts.not_admitted,
            duration_ms = result.stats.fetch_duration_ms,
            "Primary fetch completed"
        );

        // ====================================================================
        // Stage C: Enrichment
        // ====================================================================

        let stage = Instant::now();
        let mut records: Vec<(usize, JobRecord)> = fetched;
        let before = records.len();
        self.enrich(&mut run, &mut records, request.concurrency(), &mut states, &mut result.counts)
            .await;
        debug_assert_eq!(before, records.len());
        result.stats.enrichment_duration_ms = elapsed_ms(stage);
        info!(
            enriched = result.counts.enriched,
            failed = result.counts.enrichment_failed,
            skipped = result.counts.enrichment_skipped,
            duration_ms = result.stats.enrichment_duration_ms,
            "Enrichment completed"
        );

        result.records = records
            .into_iter()
            .filter(|(slot, _)| states[*slot].is_included())
            .map(|(_, record)| record)
            .collect();
        result.outcomes = urls
            .into_iter()
            .zip(states)
            .map(|(url, state)| UrlOutcome { url, state })
            .collect();
        result.aborted = match run.blocked.take() {
            Some(err) => Some(AbortReason::Blocked {
                url: err.url,
                signal: err.signal,
            }),
            None if self.stop.is_cancelled() => Some(AbortReason::Stopped),
            None => None,
        };
        result.stats.total_duration_ms = elapsed_ms(start);

        run.tracker.milestone(Milestone::Done {
            records: result.records.len(),
        });
        run.tracker.complete(KIND, &result);
        info!(
            records = result.records.len(),
            aborted = ?result.aborted,
            duration_ms = result.stats.total_duration_ms,
            "Harvest finished"
        );
        result
    }

    async fn discover(
        &self,
        run: &Run,
        gate: &RateGate,
        request: &ListingRequest,
    ) -> Result<Discovery, BlockedError> {
        let discovery_config = &self.config.discovery;
        let navigation_timeout = self.config.fetch.navigation_timeout();

        let page = match tokio::time::timeout(
            navigation_timeout,
            self.browser.new_context(self.session.as_ref()),
        )
        .await
        {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                warn!(error = %e, "Could not open a context for the listing");
                return Ok(Discovery::default());
            }
            Err(_) => {
                warn!(timeout_ms = navigation_timeout.as_millis() as u64, "Opening listing context timed out");
                return Ok(Discovery::default());
            }
        };

        let harvester = UrlHarvester::new(discovery_config.clone()).with_stop(run.stop.clone());
        let outcome = {
            let mut listing = PageListing::new(
                PageCursor::new(page.as_ref(), gate, navigation_timeout),
                discovery_config,
            );
            harvester
                .harvest(&mut listing, request.listing_url(), request.item_limit(), Some(&run.tracker))
                .await
        };

        match tokio::time::timeout(navigation_timeout, page.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Failed to close listing context"),
            Err(_) => debug!("Closing listing context timed out"),
        }
        outcome
    }

    /// Returns fetched records tagged with their discovery slot, in slot order.
    async fn fetch_primary(
        &self,
        run: &mut Run,
        urls: &[DetailUrl],
        concurrency: usize,
        states: &mut [RecordState],
        counts: &mut HarvestCounts,
    ) -> Vec<(usize, JobRecord)> {
        let admission = Arc::new(AdmissionGate::new(concurrency, run.stop.clone()));
        let extractor = Arc::new(JobExtractor::new(&self.config.fetch));
        let policy = self.config.fetch.primary_policy();
        let mut slots: Vec<Option<JobRecord>> = vec![None; urls.len()];
        let mut tasks = JoinSet::new();
        debug!(urls = urls.len(), width = admission.width(), "Admitting primary fetches");

        for (slot, url) in urls.iter().enumerate() {
            states[slot] = RecordState::PrimaryFetchPending;
            let admission = Arc::clone(&admission);
            let fetcher = Arc::clone(&run.fetcher);
            let extractor = Arc::clone(&extractor);
            let stop = run.stop.clone();
            let url = url.clone();

            tasks.spawn(async move {
                let Some(_permit) = admission.admit().await else {
                    return (slot, Primary::NotAdmitted);
                };
                let outcome = match fetcher.fetch(url.as_str(), extractor.as_ref(), &policy).await {
                    Ok(record) => Primary::Fetched(record),
                    Err(failure) => {
                        if failure.is_blocked() {
                            // Close admission before our permit frees a slot.
                            stop.cancel();
                        }
                        Primary::Dropped(failure)
                    }
                };
                (slot, outcome)
            });
        }

        let total = urls.len();
        let mut done = 0;
        while let Some(joined) = tasks.join_next().await {
            done += 1;
            match joined {
                Ok((slot, Primary::Fetched(record))) => {
                    counts.attempted += 1;
                    counts.succeeded += 1;
                    states[slot] = RecordState::PrimaryFetched;
                    slots[slot] = Some(record);
                }
                Ok((slot, Primary::Dropped(failure))) => {
                    counts.attempted += 1;
                    counts.dropped += 1;
                    states[slot] = RecordState::PrimaryDropped;
                    warn!(url = %failure.url, attempts = failure.attempts, error = %failure.last, "Dropping record");
                    if let FetchError::Blocked(blocked) = failure.last {
                        run.abort_blocked(blocked);
                    }
                }
                Ok((slot, Primary::NotAdmitted)) => {
                    counts.not_admitted += 1;
                    states[slot] = RecordState::NotAdmitted;
                }
                Err(e) => error!(error = %e, "Primary fetch task failed"),
            }
            run.tracker.milestone(Milestone::Fetched { done, total });
        }

        // A task that panicked never reported back.
        for state in states.iter_mut() {
            if *state == RecordState::PrimaryFetchPending {
                counts.attempted += 1;
                counts.dropped += 1;
                *state = RecordState::PrimaryDropped;
            }
        }

        slots
            .into_iter()
            .enumerate()
            .filter_map(|(slot, record)| record.map(|record| (slot, record)))
            .collect()
    }

    /// Merges company details into `records` in place. Never removes a record.
    async fn enrich(
        &self,
        run: &mut Run,
        records: &mut [(usize, JobRecord)],
        concurrency: usize,
        states: &mut [RecordState],
        counts: &mut HarvestCounts,
    ) {
        let admission = Arc::new(AdmissionGate::new(concurrency, run.stop.clone()));
        let extractor = Arc::new(CompanyExtractor::new(&self.config.fetch));
        let policy = self.config.fetch.enrichment_policy();
        let mut tasks = JoinSet::new();

        for (index, (slot, record)) in records.iter().enumerate() {
            let Some(company_url) = record.company_url.clone() else {
                counts.enrichment_skipped += 1;
                states[*slot] = RecordState::EnrichmentSkipped;
                continue;
            };
            states[*slot] = RecordState::EnrichmentPending;
            let admission = Arc::clone(&admission);
            let fetcher = Arc::clone(&run.fetcher);
            let extractor = Arc::clone(&extractor);
            let stop = run.stop.clone();

            tasks.spawn(async move {
                let Some(_permit) = admission.admit().await else {
                    return (index, Secondary::NotAdmitted);
                };
                let outcome = fetcher
                    .fetch_enrichment(&company_url, extractor.as_ref(), &policy)
                    .await;
                if matches!(outcome, Enrichment::Blocked(_)) {
                    stop.cancel();
                }
                (index, Secondary::Done(outcome))
            });
        }

        let total = tasks.len();
        let mut done = 0;
        if total > 0 {
            info!(tasks = total, width = admission.width(), "Starting enrichment");
        }
        while let Some(joined) = tasks.join_next().await {
            done += 1;
            match joined {
                Ok((index, secondary)) => {
                    let (slot, record) = &mut records[index];
                    states[*slot] = match secondary {
                        Secondary::NotAdmitted => {
                            counts.enrichment_skipped += 1;
                            RecordState::EnrichmentSkipped
                        }
                        Secondary::Done(Enrichment::Found(company)) => {
                            counts.enrichment_attempted += 1;
                            counts.enriched += 1;
                            record.merge_company(company);
                            RecordState::Enriched
                        }
                        Secondary::Done(Enrichment::Unavailable) => {
                            counts.enrichment_attempted += 1;
                            counts.enrichment_failed += 1;
                            RecordState::EnrichmentSkipped
                        }
                        Secondary::Done(Enrichment::Blocked(blocked)) => {
                            counts.enrichment_attempted += 1;
                            counts.enrichment_failed += 1;
                            run.abort_blocked(blocked);
                            RecordState::EnrichmentSkipped
                        }
                    };
                }
                Err(e) => error!(error = %e, "Enrichment task failed"),
            }
            run.tracker.milestone(Milestone::Enriched { done, total });
        }

        // A panicked task leaves its record exactly as Stage B produced it.
        for (slot, _) in records.iter() {
            if states[*slot] == RecordState::EnrichmentPending {
                counts.enrichment_attempted += 1;
                counts.enrichment_failed += 1;
                states[*slot] = RecordState::EnrichmentSkipped;
            }
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscoveryConfig, FetchConfig, RateConfig};
    use crate::progress::{ChannelProgress, ProgressEvent};
    use crate::testing::{FakeBrowser, FakePage};
    use serde_json::json;
    use std::time::Duration;

    const LISTING: &str = "https://www.example.com/jobs/search/?keywords=rust";
    const COMPANY_LINK: &str = "a[href*=\"/company/\"]";
    const ACME: &str = "https://www.example.com/company/acme";
    const ACME_ABOUT: &str = "https://www.example.com/company/acme/about/";

    fn job_url(n: usize) -> String {
        format!("https://www.example.com/jobs/view/{n}")
    }

    fn config() -> HarvestConfig {
        HarvestConfig {
            discovery: DiscoveryConfig {
                initial_settle_ms: 0,
                scroll_settle_ms: 0,
                stall_rounds: 1,
                max_rounds: 3,
                ..DiscoveryConfig::default()
            },
            fetch: FetchConfig {
                backoff_ms: 0,
                about_settle_ms: 0,
                navigation_timeout_ms: 1_000,
                company_host: "example.com".into(),
                ..FetchConfig::default()
            },
            rate: RateConfig {
                min_spacing_ms: 0,
                ..RateConfig::default()
            },
            ..HarvestConfig::default()
        }
    }

    /// A listing rendering `n` job URLs at once, each backed by `page(i)`.
    fn browser_with_jobs(n: usize, page: impl Fn(usize) -> FakePage) -> FakeBrowser {
        let browser = FakeBrowser::new();
        browser.add_page(LISTING, FakePage::listing(vec![(1..=n).map(job_url).collect()]));
        for i in 1..=n {
            browser.add_page(&job_url(i), page(i));
        }
        browser
    }

    fn pipeline(browser: &FakeBrowser, config: HarvestConfig) -> ConcurrentHarvestPipeline {
        ConcurrentHarvestPipeline::new(Arc::new(browser.clone()), config)
    }

    fn request(limit: usize, concurrency: usize) -> ListingRequest {
        ListingRequest::new(LISTING, limit, concurrency).unwrap()
    }

    fn urls(result: &HarvestResult) -> Vec<String> {
        result.records.iter().map(|r| r.url.clone()).collect()
    }

    #[tokio::test]
    async fn test_records_follow_discovery_order_not_completion_order() {
        let browser = browser_with_jobs(3, |i| {
            FakePage::job(&format!("Job {i}")).with_latency(Duration::from_millis(60 - 30 * (i as u64 - 1)))
        });

        let result = pipeline(&browser, config()).run(&request(3, 3)).await;

        assert_eq!(urls(&result), vec![job_url(1), job_url(2), job_url(3)]);
        assert_eq!(result.counts.discovered, 3);
        assert_eq!(result.counts.succeeded, 3);
        assert_eq!(result.counts.enrichment_skipped, 3);
        assert!(result.aborted.is_none());
        assert!(result.outcomes.iter().all(|o| o.state == RecordState::EnrichmentSkipped));
    }

    #[tokio::test]
    async fn test_failed_primary_is_dropped_after_retries() {
        let browser = browser_with_jobs(3, |i| {
            let page = FakePage::job(&format!("Job {i}"));
            if i == 2 {
                page.failing_first(usize::MAX)
            } else {
                page
            }
        });

        let result = pipeline(&browser, config()).run(&request(3, 2)).await;

        assert_eq!(urls(&result), vec![job_url(1), job_url(3)]);
        assert_eq!(result.counts.attempted, 3);
        assert_eq!(result.counts.succeeded, 2);
        assert_eq!(result.counts.dropped, 1);
        // One attempt plus two retries.
        assert_eq!(browser.navigations(&job_url(2)), 3);
        assert_eq!(result.outcomes[1].state, RecordState::PrimaryDropped);
    }

    #[tokio::test]
    async fn test_failed_enrichment_keeps_every_record() {
        // Company pages are never registered, so every enrichment fails.
        let browser = browser_with_jobs(3, |i| {
            FakePage::job(&format!("Job {i}")).with_attr(COMPANY_LINK, "href", &format!("/company/c{i}"))
        });

        let result = pipeline(&browser, config()).run(&request(3, 3)).await;

        assert_eq!(result.records.len(), 3);
        assert!(result.records.iter().all(|r| !r.is_enriched()));
        assert_eq!(result.counts.enrichment_attempted, 3);
        assert_eq!(result.counts.enrichment_failed, 3);
        assert_eq!(result.counts.succeeded, 3);
        assert_eq!(
            result.records[0].company_url.as_deref(),
            Some("https://www.example.com/company/c1")
        );
    }

    #[tokio::test]
    async fn test_enrichment_merges_company_fields() {
        let browser = browser_with_jobs(1, |_| {
            FakePage::job("Rust Engineer").with_attr(COMPANY_LINK, "href", "/company/acme/")
        });
        browser.add_page(ACME, FakePage::default().with_text("h1", "Acme"));
        browser.add_page(
            ACME_ABOUT,
            FakePage::default()
                .with_script("querySelectorAll('section')", json!(["Anvils since 1949."]))
                .with_script(
                    "querySelectorAll('dl')",
                    json!([{"label": "industry", "value": "Manufacturing", "href": null}]),
                ),
        );

        let result = pipeline(&browser, config()).run(&request(1, 1)).await;

        let record = &result.records[0];
        assert_eq!(record.title.as_deref(), Some("Rust Engineer"));
        assert_eq!(record.company.as_deref(), Some("Acme"));
        assert_eq!(record.company_overview.as_deref(), Some("Anvils since 1949."));
        assert_eq!(record.industry.as_deref(), Some("Manufacturing"));
        assert_eq!(result.counts.enriched, 1);
        assert_eq!(result.outcomes[0].state, RecordState::Enriched);
    }

    #[tokio::test]
    async fn test_enrichment_timeout_counts_one_failure() {
        let browser = browser_with_jobs(1, |_| {
            FakePage::job("Rust Engineer").with_attr(COMPANY_LINK, "href", ACME)
        });
        browser.add_page(
            ACME,
            FakePage::default()
                .with_text("h1", "Acme")
                .with_latency(Duration::from_millis(300)),
        );
        let mut config = config();
        config.fetch.navigation_timeout_ms = 50;

        let result = pipeline(&browser, config).run(&request(1, 1)).await;

        assert_eq!(result.records.len(), 1);
        assert!(!result.records[0].is_enriched());
        assert_eq!(result.counts.succeeded, 1);
        assert_eq!(result.counts.dropped, 0);
        assert_eq!(result.counts.enrichment_attempted, 1);
        assert_eq!(result.counts.enrichment_failed, 1);
        // One attempt plus one retry.
        assert_eq!(browser.navigations(ACME), 2);
    }

    #[tokio::test]
    async fn test_empty_listing_yields_empty_result() {
        let browser = browser_with_jobs(0, |_| FakePage::default());

        let result = pipeline(&browser, config()).run(&request(5, 3)).await;

        assert!(result.records.is_empty());
        assert_eq!(result.counts, HarvestCounts::default());
        assert!(result.aborted.is_none());
        assert_eq!(browser.contexts_created(), 1);
    }

    #[tokio::test]
    async fn test_login_wall_aborts_remaining_fetches() {
        let browser = browser_with_jobs(3, |i| {
            let page = FakePage::job(&format!("Job {i}"));
            if i == 1 {
                page.redirecting_to("https://www.example.com/authwall?trk=x")
            } else {
                page
            }
        });

        let result = pipeline(&browser, config()).run(&request(3, 1)).await;

        assert!(result.is_blocked());
        assert!(result.records.is_empty());
        assert_eq!(browser.navigations(&job_url(1)), 1);
        assert_eq!(browser.navigations(&job_url(2)), 0);
        assert_eq!(result.counts.not_admitted, 2);
        assert_eq!(result.outcomes[2].state, RecordState::NotAdmitted);
    }

    #[tokio::test]
    async fn test_job_title_containing_sign_in_letters_is_harvested() {
        let browser = browser_with_jobs(2, |i| {
            let title = if i == 1 { "Design Intern" } else { "Design Instructor" };
            FakePage::job(title).with_title(&format!("{title} | Acme | Example"))
        });

        let result = pipeline(&browser, config()).run(&request(2, 2)).await;

        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[0].title.as_deref(), Some("Design Intern"));
        assert!(result.aborted.is_none());
        assert_eq!(result.counts.not_admitted, 0);
    }

    #[tokio::test]
    async fn test_unresponsive_listing_ends_discovery() {
        let browser = FakeBrowser::new();
        browser.add_page(LISTING, FakePage::listing(vec![vec![job_url(1)]]).hanging());
        browser.add_page(&job_url(1), FakePage::job("Job 1"));
        let mut config = config();
        config.discovery.list_wait_ms = 100;
        config.fetch.navigation_timeout_ms = 200;

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline(&browser, config).run(&request(5, 2)),
        )
        .await
        .expect("harvest should finish despite an unresponsive listing");

        assert!(result.records.is_empty());
        assert_eq!(result.counts.discovered, 0);
        assert!(result.aborted.is_none());
        assert_eq!(browser.open_contexts(), 0);
    }

    #[tokio::test]
    async fn test_records_match_included_outcomes() {
        let browser = browser_with_jobs(3, |i| {
            let page = FakePage::job(&format!("Job {i}"));
            if i == 3 {
                page.failing_first(usize::MAX)
            } else {
                page
            }
        });

        let result = pipeline(&browser, config()).run(&request(3, 3)).await;

        let included: Vec<&str> = result
            .outcomes
            .iter()
            .filter(|o| o.state.is_included())
            .map(|o| o.url.as_str())
            .collect();
        assert_eq!(urls(&result), included);
        assert_eq!(result.outcomes[2].state, RecordState::PrimaryDropped);
    }

    #[tokio::test]
    async fn test_stop_lets_in_flight_fetch_finish() {
        let browser = browser_with_jobs(3, |i| {
            FakePage::job(&format!("Job {i}")).with_latency(Duration::from_millis(150))
        });
        let pipeline = pipeline(&browser, config());
        let stop = pipeline.stop_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.cancel();
        });

        let result = pipeline.run(&request(3, 1)).await;

        assert_eq!(urls(&result), vec![job_url(1)]);
        assert_eq!(result.counts.not_admitted, 2);
        assert_eq!(result.aborted, Some(AbortReason::Stopped));
        assert_eq!(browser.open_contexts(), 0);
    }

    #[tokio::test]
    async fn test_open_contexts_never_exceed_concurrency() {
        let browser = browser_with_jobs(8, |i| {
            FakePage::job(&format!("Job {i}")).with_latency(Duration::from_millis(20))
        });

        let result = pipeline(&browser, config()).run(&request(8, 2)).await;

        assert_eq!(result.records.len(), 8);
        assert!(browser.peak_open() <= 2, "peak was {}", browser.peak_open());
        assert_eq!(browser.open_contexts(), 0);
    }

    #[tokio::test]
    async fn test_progress_is_reported_in_order() {
        let browser = browser_with_jobs(2, |i| FakePage::job(&format!("Job {i}")));
        let (sink, mut rx) = ChannelProgress::new();

        pipeline(&browser, config())
            .with_progress(Arc::new(sink))
            .run(&request(2, 2))
            .await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(ProgressEvent::Started { .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Completed { records: 2, .. })));
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last(), Some(&100));
    }
}
