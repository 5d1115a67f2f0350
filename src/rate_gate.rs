//! Navigation spacing and the anti-automation circuit breaker.

use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, warn};

use crate::config::RateConfig;
use crate::traits::PageState;

/// The site refused us; retrying only burns budget.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Blocked at {url}: {signal}")]
pub struct BlockedError {
    pub url: String,
    pub signal: String,
}

/// Shared by every navigation of one harvest.
pub struct RateGate {
    min_spacing: Duration,
    url_markers: Vec<String>,
    title_markers: Vec<(String, Regex)>,
    next_slot: Mutex<Option<Instant>>,
    tripped: AtomicBool,
    trip_reason: Mutex<Option<BlockedError>>,
}

impl RateGate {
    pub fn new(config: &RateConfig) -> Self {
        Self {
            min_spacing: config.min_spacing(),
            url_markers: config.blocked_url_markers.clone(),
            title_markers: config
                .blocked_title_markers
                .iter()
                .filter_map(|m| title_pattern(m))
                .collect(),
            next_slot: Mutex::new(None),
            tripped: AtomicBool::new(false),
            trip_reason: Mutex::new(None),
        }
    }

    /// Waits for this caller's navigation slot.
    ///
    /// Slots are reserved under the lock and slept on outside it, so
    /// concurrent callers end up `min_spacing` apart instead of bunching.
    pub async fn before_navigate(&self) -> Result<(), BlockedError> {
        self.check_open()?;

        let slot = {
            let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.min_spacing);
            slot
        };

        if slot > Instant::now() {
            debug!(wait_ms = (slot - Instant::now()).as_millis() as u64, "Spacing navigation");
            sleep_until(slot).await;
        }

        // The breaker may have tripped while we waited.
        self.check_open()
    }

    /// Inspects where a navigation landed; trips the breaker on a wall.
    pub fn after_navigate(&self, state: &PageState) -> Result<(), BlockedError> {
        if let Some(signal) = self.blocked_signal(state) {
            let err = BlockedError {
                url: state.final_url.clone(),
                signal,
            };
            warn!(url = %err.url, signal = %err.signal, "Blocked signal detected, tripping breaker");
            self.trip(err.clone());
            return Err(err);
        }
        Ok(())
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), BlockedError> {
        if !self.is_tripped() {
            return Ok(());
        }
        let reason = self
            .trip_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        Err(reason.unwrap_or_else(|| BlockedError {
            url: String::new(),
            signal: "breaker open".to_string(),
        }))
    }

    fn trip(&self, err: BlockedError) {
        let mut reason = self.trip_reason.lock().unwrap_or_else(|e| e.into_inner());
        if reason.is_none() {
            *reason = Some(err);
        }
        self.tripped.store(true, Ordering::SeqCst);
    }

    fn blocked_signal(&self, state: &PageState) -> Option<String> {
        let path = url::Url::parse(&state.final_url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| state.final_url.clone());

        if let Some(marker) = self.url_markers.iter().find(|m| path.contains(m.as_str())) {
            return Some(format!("redirected to {marker}"));
        }

        let title = state.title.as_deref()?;
        self.title_markers
            .iter()
            .find(|(_, pattern)| pattern.is_match(title))
            .map(|(marker, _)| format!("page title contains \"{marker}\""))
    }
}

/// Case-insensitive whole-word match, so "sign in" does not fire on "Design Intern".
fn title_pattern(marker: &str) -> Option<(String, Regex)> {
    let marker = marker.trim().to_lowercase();
    if marker.is_empty() {
        return None;
    }
    match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&marker))) {
        Ok(pattern) => Some((marker, pattern)),
        Err(e) => {
            warn!(marker = %marker, error = %e, "Ignoring unusable title marker");
            None
        }
    }
}
