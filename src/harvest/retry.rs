//! Retry policy shared by the primary and enrichment stages.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::harvest::traits::{FetchError, FetchFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * attempt`, for the attempt that just failed (1-based).
    Linear(Duration),
}

impl Backoff {
    pub fn delay(&self, failed_attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear(base) => base.saturating_mul(failed_attempt.max(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Runs `op` until it succeeds or attempts run out.
    ///
    /// Blocked errors end the loop at once. `op` receives the 1-based attempt
    /// number.
    pub async fn run<T, F, Fut>(&self, url: &str, mut op: F) -> Result<T, FetchFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_blocked() || attempt >= self.max_attempts() => {
                    return Err(FetchFailure {
                        url: url.to_string(),
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        url,
                        attempt,
                        max_attempts = self.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
