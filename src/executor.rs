use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Counting admission control for one pipeline stage.
///
/// At most `width` permits are out at once; a permit travels with the task it
/// admitted and is released when the task drops it. Once the stop token is
/// cancelled no further permits are handed out, while tasks already holding
/// one run to completion.
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    stop: CancellationToken,
    width: usize,
}

impl AdmissionGate {
    pub fn new(width: usize, stop: CancellationToken) -> Self {
        let width = width.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(width)),
            stop,
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Waits for a free slot. Returns `None` once the stop token is raised,
    /// including while waiting.
    #[instrument(skip(self), level = "trace")]
    pub async fn admit(&self) -> Option<OwnedSemaphorePermit> {
        if self.stop.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => {
                debug!("Stop requested, admission closed");
                None
            }
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_gate_bounds_concurrency() {
        let gate = AdmissionGate::new(2, CancellationToken::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = tokio::task::JoinSet::new();

        for _ in 0..6 {
            let permit = gate.admit().await.unwrap();
            let active = active.clone();
            let peak = peak.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while tasks.join_next().await.is_some() {}

        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_closes_admission_while_waiting() {
        let stop = CancellationToken::new();
        let gate = AdmissionGate::new(1, stop.clone());
        let held = gate.admit().await.unwrap();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stop.cancel();
        });

        assert!(gate.admit().await.is_none());
        assert!(gate.is_stopped());
        drop(held);
        stopper.await.unwrap();
    }
}
