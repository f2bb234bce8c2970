//! Background worker pool for accepted operations.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

/// Runs operation jobs on independent tasks, at most
/// `max_concurrent` at a time.
///
/// Spawned jobs are detached from the request that created them: dropping
/// the returned handle does not cancel the job.
#[derive(Clone)]
pub struct Dispatcher {
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight count when a job finishes or panics.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Dispatcher {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn a job. It waits for a free slot before running.
    pub fn spawn<F, T>(&self, job: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let in_flight = InFlight(self.in_flight.clone());
        tokio::spawn(async move {
            let _in_flight = in_flight;
            // Never closed, so this only yields `None` if that changes.
            let _permit = permits.acquire_owned().await.ok();
            job.await
        })
    }

    /// Jobs spawned and not yet finished, queued ones included.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for in-flight jobs to finish.
    ///
    /// Returns the number of jobs still running when the wait ended.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        info!(in_flight = self.in_flight(), ?timeout, "dispatcher draining");
        let deadline = Instant::now() + timeout;
        let poll_interval = Duration::from_millis(20);

        loop {
            let remaining = self.in_flight();
            if remaining == 0 {
                info!("all operations drained");
                return 0;
            }
            if Instant::now() >= deadline {
                warn!(remaining, "drain timeout expired with operations still running");
                return remaining;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(64)
    }
}
