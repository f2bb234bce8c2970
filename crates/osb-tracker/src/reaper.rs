//! Background task that expires finished operation records.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::tracker::OperationTracker;

/// Periodically calls [`OperationTracker::reap_expired`].
pub struct Reaper {
    tracker: Arc<dyn OperationTracker>,
    interval: Duration,
}

impl Reaper {
    pub fn new(tracker: Arc<dyn OperationTracker>, interval: Duration) -> Self {
        Self { tracker, interval }
    }

    /// Run the reap loop until the shutdown signal changes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "operation reaper started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let removed = self.tracker.reap_expired().await;
                    debug!(removed, "reap pass finished");
                }
                _ = shutdown.changed() => {
                    info!("operation reaper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTracker;
    use osb_core::{OperationKind, OperationOutcome};
    use uuid::Uuid;

    #[tokio::test]
    async fn reaper_expires_records_and_stops_on_shutdown() {
        // Zero retention: records expire as soon as they finish.
        let tracker = Arc::new(MemoryTracker::new(Duration::ZERO));
        let token = tracker
            .begin(Uuid::new_v4(), None, OperationKind::Provision)
            .await
            .unwrap();
        tracker
            .complete(&token, OperationOutcome::succeeded("created"))
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let reaper = Reaper::new(tracker.clone(), Duration::from_millis(10));
        let handle = tokio::spawn(async move { reaper.run(rx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(tracker.is_empty().await);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
