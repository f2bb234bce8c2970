//! In-memory tracker.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use osb_core::{
    OperationKind, OperationOutcome, OperationRecord, OperationState, OperationToken, epoch_secs,
};

use crate::error::{TrackerError, TrackerResult};
use crate::tracker::OperationTracker;

#[derive(Default)]
struct Records {
    by_token: HashMap<OperationToken, OperationRecord>,
    /// Newest token per instance. Since `begin` drops finished records,
    /// this is also the only token per instance.
    by_instance: HashMap<Uuid, OperationToken>,
}

/// Tracker holding records in process memory.
pub struct MemoryTracker {
    retention: Duration,
    records: Mutex<Records>,
}

impl MemoryTracker {
    /// Create a tracker keeping finished records for `retention`.
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            records: Mutex::new(Records::default()),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.records.lock().await.by_token.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop records that finished at least `retention` before `now`
    /// (Unix seconds).
    pub async fn reap_at(&self, now: u64) -> usize {
        let retention = self.retention.as_secs();
        let mut records = self.records.lock().await;
        let expired: Vec<OperationToken> = records
            .by_token
            .values()
            .filter(|r| {
                r.completed_at
                    .is_some_and(|done| done.saturating_add(retention) <= now)
            })
            .map(|r| r.token.clone())
            .collect();

        for token in &expired {
            if let Some(record) = records.by_token.remove(token) {
                if records.by_instance.get(&record.instance_id) == Some(token) {
                    records.by_instance.remove(&record.instance_id);
                }
            }
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "expired operations reaped");
        }
        expired.len()
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(15 * 60))
    }
}

#[async_trait]
impl OperationTracker for MemoryTracker {
    async fn begin(
        &self,
        instance_id: Uuid,
        binding_id: Option<Uuid>,
        kind: OperationKind,
    ) -> TrackerResult<OperationToken> {
        let mut records = self.records.lock().await;

        if let Some(previous) = records.by_instance.get(&instance_id).cloned() {
            let active = records
                .by_token
                .get(&previous)
                .filter(|r| r.state == OperationState::InProgress)
                .map(|r| (r.kind, r.binding_id));
            if let Some((kind, binding_id)) = active {
                return Err(TrackerError::OperationInProgress {
                    kind,
                    token: previous,
                    binding_id,
                });
            }
            records.by_token.remove(&previous);
            debug!(%instance_id, operation = %previous, "finished operation superseded");
        }

        let token = OperationToken::generate();
        let record = OperationRecord {
            token: token.clone(),
            instance_id,
            binding_id,
            kind,
            state: OperationState::InProgress,
            description: None,
            started_at: epoch_secs(),
            completed_at: None,
        };
        records.by_token.insert(token.clone(), record);
        records.by_instance.insert(instance_id, token.clone());
        debug!(%instance_id, operation = %token, %kind, "operation started");
        Ok(token)
    }

    async fn complete(
        &self,
        token: &OperationToken,
        outcome: OperationOutcome,
    ) -> TrackerResult<OperationRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .by_token
            .get_mut(token)
            .ok_or_else(|| TrackerError::NotFound(token.to_string()))?;

        if record.state.is_terminal() {
            if record.reports(&outcome) {
                return Ok(record.clone());
            }
            error!(
                operation = %token,
                recorded = ?record.state,
                reported = ?outcome.state(),
                "operation completed twice with different outcomes"
            );
            return Err(TrackerError::ConflictingOutcome {
                token: token.clone(),
                recorded: record.state,
                reported: outcome.state(),
            });
        }

        record.state = outcome.state();
        record.description = outcome.description().map(str::to_string);
        record.completed_at = Some(epoch_secs());
        debug!(
            instance_id = %record.instance_id,
            operation = %token,
            state = ?record.state,
            "operation completed"
        );
        Ok(record.clone())
    }

    async fn status(&self, token: &OperationToken) -> TrackerResult<OperationRecord> {
        let records = self.records.lock().await;
        records
            .by_token
            .get(token)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(token.to_string()))
    }

    async fn latest(&self, instance_id: Uuid) -> TrackerResult<OperationRecord> {
        let records = self.records.lock().await;
        records
            .by_instance
            .get(&instance_id)
            .and_then(|token| records.by_token.get(token))
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(format!("no operation for instance {instance_id}")))
    }

    async fn reap_expired(&self) -> usize {
        self.reap_at(epoch_secs()).await
    }
}
