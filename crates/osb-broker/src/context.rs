//! Per-request cancellation and deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{BrokerError, BrokerResult};

/// Cancellation signal and optional deadline supplied with a mutating call.
///
/// Bounds only the part of a call that runs before work is dispatched, plus
/// a synchronous caller's wait for the result. Dispatched provisioner work
/// always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A context cancelled together with `token`.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Cancelled)` once the token fired or the deadline passed.
    pub fn check(&self) -> BrokerResult<()> {
        if self.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }
        Ok(())
    }

    /// Drive `fut` unless the context is cancelled or expires first.
    pub async fn run<T, F>(&self, fut: F) -> BrokerResult<T>
    where
        F: Future<Output = BrokerResult<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BrokerError::Cancelled),
            _ = expired(self.deadline) => Err(BrokerError::Cancelled),
            result = fut => result,
        }
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_completes_when_not_cancelled() {
        let ctx = RequestContext::new();
        let value = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn cancelled_context_rejects_work() {
        let ctx = RequestContext::new();
        ctx.cancel();
        assert!(matches!(ctx.check(), Err(BrokerError::Cancelled)));
        let result = ctx.run(async { Ok(()) }).await;
        assert!(matches!(result, Err(BrokerError::Cancelled)));
    }

    #[tokio::test]
    async fn deadline_interrupts_pending_work() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(20));
        let result: BrokerResult<()> = ctx.run(std::future::pending()).await;
        assert!(matches!(result, Err(BrokerError::Cancelled)));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn shared_token_cancels_context() {
        let token = CancellationToken::new();
        let ctx = RequestContext::with_cancellation(token.clone());
        assert!(ctx.check().is_ok());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
