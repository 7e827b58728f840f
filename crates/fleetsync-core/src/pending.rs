//! Replay of queued local mutations.

use tracing::{debug, info, warn};

use crate::cloud::CloudClient;
use crate::context::SyncContext;
use crate::error::{CloudError, Result, SyncError};
use crate::local::RequestQueue;

/// Result of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingOutcome {
    /// Requests accepted by the cloud and removed from the queue.
    pub submitted: usize,
    /// Requests that failed and stay queued.
    pub failed: usize,
    /// Requests still queued after the pass.
    pub remaining: usize,
}

/// Submits queued requests to the cloud, oldest first.
pub struct PendingRequests<'a> {
    ctx: &'a SyncContext,
}

impl<'a> PendingRequests<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Replay every queued request.
    ///
    /// A rejected request stays queued with its attempt counter bumped. An
    /// unauthorized response stops the pass and is returned as an error.
    pub async fn execute(&self) -> Result<PendingOutcome> {
        let queue = self.ctx.store.pending().await?;
        if queue.is_empty() {
            return Ok(PendingOutcome::default());
        }
        debug!("Replaying {} queued requests", queue.len());

        let mut outcome = PendingOutcome::default();
        for request in &queue {
            match self.ctx.cloud.submit(request).await {
                Ok(()) => {
                    self.ctx.store.complete(request.id).await?;
                    outcome.submitted += 1;
                }
                Err(CloudError::Unauthorized) => {
                    warn!("Replay stopped: cloud rejected the credentials");
                    return Err(SyncError::Cloud(CloudError::Unauthorized));
                }
                Err(e) => {
                    warn!(
                        "Request {} ({}) failed: {}",
                        request.idempotency_key,
                        request.kind.as_str(),
                        e
                    );
                    self.ctx.store.record_failure(request.id).await?;
                    outcome.failed += 1;
                }
            }
        }

        outcome.remaining = queue.len() - outcome.submitted;
        info!(
            "Replayed {} requests, {} remain queued",
            outcome.submitted, outcome.remaining
        );
        Ok(outcome)
    }
}
