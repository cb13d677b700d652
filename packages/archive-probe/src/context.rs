//! Job-scoped context passed into every task.
//!
//! Replaces global state: job id, checkpoint location, metrics and the
//! cancellation signal travel together and are cloned into workers.

use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::error::CheckpointResult;
use crate::metrics::JobMetrics;
use crate::traits::checkpoint::CheckpointStore;

/// Shared state of one running job.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub output_tag: String,
    pub checkpoint: Arc<dyn CheckpointStore>,
    pub metrics: Arc<JobMetrics>,
    pub cancel: CancellationToken,
    completed: Arc<HashSet<String>>,
}

impl JobContext {
    /// Build a context, loading the checkpoint once up front.
    pub async fn new(
        output_tag: impl Into<String>,
        checkpoint: Arc<dyn CheckpointStore>,
        cancel: CancellationToken,
    ) -> CheckpointResult<Self> {
        let completed = checkpoint.load().await?;
        Ok(Self {
            job_id: Uuid::now_v7(),
            output_tag: output_tag.into(),
            checkpoint,
            metrics: Arc::new(JobMetrics::new()),
            cancel,
            completed: Arc::new(completed),
        })
    }

    /// Whether the checkpoint loaded at job start already has `key`.
    pub fn is_completed(&self, key: &str) -> bool {
        self.completed.contains(key)
    }

    /// Number of keys the checkpoint held at job start.
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Persist completion. Write failures are logged, not propagated.
    pub async fn mark_complete(&self, key: &str) {
        if let Err(e) = self.checkpoint.mark_complete(key).await {
            warn!(job_id = %self.job_id, key = %key, error = %e, "failed to write checkpoint");
        }
    }

    /// A copy whose cancellation token is a child of this one. Cancelling
    /// the child stops work scoped to it without cancelling the caller.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("output_tag", &self.output_tag)
            .field("completed", &self.completed.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoints::MemoryCheckpoint;

    #[tokio::test]
    async fn test_loads_completed_keys() {
        let store = Arc::new(MemoryCheckpoint::with_keys(["coord:a:0:1"]));
        let ctx = JobContext::new("t", store.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert!(ctx.is_completed("coord:a:0:1"));
        assert_eq!(ctx.completed_count(), 1);

        ctx.mark_complete("coord:b:0:1").await;
        assert!(store.contains("coord:b:0:1"));
        // The loaded snapshot does not change mid-job
        assert!(!ctx.is_completed("coord:b:0:1"));
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_reach_parent() {
        let ctx = JobContext::new("t", Arc::new(MemoryCheckpoint::new()), CancellationToken::new())
            .await
            .unwrap();
        let child = ctx.child();
        child.cancel.cancel();
        assert!(child.is_cancelled());
        assert!(!ctx.is_cancelled());

        let other = ctx.child();
        ctx.cancel.cancel();
        assert!(other.is_cancelled());
    }
}
