//! Result sink contract.

use async_trait::async_trait;

use crate::error::SinkError;
use crate::types::matches::SinkRecord;

/// Destination for extracted matches and crawl results.
///
/// Must be safe under concurrent calls and must never block
/// indefinitely: apply internal bounded buffering or return
/// `SinkError::Rejected { retryable: true }`. The engine never locks
/// around a sink; it only bounds how fast the sink is driven.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn accept(&self, record: SinkRecord) -> Result<(), SinkError>;

    /// Flush buffered records. Called once when a job finishes.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
