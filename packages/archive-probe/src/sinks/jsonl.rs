//! JSON-lines result sink.

use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::error::SinkError;
use crate::traits::sink::ResultSink;
use crate::types::matches::SinkRecord;

type Writer = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// Writes each record as one JSON line.
pub struct JsonLinesSink {
    writer: Mutex<Writer>,
}

impl JsonLinesSink {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(Box::new(writer))),
        }
    }

    /// Append to `path`, creating it if needed.
    pub async fn append(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::new(file))
    }

    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl ResultSink for JsonLinesSink {
    async fn accept(&self, record: SinkRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.writer.lock().await.write_all(&line).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }
}
