//! File-backed completion log.
//!
//! One key per line, appended as work completes. Survives crashes and
//! cancellation; a restarted job loads the log and skips listed keys.

use async_trait::async_trait;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{CheckpointError, CheckpointResult};
use crate::traits::checkpoint::CheckpointStore;

/// Append-only checkpoint log.
///
/// Writes run on the blocking pool; the mutex is only held inside the
/// blocking closure, never across an await.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpoint {
    async fn load(&self) -> CheckpointResult<HashSet<String>> {
        let path = self.path.clone();
        let keys = tokio::task::spawn_blocking(move || -> CheckpointResult<HashSet<String>> {
            let file = match std::fs::File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashSet::new()),
                Err(e) => return Err(e.into()),
            };
            let mut keys = HashSet::new();
            for line in BufReader::new(file).lines() {
                let line = line?;
                let key = line.trim();
                if !key.is_empty() {
                    keys.insert(key.to_string());
                }
            }
            Ok(keys)
        })
        .await
        .map_err(|e| CheckpointError::Task(e.to_string()))??;

        debug!(path = %self.path.display(), keys = keys.len(), "checkpoint loaded");
        Ok(keys)
    }

    async fn mark_complete(&self, key: &str) -> CheckpointResult<()> {
        let path = self.path.clone();
        let lock = Arc::clone(&self.write_lock);
        let line = format!("{}\n", key.trim());
        tokio::task::spawn_blocking(move || -> CheckpointResult<()> {
            let _guard = lock
                .lock()
                .map_err(|_| CheckpointError::Task("checkpoint lock poisoned".to_string()))?;
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(line.as_bytes())?;
            file.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| CheckpointError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpoint::new(dir.path().join("progress.log"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");

        let store = FileCheckpoint::new(&path);
        store.mark_complete("coord:a.warc.gz:0:100").await.unwrap();
        store.mark_complete("domain:https://example.com").await.unwrap();
        store.mark_complete("coord:a.warc.gz:0:100").await.unwrap();

        let reopened = FileCheckpoint::new(&path);
        let keys = reopened.load().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("domain:https://example.com"));
    }
}
