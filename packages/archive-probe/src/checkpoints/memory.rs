//! In-memory checkpoint store.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::error::CheckpointResult;
use crate::traits::checkpoint::CheckpointStore;

/// Keeps completed keys in memory. Clones share state, so a test can
/// hand one clone to a job and inspect another afterwards.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpoint {
    keys: Arc<RwLock<HashSet<String>>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with completed keys.
    pub fn with_keys(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let store = Self::new();
        if let Ok(mut set) = store.keys.write() {
            set.extend(keys.into_iter().map(Into::into));
        }
        store
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.read().map(|k| k.contains(key)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.keys.read().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoint {
    async fn load(&self) -> CheckpointResult<HashSet<String>> {
        Ok(self.keys.read().map(|k| k.clone()).unwrap_or_default())
    }

    async fn mark_complete(&self, key: &str) -> CheckpointResult<()> {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(key.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let store = MemoryCheckpoint::with_keys(["coord:a:0:1"]);
        store.mark_complete("domain:https://example.com").await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(store.contains("coord:a:0:1"));
    }
}
