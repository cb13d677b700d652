//! Local filesystem storage.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::error::{FetchError, FetchResult};
use crate::traits::storage::{ArchiveStorage, ByteStream};

const READ_CHUNK: usize = 64 * 1024;

/// Reads record ranges from archive files under a root directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, archive_id: &str) -> FetchResult<PathBuf> {
        let relative = Path::new(archive_id.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || archive_id.trim().is_empty() {
            return Err(FetchError::Permanent(format!("invalid archive id {}", archive_id)));
        }
        Ok(self.root.join(relative))
    }
}

fn classify(err: std::io::Error, path: &Path) -> FetchError {
    let detail = format!("{}: {}", path.display(), err);
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput => {
            FetchError::Permanent(detail)
        }
        _ => FetchError::Transient(detail),
    }
}

#[async_trait]
impl ArchiveStorage for FileStorage {
    async fn fetch(&self, archive_id: &str, offset: u64, length: u64) -> FetchResult<ByteStream> {
        if !self.root.is_dir() {
            return Err(FetchError::StorageUnavailable(format!(
                "archive root {} is not mounted",
                self.root.display()
            )));
        }
        let path = self.path_for(archive_id)?;
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| classify(e, &path))?;

        let size = file.metadata().await.map_err(|e| classify(e, &path))?.len();
        if offset.checked_add(length).map_or(true, |end| end > size) {
            return Err(FetchError::Permanent(format!(
                "range {}+{} beyond end of {} ({} bytes)",
                offset,
                length,
                path.display(),
                size
            )));
        }

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| classify(e, &path))?;

        let stream = ReaderStream::with_capacity(file.take(length), READ_CHUNK)
            .map_err(move |e| classify(e, &path));
        Ok(stream.boxed())
    }

    fn name(&self) -> &str {
        "file"
    }
}
