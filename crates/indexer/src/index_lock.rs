use crate::paths::index_lock_path;
use crate::{IndexerError, Result};
use fs2::FileExt;
use std::path::Path;
use std::time::Instant;

/// Exclusive writer lock on one index directory, released on drop.
pub(crate) struct IndexWriteLock {
    file: std::fs::File,
}

impl Drop for IndexWriteLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub(crate) async fn acquire_index_write_lock(index_dir: &Path) -> Result<IndexWriteLock> {
    tokio::fs::create_dir_all(index_dir).await?;
    let path = index_lock_path(index_dir);

    let lock = tokio::task::spawn_blocking(move || -> Result<IndexWriteLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                IndexerError::Other(format!("open index lock {}: {err}", path.display()))
            })?;

        let start = Instant::now();
        file.lock_exclusive().map_err(|err| {
            IndexerError::Other(format!("acquire index lock {}: {err}", path.display()))
        })?;
        let waited_ms = start.elapsed().as_millis();
        if waited_ms > 0 {
            log::debug!("Waited {waited_ms}ms for {}", path.display());
        }

        Ok(IndexWriteLock { file })
    })
    .await
    .map_err(|err| IndexerError::Other(format!("join index lock task: {err}")))??;

    Ok(lock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_is_reacquirable_after_drop() {
        let temp = tempfile::TempDir::new().unwrap();
        let first = acquire_index_write_lock(temp.path()).await.unwrap();
        assert!(temp.path().join("index.lock").exists());
        drop(first);
        let _second = acquire_index_write_lock(temp.path()).await.unwrap();
    }
}
