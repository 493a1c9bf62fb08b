use crate::text_detect::is_text_bytes;
use crate::{git, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Contents of one tracked text file as read at a single moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub text: String,
    /// SHA-256 hex of the bytes the text was decoded from.
    pub hash: String,
}

impl FileSnapshot {
    /// `None` when `bytes` look binary.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if !is_text_bytes(bytes) {
            return None;
        }
        Some(Self {
            text: String::from_utf8_lossy(bytes).into_owned(),
            hash: content_hash(bytes),
        })
    }
}

#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Where the synchronizer gets its files from.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Tracked text files, `path -> content hash`. Binary files are left out.
    async fn list_tracked(&self) -> Result<BTreeMap<String, String>>;

    /// Current contents of `path`, or `None` if it vanished or is no longer text.
    async fn read(&self, path: &str) -> Result<Option<FileSnapshot>>;

    async fn head_commit(&self) -> Option<String> {
        None
    }
}

/// Tracked files of a git work tree, read from disk.
#[derive(Debug, Clone)]
pub struct GitFileSource {
    root: PathBuf,
}

impl GitFileSource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileSource for GitFileSource {
    async fn list_tracked(&self) -> Result<BTreeMap<String, String>> {
        let paths = git::list_tracked_files(&self.root).await?;
        let mut tracked = BTreeMap::new();
        let mut skipped_binary = 0usize;
        for path in paths {
            match self.read(&path).await? {
                Some(snapshot) => {
                    tracked.insert(path, snapshot.hash);
                }
                None => skipped_binary += 1,
            }
        }
        log::debug!(
            "Found {} tracked text files ({} skipped)",
            tracked.len(),
            skipped_binary
        );
        Ok(tracked)
    }

    async fn read(&self, path: &str) -> Result<Option<FileSnapshot>> {
        let full = self.root.join(path);
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(FileSnapshot::from_bytes(&bytes)),
            // Deleted from the work tree but still in the git index.
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            // Submodules are listed as paths but checked out as directories.
            Err(err) if full.is_dir() => {
                log::debug!("Skipping directory entry {path}: {err}");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn head_commit(&self) -> Option<String> {
        git::head_commit(&self.root).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn snapshot_rejects_binary() {
        assert!(FileSnapshot::from_bytes(b"\0\x01\x02").is_none());
        let snapshot = FileSnapshot::from_bytes(b"x = 1\n").unwrap();
        assert_eq!(snapshot.text, "x = 1\n");
        assert_eq!(snapshot.hash, content_hash(b"x = 1\n"));
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let temp = tempfile::TempDir::new().unwrap();
        let source = GitFileSource::new(temp.path());
        assert_eq!(source.read("gone.py").await.unwrap(), None);
    }
}
