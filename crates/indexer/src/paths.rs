use crate::source::content_hash;
use crate::{IndexerError, Result};
use std::path::{Path, PathBuf};

pub const SERVER_CONFIG_FILE_NAME: &str = "server.json";
pub const REPO_CONFIG_FILE_NAME: &str = "config.json";
pub const VECTORS_DIR_NAME: &str = "vectors";
pub const INDEX_LOCK_FILE_NAME: &str = "index.lock";

/// Absolute, symlink-free form of `path`.
pub async fn canonical_path(path: &Path) -> Result<PathBuf> {
    tokio::fs::canonicalize(path).await.map_err(|err| {
        IndexerError::NotGitRepo(format!("{}: {err}", path.display()))
    })
}

/// Directory name of a repository's index: SHA-256 hex of its canonical root.
#[must_use]
pub fn hash_repo_path(canonical_root: &Path) -> String {
    content_hash(canonical_root.to_string_lossy().as_bytes())
}

#[must_use]
pub fn index_dir(persist_dir: &Path, repo_hash: &str) -> PathBuf {
    persist_dir.join(repo_hash)
}

#[must_use]
pub fn repo_config_path(index_dir: &Path) -> PathBuf {
    index_dir.join(REPO_CONFIG_FILE_NAME)
}

#[must_use]
pub fn server_config_path(persist_dir: &Path) -> PathBuf {
    persist_dir.join(SERVER_CONFIG_FILE_NAME)
}

#[must_use]
pub fn vectors_dir(index_dir: &Path) -> PathBuf {
    index_dir.join(VECTORS_DIR_NAME)
}

#[must_use]
pub fn index_lock_path(index_dir: &Path) -> PathBuf {
    index_dir.join(INDEX_LOCK_FILE_NAME)
}
