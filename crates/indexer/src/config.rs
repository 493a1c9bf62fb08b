//! Persisted JSON configuration: one `server.json` per persist dir, one `config.json` per
//! indexed repository.

use crate::paths::{repo_config_path, server_config_path};
use crate::{IndexerError, Result};
use code_index_chunker::ChunkerConfig;
use code_index_vector_store::{EmbeddingConfig, VectorConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub version: u32,
    pub persist_dir: PathBuf,
    pub created_at_unix_ms: u64,
}

/// Everything needed to reopen, refresh and query one repository's index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub version: u32,
    pub repo_root: PathBuf,
    pub repo_hash: String,
    pub index_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkerConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default)]
    pub files_indexed: usize,
    #[serde(default)]
    pub chunks_indexed: usize,
    #[serde(default)]
    pub last_indexed_unix_ms: Option<u64>,
    #[serde(default)]
    pub last_indexed_commit: Option<String>,
}

/// User-chosen settings of an index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSettings {
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkerConfig,
    pub vector: VectorConfig,
}

impl IndexSettings {
    pub fn validate(&self) -> Result<()> {
        self.embedding.validate()?;
        self.chunking
            .validate()
            .map_err(|err| IndexerError::config_invalid(err.to_string()))?;
        self.vector.validate()?;
        Ok(())
    }
}

/// Partial settings for `update`; unset fields keep their persisted values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsUpdate {
    pub embedding: Option<EmbeddingConfig>,
    pub chunking: Option<ChunkerConfig>,
    pub vector: Option<VectorConfig>,
}

impl RepoConfig {
    #[must_use]
    pub fn settings(&self) -> IndexSettings {
        IndexSettings {
            embedding: self.embedding.clone(),
            chunking: self.chunking,
            vector: self.vector.clone(),
        }
    }

    pub fn apply(&mut self, update: SettingsUpdate) -> Result<()> {
        let mut settings = self.settings();
        if let Some(embedding) = update.embedding {
            settings.embedding = embedding;
        }
        if let Some(chunking) = update.chunking {
            settings.chunking = chunking;
        }
        if let Some(vector) = update.vector {
            settings.vector = vector;
        }
        settings.validate()?;
        self.embedding = settings.embedding;
        self.chunking = settings.chunking;
        self.vector = settings.vector;
        Ok(())
    }
}

pub async fn load_repo_config(index_dir: &Path) -> Result<Option<RepoConfig>> {
    let path = repo_config_path(index_dir);
    if !tokio::fs::try_exists(&path).await? {
        return Ok(None);
    }
    let bytes = tokio::fs::read(&path).await?;
    let config: RepoConfig = serde_json::from_slice(&bytes)?;
    if config.version != CONFIG_SCHEMA_VERSION {
        return Err(IndexerError::config_invalid(format!(
            "{} has schema version {} (expected {CONFIG_SCHEMA_VERSION})",
            path.display(),
            config.version
        )));
    }
    Ok(Some(config))
}

pub async fn save_repo_config(config: &RepoConfig) -> Result<()> {
    write_json_atomic(&repo_config_path(&config.index_dir), config).await
}

/// Create `server.json` on first use; an existing one is left as is.
pub async fn ensure_server_config(persist_dir: &Path) -> Result<ServerConfig> {
    let path = server_config_path(persist_dir);
    if tokio::fs::try_exists(&path).await? {
        let bytes = tokio::fs::read(&path).await?;
        return Ok(serde_json::from_slice(&bytes)?);
    }
    let config = ServerConfig {
        version: CONFIG_SCHEMA_VERSION,
        persist_dir: persist_dir.to_path_buf(),
        created_at_unix_ms: unix_now_ms(),
    };
    write_json_atomic(&path, &config).await?;
    log::info!("Created {}", path.display());
    Ok(config)
}

pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub(crate) fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use code_index_vector_store::{DeviceRequest, Metric};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn repo_config(index_dir: &Path) -> RepoConfig {
        RepoConfig {
            version: CONFIG_SCHEMA_VERSION,
            repo_root: PathBuf::from("/work/repo"),
            repo_hash: "abc".into(),
            index_dir: index_dir.to_path_buf(),
            embedding: EmbeddingConfig {
                base_url: "http://example".into(),
                api_key: "k".into(),
                model: "m".into(),
            },
            chunking: ChunkerConfig::default(),
            vector: VectorConfig::default(),
            dimension: None,
            files_indexed: 0,
            chunks_indexed: 0,
            last_indexed_unix_ms: None,
            last_indexed_commit: None,
        }
    }

    #[tokio::test]
    async fn repo_config_round_trips() {
        let temp = TempDir::new().unwrap();
        let config = repo_config(temp.path());
        save_repo_config(&config).await.unwrap();
        assert!(!temp.path().join("config.json.tmp").exists());
        let loaded = load_repo_config(temp.path()).await.unwrap();
        assert_eq!(loaded, Some(config));
    }

    #[tokio::test]
    async fn missing_repo_config_is_none() {
        let temp = TempDir::new().unwrap();
        assert_eq!(load_repo_config(temp.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_config_is_created_once() {
        let temp = TempDir::new().unwrap();
        let first = ensure_server_config(temp.path()).await.unwrap();
        let second = ensure_server_config(temp.path()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.persist_dir, temp.path());
    }

    #[test]
    fn apply_validates_before_mutating() {
        let temp = TempDir::new().unwrap();
        let mut config = repo_config(temp.path());
        let bad = SettingsUpdate {
            chunking: Some(ChunkerConfig {
                chunk_lines: 0,
                overlap_lines: 0,
            }),
            vector: Some(VectorConfig {
                metric: Metric::L2,
                ..VectorConfig::default()
            }),
            ..SettingsUpdate::default()
        };
        assert!(config.apply(bad).is_err());
        assert_eq!(config.vector.metric, Metric::Ip);

        let good = SettingsUpdate {
            vector: Some(VectorConfig {
                device: DeviceRequest::Cpu,
                ..VectorConfig::default()
            }),
            ..SettingsUpdate::default()
        };
        config.apply(good).unwrap();
        assert_eq!(config.vector.device, DeviceRequest::Cpu);
    }
}
