//! Repository-level operations: init, sync, search, status, update.

use crate::config::{
    ensure_server_config, load_repo_config, save_repo_config, unix_now_ms, IndexSettings,
    RepoConfig, SettingsUpdate, CONFIG_SCHEMA_VERSION,
};
use crate::index_lock::acquire_index_write_lock;
use crate::paths::{canonical_path, hash_repo_path, index_dir, repo_config_path, vectors_dir};
use crate::source::{FileSource, GitFileSource};
use crate::stats::SyncStats;
use crate::sync::Synchronizer;
use crate::{git, IndexerError, Result};
use code_index_chunker::{Chunker, ChunkerConfig};
use code_index_vector_store::{
    embedder_from_env, resolve_device, ComputeDevice, DeviceCapabilities, DeviceRequest,
    Embedder, EmbeddingConfig, Metric, SearchMode, SearchOverrides, SimilarityBackend,
    VectorRecordStore,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MAX_TOP_K: usize = 100;
pub const DEFAULT_TOP_K: usize = 10;

/// Builds the embedder for an embedding configuration.
pub type EmbedderFactory = Arc<
    dyn Fn(&EmbeddingConfig) -> code_index_vector_store::Result<Arc<dyn Embedder>> + Send + Sync,
>;

/// Factory honouring `CODE_INDEX_EMBEDDING_MODE`.
#[must_use]
pub fn env_embedder_factory() -> EmbedderFactory {
    Arc::new(embedder_from_env)
}

/// Where a repository's index lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLocation {
    pub repo_root: PathBuf,
    pub persist_dir: PathBuf,
    pub repo_hash: String,
    pub index_dir: PathBuf,
}

impl IndexLocation {
    /// `repo_root` must already be canonical.
    #[must_use]
    pub fn new(repo_root: PathBuf, persist_dir: PathBuf) -> Self {
        let repo_hash = hash_repo_path(&repo_root);
        let index_dir = index_dir(&persist_dir, &repo_hash);
        Self {
            repo_root,
            persist_dir,
            repo_hash,
            index_dir,
        }
    }

    /// Resolve the work tree containing `repo_path`.
    pub async fn discover(repo_path: &Path, persist_dir: &Path) -> Result<Self> {
        if !git::is_git_repo(repo_path).await {
            return Err(IndexerError::NotGitRepo(repo_path.display().to_string()));
        }
        let root = canonical_path(&git::repo_root(repo_path).await?).await?;
        Ok(Self::new(root, persist_dir.to_path_buf()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    pub refresh: bool,
    pub overrides: SearchOverrides,
}

impl SearchRequest {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: DEFAULT_TOP_K,
            refresh: true,
            overrides: SearchOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub path: String,
    pub line_start: usize,
    pub line_end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub device: ComputeDevice,
    pub degraded: bool,
    pub search_mode: SearchMode,
    pub scored: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub repo_root: PathBuf,
    pub repo_hash: String,
    pub index_dir: PathBuf,
    pub config_path: PathBuf,
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    pub dimension: Option<usize>,
    pub embedding_model: String,
    pub chunking: ChunkerConfig,
    pub metric: Metric,
    pub device: DeviceRequest,
    pub resolved_device: ComputeDevice,
    pub search_mode: SearchMode,
    pub approx_sample_rate: f64,
    pub approx_seed: u64,
    pub max_vram_mb: Option<u64>,
    pub last_indexed_unix_ms: Option<u64>,
    pub last_indexed_commit: Option<String>,
}

/// An opened repository index.
pub struct CodeIndex {
    config: RepoConfig,
    source: Arc<dyn FileSource>,
    embedder: Arc<dyn Embedder>,
    embedders: EmbedderFactory,
    backend: SimilarityBackend,
}

impl CodeIndex {
    /// Create (or recreate) the index of the git repository containing `repo_path` and build
    /// it from scratch.
    pub async fn init_repo(
        repo_path: &Path,
        persist_dir: &Path,
        settings: IndexSettings,
    ) -> Result<(Self, SyncStats)> {
        let location = IndexLocation::discover(repo_path, persist_dir).await?;
        let source = Arc::new(GitFileSource::new(location.repo_root.clone()));
        Self::init(location, settings, source, env_embedder_factory()).await
    }

    pub async fn open_repo(repo_path: &Path, persist_dir: &Path) -> Result<Self> {
        let location = IndexLocation::discover(repo_path, persist_dir).await?;
        let source = Arc::new(GitFileSource::new(location.repo_root.clone()));
        Self::open(location, source, env_embedder_factory()).await
    }

    pub async fn init(
        location: IndexLocation,
        settings: IndexSettings,
        source: Arc<dyn FileSource>,
        embedders: EmbedderFactory,
    ) -> Result<(Self, SyncStats)> {
        settings.validate()?;
        ensure_server_config(&location.persist_dir).await?;
        let embedder = embedders(&settings.embedding)?;
        let config = RepoConfig {
            version: CONFIG_SCHEMA_VERSION,
            repo_root: location.repo_root,
            repo_hash: location.repo_hash,
            index_dir: location.index_dir,
            embedding: settings.embedding,
            chunking: settings.chunking,
            vector: settings.vector,
            dimension: None,
            files_indexed: 0,
            chunks_indexed: 0,
            last_indexed_unix_ms: None,
            last_indexed_commit: None,
        };
        log::info!(
            "Initializing index for {} at {}",
            config.repo_root.display(),
            config.index_dir.display()
        );

        let mut index = Self {
            config,
            source,
            embedder,
            embedders,
            backend: SimilarityBackend::new(),
        };
        let _lock = acquire_index_write_lock(&index.config.index_dir).await?;
        save_repo_config(&index.config).await?;
        let stats = index.sync_locked(true).await?;
        Ok((index, stats))
    }

    pub async fn open(
        location: IndexLocation,
        source: Arc<dyn FileSource>,
        embedders: EmbedderFactory,
    ) -> Result<Self> {
        let config = load_repo_config(&location.index_dir).await?.ok_or_else(|| {
            IndexerError::NotInitialized(location.repo_root.display().to_string())
        })?;
        let embedder = embedders(&config.embedding)?;
        Ok(Self {
            config,
            source,
            embedder,
            embedders,
            backend: SimilarityBackend::new(),
        })
    }

    /// Replace the similarity backend (custom scorer, pinned capabilities).
    #[must_use]
    pub fn with_backend(mut self, backend: SimilarityBackend) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Incremental sync, or a full rebuild with `force`.
    pub async fn sync(&mut self, force: bool) -> Result<SyncStats> {
        let _lock = acquire_index_write_lock(&self.config.index_dir).await?;
        self.sync_locked(force).await
    }

    async fn sync_locked(&mut self, force: bool) -> Result<SyncStats> {
        let dir = vectors_dir(&self.config.index_dir);
        let metric = self.config.vector.metric;
        let mut store = if force {
            match VectorRecordStore::load_optional(&dir).await {
                Ok(Some(store)) => store,
                Ok(None) => VectorRecordStore::new(metric),
                Err(err) => {
                    log::warn!("Discarding unreadable vector store before rebuild: {err}");
                    VectorRecordStore::new(metric)
                }
            }
        } else {
            VectorRecordStore::load_or_new(&dir, metric).await?
        };

        let chunker = Chunker::new(self.config.chunking)?;
        let synchronizer =
            Synchronizer::new(self.source.as_ref(), self.embedder.as_ref(), chunker, metric);
        let stats = synchronizer.run(&mut store, force).await?;

        store.save(&dir).await?;
        self.config.dimension = store.dimension();
        self.config.files_indexed = stats.files_indexed;
        self.config.chunks_indexed = stats.chunks_indexed;
        self.config.last_indexed_unix_ms = Some(unix_now_ms());
        self.config.last_indexed_commit = self.source.head_commit().await;
        save_repo_config(&self.config).await?;
        Ok(stats)
    }

    pub async fn search(&mut self, request: &SearchRequest) -> Result<SearchResponse> {
        if request.top_k == 0 || request.top_k > MAX_TOP_K {
            return Err(IndexerError::config_invalid(format!(
                "top_k must be between 1 and {MAX_TOP_K}, got {}",
                request.top_k
            )));
        }
        let effective = self.config.vector.with_overrides(&request.overrides)?;
        let sync = if request.refresh {
            Some(self.sync(false).await?)
        } else {
            None
        };

        let store =
            VectorRecordStore::load_or_new(&vectors_dir(&self.config.index_dir), effective.metric)
                .await?;
        let query = if store.is_empty() {
            Vec::new()
        } else {
            self.embedder
                .embed_one(&request.query)
                .await
                .map_err(code_index_vector_store::VectorStoreError::from)?
        };
        let outcome = self
            .backend
            .search(&store, &query, request.top_k, &effective)?;
        log::debug!(
            "Search returned {} of {} scored chunks",
            outcome.hits.len(),
            outcome.report.scored
        );

        Ok(SearchResponse {
            results: outcome
                .hits
                .into_iter()
                .map(|hit| SearchResult {
                    path: hit.path,
                    line_start: hit.line_start,
                    line_end: hit.line_end,
                })
                .collect(),
            device: outcome.report.resolution.device,
            degraded: outcome.report.resolution.degraded,
            search_mode: outcome.report.mode,
            scored: outcome.report.scored,
            sync,
        })
    }

    #[must_use]
    pub fn status(&self) -> IndexStatus {
        let vector = &self.config.vector;
        let resolution = resolve_device(vector.device, DeviceCapabilities::detect());
        IndexStatus {
            repo_root: self.config.repo_root.clone(),
            repo_hash: self.config.repo_hash.clone(),
            index_dir: self.config.index_dir.clone(),
            config_path: repo_config_path(&self.config.index_dir),
            files_indexed: self.config.files_indexed,
            chunks_indexed: self.config.chunks_indexed,
            dimension: self.config.dimension,
            embedding_model: self.config.embedding.model.clone(),
            chunking: self.config.chunking,
            metric: vector.metric,
            device: vector.device,
            resolved_device: resolution.device,
            search_mode: vector.search_mode,
            approx_sample_rate: vector.approx_sample_rate,
            approx_seed: vector.approx_seed,
            max_vram_mb: vector.max_vram_mb,
            last_indexed_unix_ms: self.config.last_indexed_unix_ms,
            last_indexed_commit: self.config.last_indexed_commit.clone(),
        }
    }

    /// Rebuild the whole index with new settings.
    ///
    /// The new settings reach `config.json` only together with the rebuilt store. On failure
    /// both the persisted and in-memory settings stay as they were.
    pub async fn update(&mut self, update: SettingsUpdate) -> Result<SyncStats> {
        let mut next = self.config.clone();
        next.apply(update)?;
        let embedder = (self.embedders)(&next.embedding)?;

        let _lock = acquire_index_write_lock(&self.config.index_dir).await?;
        log::info!("Updating settings of {}", next.repo_root.display());
        let previous_config = std::mem::replace(&mut self.config, next);
        let previous_embedder = std::mem::replace(&mut self.embedder, embedder);
        match self.sync_locked(true).await {
            Ok(stats) => Ok(stats),
            Err(err) => {
                log::warn!("Settings update failed, keeping previous settings: {err}");
                self.config = previous_config;
                self.embedder = previous_embedder;
                Err(err)
            }
        }
    }
}
