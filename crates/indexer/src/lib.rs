//! # Code Index Indexer
//!
//! Keeps a repository's chunk index in step with its tracked files and serves queries over
//! it.
//!
//! ## Pipeline
//!
//! ```text
//! git ls-files
//!     │
//!     ├──> FileSource (text only, sha256 per file)
//!     │      └─> path → hash
//!     │
//!     ├──> plan_sync (insert / replace / delete / unchanged)
//!     │
//!     ├──> Chunker + Embedder (batches of 64)
//!     │      └─> ChunkRecord[]
//!     │
//!     └──> VectorRecordStore (saved only after a successful pass)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use code_index_indexer::{CodeIndex, SearchRequest};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut index = CodeIndex::open_repo(Path::new("."), Path::new("/tmp/code-index")).await?;
//!     let response = index.search(&SearchRequest::new("error handling")).await?;
//!     for hit in response.results {
//!         println!("{}:{}-{}", hit.path, hit.line_start, hit.line_end);
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod error;
pub mod git;
mod index_lock;
mod paths;
mod service;
mod source;
mod stats;
mod sync;
mod text_detect;

pub use config::{
    ensure_server_config, load_repo_config, save_repo_config, IndexSettings, RepoConfig,
    ServerConfig, SettingsUpdate, CONFIG_SCHEMA_VERSION,
};
pub use error::{IndexerError, Result};
pub use paths::{
    hash_repo_path, index_dir, repo_config_path, server_config_path, vectors_dir,
};
pub use service::{
    env_embedder_factory, CodeIndex, EmbedderFactory, IndexLocation, IndexStatus,
    SearchRequest, SearchResponse, SearchResult, DEFAULT_TOP_K, MAX_TOP_K,
};
pub use source::{content_hash, FileSnapshot, FileSource, GitFileSource};
pub use stats::SyncStats;
pub use sync::{full_rebuild_plan, plan_sync, SyncPlan, Synchronizer, EMBED_BATCH_SIZE};
pub use text_detect::{is_text_bytes, TEXT_SAMPLE_SIZE};
