//! # Code Index Vector Store
//!
//! Chunk records, embeddings and top-k similarity search for the code index.
//!
//! ## Architecture
//!
//! ```text
//! chunk texts
//!     │
//!     ├──> Embedder (OpenAI-compatible HTTP / stub)
//!     │      └─> Vec<f32>
//!     │
//!     ├──> VectorRecordStore (one record per chunk, grouped per file)
//!     │      └─> vectors.bin + meta.json
//!     │
//!     └──> SimilarityBackend
//!            ├─> device resolution (cuda → mps → cpu)
//!            ├─> VRAM-bounded batches
//!            └─> exact or sampled top-k
//! ```
//!
//! ## Example
//!
//! ```
//! use code_index_vector_store::{
//!     ChunkRecord, DeviceCapabilities, Metric, SimilarityBackend, VectorConfig,
//!     VectorRecordStore,
//! };
//!
//! let mut store = VectorRecordStore::new(Metric::Ip);
//! store
//!     .insert(vec![
//!         ChunkRecord::new("src/a.rs", 0, 1, 80, "hash-a", vec![1.0, 0.0]),
//!         ChunkRecord::new("src/b.rs", 0, 1, 12, "hash-b", vec![0.0, 1.0]),
//!     ])
//!     .unwrap();
//!
//! let backend = SimilarityBackend::new().with_capabilities(DeviceCapabilities::cpu_only());
//! let outcome = backend
//!     .search(&store, &[0.9, 0.1], 1, &VectorConfig::default())
//!     .unwrap();
//! assert_eq!(outcome.hits[0].path, "src/a.rs");
//! ```

mod backend;
mod config;
mod device;
mod embeddings;
mod error;
mod scorer;
mod store;
mod types;

pub use backend::{max_batch_rows, SearchHit, SearchOutcome, SearchReport, SimilarityBackend};
pub use config::{DeviceRequest, Metric, SearchMode, SearchOverrides, VectorConfig};
pub use device::{resolve_device, ComputeDevice, DeviceCapabilities, DeviceResolution};
pub use embeddings::{
    decode_embeddings, embedder_from_env, Embedder, EmbeddingConfig, EmbeddingError,
    OpenAiEmbedder, StubEmbedder, DEFAULT_STUB_DIMENSION, EMBEDDING_MODE_ENV,
    STUB_DIMENSION_ENV,
};
pub use error::{Result, VectorStoreError};
pub use scorer::{BatchScorer, ScoreError, TensorScorer};
pub use store::{VectorRecordStore, META_FILE_NAME, VECTORS_FILE_NAME};
pub use types::{normalize_rel_path, ChunkId, ChunkRecord};
