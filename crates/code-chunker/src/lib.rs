//! # Code Index Chunker
//!
//! Line-window chunking of source files for embedding.
//!
//! Every tracked file is split into fixed-size windows of lines with a configurable
//! overlap, so a chunk is always a contiguous, 1-based inclusive line range of exactly one
//! file. The chunker is a pure function of the text and its [`ChunkerConfig`].
//!
//! ```text
//! lines 1..=50, chunk_lines = 40, overlap_lines = 10
//!
//!   [ 1 ........................ 40 ]
//!                      [ 31 ............ 50 ]
//! ```
//!
//! ## Example
//!
//! ```rust
//! use code_index_chunker::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::new(40, 10)).unwrap();
//! let text: String = (1..=50).map(|n| format!("line {n}\n")).collect();
//!
//! let chunks = chunker.chunk_str(&text);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!((chunks[1].line_start, chunks[1].line_end), (31, 50));
//! ```

mod chunker;
mod config;
mod error;
mod types;

pub use chunker::Chunker;
pub use config::{ChunkerConfig, DEFAULT_CHUNK_LINES, DEFAULT_OVERLAP_LINES};
pub use error::{ChunkerError, Result};
pub use types::TextChunk;
