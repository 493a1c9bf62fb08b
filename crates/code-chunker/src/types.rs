use serde::{Deserialize, Serialize};

/// A contiguous line window of one file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextChunk {
    /// Start line (1-indexed)
    pub line_start: usize,

    /// End line (1-indexed, inclusive)
    pub line_end: usize,

    /// Chunk text, line terminators included
    pub text: String,
}

impl TextChunk {
    #[must_use]
    pub const fn new(line_start: usize, line_end: usize, text: String) -> Self {
        Self {
            line_start,
            line_end,
            text,
        }
    }
}
