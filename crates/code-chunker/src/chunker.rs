use crate::config::ChunkerConfig;
use crate::error::Result;
use crate::types::TextChunk;

/// Main chunker interface
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a new chunker, rejecting invalid configuration
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split text into overlapping line windows.
    ///
    /// Empty text yields no chunks. A trailing line without a terminator still counts as a
    /// line.
    #[must_use]
    pub fn chunk_str(&self, content: &str) -> Vec<TextChunk> {
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        if lines.is_empty() {
            return Vec::new();
        }

        let chunk_lines = self.config.chunk_lines;
        let overlap = self.config.effective_overlap();
        let total = lines.len();

        let mut chunks = Vec::with_capacity(total / chunk_lines + 1);
        let mut start = 0usize;
        loop {
            let end = (start + chunk_lines).min(total);
            let text: String = lines[start..end].concat();
            chunks.push(TextChunk::new(start + 1, end, text));
            if end >= total {
                break;
            }
            start = end - overlap;
        }

        log::trace!(
            "Chunked {total} lines into {} chunks (chunk_lines={chunk_lines}, overlap={overlap})",
            chunks.len()
        );
        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            config: ChunkerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn numbered_lines(count: usize) -> String {
        (1..=count).map(|n| format!("line {n}\n")).collect()
    }

    fn ranges(chunks: &[TextChunk]) -> Vec<(usize, usize)> {
        chunks.iter().map(|c| (c.line_start, c.line_end)).collect()
    }

    #[test]
    fn test_empty_content_yields_no_chunks() {
        let chunker = Chunker::default();
        assert!(chunker.chunk_str("").is_empty());
    }

    #[test]
    fn test_short_file_is_single_chunk() {
        let chunker = Chunker::new(ChunkerConfig::new(40, 10)).unwrap();
        let chunks = chunker.chunk_str(&numbered_lines(10));
        assert_eq!(ranges(&chunks), vec![(1, 10)]);
        assert_eq!(chunks[0].text, numbered_lines(10));
    }

    #[test]
    fn test_overlapping_windows() {
        let chunker = Chunker::new(ChunkerConfig::new(40, 10)).unwrap();
        let chunks = chunker.chunk_str(&numbered_lines(50));
        assert_eq!(ranges(&chunks), vec![(1, 40), (31, 50)]);
        assert!(chunks[1].text.starts_with("line 31\n"));
        assert!(chunks[1].text.ends_with("line 50\n"));
    }

    #[test]
    fn test_no_overlap_windows_are_disjoint() {
        let chunker = Chunker::new(ChunkerConfig::new(4, 0)).unwrap();
        let chunks = chunker.chunk_str(&numbered_lines(10));
        assert_eq!(ranges(&chunks), vec![(1, 4), (5, 8), (9, 10)]);
    }

    #[test]
    fn test_missing_trailing_newline_counts_last_line() {
        let chunker = Chunker::new(ChunkerConfig::new(2, 0)).unwrap();
        let chunks = chunker.chunk_str("a\nb\nc");
        assert_eq!(ranges(&chunks), vec![(1, 2), (3, 3)]);
        assert_eq!(chunks[1].text, "c");
    }

    #[test]
    fn test_oversized_overlap_still_advances() {
        let chunker = Chunker::new(ChunkerConfig::new(3, 99)).unwrap();
        let chunks = chunker.chunk_str(&numbered_lines(5));
        assert_eq!(ranges(&chunks), vec![(1, 3), (2, 4), (3, 5)]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Chunker::new(ChunkerConfig::new(0, 0)).is_err());
    }
}
