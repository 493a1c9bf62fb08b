use crate::error::{ChunkerError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_LINES: usize = 80;
pub const DEFAULT_OVERLAP_LINES: usize = 10;

/// Configuration for line-window chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Lines per chunk (hard limit)
    pub chunk_lines: usize,

    /// Lines shared between consecutive chunks
    pub overlap_lines: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_lines: DEFAULT_CHUNK_LINES,
            overlap_lines: DEFAULT_OVERLAP_LINES,
        }
    }
}

impl ChunkerConfig {
    #[must_use]
    pub const fn new(chunk_lines: usize, overlap_lines: usize) -> Self {
        Self {
            chunk_lines,
            overlap_lines,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_lines == 0 {
            return Err(ChunkerError::invalid_config("chunk_lines must be > 0"));
        }
        Ok(())
    }

    /// Overlap actually applied: never reaches `chunk_lines`, otherwise the window could
    /// not advance.
    #[must_use]
    pub fn effective_overlap(&self) -> usize {
        if self.overlap_lines >= self.chunk_lines {
            self.chunk_lines.saturating_sub(1)
        } else {
            self.overlap_lines
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = ChunkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_lines, 80);
        assert_eq!(config.overlap_lines, 10);
    }

    #[test]
    fn test_zero_chunk_lines_rejected() {
        let config = ChunkerConfig::new(0, 0);
        assert!(matches!(
            config.validate(),
            Err(ChunkerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_overlap_is_clamped_below_chunk_size() {
        assert_eq!(ChunkerConfig::new(10, 3).effective_overlap(), 3);
        assert_eq!(ChunkerConfig::new(10, 10).effective_overlap(), 9);
        assert_eq!(ChunkerConfig::new(10, 50).effective_overlap(), 9);
        assert_eq!(ChunkerConfig::new(1, 5).effective_overlap(), 0);
    }
}
