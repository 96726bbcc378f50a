//! Reader configuration.

use serde::{Deserialize, Serialize};
use unarc_core::io::DEFAULT_BLOCK_SIZE;

/// Tunables for one reader.
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// use unarc::ReaderOptions;
///
/// let options = ReaderOptions::default();
/// assert_eq!(options.max_filter_depth, 25);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Most filters auto-detection may stack.
    pub max_filter_depth: usize,
    /// Block size for file and descriptor sources when the caller passes 0.
    pub default_block_size: usize,
    /// Chunk size for in-memory sources.
    pub memory_chunk_size: usize,
}

impl ReaderOptions {
    /// Set the filter depth limit.
    pub fn with_max_filter_depth(mut self, depth: usize) -> Self {
        self.max_filter_depth = depth;
        self
    }

    /// Set the in-memory chunk size.
    pub fn with_memory_chunk_size(mut self, size: usize) -> Self {
        self.memory_chunk_size = size;
        self
    }

    /// `requested`, or the default when it is zero.
    pub fn block_size(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_block_size.max(1)
        } else {
            requested
        }
    }
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_filter_depth: 25,
            default_block_size: DEFAULT_BLOCK_SIZE,
            memory_chunk_size: 64 * 1024,
        }
    }
}
