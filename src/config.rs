//! Configuration surface for the retrieval core.
//!
//! Both structs deserialize with per-field defaults so partial config files
//! (or absent sections) resolve to working values.

use serde::{Deserialize, Serialize};

use crate::errors::ChunkingError;

/// Chunk assembly limits, in estimated tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Budget at which an open chunk is closed.
    pub max_tokens: usize,
    /// Trailing token budget carried from one chunk into the next.
    pub overlap_tokens: usize,
    /// Chunks below this size are merged into a neighbor instead of persisted.
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            overlap_tokens: 50,
            min_chunk_size: 100,
        }
    }
}

impl ChunkingConfig {
    /// Rejects limit combinations the builder cannot honor.
    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.max_tokens == 0 {
            return Err(ChunkingError::InvalidConfig(
                "max_tokens must be positive".into(),
            ));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        if self.min_chunk_size > self.max_tokens {
            return Err(ChunkingError::InvalidConfig(format!(
                "min_chunk_size ({}) must not exceed max_tokens ({})",
                self.min_chunk_size, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// Top-level retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Master switch; when false the query path reports unavailability.
    pub enabled: bool,
    /// Maximum number of chunks returned per query.
    pub top_k: usize,
    /// Similarity floor for search results, in `[0, 1]`.
    pub min_similarity: f32,
    /// Token budget for the assembled retrieval context.
    pub max_context_tokens: usize,
    /// Carried for the disclosure layer; the level mapping itself is fixed.
    pub confidence_threshold: f32,
    pub chunking: ChunkingConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 5,
            min_similarity: 0.60,
            max_context_tokens: 2000,
            confidence_threshold: 0.60,
            chunking: ChunkingConfig::default(),
        }
    }
}

impl RagConfig {
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[must_use]
    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    #[must_use]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }
}
