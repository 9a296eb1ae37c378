//! Token-count estimation strategies.
//!
//! Chunk budgeting only needs a count, not token ids, so the estimator is a
//! small trait the chunk builder takes by handle. The default is a
//! character-length heuristic; the `tokenizer-tiktoken` feature swaps in
//! exact BPE counts without touching chunk-boundary logic.

use std::sync::Arc;

/// Estimates how many tokens a span of text costs.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Character-length heuristic: roughly four characters per token, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimator;

/// Characters per token assumed by [`CharEstimator`].
pub const CHARS_PER_TOKEN: usize = 4;

impl TokenEstimator for CharEstimator {
    fn estimate(&self, text: &str) -> usize {
        let chars = text.chars().count();
        chars.div_ceil(CHARS_PER_TOKEN)
    }
}

/// Shared handle to the default estimator.
pub fn default_estimator() -> Arc<dyn TokenEstimator> {
    Arc::new(CharEstimator)
}

#[cfg(feature = "tokenizer-tiktoken")]
pub use exact::TiktokenEstimator;

#[cfg(feature = "tokenizer-tiktoken")]
mod exact {
    use super::TokenEstimator;
    use crate::errors::ChunkingError;

    /// Exact token counts via the cl100k BPE vocabulary.
    pub struct TiktokenEstimator {
        bpe: tiktoken_rs::CoreBPE,
    }

    impl TiktokenEstimator {
        pub fn cl100k() -> Result<Self, ChunkingError> {
            let bpe =
                tiktoken_rs::cl100k_base().map_err(|err| ChunkingError::Tokenizer(err.to_string()))?;
            Ok(Self { bpe })
        }
    }

    impl TokenEstimator for TiktokenEstimator {
        fn estimate(&self, text: &str) -> usize {
            self.bpe.encode_ordinary(text).len()
        }
    }
}
