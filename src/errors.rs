//! Error taxonomy for the retrieval core.
//!
//! Each pipeline stage owns its failure type. Extraction-level issues are
//! absorbed where they occur; embedding and store failures abort only the
//! operation in flight; the query path collapses everything into
//! [`RagUnavailable`] so callers can fall back to non-grounded generation.

use thiserror::Error;

/// A source document could not be turned into structured elements.
///
/// Fatal to that document's ingestion; other documents are unaffected.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document carried no recognizable content.
    #[error("document '{name}' has no recognizable structure")]
    EmptyDocument { name: String },

    /// A heading marker was malformed (level outside 1..=9).
    #[error("heading level {level} out of range in '{name}'")]
    HeadingLevel { name: String, level: usize },
}

/// A single metadata matcher failed on one element.
///
/// Never fatal: the element proceeds with partial metadata.
#[derive(Debug, Error)]
pub enum MetadataExtractionError {
    #[error("roman numeral '{0}' is not a valid inciso")]
    InvalidRoman(String),

    #[error("year '{0}' outside the accepted range")]
    YearOutOfRange(String),
}

/// Chunk assembly could not satisfy its size constraints.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// No text was available to chunk at all.
    #[error("no content available for chunking")]
    NoContent,

    /// The chunking limits are contradictory (e.g. overlap >= max tokens).
    #[error("invalid chunking config: {0}")]
    InvalidConfig(String),

    /// The optional exact tokenizer failed to initialize.
    #[error("tokenizer unavailable: {0}")]
    Tokenizer(String),
}

/// Failure talking to the embedding provider.
///
/// Variants partition into retryable (timeouts, transient provider trouble)
/// and non-retryable (bad input, quota, shape mismatches). The gateway only
/// retries when [`EmbeddingError::is_retryable`] holds.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider timed out: {0}")]
    Timeout(String),

    #[error("transient embedding provider failure: {0}")]
    Transient(String),

    #[error("invalid embedding input: {0}")]
    InvalidInput(String),

    #[error("embedding quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("provider returned {returned} vectors for {requested} inputs")]
    CountMismatch { requested: usize, returned: usize },

    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<EmbeddingError>,
    },
}

impl EmbeddingError {
    /// Whether the gateway should retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transient(_))
    }
}

/// Persistence failure. Fatal to the in-flight operation; previously
/// committed documents stay intact.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("store opened with dimension {expected}, got vector of {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("chunk {chunk_id} is missing its embedding")]
    MissingEmbedding { chunk_id: String },

    #[error("corrupt row for chunk {chunk_id}: {reason}")]
    CorruptRow { chunk_id: String, reason: String },
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

/// Per-document ingestion failure, recorded (not propagated) during reindex.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to read source '{name}': {reason}")]
    Source { name: String, reason: String },
}

/// The query pipeline could not produce grounded context.
///
/// This is the explicit fallback contract: callers receiving it switch to
/// non-grounded generation instead of failing the user request.
#[derive(Debug, Error)]
pub enum RagUnavailable {
    #[error("retrieval disabled by configuration")]
    Disabled,

    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store unavailable: {0}")]
    Store(#[from] StoreError),
}
