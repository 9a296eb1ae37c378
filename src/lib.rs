//! Retrieval core for grounding answers in a Brazilian legal corpus:
//! structure-aware chunking, embedding with caching and retry, vector
//! search with deterministic ordering, and confidence-graded context
//! assembly.
//!
//! ```text
//! Corpus Listing ──► ingestion::FsCorpus ──► raw legal documents
//!
//! Raw document ──► parser::parse_document ──► Elements
//!                                    │
//!                   metadata::MetadataExtractor (heading stack + matchers)
//!                                    │
//!                   chunker::ChunkBuilder ──► DraftChunks (overlap-aware)
//!                                    │
//!                   embeddings::EmbeddingGateway ──► vectors
//!                                    │
//!                   stores::sqlite::SqliteVectorStore (atomic upsert)
//!
//! Query text ──► embeddings ──► stores::VectorStore::search ──┐
//!                                                             │
//!               confidence::ConfidenceLevel ◄── similarities ◄┘
//!                                    │
//!               query::QueryService ──► RetrievalContext (chunks,
//!               confidence, citations) ──► downstream generation
//! ```

pub mod chunker;
pub mod confidence;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod ingestion;
pub mod metadata;
pub mod parser;
pub mod query;
pub mod stores;
pub mod tokenizer;

pub use chunker::{ChunkBuilder, DraftChunk};
pub use confidence::{ConfidenceCalculator, ConfidenceLevel};
pub use config::{ChunkingConfig, RagConfig};
pub use embeddings::{
    EmbeddingGateway, EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider, RetryPolicy,
};
pub use errors::{
    ChunkingError, EmbeddingError, IngestError, MetadataExtractionError, ParseError,
    RagUnavailable, StoreError,
};
pub use ingestion::{
    DocumentSource, FsCorpus, InMemorySource, IngestOutcome, IngestionPipeline, ReindexReport,
    SourceDocument,
};
pub use metadata::{AnnotatedElement, ChunkMetadata, MetadataExtractor};
pub use parser::{Element, parse_document};
pub use query::{QueryService, RankedChunk, RetrievalContext};
pub use stores::{
    ChunkRecord, DocumentRecord, SearchHit, SearchRequest, SqliteVectorStore, StoreStatistics,
    VectorStore, cosine_similarity,
};
pub use tokenizer::{CharEstimator, TokenEstimator};
