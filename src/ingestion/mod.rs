//! Document ingestion.
//!
//! ```text
//!  DocumentSource ──▶ parse ──▶ annotate ──▶ chunk ──▶ embed ──▶ upsert
//!       │                                               │
//!       │            (per document, atomic)             │
//!       └────────────── reindex: clear + replay ────────┘
//! ```
//!
//! Ingestion is per-document and atomic: a document either lands in the
//! store complete or not at all. Full reindex clears the store and replays
//! the corpus, recording failures instead of aborting on them.

pub mod pipeline;
pub mod source;

pub use pipeline::{
    EMBED_BATCH_SIZE, IngestOutcome, IngestionPipeline, ReindexFailure, ReindexReport,
};
pub use source::{DocumentSource, FsCorpus, InMemorySource, SourceDocument};
