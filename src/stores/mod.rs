//! Vector storage for documents, chunks, and embeddings.
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │ VectorStore trait│
//!                  │  (async CRUD +   │
//!                  │  cosine search)  │
//!                  └────────┬─────────┘
//!                           │
//!                           ▼
//!                  ┌──────────────────┐
//!                  │      SQLite      │
//!                  │  tokio-rusqlite  │
//!                  └──────────────────┘
//! ```
//!
//! The corpus is small and fully re-indexable, so search is a linear cosine
//! scan with deterministic ordering: descending similarity, ties broken by
//! ascending `sequence_index`.

pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::metadata::ChunkMetadata;

pub use sqlite::SqliteVectorStore;

/// A persisted document. Exclusively owns its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub name: String,
    pub source_file: String,
    pub chunk_count: usize,
    pub token_count: usize,
}

/// A persisted chunk with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    /// Back-reference to the owning document, not ownership.
    pub document_id: String,
    pub sequence_index: usize,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
    pub token_count: usize,
}

/// Search parameters for one query.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub top_k: usize,
    pub min_similarity: f32,
    /// Restrict results to the document with this name.
    pub document_filter: Option<String>,
    /// Tag-equality filters against chunk metadata (e.g. `artigo = "Art. 5"`).
    pub metadata_filter: Option<HashMap<String, String>>,
}

impl SearchRequest {
    pub fn new(top_k: usize, min_similarity: f32) -> Self {
        Self {
            top_k,
            min_similarity,
            document_filter: None,
            metadata_filter: None,
        }
    }

    #[must_use]
    pub fn with_document(mut self, name: impl Into<String>) -> Self {
        self.document_filter = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, filter: HashMap<String, String>) -> Self {
        self.metadata_filter = Some(filter);
        self
    }
}

/// One search result: the chunk, its owner's name, and the similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: ChunkRecord,
    pub document_name: String,
    pub similarity: f32,
}

/// Per-document chunk and token counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub document_id: String,
    pub name: String,
    pub chunk_count: usize,
    pub token_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub documents: Vec<DocumentStats>,
}

impl StoreStatistics {
    pub fn total_chunks(&self) -> usize {
        self.documents.iter().map(|d| d.chunk_count).sum()
    }

    pub fn total_tokens(&self) -> usize {
        self.documents.iter().map(|d| d.token_count).sum()
    }
}

/// Persistence and similarity search for the retrieval corpus.
///
/// The embedding dimension is fixed when a store is opened and applies to
/// every vector it will ever accept.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persists a document and all of its chunks atomically: either the
    /// whole set commits or nothing does. Re-upserting a document with an
    /// existing id or name replaces its previous chunks.
    async fn upsert_document(
        &self,
        document: DocumentRecord,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), StoreError>;

    /// Clears every document and chunk. Intended for full reindex; reads
    /// concurrent with the clear may observe a partially empty store.
    async fn delete_all(&self) -> Result<(), StoreError>;

    /// Cosine nearest-neighbor search over all stored vectors.
    ///
    /// Returns at most `top_k` hits, each with similarity at least
    /// `min_similarity`, ordered by descending similarity with ties broken
    /// by ascending `sequence_index`. Never returns a chunk twice.
    async fn search(
        &self,
        query: &[f32],
        request: &SearchRequest,
    ) -> Result<Vec<SearchHit>, StoreError>;

    /// Per-document chunk and token counts.
    async fn statistics(&self) -> Result<StoreStatistics, StoreError>;
}

/// `dot(a, b) / (‖a‖ · ‖b‖)`; zero-length or zero-norm inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Scores candidates against the query and applies the request's floor,
/// ordering, and `top_k` truncation. Shared by store implementations so the
/// ordering contract lives in one place.
pub fn rank_candidates(
    query: &[f32],
    candidates: Vec<(ChunkRecord, String)>,
    request: &SearchRequest,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter(|(chunk, document_name)| {
            if let Some(name) = &request.document_filter {
                if document_name != name {
                    return false;
                }
            }
            match &request.metadata_filter {
                Some(filter) => metadata_matches(&chunk.metadata, filter),
                None => true,
            }
        })
        .map(|(chunk, document_name)| {
            let similarity = cosine_similarity(query, &chunk.embedding);
            SearchHit {
                chunk,
                document_name,
                similarity,
            }
        })
        .filter(|hit| hit.similarity >= request.min_similarity)
        .collect();

    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
    });
    hits.truncate(request.top_k);
    hits
}

fn metadata_matches(metadata: &ChunkMetadata, filter: &HashMap<String, String>) -> bool {
    filter
        .iter()
        .all(|(key, value)| metadata.tag(key).is_some_and(|tag| tag == value))
}
