//! Query-time retrieval: embed the question, search the store, assemble a
//! cited context with a confidence grade.
//!
//! Failure here is never fatal to the caller's request. Everything that
//! prevents grounded retrieval collapses into [`RagUnavailable`] so the
//! caller can answer without citations instead of erroring out.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::confidence::{ConfidenceCalculator, ConfidenceLevel, mean};
use crate::config::RagConfig;
use crate::embeddings::EmbeddingGateway;
use crate::errors::RagUnavailable;
use crate::metadata::ChunkMetadata;
use crate::stores::{SearchHit, SearchRequest, VectorStore};
use crate::tokenizer::{TokenEstimator, default_estimator};

/// One retrieved chunk, ready for prompt assembly.
#[derive(Debug, Clone, Serialize)]
pub struct RankedChunk {
    pub document_name: String,
    pub sequence_index: usize,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub similarity: f32,
    pub token_count: usize,
    /// Human-readable source reference, e.g. `CF/88, Art. 5, caput`.
    pub citation: String,
}

impl RankedChunk {
    fn from_hit(hit: SearchHit) -> Self {
        let citation = citation(&hit.document_name, &hit.chunk.metadata);
        Self {
            document_name: hit.document_name,
            sequence_index: hit.chunk.sequence_index,
            text: hit.chunk.text,
            metadata: hit.chunk.metadata,
            similarity: hit.similarity,
            token_count: hit.chunk.token_count,
            citation,
        }
    }
}

/// The grounded context handed to answer generation.
///
/// `mean_similarity` and `confidence` grade the full search result; `chunks`
/// may hold fewer entries when the context token budget trims the tail.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalContext {
    pub chunks: Vec<RankedChunk>,
    pub mean_similarity: f32,
    pub confidence: ConfidenceLevel,
    /// Deduplicated citations in rank order.
    pub citations: Vec<String>,
}

impl RetrievalContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk texts prefixed with their citations, for direct prompt insertion.
    pub fn context_text(&self) -> String {
        self.chunks
            .iter()
            .map(|chunk| format!("[{}]\n{}", chunk.citation, chunk.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Builds the citation for a chunk from its most specific tags.
///
/// Pattern: document name, then `artigo` with its subdivision (`inciso`
/// beats `paragrafo` beats `tipo`); without an article the heading context
/// (`capitulo`, then `titulo`) stands in.
pub fn citation(document_name: &str, metadata: &ChunkMetadata) -> String {
    let mut parts = vec![document_name.to_string()];
    if let Some(artigo) = &metadata.artigo {
        parts.push(artigo.clone());
        if let Some(inciso) = &metadata.inciso {
            parts.push(inciso.clone());
        } else if let Some(paragrafo) = &metadata.paragrafo {
            parts.push(paragrafo.clone());
        } else if let Some(tipo) = &metadata.tipo {
            parts.push(tipo.clone());
        }
    } else if let Some(capitulo) = &metadata.capitulo {
        parts.push(capitulo.clone());
    } else if let Some(titulo) = &metadata.titulo {
        parts.push(titulo.clone());
    }
    parts.join(", ")
}

/// Embeds queries and assembles [`RetrievalContext`]s from store hits.
pub struct QueryService {
    gateway: Arc<EmbeddingGateway>,
    store: Arc<dyn VectorStore>,
    config: RagConfig,
    calculator: ConfidenceCalculator,
    estimator: Arc<dyn TokenEstimator>,
}

impl QueryService {
    pub fn new(
        gateway: Arc<EmbeddingGateway>,
        store: Arc<dyn VectorStore>,
        config: RagConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            config,
            calculator: ConfidenceCalculator::new(),
            estimator: default_estimator(),
        }
    }

    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Retrieves grounded context for `query`.
    ///
    /// An empty result set is a successful retrieval with `SEM_RAG`
    /// confidence; only infrastructure failures (and the disabled switch)
    /// surface as [`RagUnavailable`].
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalContext, RagUnavailable> {
        if !self.config.enabled {
            return Err(RagUnavailable::Disabled);
        }

        let vector = self.gateway.embed_one(query).await?;
        let request = SearchRequest::new(self.config.top_k, self.config.min_similarity);
        let hits = self.store.search(&vector, &request).await?;
        debug!(hits = hits.len(), "similarity search finished");

        Ok(self.assemble(hits))
    }

    fn assemble(&self, hits: Vec<SearchHit>) -> RetrievalContext {
        // Confidence grades the search result as a whole, so it is computed
        // over every hit before the context budget trims any of them.
        let similarities: Vec<f32> = hits.iter().map(|h| h.similarity).collect();
        let mean_similarity = mean(&similarities).unwrap_or(0.0);
        let confidence = self.calculator.from_similarities(&similarities);

        let mut chunks: Vec<RankedChunk> = Vec::new();
        let mut spent = 0usize;
        for hit in hits {
            let cost = if hit.chunk.token_count > 0 {
                hit.chunk.token_count
            } else {
                self.estimator.estimate(&hit.chunk.text)
            };
            // The best hit is always kept, even when it alone overflows the
            // budget; later hits must fit.
            if !chunks.is_empty() && spent + cost > self.config.max_context_tokens {
                break;
            }
            spent += cost;
            chunks.push(RankedChunk::from_hit(hit));
        }

        let mut citations: Vec<String> = Vec::new();
        for chunk in &chunks {
            if !citations.contains(&chunk.citation) {
                citations.push(chunk.citation.clone());
            }
        }

        debug!(
            chunks = chunks.len(),
            context_tokens = spent,
            %confidence,
            "retrieval context assembled"
        );
        RetrievalContext {
            chunks,
            mean_similarity,
            confidence,
            citations,
        }
    }
}
