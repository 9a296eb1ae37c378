//! Parse → annotate → chunk → embed → persist, per document.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use uuid::Uuid;

use super::source::{DocumentSource, SourceDocument};
use crate::chunker::ChunkBuilder;
use crate::config::ChunkingConfig;
use crate::embeddings::EmbeddingGateway;
use crate::errors::{ChunkingError, IngestError};
use crate::metadata::MetadataExtractor;
use crate::parser::parse_document;
use crate::stores::{ChunkRecord, DocumentRecord, VectorStore};
use crate::tokenizer::TokenEstimator;

/// Chunks embedded per provider call during ingestion.
pub const EMBED_BATCH_SIZE: usize = 32;

/// What one successful document ingestion produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub document_id: String,
    pub name: String,
    pub chunk_count: usize,
    pub token_count: usize,
}

/// One document that failed during a reindex, with the failure flattened to
/// a message so the report stays cloneable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexFailure {
    pub name: String,
    pub error: String,
}

/// Summary of a full reindex run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub documents_processed: usize,
    pub chunks_created: usize,
    pub failures: Vec<ReindexFailure>,
    pub elapsed: Duration,
}

impl ReindexReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives documents through the full ingestion pipeline.
pub struct IngestionPipeline {
    gateway: Arc<EmbeddingGateway>,
    store: Arc<dyn VectorStore>,
    extractor: MetadataExtractor,
    chunker: ChunkBuilder,
}

impl IngestionPipeline {
    pub fn new(
        gateway: Arc<EmbeddingGateway>,
        store: Arc<dyn VectorStore>,
        chunking: ChunkingConfig,
    ) -> Result<Self, ChunkingError> {
        Ok(Self {
            gateway,
            store,
            extractor: MetadataExtractor::new(),
            chunker: ChunkBuilder::new(chunking)?,
        })
    }

    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.chunker = self.chunker.with_estimator(estimator);
        self
    }

    /// Ingests one document end to end.
    ///
    /// Chunks are embedded in batches of [`EMBED_BATCH_SIZE`] in sequence
    /// order and the document is committed atomically, so a failure anywhere
    /// leaves previously indexed documents untouched.
    pub async fn ingest_document(
        &self,
        document: &SourceDocument,
    ) -> Result<IngestOutcome, IngestError> {
        let elements = parse_document(&document.name, &document.content)?;
        let annotated = self.extractor.annotate(elements);
        let chunks = self.chunker.build(&annotated)?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            vectors.extend(self.gateway.embed(batch).await?);
        }

        let document_id = Uuid::new_v4().to_string();
        let token_count: usize = chunks.iter().map(|c| c.token_count).sum();
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| ChunkRecord {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.clone(),
                sequence_index: chunk.sequence_index,
                text: chunk.text,
                metadata: chunk.metadata,
                embedding,
                token_count: chunk.token_count,
            })
            .collect();

        let outcome = IngestOutcome {
            document_id: document_id.clone(),
            name: document.name.clone(),
            chunk_count: records.len(),
            token_count,
        };
        self.store
            .upsert_document(
                DocumentRecord {
                    id: document_id,
                    name: document.name.clone(),
                    source_file: document.source_file.clone(),
                    chunk_count: records.len(),
                    token_count,
                },
                records,
            )
            .await?;

        info!(
            document = %outcome.name,
            chunks = outcome.chunk_count,
            tokens = outcome.token_count,
            "document ingested"
        );
        Ok(outcome)
    }

    /// Rebuilds the whole index from `source`.
    ///
    /// The store is cleared first; then each document is ingested in name
    /// order. A failing document is recorded and skipped, never aborting the
    /// documents after it.
    pub async fn reindex(&self, source: &dyn DocumentSource) -> Result<ReindexReport, IngestError> {
        let started = Instant::now();
        let documents = source.list().await?;
        self.store.delete_all().await?;

        let mut report = ReindexReport::default();
        for document in &documents {
            match self.ingest_document(document).await {
                Ok(outcome) => {
                    report.documents_processed += 1;
                    report.chunks_created += outcome.chunk_count;
                }
                Err(err) => {
                    warn!(document = %document.name, error = %err, "skipping document");
                    report.failures.push(ReindexFailure {
                        name: document.name.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        report.elapsed = started.elapsed();
        info!(
            processed = report.documents_processed,
            chunks = report.chunks_created,
            failed = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "reindex finished"
        );
        Ok(report)
    }
}
