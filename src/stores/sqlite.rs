//! SQLite-backed [`VectorStore`].
//!
//! Documents and chunks live in plain tables; embeddings are stored as
//! little-endian f32 BLOBs and scanned linearly at query time. The embedding
//! dimension is pinned in `store_meta` the first time a database is opened
//! and enforced on every subsequent open and write.

use std::path::Path;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use super::{
    ChunkRecord, DocumentRecord, DocumentStats, SearchHit, SearchRequest, StoreStatistics,
    VectorStore, rank_candidates,
};
use crate::errors::StoreError;
use crate::metadata::ChunkMetadata;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    source_file  TEXT NOT NULL,
    chunk_count  INTEGER NOT NULL,
    token_count  INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS chunks (
    id             TEXT PRIMARY KEY,
    document_id    TEXT NOT NULL REFERENCES documents(id),
    sequence_index INTEGER NOT NULL,
    text           TEXT NOT NULL,
    metadata       TEXT NOT NULL,
    embedding      BLOB NOT NULL,
    token_count    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE TABLE IF NOT EXISTS store_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const DIMENSIONS_KEY: &str = "embedding_dimensions";

/// Raw chunk row before decoding, as read inside the connection closure.
type RawChunkRow = (String, String, i64, String, String, Vec<u8>, i64, String);

#[derive(Debug)]
pub struct SqliteVectorStore {
    conn: Connection,
    dimensions: usize,
}

impl SqliteVectorStore {
    /// Opens (or creates) a store at `path` with a fixed embedding dimension.
    ///
    /// Re-opening an existing store with a different dimension fails with
    /// [`StoreError::DimensionMismatch`].
    pub async fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;
        Self::initialize(conn, dimensions).await
    }

    /// In-memory store, mostly for tests.
    pub async fn open_in_memory(dimensions: usize) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::initialize(conn, dimensions).await
    }

    async fn initialize(conn: Connection, dimensions: usize) -> Result<Self, StoreError> {
        if dimensions == 0 {
            return Err(StoreError::Storage(
                "embedding dimension must be positive".into(),
            ));
        }
        let stored: Option<String> = conn
            .call(move |conn| {
                conn.execute_batch(SCHEMA)
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let existing = conn
                    .query_row(
                        "SELECT value FROM store_meta WHERE key = ?1",
                        [DIMENSIONS_KEY],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                if existing.is_none() {
                    conn.execute(
                        "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
                        (DIMENSIONS_KEY, dimensions.to_string()),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                Ok(existing)
            })
            .await?;

        if let Some(value) = stored {
            let existing: usize = value.parse().map_err(|_| {
                StoreError::Storage(format!("corrupt {DIMENSIONS_KEY} value '{value}'"))
            })?;
            if existing != dimensions {
                return Err(StoreError::DimensionMismatch {
                    expected: existing,
                    actual: dimensions,
                });
            }
        }

        debug!(dimensions, "sqlite vector store ready");
        Ok(Self { conn, dimensions })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(chunk_id: &str, bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::CorruptRow {
            chunk_id: chunk_id.to_string(),
            reason: format!("embedding blob of {} bytes", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn decode_row(row: RawChunkRow) -> Result<(ChunkRecord, String), StoreError> {
    let (id, document_id, sequence_index, text, metadata, embedding, token_count, name) = row;
    let embedding = decode_embedding(&id, &embedding)?;
    let metadata: ChunkMetadata =
        serde_json::from_str(&metadata).map_err(|err| StoreError::CorruptRow {
            chunk_id: id.clone(),
            reason: format!("metadata: {err}"),
        })?;
    Ok((
        ChunkRecord {
            id,
            document_id,
            sequence_index: sequence_index as usize,
            text,
            metadata,
            embedding,
            token_count: token_count as usize,
        },
        name,
    ))
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert_document(
        &self,
        document: DocumentRecord,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), StoreError> {
        if document.chunk_count != chunks.len() {
            return Err(StoreError::Storage(format!(
                "document '{}' declares {} chunks but {} were provided",
                document.name,
                document.chunk_count,
                chunks.len()
            )));
        }
        for chunk in &chunks {
            if chunk.document_id != document.id {
                return Err(StoreError::Storage(format!(
                    "chunk {} references document {} instead of {}",
                    chunk.id, chunk.document_id, document.id
                )));
            }
            if chunk.embedding.is_empty() {
                return Err(StoreError::MissingEmbedding {
                    chunk_id: chunk.id.clone(),
                });
            }
            self.check_dimensions(&chunk.embedding)?;
        }

        let chunk_total = chunks.len();
        let rows: Vec<(String, String, i64, String, String, Vec<u8>, i64)> = chunks
            .into_iter()
            .map(|chunk| {
                let metadata = serde_json::to_string(&chunk.metadata)
                    .map_err(|err| StoreError::Storage(err.to_string()))?;
                Ok((
                    chunk.id,
                    chunk.document_id,
                    chunk.sequence_index as i64,
                    chunk.text,
                    metadata,
                    encode_embedding(&chunk.embedding),
                    chunk.token_count as i64,
                ))
            })
            .collect::<Result<_, StoreError>>()?;

        let name = document.name.clone();
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "DELETE FROM chunks WHERE document_id IN \
                     (SELECT id FROM documents WHERE id = ?1 OR name = ?2)",
                    (&document.id, &document.name),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "DELETE FROM documents WHERE id = ?1 OR name = ?2",
                    (&document.id, &document.name),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "INSERT INTO documents (id, name, source_file, chunk_count, token_count) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    (
                        &document.id,
                        &document.name,
                        &document.source_file,
                        document.chunk_count as i64,
                        document.token_count as i64,
                    ),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for row in &rows {
                    tx.execute(
                        "INSERT INTO chunks \
                         (id, document_id, sequence_index, text, metadata, embedding, token_count) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        (&row.0, &row.1, row.2, &row.3, &row.4, &row.5, row.6),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await?;

        info!(document = %name, chunks = chunk_total, "document upserted");
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute("DELETE FROM chunks", [])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute("DELETE FROM documents", [])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await?;
        info!("vector store cleared");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        request: &SearchRequest,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.check_dimensions(query)?;

        let document_filter = request.document_filter.clone();
        let raw_rows: Vec<RawChunkRow> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT c.id, c.document_id, c.sequence_index, c.text, c.metadata, \
                         c.embedding, c.token_count, d.name \
                         FROM chunks c JOIN documents d ON d.id = c.document_id \
                         WHERE (?1 IS NULL OR d.name = ?1)",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mapped = stmt
                    .query_map([&document_filter], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut rows = Vec::new();
                for row in mapped {
                    rows.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(rows)
            })
            .await?;

        let candidates = raw_rows
            .into_iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(rank_candidates(query, candidates, request))
    }

    async fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        let rows: Vec<(String, String, i64, i64)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT d.id, d.name, COUNT(c.id), COALESCE(SUM(c.token_count), 0) \
                         FROM documents d LEFT JOIN chunks c ON c.document_id = d.id \
                         GROUP BY d.id, d.name \
                         ORDER BY d.name",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mapped = stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut rows = Vec::new();
                for row in mapped {
                    rows.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(rows)
            })
            .await?;

        Ok(StoreStatistics {
            documents: rows
                .into_iter()
                .map(|(document_id, name, chunk_count, token_count)| DocumentStats {
                    document_id,
                    name,
                    chunk_count: chunk_count as usize,
                    token_count: token_count as usize,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn document(id: &str, name: &str, chunks: usize, tokens: usize) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            name: name.to_string(),
            source_file: format!("{name}.md"),
            chunk_count: chunks,
            token_count: tokens,
        }
    }

    fn chunk(id: &str, document_id: &str, seq: usize, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            document_id: document_id.to_string(),
            sequence_index: seq,
            text: format!("texto do chunk {id}"),
            metadata: ChunkMetadata::default(),
            embedding,
            token_count: 120,
        }
    }

    #[tokio::test]
    async fn upsert_and_statistics_round_trip() {
        let store = SqliteVectorStore::open_in_memory(2).await.unwrap();
        store
            .upsert_document(
                document("d1", "CF/88", 2, 240),
                vec![
                    chunk("c1", "d1", 0, vec![1.0, 0.0]),
                    chunk("c2", "d1", 1, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.documents.len(), 1);
        assert_eq!(stats.documents[0].name, "CF/88");
        assert_eq!(stats.documents[0].chunk_count, 2);
        assert_eq!(stats.documents[0].token_count, 240);
        assert_eq!(stats.total_chunks(), 2);
    }

    #[tokio::test]
    async fn reupserting_a_document_replaces_its_chunks() {
        let store = SqliteVectorStore::open_in_memory(2).await.unwrap();
        store
            .upsert_document(
                document("d1", "CF/88", 2, 240),
                vec![
                    chunk("c1", "d1", 0, vec![1.0, 0.0]),
                    chunk("c2", "d1", 1, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
            .upsert_document(
                document("d1", "CF/88", 1, 120),
                vec![chunk("c9", "d1", 0, vec![1.0, 0.0])],
            )
            .await
            .unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_chunks(), 1);
    }

    #[tokio::test]
    async fn reupserting_by_name_replaces_even_with_a_new_id() {
        let store = SqliteVectorStore::open_in_memory(2).await.unwrap();
        store
            .upsert_document(
                document("d1", "CF/88", 1, 120),
                vec![chunk("c1", "d1", 0, vec![1.0, 0.0])],
            )
            .await
            .unwrap();
        store
            .upsert_document(
                document("d2", "CF/88", 1, 120),
                vec![chunk("c2", "d2", 0, vec![0.0, 1.0])],
            )
            .await
            .unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.documents.len(), 1);
        assert_eq!(stats.documents[0].document_id, "d2");
    }

    #[tokio::test]
    async fn upsert_is_rejected_before_any_write_on_bad_dimensions() {
        let store = SqliteVectorStore::open_in_memory(2).await.unwrap();
        let err = store
            .upsert_document(
                document("d1", "CF/88", 2, 240),
                vec![
                    chunk("c1", "d1", 0, vec![1.0, 0.0]),
                    chunk("c2", "d1", 1, vec![0.0, 1.0, 0.5]),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));

        let stats = store.statistics().await.unwrap();
        assert!(stats.documents.is_empty(), "nothing may be committed");
    }

    #[tokio::test]
    async fn chunk_count_declaration_must_match() {
        let store = SqliteVectorStore::open_in_memory(2).await.unwrap();
        let err = store
            .upsert_document(
                document("d1", "CF/88", 3, 240),
                vec![chunk("c1", "d1", 0, vec![1.0, 0.0])],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }

    #[tokio::test]
    async fn delete_all_clears_documents_and_chunks() {
        let store = SqliteVectorStore::open_in_memory(2).await.unwrap();
        store
            .upsert_document(
                document("d1", "CF/88", 1, 120),
                vec![chunk("c1", "d1", 0, vec![1.0, 0.0])],
            )
            .await
            .unwrap();

        store.delete_all().await.unwrap();
        let stats = store.statistics().await.unwrap();
        assert!(stats.documents.is_empty());

        let hits = store
            .search(&[1.0, 0.0], &SearchRequest::new(5, 0.0))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_orders_and_bounds_results() {
        let store = SqliteVectorStore::open_in_memory(2).await.unwrap();
        store
            .upsert_document(
                document("d1", "CF/88", 3, 360),
                vec![
                    chunk("c1", "d1", 0, vec![0.0, 1.0]),
                    chunk("c2", "d1", 1, vec![1.0, 0.0]),
                    chunk("c3", "d1", 2, vec![0.7, 0.7]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0], &SearchRequest::new(2, 0.5))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, "c2");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].chunk.id, "c3");
        assert!(hits.iter().all(|h| h.similarity >= 0.5));
        assert_eq!(hits[0].document_name, "CF/88");
    }

    #[tokio::test]
    async fn search_filters_by_metadata_tags() {
        let store = SqliteVectorStore::open_in_memory(2).await.unwrap();
        let mut tagged = chunk("c1", "d1", 0, vec![1.0, 0.0]);
        tagged.metadata.artigo = Some("Art. 5".to_string());
        tagged.metadata.tipo = Some("caput".to_string());
        store
            .upsert_document(
                document("d1", "CF/88", 2, 240),
                vec![tagged, chunk("c2", "d1", 1, vec![1.0, 0.0])],
            )
            .await
            .unwrap();

        let request = SearchRequest::new(5, 0.0).with_metadata(
            [("artigo".to_string(), "Art. 5".to_string())]
                .into_iter()
                .collect(),
        );
        let hits = store.search(&[1.0, 0.0], &request).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "c1");
        assert_eq!(hits[0].chunk.metadata.tipo.as_deref(), Some("caput"));
    }

    #[tokio::test]
    async fn query_dimension_is_checked() {
        let store = SqliteVectorStore::open_in_memory(2).await.unwrap();
        let err = store
            .search(&[1.0, 0.0, 0.0], &SearchRequest::new(5, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn reopening_with_other_dimension_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");

        let store = SqliteVectorStore::open(&path, 4).await.unwrap();
        drop(store);

        let err = SqliteVectorStore::open(&path, 8).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 4,
                actual: 8
            }
        ));
    }

    #[test]
    fn embedding_blob_round_trips() {
        let vector = vec![0.25f32, -1.5, 3.75, f32::MIN_POSITIVE];
        let decoded = decode_embedding("c", &encode_embedding(&vector)).unwrap();
        assert_eq!(vector, decoded);
    }
}
