//! End-to-end ingestion and retrieval over a real SQLite file with the
//! deterministic mock provider.

use std::sync::Arc;

use lexrag::{
    ChunkingConfig, ConfidenceLevel, EmbeddingGateway, EmbeddingProvider, FsCorpus,
    IngestionPipeline, MockEmbeddingProvider, QueryService, RagConfig, SqliteVectorStore,
    VectorStore,
};
use tempfile::TempDir;

const CF88_ARTICLE: &str =
    "Art. 1 Todos são iguais perante a lei, sem distinção de qualquer natureza.";
const CP_ARTICLE: &str = "Art. 121 Matar alguém. Pena - reclusão, de seis a vinte anos.";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

fn small_chunking() -> ChunkingConfig {
    ChunkingConfig {
        max_tokens: 60,
        overlap_tokens: 10,
        min_chunk_size: 10,
    }
}

fn gateway() -> Arc<EmbeddingGateway> {
    Arc::new(EmbeddingGateway::new(
        Arc::new(MockEmbeddingProvider::new()) as Arc<dyn EmbeddingProvider>,
    ))
}

async fn store_at(dir: &TempDir) -> Arc<SqliteVectorStore> {
    Arc::new(
        SqliteVectorStore::open(
            dir.path().join("index.db"),
            MockEmbeddingProvider::DEFAULT_DIMENSIONS,
        )
        .await
        .unwrap(),
    )
}

fn write_corpus(dir: &TempDir) {
    std::fs::write(dir.path().join("cf88.md"), CF88_ARTICLE).unwrap();
    std::fs::write(dir.path().join("cp.txt"), CP_ARTICLE).unwrap();
}

#[tokio::test]
async fn reindex_then_query_returns_cited_context() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    write_corpus(&dir);

    let store = store_at(&dir).await;
    let pipeline = IngestionPipeline::new(
        gateway(),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        small_chunking(),
    )
    .unwrap();

    let report = pipeline.reindex(&FsCorpus::new(dir.path())).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.documents_processed, 2);
    assert!(report.chunks_created >= 2);

    let config = RagConfig::default().with_chunking(small_chunking());
    let service = QueryService::new(gateway(), Arc::clone(&store) as Arc<dyn VectorStore>, config);

    // The mock provider is deterministic, so querying with a chunk's exact
    // text scores that chunk at similarity 1.0.
    let context = service.retrieve(CF88_ARTICLE).await.unwrap();
    assert!(!context.is_empty());
    assert_eq!(context.chunks[0].document_name, "cf88");
    assert!((context.chunks[0].similarity - 1.0).abs() < 1e-5);
    assert_eq!(context.confidence, ConfidenceLevel::Alta);
    assert_eq!(context.citations[0], "cf88, Art. 1, caput");
}

#[tokio::test]
async fn unrelated_query_degrades_to_sem_rag() {
    let dir = TempDir::new().unwrap();
    write_corpus(&dir);

    let store = store_at(&dir).await;
    let pipeline = IngestionPipeline::new(
        gateway(),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        small_chunking(),
    )
    .unwrap();
    pipeline.reindex(&FsCorpus::new(dir.path())).await.unwrap();

    let service = QueryService::new(
        gateway(),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        RagConfig::default(),
    );
    let context = service
        .retrieve("receita de bolo de cenoura")
        .await
        .unwrap();

    // Random unit vectors land far below the similarity floor.
    assert!(context.is_empty());
    assert_eq!(context.confidence, ConfidenceLevel::SemRag);
}

#[tokio::test]
async fn statistics_attribute_chunks_to_their_documents() {
    let dir = TempDir::new().unwrap();
    let mut long_document = String::from("# Título I\n");
    for article in 1..=12 {
        long_document.push_str(&format!(
            "\nArt. {article} Disposição normativa número {article}, com texto \
             suficiente para ocupar espaço no orçamento de tokens do bloco.\n"
        ));
    }
    std::fs::write(dir.path().join("longo.md"), &long_document).unwrap();
    std::fs::write(dir.path().join("curto.md"), CP_ARTICLE).unwrap();

    let store = store_at(&dir).await;
    let pipeline = IngestionPipeline::new(
        gateway(),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        small_chunking(),
    )
    .unwrap();
    let report = pipeline.reindex(&FsCorpus::new(dir.path())).await.unwrap();

    let stats = store.statistics().await.unwrap();
    assert_eq!(stats.documents.len(), 2);
    assert_eq!(stats.total_chunks(), report.chunks_created);

    let longo = stats.documents.iter().find(|d| d.name == "longo").unwrap();
    let curto = stats.documents.iter().find(|d| d.name == "curto").unwrap();
    assert!(longo.chunk_count > 1, "twelve articles must span chunks");
    assert_eq!(curto.chunk_count, 1);
    assert!(longo.token_count > curto.token_count);
}

#[tokio::test]
async fn bulk_reindex_attributes_chunks_across_batch_boundaries() {
    let dir = TempDir::new().unwrap();

    let mut grande = String::from("# TÍTULO I\n");
    for article in 1..=400 {
        grande.push_str(&format!(
            "\nArt. {article} Disposição normativa número {article}, com texto \
             suficiente para ocupar espaço no orçamento de tokens do bloco.\n"
        ));
    }
    let mut pequeno = String::from("# TÍTULO ÚNICO\n");
    for article in 1..=40 {
        pequeno.push_str(&format!(
            "\nArt. {article} Regra complementar número {article} aplicável ao \
             procedimento administrativo correspondente.\n"
        ));
    }
    std::fs::write(dir.path().join("grande.md"), &grande).unwrap();
    std::fs::write(dir.path().join("pequeno.md"), &pequeno).unwrap();

    let provider = Arc::new(MockEmbeddingProvider::new());
    let gateway = Arc::new(EmbeddingGateway::new(
        Arc::clone(&provider) as Arc<dyn EmbeddingProvider>,
    ));
    let store = store_at(&dir).await;
    let pipeline = IngestionPipeline::new(
        gateway,
        Arc::clone(&store) as Arc<dyn VectorStore>,
        small_chunking(),
    )
    .unwrap();

    let report = pipeline.reindex(&FsCorpus::new(dir.path())).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.documents_processed, 2);

    let stats = store.statistics().await.unwrap();
    assert_eq!(stats.total_chunks(), report.chunks_created);

    let grande_stats = stats.documents.iter().find(|d| d.name == "grande").unwrap();
    let pequeno_stats = stats
        .documents
        .iter()
        .find(|d| d.name == "pequeno")
        .unwrap();
    assert_eq!(
        grande_stats.chunk_count + pequeno_stats.chunk_count,
        report.chunks_created
    );
    assert!(
        grande_stats.chunk_count > lexrag::ingestion::EMBED_BATCH_SIZE,
        "the large document must span several embedding batches, got {}",
        grande_stats.chunk_count
    );
    // Every chunk text is distinct, so each one costs a cache miss and the
    // provider sees at least one call per full batch.
    assert!(
        provider.calls() >= report.chunks_created.div_ceil(lexrag::ingestion::EMBED_BATCH_SIZE),
        "expected batched provider calls, got {}",
        provider.calls()
    );
}

#[tokio::test]
async fn index_survives_reopening_the_store() {
    let dir = TempDir::new().unwrap();
    write_corpus(&dir);

    {
        let store = store_at(&dir).await;
        let pipeline = IngestionPipeline::new(
            gateway(),
            Arc::clone(&store) as Arc<dyn VectorStore>,
            small_chunking(),
        )
        .unwrap();
        pipeline.reindex(&FsCorpus::new(dir.path())).await.unwrap();
    }

    let reopened = store_at(&dir).await;
    let stats = reopened.statistics().await.unwrap();
    assert_eq!(stats.documents.len(), 2);

    let service = QueryService::new(
        gateway(),
        reopened as Arc<dyn VectorStore>,
        RagConfig::default(),
    );
    let context = service.retrieve(CP_ARTICLE).await.unwrap();
    assert_eq!(context.chunks[0].document_name, "cp");
    assert_eq!(context.citations[0], "cp, Art. 121, caput");
}

#[tokio::test]
async fn reindex_drops_documents_removed_from_the_corpus() {
    let dir = TempDir::new().unwrap();
    write_corpus(&dir);

    let store = store_at(&dir).await;
    let pipeline = IngestionPipeline::new(
        gateway(),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        small_chunking(),
    )
    .unwrap();
    pipeline.reindex(&FsCorpus::new(dir.path())).await.unwrap();

    std::fs::remove_file(dir.path().join("cp.txt")).unwrap();
    let report = pipeline.reindex(&FsCorpus::new(dir.path())).await.unwrap();
    assert_eq!(report.documents_processed, 1);

    let stats = store.statistics().await.unwrap();
    let names: Vec<&str> = stats.documents.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["cf88"]);
}
