//! Where documents come from.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use crate::errors::IngestError;

/// A raw document ready for parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Logical name used in citations, e.g. `CF/88`.
    pub name: String,
    /// Where the content was read from, kept for provenance.
    pub source_file: String,
    pub content: String,
}

/// Enumerates the documents of a corpus.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Lists every document, sorted by name for deterministic reindex order.
    async fn list(&self) -> Result<Vec<SourceDocument>, IngestError>;
}

/// Reads `.md` and `.txt` files from one directory (non-recursive).
///
/// The file stem becomes the document name.
pub struct FsCorpus {
    root: PathBuf,
}

impl FsCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn source_error(&self, reason: impl ToString) -> IngestError {
        IngestError::Source {
            name: self.root.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl DocumentSource for FsCorpus {
    async fn list(&self) -> Result<Vec<SourceDocument>, IngestError> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|err| self.source_error(err))?;

        let mut documents = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| self.source_error(err))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|err| self.source_error(err))?;
            let is_corpus_file = file_type.is_file()
                && matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("md") | Some("txt")
                );
            if !is_corpus_file {
                continue;
            }

            let name = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };
            let content = fs::read_to_string(&path).await.map_err(|err| {
                IngestError::Source {
                    name: name.clone(),
                    reason: err.to_string(),
                }
            })?;
            documents.push(SourceDocument {
                name,
                source_file: path.display().to_string(),
                content,
            });
        }

        documents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(documents)
    }
}

/// Fixed in-memory corpus, mostly for tests.
#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    documents: Vec<SourceDocument>,
}

impl InMemorySource {
    pub fn new(documents: Vec<SourceDocument>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl DocumentSource for InMemorySource {
    async fn list(&self) -> Result<Vec<SourceDocument>, IngestError> {
        let mut documents = self.documents.clone();
        documents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn fs_corpus_lists_supported_files_sorted_by_name() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("cp.txt"), "# Código Penal").unwrap();
        std::fs::write(dir.path().join("cf88.md"), "# Constituição").unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();
        // A directory with a matching extension must still be skipped.
        std::fs::create_dir(dir.path().join("anexos.md")).unwrap();

        let corpus = FsCorpus::new(dir.path());
        let documents = corpus.list().await.unwrap();

        let names: Vec<&str> = documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["cf88", "cp"]);
        assert_eq!(documents[0].content, "# Constituição");
        assert!(documents[0].source_file.ends_with("cf88.md"));
    }

    #[tokio::test]
    async fn missing_directory_is_a_source_error() {
        let corpus = FsCorpus::new("/definitely/not/here");
        let err = corpus.list().await.unwrap_err();
        assert!(matches!(err, IngestError::Source { .. }));
    }

    #[tokio::test]
    async fn in_memory_source_sorts_by_name() {
        let source = InMemorySource::new(vec![
            SourceDocument {
                name: "cp".into(),
                source_file: "cp.md".into(),
                content: "b".into(),
            },
            SourceDocument {
                name: "cf88".into(),
                source_file: "cf88.md".into(),
                content: "a".into(),
            },
        ]);
        let documents = source.list().await.unwrap();
        assert_eq!(documents[0].name, "cf88");
    }
}
