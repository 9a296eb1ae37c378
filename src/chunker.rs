//! Token-bounded, boundary-respecting chunk assembly.
//!
//! Elements are accumulated whole against `max_tokens`; closing a chunk
//! carries a word-aligned tail of `overlap_tokens` into the head of the next
//! chunk. Structural units are never split mid-text unless a single unit
//! exceeds the budget by a large margin, and undersized chunks are merged
//! into a neighbor instead of persisted as fragments.
//!
//! Every chunk records where its own content begins (`body_offset`) and the
//! separator that joined it to the previous chunk in the source stream, so
//! [`reconstruct_text`] can rebuild the original element text losslessly.

use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::errors::ChunkingError;
use crate::metadata::{AnnotatedElement, ChunkMetadata};
use crate::tokenizer::{TokenEstimator, default_estimator};

/// Separator between elements inside a chunk and across chunk boundaries.
const ELEMENT_SEPARATOR: &str = "\n\n";

/// A unit kept whole beyond this multiple of `max_tokens` is split instead.
const OVERSIZE_SPLIT_FACTOR: usize = 2;

/// A chunk assembled from annotated elements, before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftChunk {
    /// Zero-based position in the document's reading order.
    pub sequence_index: usize,
    /// Full chunk text, including any overlap head.
    pub text: String,
    /// Byte offset where non-overlap content begins.
    pub body_offset: usize,
    /// Separator that joined this chunk's body to the previous one in the
    /// source stream (empty for the first chunk and mid-unit continuations).
    pub leading_separator: &'static str,
    /// Most specific structural tags contained in the chunk.
    pub metadata: ChunkMetadata,
    /// Estimated tokens for the full text.
    pub token_count: usize,
}

impl DraftChunk {
    /// The chunk's own content, with the overlap head stripped.
    pub fn body(&self) -> &str {
        &self.text[self.body_offset..]
    }
}

/// Rebuilds the source element text from chunks by stripping declared
/// overlaps and re-applying each chunk's leading separator.
pub fn reconstruct_text(chunks: &[DraftChunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        out.push_str(chunk.leading_separator);
        out.push_str(chunk.body());
    }
    out
}

/// One append-able span of text: a whole element, or a forced piece of an
/// element that alone exceeded the split threshold.
struct Unit {
    text: String,
    glue: &'static str,
    metadata: ChunkMetadata,
}

/// Assembles overlapping, boundary-aware chunks from annotated elements.
pub struct ChunkBuilder {
    config: ChunkingConfig,
    estimator: Arc<dyn TokenEstimator>,
}

impl ChunkBuilder {
    pub fn new(config: ChunkingConfig) -> Result<Self, ChunkingError> {
        config.validate()?;
        Ok(Self {
            config,
            estimator: default_estimator(),
        })
    }

    /// Replaces the token estimation strategy.
    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Builds the chunk sequence for one document.
    pub fn build(&self, elements: &[AnnotatedElement]) -> Result<Vec<DraftChunk>, ChunkingError> {
        let units = self.units_from_elements(elements);
        if units.is_empty() {
            return Err(ChunkingError::NoContent);
        }

        let mut chunks: Vec<DraftChunk> = Vec::new();
        let mut open: Option<OpenChunk> = None;

        for unit in units {
            let Some(current) = open.as_mut() else {
                open = Some(self.start_chunk(chunks.last(), unit));
                continue;
            };
            let candidate = format!("{}{}{}", current.text, unit.glue, unit.text);
            if self.estimator.estimate(&candidate) > self.config.max_tokens {
                chunks.push(current.close(self.estimator.as_ref()));
                open = Some(self.start_chunk(chunks.last(), unit));
            } else {
                current.append(unit);
            }
        }
        if let Some(mut current) = open {
            chunks.push(current.close(self.estimator.as_ref()));
        }

        let chunks = self.merge_undersized(chunks);
        Ok(renumber(chunks))
    }

    /// Opens a new chunk seeded with the overlap tail of the previous one.
    fn start_chunk(&self, previous: Option<&DraftChunk>, unit: Unit) -> OpenChunk {
        let overlap = match previous {
            Some(prev) => self.overlap_tail(&prev.text),
            None => String::new(),
        };

        let (text, body_offset) = if overlap.is_empty() {
            (String::new(), 0)
        } else {
            let mut text = overlap;
            text.push_str(ELEMENT_SEPARATOR);
            let offset = text.len();
            (text, offset)
        };

        let mut open = OpenChunk {
            text,
            body_offset,
            leading_separator: unit.glue,
            snapshots: Vec::new(),
        };
        // The first unit always lands whole; overshoot from a single large
        // unit is accepted, a forced mid-unit split is not.
        open.text.push_str(&unit.text);
        open.snapshots.push(unit.metadata);
        open
    }

    /// Word-aligned trailing span of `text` within the overlap budget.
    fn overlap_tail(&self, text: &str) -> String {
        if self.config.overlap_tokens == 0 {
            return String::new();
        }
        let bounds: Vec<usize> = text.split_word_bound_indices().map(|(i, _)| i).collect();
        let mut chosen = text.len();
        for &idx in bounds.iter().rev() {
            if self.estimator.estimate(text[idx..].trim_start()) > self.config.overlap_tokens {
                break;
            }
            chosen = idx;
        }
        text[chosen..].trim_start().to_string()
    }

    /// Flattens elements into units, splitting only pathologically large ones.
    fn units_from_elements(&self, elements: &[AnnotatedElement]) -> Vec<Unit> {
        let split_threshold = self.config.max_tokens * OVERSIZE_SPLIT_FACTOR;
        let mut units = Vec::with_capacity(elements.len());

        for element in elements {
            let text = element.text();
            if text.trim().is_empty() {
                continue;
            }
            let glue = if units.is_empty() {
                ""
            } else {
                ELEMENT_SEPARATOR
            };

            if self.estimator.estimate(text) > split_threshold {
                for (piece_index, piece) in self.split_oversized(text).into_iter().enumerate() {
                    units.push(Unit {
                        text: piece,
                        glue: if piece_index == 0 { glue } else { "" },
                        metadata: element.metadata.clone(),
                    });
                }
            } else {
                units.push(Unit {
                    text: text.to_string(),
                    glue,
                    metadata: element.metadata.clone(),
                });
            }
        }
        units
    }

    /// Splits an oversized unit at word boundaries into pieces of at most
    /// `max_tokens`, keeping the final piece at or above `min_chunk_size`.
    /// Concatenating the pieces reproduces the input exactly.
    fn split_oversized(&self, text: &str) -> Vec<String> {
        let mut pieces: Vec<String> = Vec::new();
        let mut piece = String::new();

        for segment in text.split_word_bounds() {
            if !piece.is_empty()
                && self.estimator.estimate(&piece) + self.estimator.estimate(segment)
                    > self.config.max_tokens
            {
                pieces.push(std::mem::take(&mut piece));
            }
            piece.push_str(segment);
        }
        if !piece.is_empty() {
            pieces.push(piece);
        }

        if pieces.len() > 1 {
            let last_tokens = self
                .estimator
                .estimate(pieces.last().map(String::as_str).unwrap_or(""));
            if last_tokens < self.config.min_chunk_size {
                let last = pieces.pop().unwrap_or_default();
                if let Some(prev) = pieces.last_mut() {
                    prev.push_str(&last);
                }
            }
        }
        pieces
    }

    /// Merges chunks below `min_chunk_size` into a neighbor. A document that
    /// only ever produced one short chunk keeps it.
    fn merge_undersized(&self, chunks: Vec<DraftChunk>) -> Vec<DraftChunk> {
        if chunks.len() <= 1 {
            return chunks;
        }

        let mut merged: Vec<DraftChunk> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.token_count < self.config.min_chunk_size {
                if let Some(prev) = merged.last_mut() {
                    self.merge_into_previous(prev, &chunk);
                    continue;
                }
            }
            merged.push(chunk);
        }

        // An undersized leading chunk absorbs forward, replacing the next
        // chunk's overlap head with the real text it was cut from.
        if merged.len() >= 2 && merged[0].token_count < self.config.min_chunk_size {
            let first = merged.remove(0);
            let next = &mut merged[0];
            let mut text = first.text;
            text.push_str(next.leading_separator);
            text.push_str(next.body());
            next.text = text;
            next.body_offset = 0;
            next.leading_separator = first.leading_separator;
            next.metadata = ChunkMetadata::most_specific([&first.metadata, &next.metadata]);
            next.token_count = self.estimator.estimate(&next.text);
        }
        merged
    }

    fn merge_into_previous(&self, prev: &mut DraftChunk, chunk: &DraftChunk) {
        prev.text.push_str(chunk.leading_separator);
        prev.text.push_str(chunk.body());
        prev.metadata = ChunkMetadata::most_specific([&prev.metadata, &chunk.metadata]);
        prev.token_count = self.estimator.estimate(&prev.text);
    }
}

/// Chunk under construction.
struct OpenChunk {
    text: String,
    body_offset: usize,
    leading_separator: &'static str,
    snapshots: Vec<ChunkMetadata>,
}

impl OpenChunk {
    fn append(&mut self, unit: Unit) {
        self.text.push_str(unit.glue);
        self.text.push_str(&unit.text);
        self.snapshots.push(unit.metadata);
    }

    fn close(&mut self, estimator: &dyn TokenEstimator) -> DraftChunk {
        let text = std::mem::take(&mut self.text);
        let token_count = estimator.estimate(&text);
        DraftChunk {
            sequence_index: 0,
            body_offset: self.body_offset,
            leading_separator: self.leading_separator,
            metadata: ChunkMetadata::most_specific(self.snapshots.iter()),
            token_count,
            text,
        }
    }
}

fn renumber(mut chunks: Vec<DraftChunk>) -> Vec<DraftChunk> {
    for (index, chunk) in chunks.iter_mut().enumerate() {
        chunk.sequence_index = index;
    }
    chunks
}
