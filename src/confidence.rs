//! Maps retrieval similarity onto a discrete confidence scale.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Answer confidence derived from the mean similarity of the retrieved set.
///
/// Serialized in the uppercase form consumers display verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    #[serde(rename = "ALTA")]
    Alta,
    #[serde(rename = "MEDIA")]
    Media,
    #[serde(rename = "BAIXA")]
    Baixa,
    /// Nothing usable was retrieved; answer without citations.
    #[serde(rename = "SEM_RAG")]
    SemRag,
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Alta => "ALTA",
            Self::Media => "MEDIA",
            Self::Baixa => "BAIXA",
            Self::SemRag => "SEM_RAG",
        };
        f.write_str(label)
    }
}

/// Fixed thresholds over mean similarity.
///
/// The bands are half-open and exhaustive: `[0.85, 1]` ALTA, `[0.70, 0.85)`
/// MEDIA, `[0.60, 0.70)` BAIXA, everything below SEM_RAG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceCalculator;

impl ConfidenceCalculator {
    pub const ALTA_THRESHOLD: f32 = 0.85;
    pub const MEDIA_THRESHOLD: f32 = 0.70;
    pub const BAIXA_THRESHOLD: f32 = 0.60;

    pub fn new() -> Self {
        Self
    }

    /// Classifies a single mean similarity.
    pub fn classify(&self, mean_similarity: f32) -> ConfidenceLevel {
        if mean_similarity >= Self::ALTA_THRESHOLD {
            ConfidenceLevel::Alta
        } else if mean_similarity >= Self::MEDIA_THRESHOLD {
            ConfidenceLevel::Media
        } else if mean_similarity >= Self::BAIXA_THRESHOLD {
            ConfidenceLevel::Baixa
        } else {
            ConfidenceLevel::SemRag
        }
    }

    /// Mean of the similarities, then [`classify`](Self::classify).
    /// An empty set is SEM_RAG.
    pub fn from_similarities(&self, similarities: &[f32]) -> ConfidenceLevel {
        match mean(similarities) {
            Some(value) => self.classify(value),
            None => ConfidenceLevel::SemRag,
        }
    }
}

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f32>() / values.len() as f32)
}
