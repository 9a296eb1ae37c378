//! Legal-structure metadata extraction.
//!
//! Every parsed element is annotated with an immutable [`ChunkMetadata`]
//! snapshot: título/capítulo come from an explicit, document-scoped heading
//! stack; artigo, parágrafo, inciso, banca, and ano come from independent
//! regex matchers over the element text. A failing matcher degrades that one
//! tag and nothing else.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::MetadataExtractionError;
use crate::parser::Element;

static RE_TITULO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^t[íi]tulo\b").expect("titulo regex"));
static RE_CAPITULO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^cap[íi]tulo\b").expect("capitulo regex"));
static RE_ARTIGO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bart(?:igo)?\.?\s*(\d+)[ºo°]?(?:\s*-\s*([A-Z]))?").expect("artigo regex")
});
static RE_PARAGRAFO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"§\s*(\d+)").expect("paragrafo regex"));
static RE_PARAGRAFO_UNICO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)par[áa]grafo\s+[úu]nico").expect("paragrafo unico regex"));
static RE_INCISO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([IVXLCDM]+)\s*[-–—]").expect("inciso regex"));
static RE_BANCA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(cespe|cebraspe|fcc|fgv|vunesp|ibfc|esaf)\b").expect("banca regex")
});
static RE_ANO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").expect("ano regex"));

/// Structural tags attached to an element or chunk.
///
/// All fields are optional; absent tags simply did not apply to the text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub titulo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capitulo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artigo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragrafo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inciso: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tipo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banca: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ano: Option<String>,
}

impl ChunkMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Looks a tag up by its persisted name.
    pub fn tag(&self, name: &str) -> Option<&str> {
        let field = match name {
            "titulo" => &self.titulo,
            "capitulo" => &self.capitulo,
            "artigo" => &self.artigo,
            "paragrafo" => &self.paragrafo,
            "inciso" => &self.inciso,
            "tipo" => &self.tipo,
            "banca" => &self.banca,
            "ano" => &self.ano,
            _ => return None,
        };
        field.as_deref()
    }

    /// Folds element metadata in reading order into the chunk-level tags.
    ///
    /// Later non-empty tags win; a fresh artigo resets the deeper parágrafo
    /// and inciso tags so the result names the most specific structural unit
    /// actually contained in the chunk. Heading-stack tags survive as the
    /// fallback when no deeper unit appears.
    pub fn most_specific<'a, I>(snapshots: I) -> Self
    where
        I: IntoIterator<Item = &'a ChunkMetadata>,
    {
        let mut folded = ChunkMetadata::default();
        for snapshot in snapshots {
            if snapshot.titulo.is_some() {
                folded.titulo = snapshot.titulo.clone();
            }
            if snapshot.capitulo.is_some() {
                folded.capitulo = snapshot.capitulo.clone();
            }
            if snapshot.artigo.is_some() && snapshot.artigo != folded.artigo {
                folded.artigo = snapshot.artigo.clone();
                folded.paragrafo = None;
                folded.inciso = None;
            }
            if snapshot.paragrafo.is_some() {
                folded.paragrafo = snapshot.paragrafo.clone();
            }
            if snapshot.inciso.is_some() {
                folded.inciso = snapshot.inciso.clone();
            }
            if snapshot.banca.is_some() {
                folded.banca = snapshot.banca.clone();
            }
            if snapshot.ano.is_some() {
                folded.ano = snapshot.ano.clone();
            }
        }
        folded.tipo = classify_tipo(&folded);
        folded
    }
}

/// A parsed element together with its metadata snapshot.
///
/// The snapshot is taken at extraction time and never aliased, so elements
/// can be regrouped for overlap construction without sharing a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedElement {
    pub element: Element,
    pub metadata: ChunkMetadata,
}

impl AnnotatedElement {
    pub fn text(&self) -> &str {
        self.element.text()
    }
}

/// Document-scoped heading context.
///
/// Pushing a deeper heading nests it; pushing a same-or-shallower heading
/// pops back to its level first. The stack is a plain value threaded through
/// one extraction pass, never shared between documents.
#[derive(Debug, Clone, Default)]
pub struct HeadingStack {
    entries: Vec<(usize, String)>,
}

impl HeadingStack {
    pub fn push(&mut self, level: usize, text: &str) {
        while self
            .entries
            .last()
            .is_some_and(|(top_level, _)| *top_level >= level)
        {
            self.entries.pop();
        }
        self.entries.push((level, text.to_string()));
    }

    /// Innermost heading whose text matches `pattern`.
    fn active(&self, pattern: &Regex) -> Option<String> {
        self.entries
            .iter()
            .rev()
            .find(|(_, text)| pattern.is_match(text))
            .map(|(_, text)| text.clone())
    }

    pub fn active_titulo(&self) -> Option<String> {
        self.active(&RE_TITULO)
    }

    pub fn active_capitulo(&self) -> Option<String> {
        self.active(&RE_CAPITULO)
    }
}

/// Annotates parsed elements with structural metadata.
///
/// Deterministic: identical element sequences always yield identical
/// annotations.
#[derive(Debug, Clone, Default)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn annotate(&self, elements: Vec<Element>) -> Vec<AnnotatedElement> {
        let mut stack = HeadingStack::default();
        let mut annotated = Vec::with_capacity(elements.len());

        for element in elements {
            if let Element::Heading { level, text } = &element {
                stack.push(*level, text);
            }

            let mut metadata = ChunkMetadata {
                titulo: stack.active_titulo(),
                capitulo: stack.active_capitulo(),
                ..Default::default()
            };

            let text = element.text();
            metadata.artigo = match_artigo(text);
            metadata.paragrafo = match_paragrafo(text);
            metadata.inciso = match_inciso(text).unwrap_or_else(|err| {
                warn!(error = %err, "inciso matcher failed, continuing with partial metadata");
                None
            });
            metadata.banca = match_banca(text);
            metadata.ano = match_ano(text);
            metadata.tipo = classify_tipo(&metadata);

            annotated.push(AnnotatedElement { element, metadata });
        }
        annotated
    }
}

fn match_artigo(text: &str) -> Option<String> {
    let caps = RE_ARTIGO.captures(text)?;
    let number = caps.get(1)?.as_str();
    match caps.get(2) {
        Some(suffix) => Some(format!("Art. {}-{}", number, suffix.as_str())),
        None => Some(format!("Art. {number}")),
    }
}

fn match_paragrafo(text: &str) -> Option<String> {
    if RE_PARAGRAFO_UNICO.is_match(text) {
        return Some("Parágrafo único".to_string());
    }
    let caps = RE_PARAGRAFO.captures(text)?;
    Some(format!("§ {}", caps.get(1)?.as_str()))
}

fn match_inciso(text: &str) -> Result<Option<String>, MetadataExtractionError> {
    let Some(caps) = RE_INCISO.captures(text) else {
        return Ok(None);
    };
    let Some(numeral) = caps.get(1) else {
        return Ok(None);
    };
    let numeral = numeral.as_str();
    if roman_to_u32(numeral).is_none() {
        return Err(MetadataExtractionError::InvalidRoman(numeral.to_string()));
    }
    Ok(Some(numeral.to_string()))
}

fn match_banca(text: &str) -> Option<String> {
    RE_BANCA
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_uppercase())
}

fn match_ano(text: &str) -> Option<String> {
    RE_ANO
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn classify_tipo(metadata: &ChunkMetadata) -> Option<String> {
    if metadata.inciso.is_some() {
        Some("inciso".to_string())
    } else if metadata.paragrafo.is_some() {
        Some("paragrafo".to_string())
    } else if metadata.artigo.is_some() {
        Some("caput".to_string())
    } else {
        None
    }
}

/// Strict roman-numeral parse; rejects malformed sequences like `IIII`.
fn roman_to_u32(numeral: &str) -> Option<u32> {
    fn digit(c: char) -> Option<u32> {
        match c {
            'I' => Some(1),
            'V' => Some(5),
            'X' => Some(10),
            'L' => Some(50),
            'C' => Some(100),
            'D' => Some(500),
            'M' => Some(1000),
            _ => None,
        }
    }

    let mut total = 0u32;
    let mut prev = 0u32;
    for c in numeral.chars().rev() {
        let value = digit(c)?;
        if value < prev {
            total = total.checked_sub(value)?;
        } else {
            total = total.checked_add(value)?;
            prev = value;
        }
    }
    if total == 0 {
        return None;
    }
    // Round-trip to reject non-canonical forms.
    if to_roman(total)? != numeral {
        return None;
    }
    Some(total)
}

fn to_roman(mut value: u32) -> Option<String> {
    if value == 0 || value > 3999 {
        return None;
    }
    const TABLE: [(u32, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (weight, symbol) in TABLE {
        while value >= weight {
            out.push_str(symbol);
            value -= weight;
        }
    }
    Some(out)
}
