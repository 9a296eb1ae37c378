//! Structural parsing of raw legal documents.
//!
//! A source document is turned into an ordered sequence of typed elements:
//! headings with a nesting level (1..=9, `#` markers) and paragraphs
//! (blank-line-separated runs of text with inner newlines collapsed).
//! Parsing is a pure transform with no side effects.

use crate::errors::ParseError;

/// One structural element of a parsed document, in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// A heading with nesting level 1..=9.
    Heading { level: usize, text: String },
    /// A body paragraph.
    Paragraph { text: String },
}

impl Element {
    /// The element's visible text.
    pub fn text(&self) -> &str {
        match self {
            Element::Heading { text, .. } => text,
            Element::Paragraph { text } => text,
        }
    }

    pub fn is_heading(&self) -> bool {
        matches!(self, Element::Heading { .. })
    }
}

/// Parses a raw document into ordered elements.
///
/// `name` is only used for error reporting.
pub fn parse_document(name: &str, raw: &str) -> Result<Vec<Element>, ParseError> {
    let mut elements = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut elements);
            continue;
        }

        if let Some((level, text)) = split_heading(trimmed) {
            if level > 9 {
                return Err(ParseError::HeadingLevel {
                    name: name.to_string(),
                    level,
                });
            }
            flush_paragraph(&mut paragraph, &mut elements);
            if !text.is_empty() {
                elements.push(Element::Heading {
                    level,
                    text: text.to_string(),
                });
            }
            continue;
        }

        paragraph.push(trimmed);
    }
    flush_paragraph(&mut paragraph, &mut elements);

    if elements.is_empty() {
        return Err(ParseError::EmptyDocument {
            name: name.to_string(),
        });
    }
    Ok(elements)
}

fn flush_paragraph(buffer: &mut Vec<&str>, elements: &mut Vec<Element>) {
    if buffer.is_empty() {
        return;
    }
    let text = buffer.join(" ");
    buffer.clear();
    elements.push(Element::Paragraph { text });
}

/// Splits a `#`-marked heading line into (level, text), or `None` when the
/// line is not a heading.
fn split_heading(line: &str) -> Option<(usize, &str)> {
    if !line.starts_with('#') {
        return None;
    }
    let level = line.chars().take_while(|c| *c == '#').count();
    let rest = &line[level..];
    // Require the marker to be followed by whitespace or end-of-line so
    // fragments like "#1" stay paragraphs.
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some((level, rest.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# TÍTULO II

## CAPÍTULO I

Art. 5 Todos são iguais perante a lei, sem distinção de qualquer natureza.

§ 1 As normas definidoras dos direitos e garantias fundamentais
têm aplicação imediata.
";

    #[test]
    fn parses_headings_and_paragraphs_in_order() {
        let elements = parse_document("cf88", SAMPLE).unwrap();
        assert_eq!(elements.len(), 4);
        assert_eq!(
            elements[0],
            Element::Heading {
                level: 1,
                text: "TÍTULO II".into()
            }
        );
        assert_eq!(
            elements[1],
            Element::Heading {
                level: 2,
                text: "CAPÍTULO I".into()
            }
        );
        assert!(elements[2].text().starts_with("Art. 5"));
    }

    #[test]
    fn multiline_paragraph_collapses_to_single_space() {
        let elements = parse_document("cf88", SAMPLE).unwrap();
        assert_eq!(
            elements[3].text(),
            "§ 1 As normas definidoras dos direitos e garantias fundamentais têm aplicação imediata."
        );
    }

    #[test]
    fn empty_document_fails() {
        let err = parse_document("vazio", "\n   \n\n").unwrap_err();
        assert!(matches!(err, ParseError::EmptyDocument { .. }));
    }

    #[test]
    fn heading_deeper_than_nine_is_rejected() {
        let err = parse_document("doc", "########## demais").unwrap_err();
        assert!(matches!(err, ParseError::HeadingLevel { level: 10, .. }));
    }

    #[test]
    fn hash_without_space_is_a_paragraph() {
        let elements = parse_document("doc", "#1 do edital").unwrap();
        assert_eq!(
            elements[0],
            Element::Paragraph {
                text: "#1 do edital".into()
            }
        );
    }

    #[test]
    fn parsing_is_deterministic() {
        let first = parse_document("cf88", SAMPLE).unwrap();
        let second = parse_document("cf88", SAMPLE).unwrap();
        assert_eq!(first, second);
    }
}
