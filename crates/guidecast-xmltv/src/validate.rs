//! Well-formedness check for produced documents.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{Result, XmltvError};

/// Summary of a document that passed validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Top-level `<channel>` elements.
    pub channels: usize,
    /// Top-level `<programme>` elements.
    pub programmes: usize,
}

fn invalid(position: u64, detail: impl std::fmt::Display) -> XmltvError {
    XmltvError::Validation(format!("at byte {position}: {detail}"))
}

/// Streams `input` through an XML parser and checks that it has an XML
/// declaration, exactly one `<tv>` root, balanced tags and nothing but
/// whitespace, comments and a doctype outside the root.
///
/// # Errors
///
/// Returns [`XmltvError::Validation`] describing the first problem.
pub fn validate_document<R: BufRead>(input: R) -> Result<ValidationReport> {
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut report = ValidationReport::default();
    let mut declaration = false;
    let mut root_seen = false;
    let mut root_closed = false;
    let mut depth: usize = 0;

    loop {
        let position = reader.buffer_position();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| invalid(position, e))?;
        match event {
            Event::Decl(_) => {
                if root_seen || declaration {
                    return Err(invalid(position, "misplaced XML declaration"));
                }
                declaration = true;
            }
            Event::Start(ref tag) | Event::Empty(ref tag) => {
                let is_empty = matches!(event, Event::Empty(_));
                if depth == 0 {
                    if root_closed || root_seen {
                        return Err(invalid(position, "content after the root element"));
                    }
                    if tag.name().as_ref() != b"tv" {
                        return Err(invalid(position, "root element is not <tv>"));
                    }
                    root_seen = true;
                    if is_empty {
                        root_closed = true;
                    }
                } else if depth == 1 {
                    match tag.name().as_ref() {
                        b"channel" => report.channels = report.channels.saturating_add(1),
                        b"programme" => report.programmes = report.programmes.saturating_add(1),
                        _ => {}
                    }
                }
                if !is_empty {
                    depth = depth.saturating_add(1);
                }
            }
            Event::End(_) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(position, "unbalanced closing tag"))?;
                if depth == 0 {
                    root_closed = true;
                }
            }
            Event::Text(ref text) if depth == 0 => {
                if !text.iter().all(u8::is_ascii_whitespace) {
                    return Err(invalid(position, "text outside the root element"));
                }
            }
            Event::GeneralRef(_) if depth == 0 => {
                return Err(invalid(position, "entity reference outside the root element"));
            }
            Event::CData(_) if depth == 0 => {
                return Err(invalid(position, "CDATA section outside the root element"));
            }
            Event::PI(_) if depth == 0 => {
                return Err(invalid(position, "processing instruction outside the root element"));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !declaration {
        return Err(XmltvError::Validation(String::from("missing XML declaration")));
    }
    if !root_seen {
        return Err(XmltvError::Validation(String::from("missing <tv> root element")));
    }
    if !root_closed {
        return Err(XmltvError::Validation(String::from("<tv> root element is not closed")));
    }
    Ok(report)
}

/// Validates the document stored at `path`.
///
/// # Errors
///
/// Returns [`XmltvError::Io`] if the file cannot be opened and
/// [`XmltvError::Validation`] if it is not well-formed.
pub fn validate_file(path: &Path) -> Result<ValidationReport> {
    let file = File::open(path)?;
    validate_document(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Write;

    use super::*;

    const DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

    fn check(doc: &str) -> Result<ValidationReport> {
        validate_document(doc.as_bytes())
    }

    #[test]
    fn test_valid_document() {
        // Arrange
        let doc = format!(
            "{DECL}<!DOCTYPE tv SYSTEM \"xmltv.dtd\">\n<tv>\n  <channel id=\"A\"><display-name>A</display-name></channel>\n  <programme channel=\"A\"><title>x</title></programme>\n  <programme channel=\"A\"/>\n</tv>\n"
        );

        // Act
        let report = check(&doc).unwrap();

        // Assert
        assert_eq!(report.channels, 1);
        assert_eq!(report.programmes, 2);
    }

    #[test]
    fn test_missing_declaration() {
        assert!(matches!(check("<tv></tv>"), Err(XmltvError::Validation(_))));
    }

    #[test]
    fn test_wrong_root() {
        let doc = format!("{DECL}<guide></guide>");
        assert!(matches!(check(&doc), Err(XmltvError::Validation(_))));
    }

    #[test]
    fn test_unclosed_root() {
        let doc = format!("{DECL}<tv><channel id=\"A\"></channel>");
        assert!(matches!(check(&doc), Err(XmltvError::Validation(_))));
    }

    #[test]
    fn test_mismatched_tags() {
        let doc = format!("{DECL}<tv><programme></channel></tv>");
        assert!(matches!(check(&doc), Err(XmltvError::Validation(_))));
    }

    #[test]
    fn test_second_root() {
        let doc = format!("{DECL}<tv></tv><tv></tv>");
        assert!(matches!(check(&doc), Err(XmltvError::Validation(_))));
    }

    #[test]
    fn test_entity_reference_after_root() {
        let doc = format!("{DECL}<tv></tv>\n&amp;");
        assert!(matches!(check(&doc), Err(XmltvError::Validation(_))));
    }

    #[test]
    fn test_entity_reference_before_root() {
        let doc = format!("{DECL}&lt;<tv></tv>");
        assert!(matches!(check(&doc), Err(XmltvError::Validation(_))));
    }

    #[test]
    fn test_cdata_outside_root() {
        let doc = format!("{DECL}<tv></tv>\n<![CDATA[junk]]>");
        assert!(matches!(check(&doc), Err(XmltvError::Validation(_))));
    }

    #[test]
    fn test_processing_instruction_outside_root() {
        let doc = format!("{DECL}<tv></tv>\n<?trailer data?>");
        assert!(matches!(check(&doc), Err(XmltvError::Validation(_))));
    }

    #[test]
    fn test_markup_inside_root_is_accepted() {
        // Arrange
        let doc = format!(
            "{DECL}<!-- guide -->\n<tv>\n  <programme channel=\"A\"><title>a &amp; b</title><desc><![CDATA[x]]></desc></programme>\n</tv>\n<!-- end -->\n"
        );

        // Act
        let report = check(&doc).unwrap();

        // Assert
        assert_eq!(report.programmes, 1);
    }

    #[test]
    fn test_validate_file() {
        // Arrange
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{DECL}<tv/>").unwrap();

        // Act
        let report = validate_file(file.path()).unwrap();

        // Assert
        assert_eq!(report, ValidationReport::default());
    }
}
