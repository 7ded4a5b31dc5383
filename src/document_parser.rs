//! C5 step 2 — parse a document by extension into plain text.
//!
//! `.txt`/`.md` are read as UTF-8 verbatim; `.pdf` pages are joined with a
//! blank line; `.docx` paragraphs are filtered to non-empty and joined with
//! a blank line. Unknown extensions fail permanently (no retry helps).

use crate::error::IngestError;
use std::io::Read;
use std::path::Path;

pub struct ParsedDocument {
    pub text: String,
    pub page_count: usize,
    pub file_type: String,
    pub original_filename: String,
}

const SUPPORTED_EXTENSIONS: &[&str] = &[".txt", ".md", ".pdf", ".docx"];

pub fn is_supported(extension: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension)
}

pub fn parse(path: &Path, original_filename: &str) -> Result<ParsedDocument, IngestError> {
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    match extension.as_str() {
        ".txt" | ".md" => parse_text(path, &extension, original_filename),
        ".pdf" => parse_pdf(path, original_filename),
        ".docx" => parse_docx(path, original_filename),
        other => Err(IngestError::ParseFailure(format!(
            "unsupported extension: {other}"
        ))),
    }
}

fn parse_text(
    path: &Path,
    extension: &str,
    original_filename: &str,
) -> Result<ParsedDocument, IngestError> {
    let bytes = std::fs::read(path)
        .map_err(|e| IngestError::ParseFailure(format!("failed to read {path:?}: {e}")))?;
    let text = decode_text(&bytes);
    Ok(ParsedDocument {
        text,
        page_count: 1,
        file_type: extension.trim_start_matches('.').to_string(),
        original_filename: original_filename.to_string(),
    })
}

/// Most uploads are UTF-8; fall back to `chardet`-free BOM/heuristic
/// detection via `encoding_rs` for files saved by older Windows editors.
fn decode_text(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    let (cow, _encoding, had_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
    if had_errors {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        cow.into_owned()
    }
}

fn parse_pdf(path: &Path, original_filename: &str) -> Result<ParsedDocument, IngestError> {
    let bytes = std::fs::read(path)
        .map_err(|e| IngestError::ParseFailure(format!("failed to read {path:?}: {e}")))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .map_err(|e| IngestError::ParseFailure(format!("failed to parse pdf: {e}")))?;

    // pdf-extract separates pages with form-feed characters; mirror the
    // original's "join non-empty pages with a blank line" behavior.
    let pages: Vec<&str> = text
        .split('\u{c}')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let page_count = pages.len().max(1);

    Ok(ParsedDocument {
        text: pages.join("\n\n"),
        page_count,
        file_type: "pdf".to_string(),
        original_filename: original_filename.to_string(),
    })
}

fn parse_docx(path: &Path, original_filename: &str) -> Result<ParsedDocument, IngestError> {
    let file = std::fs::File::open(path)
        .map_err(|e| IngestError::ParseFailure(format!("failed to open {path:?}: {e}")))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| IngestError::ParseFailure(format!("not a valid docx: {e}")))?;

    let mut document_xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| IngestError::ParseFailure(format!("missing word/document.xml: {e}")))?
        .read_to_string(&mut document_xml)
        .map_err(|e| IngestError::ParseFailure(format!("failed to read document.xml: {e}")))?;

    let paragraphs = extract_docx_paragraphs(&document_xml)?;
    let non_empty: Vec<String> = paragraphs
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    Ok(ParsedDocument {
        text: non_empty.join("\n\n"),
        page_count: 1,
        file_type: "docx".to_string(),
        original_filename: original_filename.to_string(),
    })
}

/// Walks `word/document.xml`, collecting text within each `<w:p>` paragraph
/// element, joining `<w:t>` runs inside a paragraph with no separator (they
/// are fragments of the same sentence).
fn extract_docx_paragraphs(xml: &str) -> Result<Vec<String>, IngestError> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;

    loop {
        match reader
            .read_event()
            .map_err(|e| IngestError::ParseFailure(format!("malformed docx xml: {e}")))?
        {
            Event::Start(e) if e.local_name().as_ref() == b"p" => {
                current.clear();
            }
            Event::End(e) if e.local_name().as_ref() == b"p" => {
                paragraphs.push(std::mem::take(&mut current));
            }
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                in_text_run = true;
            }
            Event::End(e) if e.local_name().as_ref() == b"t" => {
                in_text_run = false;
            }
            Event::Text(t) if in_text_run => {
                current.push_str(
                    &t.decode()
                        .map_err(|e| IngestError::ParseFailure(format!("malformed docx xml: {e}")))?,
                );
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello world").unwrap();

        let parsed = parse(&path, "notes.txt").unwrap();
        assert_eq!(parsed.text, "hello world");
        assert_eq!(parsed.file_type, "txt");
        assert_eq!(parsed.page_count, 1);
    }

    #[test]
    fn decode_text_falls_back_for_non_utf8_bytes() {
        let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode("café");
        let decoded = decode_text(&bytes);
        assert_eq!(decoded, "café");
    }

    #[test]
    fn unsupported_extension_fails_permanently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.exe");
        std::fs::write(&path, "binary").unwrap();
        assert!(parse(&path, "notes.exe").is_err());
    }

    #[test]
    fn docx_paragraph_extraction_joins_runs_and_drops_empties() {
        let xml = r#"<w:document xmlns:w="ns"><w:body>
            <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t> world</w:t></w:r></w:p>
            <w:p><w:r><w:t>   </w:t></w:r></w:p>
            <w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let paragraphs = extract_docx_paragraphs(xml).unwrap();
        let non_empty: Vec<&str> = paragraphs
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        assert_eq!(non_empty, vec!["Hello world", "Second paragraph"]);
    }
}
