//! Text extraction dispatching on the closed MIME-family set
//! `{plain, pdf, docx, image, unknown}` (§4.1).
//!
//! PDF extraction uses `pdf-extract`; DOCX walks the OOXML zip with `zip` +
//! `quick_xml` over `word/document.xml`. `image` dispatches to an
//! [`OcrProvider`](crate::ocr::OcrProvider), mirroring the pluggable-backend
//! pattern the embedder uses.

use crate::models::MimeFamily;
use crate::ocr::OcrProvider;
use std::io::Read;

/// Inputs larger than this are rejected as `too-large` before extraction
/// begins (§4.1 size policy).
pub const MAX_INPUT_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// The typed extraction outcomes from §4.1: `{unsupported, corrupt, empty,
/// too-large}`.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    Corrupt(String),
    Empty,
    TooLarge,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => write!(f, "unsupported content family: {ct}"),
            ExtractError::Corrupt(e) => write!(f, "corrupt content: {e}"),
            ExtractError::Empty => write!(f, "extraction produced no text"),
            ExtractError::TooLarge => write!(f, "input exceeds the size limit"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracts canonical UTF-8 text from raw bytes declared under `family`.
/// Enforces the size policy before doing any format-specific work.
pub async fn extract_text(
    bytes: &[u8],
    family: MimeFamily,
    ocr: &dyn OcrProvider,
) -> Result<String, ExtractError> {
    if bytes.len() as u64 > MAX_INPUT_BYTES {
        return Err(ExtractError::TooLarge);
    }

    let text = match family {
        MimeFamily::Plain => extract_plain(bytes)?,
        MimeFamily::Pdf => extract_pdf(bytes)?,
        MimeFamily::Docx => extract_docx(bytes)?,
        MimeFamily::Image => ocr
            .recognize(bytes)
            .await
            .map_err(|e| ExtractError::Corrupt(e.to_string()))?,
        MimeFamily::Unknown => return Err(ExtractError::UnsupportedContentType("unknown".to_string())),
    };

    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }

    Ok(text)
}

fn extract_plain(bytes: &[u8]) -> Result<String, ExtractError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| ExtractError::Corrupt(e.to_string()))
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract joins page text with single newlines already, which matches
    // the page-join contract we need.
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Corrupt(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name).map_err(|e| ExtractError::Corrupt(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Corrupt(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Corrupt(format!(
            "ZIP entry {name} exceeds size limit ({max_bytes} bytes)"
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Corrupt(e.to_string()))?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_docx_paragraphs(&doc_xml)
}

/// Concatenates `<w:t>` run text, preserving paragraph (`<w:p>`) boundaries
/// as single newlines, per the docx family contract.
fn extract_docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut first_paragraph = true;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"p" {
                    if !first_paragraph {
                        out.push('\n');
                    }
                    first_paragraph = false;
                } else if name.as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf) {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Corrupt(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::DisabledOcrProvider;

    #[tokio::test]
    async fn plain_text_decodes() {
        let out = extract_text(b"hello world", MimeFamily::Plain, &DisabledOcrProvider).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn plain_non_utf8_is_corrupt() {
        let err = extract_text(&[0xff, 0xfe, 0xfd], MimeFamily::Plain, &DisabledOcrProvider)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Corrupt(_)));
    }

    #[tokio::test]
    async fn unknown_family_is_unsupported() {
        let err = extract_text(b"foo", MimeFamily::Unknown, &DisabledOcrProvider).await.unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[tokio::test]
    async fn invalid_pdf_is_corrupt() {
        let err = extract_text(b"not a pdf", MimeFamily::Pdf, &DisabledOcrProvider).await.unwrap_err();
        assert!(matches!(err, ExtractError::Corrupt(_)));
    }

    #[tokio::test]
    async fn invalid_zip_is_corrupt_for_docx() {
        let err = extract_text(b"not a zip", MimeFamily::Docx, &DisabledOcrProvider).await.unwrap_err();
        assert!(matches!(err, ExtractError::Corrupt(_)));
    }

    #[tokio::test]
    async fn oversized_input_is_too_large() {
        let big = vec![b'a'; (MAX_INPUT_BYTES + 1) as usize];
        let err = extract_text(&big, MimeFamily::Plain, &DisabledOcrProvider).await.unwrap_err();
        assert!(matches!(err, ExtractError::TooLarge));
    }

    #[tokio::test]
    async fn empty_extraction_is_reported_as_empty() {
        let err = extract_text(b"   \n\t  ", MimeFamily::Plain, &DisabledOcrProvider).await.unwrap_err();
        assert!(matches!(err, ExtractError::Empty));
    }
}
