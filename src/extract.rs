//! Plain-text extraction for uploaded files.
//!
//! Callers pass the bytes and the declared MIME type; this module returns
//! UTF-8 text, `Ok(None)` for an accepted format it cannot read, or an
//! [`ExtractError`]. Parsers run on untrusted bytes, so servers call
//! [`extract_text_blocking`], which keeps them off the async runtime and
//! turns a parser panic into an error.

use std::io::Read;

use quick_xml::events::Event;
use thiserror::Error;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Formats accepted for upload.
pub const ALLOWED_MIME_TYPES: &[&str] = &[MIME_PDF, MIME_DOC, MIME_DOCX, MIME_TEXT];

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("extraction aborted: {0}")]
    Aborted(String),
}

/// Strip parameters (`; charset=...`) and lowercase a MIME type.
pub fn normalize_mime(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

pub fn is_allowed_mime(content_type: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&normalize_mime(content_type).as_str())
}

/// Guess a MIME type from a file name, for CLI ingestion.
pub fn mime_from_path(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" | "md" => Some(MIME_TEXT),
        "pdf" => Some(MIME_PDF),
        "doc" => Some(MIME_DOC),
        "docx" => Some(MIME_DOCX),
        _ => None,
    }
}

/// Extract text from `bytes`.
///
/// Legacy Word (`application/msword`) is accepted for upload but has no
/// extractor, so it yields `Ok(None)`.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<Option<String>, ExtractError> {
    match normalize_mime(content_type).as_str() {
        MIME_TEXT => Ok(Some(String::from_utf8_lossy(bytes).into_owned())),
        MIME_PDF => extract_pdf(bytes).map(Some),
        MIME_DOCX => extract_docx(bytes).map(Some),
        MIME_DOC => Ok(None),
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

/// [`extract_text`] on the blocking thread pool.
pub async fn extract_text_blocking(
    bytes: Vec<u8>,
    content_type: String,
) -> Result<Option<String>, ExtractError> {
    run_blocking(move || extract_text(&bytes, &content_type)).await
}

async fn run_blocking<F>(job: F) -> Result<Option<String>, ExtractError>
where
    F: FnOnce() -> Result<Option<String>, ExtractError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| ExtractError::Aborted(e.to_string()))?
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    paragraphs_text(&doc_xml)
}

/// Concatenate `<w:t>` runs, one line per `<w:p>` paragraph.
fn paragraphs_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => out.push('\t'),
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
