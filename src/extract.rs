//! Multi-format text extraction for binary attachments.
//!
//! Pure transformations over provided bytes: binary/container input in,
//! plain text (or a typed failure) out. Nothing here touches shared
//! state, so extraction is safe to run from concurrent synchronizer
//! batches. An input that merely contains no text is a success with an
//! empty string, never an error.

use std::io::Read;
use std::path::Path;

use crate::models::{MIME_DOC, MIME_DOCX, MIME_PDF, MIME_PPTX, MIME_XLSX};

/// Legacy binary word-processor layout: plain-text byte length is encoded
/// across these four header offsets, payload starts at `DOC_TEXT_OFFSET`.
const DOC_LEN_OFFSET: usize = 0x21C;
const DOC_TEXT_OFFSET: usize = 0xA00;

/// Caller-supplied post-processing applied to extracted PDF text.
pub type PdfTextFilter = dyn Fn(String) -> String + Send + Sync;

/// Typed extraction failure; mapped onto `RecordStatus` by the
/// synchronizer rather than thrown through it.
#[derive(Debug)]
pub enum ExtractError {
    /// File unreadable or archive unopenable.
    Io(String),
    /// Recognized container, but not the documented legacy layout.
    UnsupportedEncoding,
    /// Secured/encrypted PDF.
    Encrypted,
    /// Any other parse failure.
    Corrupt(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Io(e) => write!(f, "file open error: {}", e),
            ExtractError::UnsupportedEncoding => write!(f, "unsupported file format"),
            ExtractError::Encrypted => write!(f, "document is encrypted"),
            ExtractError::Corrupt(e) => write!(f, "extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracts plain text from the attachment at `path` according to its
/// declared MIME type.
pub fn extract_file(
    path: &Path,
    mime_type: &str,
    pdf_filter: Option<&PdfTextFilter>,
) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::Io(e.to_string()))?;
    extract_bytes(&bytes, mime_type, pdf_filter)
}

/// Byte-stream entry point; `extract_file` is a thin wrapper over this.
pub fn extract_bytes(
    bytes: &[u8],
    mime_type: &str,
    pdf_filter: Option<&PdfTextFilter>,
) -> Result<String, ExtractError> {
    match mime_type {
        MIME_PDF => extract_pdf(bytes, pdf_filter),
        MIME_DOC => extract_doc(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_XLSX => extract_xlsx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        other => Err(ExtractError::Corrupt(format!(
            "no extractor for content type {}",
            other
        ))),
    }
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8], filter: Option<&PdfTextFilter>) -> Result<String, ExtractError> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
        let msg = e.to_string();
        if msg.to_ascii_lowercase().contains("encrypt") {
            ExtractError::Encrypted
        } else {
            ExtractError::Corrupt(msg)
        }
    })?;

    // Flatten to a single line: drop control characters (newlines and
    // tabs included) and ideographic spaces left behind by layout.
    let text: String = text
        .chars()
        .filter(|c| !c.is_control() && *c != '\u{3000}')
        .collect();
    let text = text.trim().to_string();

    Ok(match filter {
        Some(f) => f(text),
        None => text,
    })
}

// ============ Legacy binary word-processor (.doc) ============

/// The plain-text payload length is a 32-bit little-endian integer split
/// across offsets 0x21C..=0x21F with fixed adjustments on the low two
/// bytes. A non-positive length means the file is not this layout.
fn extract_doc(bytes: &[u8]) -> Result<String, ExtractError> {
    if bytes.len() < DOC_LEN_OFFSET + 4 {
        return Err(ExtractError::UnsupportedEncoding);
    }

    let len = (bytes[DOC_LEN_OFFSET] as i64 - 1)
        + (bytes[DOC_LEN_OFFSET + 1] as i64 - 8) * 256
        + (bytes[DOC_LEN_OFFSET + 2] as i64) * 65536
        + (bytes[DOC_LEN_OFFSET + 3] as i64) * 16777216;
    if len <= 0 {
        return Err(ExtractError::UnsupportedEncoding);
    }

    let start = DOC_TEXT_OFFSET.min(bytes.len());
    let end = (DOC_TEXT_OFFSET + len as usize).min(bytes.len());
    let (decoded, _, _) = encoding_rs::UTF_16LE.decode(&bytes[start..end]);

    Ok(strip_ascii_controls(&decoded).trim().to_string())
}

/// Removes ASCII control characters except newline and carriage return.
fn strip_ascii_controls(s: &str) -> String {
    s.chars()
        .filter(|&c| !matches!(c, '\x00'..='\x09' | '\x0B' | '\x0C' | '\x0E'..='\x1F' | '\x7F'))
        .collect()
}

// ============ Zip-container formats (docx / xlsx / pptx) ============

fn open_archive(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Io(e.to_string()))
}

/// Reads a named XML part, or `None` if the archive has no such part.
fn read_part(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<Vec<u8>>, ExtractError> {
    let mut entry = match archive.by_name(name) {
        Ok(e) => e,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ExtractError::Io(e.to_string())),
    };
    let mut out = Vec::new();
    entry
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Io(e.to_string()))?;
    Ok(Some(out))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut text = String::new();
    // A valid archive without the target part is "no text", not a failure.
    if let Some(xml) = read_part(&mut archive, "word/document.xml")? {
        append_paragraph_text(&xml, &mut text)?;
    }
    Ok(text.trim().to_string())
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut text = String::new();
    // Only the shared-string pool is indexed; inline and formula-computed
    // cell values are not.
    if let Some(xml) = read_part(&mut archive, "xl/sharedStrings.xml")? {
        append_string_table_text(&xml, &mut text)?;
    }
    Ok(text.trim().to_string())
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut text = String::new();

    // Slide parts are walked in sequence; the first missing slide{n}.xml
    // ends the walk. The same walk then covers embedded diagram data.
    let mut n = 1;
    while let Some(xml) = read_part(&mut archive, &format!("ppt/slides/slide{}.xml", n))? {
        append_paragraph_text(&xml, &mut text)?;
        n += 1;
    }

    let mut n = 1;
    while let Some(xml) = read_part(&mut archive, &format!("ppt/diagrams/data{}.xml", n))? {
        append_paragraph_text(&xml, &mut text)?;
        n += 1;
    }

    Ok(text.trim().to_string())
}

/// Walks `<p>` paragraph elements, concatenating the text of every `<t>`
/// run inside each, one output line per paragraph. Works unchanged for
/// the word-processor (`w:`) and presentation (`a:`) namespaces since
/// only local names are matched.
fn append_paragraph_text(xml: &[u8], out: &mut String) -> Result<(), ExtractError> {
    // Text inside `<t>` runs is space-significant (`xml:space="preserve"`),
    // so no whitespace trimming on the reader.
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut para_depth = 0u32;
    let mut in_run = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => para_depth += 1,
                b"t" if para_depth > 0 => in_run = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_run => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"p" => {
                    para_depth = para_depth.saturating_sub(1);
                    if para_depth == 0 {
                        out.push('\n');
                    }
                }
                b"t" => in_run = false,
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Corrupt(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

/// Walks the spreadsheet shared-string table, one entry text per line.
fn append_string_table_text(xml: &[u8], out: &mut String) -> Result<(), ExtractError> {
    // String-table entries keep their whitespace as authored.
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
                out.push('\n');
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Corrupt(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}
