//! Per-format document parsers.
//!
//! One parser per [`DocumentKind`], each producing [`ChunkDraft`]s with a
//! format-specific locator, dispatched through [`parse`]. Tabular parsers
//! additionally reconstruct [`Table`]s for temporal enrichment.
//!
//! Failure semantics: a genuinely corrupt source is a terminal
//! [`IngestError::Parse`]; partial extractability (e.g. an image-only PDF
//! page) degrades to fewer or zero chunks without failing the document.

pub mod delimited;
pub mod docx;
pub mod pdf;
pub mod pptx;
pub mod spreadsheet;
pub mod text;

use std::io::Read;

use crate::error::IngestError;
use crate::models::{DocumentKind, Locator, Table};

/// Approximate chars-per-token ratio used for chunk budgets.
pub const CHARS_PER_TOKEN: usize = 4;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
pub(crate) const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// A chunk as produced by a parser, before ids and enrichment are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub content: String,
    pub locator: Locator,
}

/// Parser output: chunk drafts plus any reconstructed tables.
#[derive(Debug, Clone, Default)]
pub struct Parsed {
    pub chunks: Vec<ChunkDraft>,
    pub tables: Vec<Table>,
}

/// Determine the document kind from the filename extension.
pub fn kind_for_filename(filename: &str) -> Option<DocumentKind> {
    let ext = filename.rsplit('.').next()?.to_ascii_lowercase();
    match ext.as_str() {
        "xlsx" | "xlsm" => Some(DocumentKind::Spreadsheet),
        "pdf" => Some(DocumentKind::Pdf),
        "docx" => Some(DocumentKind::Word),
        "pptx" => Some(DocumentKind::SlideDeck),
        "csv" | "tsv" => Some(DocumentKind::Delimited),
        "txt" | "md" | "text" => Some(DocumentKind::PlainText),
        _ => None,
    }
}

/// Parse raw bytes into chunk drafts (and tables, for tabular kinds).
///
/// `max_tokens` is the page/paragraph chunk budget; cell and row chunks are
/// naturally small and ignore it.
pub fn parse(
    bytes: &[u8],
    filename: &str,
    kind: DocumentKind,
    max_tokens: usize,
) -> Result<Parsed, IngestError> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    match kind {
        DocumentKind::Spreadsheet => spreadsheet::parse(bytes),
        DocumentKind::Pdf => pdf::parse(bytes, max_chars),
        DocumentKind::Word => docx::parse(bytes),
        DocumentKind::SlideDeck => pptx::parse(bytes),
        DocumentKind::Delimited => delimited::parse(bytes, filename),
        DocumentKind::PlainText => text::parse(bytes, max_chars),
    }
}

pub(crate) fn open_archive(
    bytes: &[u8],
) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, IngestError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| IngestError::Parse(format!("not a valid OOXML archive: {}", e)))
}

pub(crate) fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, IngestError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| IngestError::Parse(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| IngestError::Parse(format!("{}: {}", name, e)))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(IngestError::Parse(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Split text at paragraph boundaries (`\n\n`) into pieces under `max_chars`,
/// never cutting mid-paragraph unless a single paragraph exceeds the budget,
/// in which case it is split at line or space boundaries.
pub(crate) fn split_on_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if trimmed.len() > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, remaining.len().min(max_chars));
                let actual = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                pieces.push(remaining[..actual].trim().to_string());
                remaining = &remaining[actual..];
            }
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces.retain(|p| !p.is_empty());
    pieces
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx.max(1).min(s.len())
}
