//! Page-level PDF text extraction.
//!
//! One chunk per page, split further when a page exceeds the chunk budget.
//! Pages are 1-based in locators. An image-only page yields no text and is
//! skipped without failing the document; unparseable bytes are terminal.

use crate::error::IngestError;
use crate::models::Locator;

use super::{split_on_paragraphs, ChunkDraft, Parsed};

pub fn parse(bytes: &[u8], max_chars: usize) -> Result<Parsed, IngestError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| IngestError::Parse(format!("PDF extraction failed: {}", e)))?;

    let mut parsed = Parsed::default();
    for (idx, page_text) in pages.iter().enumerate() {
        let page = (idx + 1) as u32;
        parsed
            .chunks
            .extend(chunks_for_page(page, page_text, max_chars));
    }
    Ok(parsed)
}

fn chunks_for_page(page: u32, text: &str, max_chars: usize) -> Vec<ChunkDraft> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    split_on_paragraphs(text, max_chars)
        .into_iter()
        .enumerate()
        .map(|(chunk_index, content)| ChunkDraft {
            content,
            locator: Locator::Page {
                page,
                chunk_index: chunk_index as u32,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_page_yields_no_chunks() {
        assert!(chunks_for_page(3, "   \n\n  ", 4000).is_empty());
    }

    #[test]
    fn short_page_is_one_chunk() {
        let chunks = chunks_for_page(2, "Delivery delays expected in Q4.", 4000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].locator,
            Locator::Page {
                page: 2,
                chunk_index: 0
            }
        );
    }

    #[test]
    fn long_page_splits_with_ascending_chunk_index() {
        let text = "First paragraph of the report.\n\nSecond paragraph of the report.\n\nThird paragraph of the report.";
        let chunks = chunks_for_page(1, text, 40);
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(
                chunk.locator,
                Locator::Page {
                    page: 1,
                    chunk_index: i as u32
                }
            );
        }
    }

    #[test]
    fn corrupt_bytes_are_a_parse_failure() {
        let err = parse(b"not a pdf at all", 4000).unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
    }
}
