//! Plain-text paragraph extraction.
//!
//! Paragraphs are blank-line separated and 1-indexed over the whole file,
//! counting skipped empties so a locator matches what an editor shows. A
//! paragraph over the chunk budget is split at line boundaries with an
//! ascending chunk index.

use crate::error::IngestError;
use crate::models::Locator;

use super::{split_on_paragraphs, ChunkDraft, Parsed};

pub fn parse(bytes: &[u8], max_chars: usize) -> Result<Parsed, IngestError> {
    let text = String::from_utf8_lossy(bytes);
    if text.trim().is_empty() {
        return Err(IngestError::Parse("text file is empty".to_string()));
    }

    let mut parsed = Parsed::default();
    for (i, para) in text.split("\n\n").enumerate() {
        let paragraph_index = i as u32 + 1;
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.len() <= max_chars {
            parsed.chunks.push(ChunkDraft {
                content: trimmed.to_string(),
                locator: Locator::Line {
                    paragraph_index,
                    chunk_index: 0,
                },
            });
        } else {
            for (chunk_index, piece) in
                split_on_paragraphs(trimmed, max_chars).into_iter().enumerate()
            {
                parsed.chunks.push(ChunkDraft {
                    content: piece,
                    locator: Locator::Line {
                        paragraph_index,
                        chunk_index: chunk_index as u32,
                    },
                });
            }
        }
    }
    Ok(parsed)
}
