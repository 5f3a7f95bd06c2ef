//! DOCX paragraph and table extraction.
//!
//! Body paragraphs become one chunk each. Table rows become one chunk each
//! with cells joined by `" | "`, located by table and row number. Headers
//! and footers are extracted from their own parts with a region marker so a
//! citation never claims boilerplate came from the body.

use quick_xml::events::Event;

use crate::error::IngestError;
use crate::models::{Locator, ParagraphRegion};

use super::{open_archive, read_zip_entry_bounded, ChunkDraft, Parsed};

pub fn parse(bytes: &[u8]) -> Result<Parsed, IngestError> {
    let mut archive = open_archive(bytes)?;

    let mut parsed = Parsed::default();

    // word/document.xml is mandatory; its absence means a corrupt file.
    let document = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    extract_part(&document, Region::Body, &mut parsed.chunks)?;

    for name in part_files(&archive, "word/header") {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        extract_part(&xml, Region::Header, &mut parsed.chunks)?;
    }
    for name in part_files(&archive, "word/footer") {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        extract_part(&xml, Region::Footer, &mut parsed.chunks)?;
    }

    Ok(parsed)
}

#[derive(Clone, Copy)]
enum Region {
    Body,
    Header,
    Footer,
}

fn part_files(archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort();
    names
}

/// Stream one WordprocessingML part, emitting paragraph and table-row chunks.
fn extract_part(
    xml: &[u8],
    region: Region,
    chunks: &mut Vec<ChunkDraft>,
) -> Result<(), IngestError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut index: u32 = 0;
    let mut table_depth: usize = 0;
    let mut table_index: u32 = 0;
    let mut row_in_table: u32 = 0;
    let mut in_t = false;
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut row_cells: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        table_index += 1;
                        row_in_table = 0;
                    }
                }
                b"tr" if table_depth > 0 => {
                    row_in_table += 1;
                    row_cells.clear();
                }
                b"tc" if table_depth > 0 => cell.clear(),
                b"p" if table_depth == 0 => paragraph.clear(),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                let text = te.unescape().unwrap_or_default();
                if table_depth > 0 {
                    cell.push_str(text.as_ref());
                } else {
                    paragraph.push_str(text.as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                b"tc" if table_depth > 0 => {
                    row_cells.push(cell.trim().to_string());
                }
                b"tr" if table_depth > 0 => {
                    let content = row_cells
                        .iter()
                        .filter(|c| !c.is_empty())
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(" | ");
                    if !content.is_empty() {
                        index += 1;
                        chunks.push(ChunkDraft {
                            content,
                            locator: Locator::Paragraph {
                                index,
                                region: ParagraphRegion::Table {
                                    table: table_index,
                                    row: row_in_table,
                                },
                            },
                        });
                    }
                }
                b"p" if table_depth > 0 => {
                    // Paragraph break inside a cell.
                    if !cell.is_empty() && !cell.ends_with(' ') {
                        cell.push(' ');
                    }
                }
                b"p" => {
                    let content = paragraph.trim().to_string();
                    if !content.is_empty() {
                        index += 1;
                        chunks.push(ChunkDraft {
                            content,
                            locator: Locator::Paragraph {
                                index,
                                region: match region {
                                    Region::Body => ParagraphRegion::Body,
                                    Region::Header => ParagraphRegion::Header,
                                    Region::Footer => ParagraphRegion::Footer,
                                },
                            },
                        });
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(IngestError::Parse(format!("WordprocessingML: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_docx(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, xml) in parts {
                writer.start_file(*name, options).unwrap();
                writer.write_all(xml.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn paragraphs_and_table_rows_become_chunks() {
        let document = r#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
              <w:body>
                <w:p><w:r><w:t>Supplier contract terms.</w:t></w:r></w:p>
                <w:tbl>
                  <w:tr>
                    <w:tc><w:p><w:r><w:t>Supplier</w:t></w:r></w:p></w:tc>
                    <w:tc><w:p><w:r><w:t>Lead time</w:t></w:r></w:p></w:tc>
                  </w:tr>
                  <w:tr>
                    <w:tc><w:p><w:r><w:t>Acme</w:t></w:r></w:p></w:tc>
                    <w:tc><w:p><w:r><w:t>14 days</w:t></w:r></w:p></w:tc>
                  </w:tr>
                </w:tbl>
                <w:p><w:r><w:t>Renewal due in December.</w:t></w:r></w:p>
              </w:body>
            </w:document>"#;
        let bytes = build_docx(&[("word/document.xml", document)]);
        let parsed = parse(&bytes).unwrap();

        assert_eq!(parsed.chunks.len(), 4);
        assert_eq!(parsed.chunks[0].content, "Supplier contract terms.");
        assert_eq!(
            parsed.chunks[0].locator,
            Locator::Paragraph {
                index: 1,
                region: ParagraphRegion::Body
            }
        );
        assert_eq!(parsed.chunks[1].content, "Supplier | Lead time");
        assert_eq!(
            parsed.chunks[2].locator,
            Locator::Paragraph {
                index: 3,
                region: ParagraphRegion::Table { table: 1, row: 2 }
            }
        );
        assert_eq!(parsed.chunks[2].content, "Acme | 14 days");
    }

    #[test]
    fn headers_and_footers_carry_their_region() {
        let document = r#"<w:document xmlns:w="x"><w:body>
            <w:p><w:r><w:t>Body text.</w:t></w:r></w:p>
          </w:body></w:document>"#;
        let header = r#"<w:hdr xmlns:w="x">
            <w:p><w:r><w:t>Confidential</w:t></w:r></w:p>
          </w:hdr>"#;
        let footer = r#"<w:ftr xmlns:w="x">
            <w:p><w:r><w:t>Page footer</w:t></w:r></w:p>
          </w:ftr>"#;
        let bytes = build_docx(&[
            ("word/document.xml", document),
            ("word/header1.xml", header),
            ("word/footer1.xml", footer),
        ]);
        let parsed = parse(&bytes).unwrap();

        let regions: Vec<&ParagraphRegion> = parsed
            .chunks
            .iter()
            .map(|c| match &c.locator {
                Locator::Paragraph { region, .. } => region,
                other => panic!("unexpected locator: {:?}", other),
            })
            .collect();
        assert!(regions.contains(&&ParagraphRegion::Body));
        assert!(regions.contains(&&ParagraphRegion::Header));
        assert!(regions.contains(&&ParagraphRegion::Footer));
    }

    #[test]
    fn missing_document_part_is_a_parse_failure() {
        let bytes = build_docx(&[("word/styles.xml", "<w:styles/>")]);
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
    }
}
