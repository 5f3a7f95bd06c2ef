//! Cell-level XLSX parsing.
//!
//! One chunk per non-empty cell, with a locator carrying the sheet name,
//! A1-style cell reference, and numeric row/column. A header-shaped first
//! row is attached as context to every data cell in the same column.
//!
//! Formula cells contribute their cached `<v>` value, never the formula
//! text. Merged ranges collapse naturally: OOXML stores the value only on
//! the top-left anchor cell.

use std::collections::BTreeMap;

use quick_xml::events::Event;

use crate::error::IngestError;
use crate::models::{Locator, Table};

use super::{open_archive, read_zip_entry_bounded, ChunkDraft, Parsed};

/// Maximum sheets to process per workbook.
const MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const MAX_CELLS_PER_SHEET: usize = 100_000;

pub fn parse(bytes: &[u8]) -> Result<Parsed, IngestError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_names = read_sheet_names(&mut archive)?;
    let worksheet_files = list_worksheet_files(&archive);

    if worksheet_files.is_empty() {
        return Err(IngestError::Parse("workbook has no worksheets".to_string()));
    }

    let mut parsed = Parsed::default();

    for (idx, file) in worksheet_files.iter().take(MAX_SHEETS).enumerate() {
        let sheet_name = sheet_names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", idx + 1));
        let xml = read_zip_entry_bounded(&mut archive, file)?;
        let cells = read_sheet_cells(&xml, &shared_strings)?;
        if cells.is_empty() {
            continue;
        }
        emit_sheet(&sheet_name, &cells, &mut parsed);
    }

    Ok(parsed)
}

#[derive(Debug, Clone)]
struct RawCell {
    cell_ref: String,
    row: u32,
    col: u32,
    value: String,
}

fn emit_sheet(sheet_name: &str, cells: &[RawCell], parsed: &mut Parsed) {
    // Header-shaped: a non-empty first row with no purely numeric values.
    let first_row: Vec<&RawCell> = cells.iter().filter(|c| c.row == 1).collect();
    let header_shaped =
        !first_row.is_empty() && first_row.iter().all(|c| c.value.parse::<f64>().is_err());

    let headers: BTreeMap<u32, String> = if header_shaped {
        first_row
            .iter()
            .map(|c| (c.col, c.value.clone()))
            .collect()
    } else {
        BTreeMap::new()
    };

    for cell in cells {
        let content = if cell.row > 1 {
            match headers.get(&cell.col) {
                Some(header) => format!("{}: {}", header, cell.value),
                None => cell.value.clone(),
            }
        } else {
            cell.value.clone()
        };
        parsed.chunks.push(ChunkDraft {
            content,
            locator: Locator::Cell {
                sheet: sheet_name.to_string(),
                cell_ref: cell.cell_ref.clone(),
                row: cell.row,
                column: cell.col,
            },
        });
    }

    // Reconstruct the data area for temporal enrichment.
    if header_shaped {
        let max_col = cells.iter().map(|c| c.col).max().unwrap_or(0);
        let max_row = cells.iter().map(|c| c.row).max().unwrap_or(0);
        if max_row >= 2 {
            let columns: Vec<String> = (1..=max_col)
                .map(|col| {
                    headers
                        .get(&col)
                        .cloned()
                        .unwrap_or_else(|| format!("Column {}", col))
                })
                .collect();
            let mut rows = vec![vec![None; max_col as usize]; (max_row - 1) as usize];
            for cell in cells.iter().filter(|c| c.row >= 2) {
                rows[(cell.row - 2) as usize][(cell.col - 1) as usize] =
                    Some(cell.value.clone());
            }
            parsed.tables.push(Table {
                name: sheet_name.to_string(),
                columns,
                rows,
                line_numbers: (2..=max_row as u64).collect(),
            });
        }
    }
}

/// Sheet names in document order from `xl/workbook.xml`.
fn read_sheet_names(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, IngestError> {
    let xml = match read_zip_entry_bounded(archive, "xl/workbook.xml") {
        Ok(xml) => xml,
        Err(_) => return Ok(Vec::new()),
    };
    let mut names = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"name" {
                            names.push(
                                String::from_utf8_lossy(attr.value.as_ref()).into_owned(),
                            );
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(IngestError::Parse(format!("xl/workbook.xml: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn list_worksheet_files(archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Shared strings, with rich-text runs concatenated per entry. A workbook
/// with no string cells has no sharedStrings part at all.
fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, IngestError> {
    let xml = match read_zip_entry_bounded(archive, "xl/sharedStrings.xml") {
        Ok(xml) => xml,
        Err(_) => return Ok(Vec::new()),
    };
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(IngestError::Parse(format!("xl/sharedStrings.xml: {}", e)))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn read_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<Vec<RawCell>, IngestError> {
    let mut cells = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut cell_ref: Option<String> = None;
    let mut cell_type = CellType::Number;
    let mut value: Option<String> = None;
    let mut in_v = false;
    let mut in_is_t = false;

    loop {
        if cells.len() >= MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    (cell_ref, cell_type) = read_cell_attrs(&e);
                    value = None;
                }
                b"v" => in_v = true,
                b"t" => {
                    if matches!(cell_type, CellType::InlineStr) {
                        in_is_t = true;
                    }
                }
                _ => {}
            },
            // Self-closing <c/> carries no value.
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"c" {
                    cell_ref = None;
                }
            }
            Ok(Event::Text(te)) => {
                if in_v || in_is_t {
                    let text = te.unescape().unwrap_or_default().into_owned();
                    match value.as_mut() {
                        Some(v) => v.push_str(&text),
                        None => value = Some(text),
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"t" => in_is_t = false,
                b"c" => {
                    if let (Some(r), Some(raw)) = (cell_ref.take(), value.take()) {
                        if let Some(resolved) = resolve_value(&raw, cell_type, shared_strings) {
                            if let Some((row, col)) = parse_cell_ref(&r) {
                                cells.push(RawCell {
                                    cell_ref: r,
                                    row,
                                    col,
                                    value: resolved,
                                });
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(IngestError::Parse(format!("worksheet: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells)
}

#[derive(Debug, Clone, Copy)]
enum CellType {
    Number,
    SharedStr,
    InlineStr,
    Bool,
    FormulaStr,
}

fn read_cell_attrs(e: &quick_xml::events::BytesStart<'_>) -> (Option<String>, CellType) {
    let mut cell_ref = None;
    let mut cell_type = CellType::Number;
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"r" => cell_ref = Some(String::from_utf8_lossy(attr.value.as_ref()).into_owned()),
            b"t" => {
                cell_type = match attr.value.as_ref() {
                    b"s" => CellType::SharedStr,
                    b"inlineStr" => CellType::InlineStr,
                    b"b" => CellType::Bool,
                    b"str" => CellType::FormulaStr,
                    _ => CellType::Number,
                }
            }
            _ => {}
        }
    }
    (cell_ref, cell_type)
}

fn resolve_value(raw: &str, cell_type: CellType, shared_strings: &[String]) -> Option<String> {
    let resolved = match cell_type {
        CellType::SharedStr => {
            let idx: usize = raw.trim().parse().ok()?;
            shared_strings.get(idx)?.clone()
        }
        CellType::Bool => {
            if raw.trim() == "1" {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        CellType::InlineStr | CellType::FormulaStr | CellType::Number => raw.to_string(),
    };
    let trimmed = resolved.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse an A1-style reference into (row, column), both 1-based.
pub(crate) fn parse_cell_ref(cell_ref: &str) -> Option<(u32, u32)> {
    let split = cell_ref.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cell_ref.split_at(split);
    if letters.is_empty() || digits.is_empty() {
        return None;
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        col = col.checked_mul(26)?.checked_add(c as u32 - 'A' as u32 + 1)?;
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row, col))
}
