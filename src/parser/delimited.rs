//! Delimited-text (CSV/TSV) row extraction.
//!
//! One chunk per data row, content shaped as `header: value | header: value`
//! so a row reads as prose for lexical search. The locator carries the
//! physical line number with the header counted as line 1. Delimiter is
//! sniffed from the first line; quoted fields may embed delimiters and
//! newlines.

use crate::error::IngestError;
use crate::models::{Locator, Table};
use crate::temporal::parse_flexible_date;

use super::{ChunkDraft, Parsed};

const SNIFF_CANDIDATES: [char; 3] = [',', ';', '\t'];

pub fn parse(bytes: &[u8], filename: &str) -> Result<Parsed, IngestError> {
    let text = String::from_utf8_lossy(bytes);
    let rows = parse_rows(&text);
    if rows.is_empty() {
        return Err(IngestError::Parse("delimited file has no rows".to_string()));
    }

    let has_header = looks_like_header(&rows[0].1);
    let columns: Vec<String> = if has_header {
        rows[0].1.iter().map(|f| f.trim().to_string()).collect()
    } else {
        (1..=rows[0].1.len()).map(|i| format!("column_{}", i)).collect()
    };
    let data = if has_header { &rows[1..] } else { &rows[..] };

    let mut parsed = Parsed::default();
    let mut table_rows = Vec::with_capacity(data.len());
    let mut line_numbers = Vec::with_capacity(data.len());

    for (row_number, row) in data.iter() {
        let mut pairs = Vec::new();
        let mut cells = vec![None; columns.len()];
        for (col, value) in row.iter().enumerate() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let name = columns
                .get(col)
                .map(String::as_str)
                .unwrap_or("extra_column");
            pairs.push(format!("{}: {}", name, value));
            if col < cells.len() {
                cells[col] = Some(value.to_string());
            }
        }
        if pairs.is_empty() {
            continue;
        }
        parsed.chunks.push(ChunkDraft {
            content: pairs.join(" | "),
            locator: Locator::Row {
                row_number: *row_number,
            },
        });
        table_rows.push(cells);
        line_numbers.push(*row_number);
    }

    parsed.tables.push(Table {
        name: filename.to_string(),
        columns,
        rows: table_rows,
        line_numbers,
    });

    Ok(parsed)
}

/// A header row has at least one field and no field that reads as a number
/// or a date.
fn looks_like_header(row: &[String]) -> bool {
    let nonempty: Vec<&str> = row
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .collect();
    !nonempty.is_empty()
        && nonempty
            .iter()
            .all(|f| f.parse::<f64>().is_err() && parse_flexible_date(f).is_none())
}

fn sniff_delimiter(first_line: &str) -> char {
    SNIFF_CANDIDATES
        .into_iter()
        .max_by_key(|d| first_line.matches(*d).count())
        .unwrap_or(',')
}

/// Minimal RFC 4180 reader: double-quoted fields may contain the delimiter,
/// newlines, and `""` escapes. Each record carries the physical line it
/// starts on, so blank lines and quoted newlines never shift locators.
fn parse_rows(text: &str) -> Vec<(u64, Vec<String>)> {
    let first_line = text.lines().next().unwrap_or("");
    let delimiter = sniff_delimiter(first_line);

    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line: u64 = 1;
    let mut record_line: u64 = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                '\n' => {
                    field.push('\n');
                    line += 1;
                }
                _ => field.push(c),
            }
        } else {
            match c {
                '"' if field.is_empty() => in_quotes = true,
                '\r' => {}
                '\n' => {
                    row.push(std::mem::take(&mut field));
                    if row.iter().any(|f| !f.trim().is_empty()) {
                        rows.push((record_line, std::mem::take(&mut row)));
                    } else {
                        row.clear();
                    }
                    line += 1;
                    record_line = line;
                }
                c if c == delimiter => row.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        if row.iter().any(|f| !f.trim().is_empty()) {
            rows.push((record_line, row));
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_rows_become_header_prefixed_chunks() {
        let csv = "product,order_date,qty\nWidget,2025-12-01,40\nBolt,2025-12-03,15\n";
        let parsed = parse(csv.as_bytes(), "orders.csv").unwrap();

        assert_eq!(parsed.chunks.len(), 2);
        assert_eq!(
            parsed.chunks[0].content,
            "product: Widget | order_date: 2025-12-01 | qty: 40"
        );
        assert_eq!(parsed.chunks[0].locator, Locator::Row { row_number: 2 });
        assert_eq!(parsed.chunks[1].locator, Locator::Row { row_number: 3 });

        let table = &parsed.tables[0];
        assert_eq!(table.name, "orders.csv");
        assert_eq!(table.columns, vec!["product", "order_date", "qty"]);
        assert_eq!(table.cell(1, 0), Some("Bolt"));
    }

    #[test]
    fn semicolon_delimiter_is_sniffed() {
        let csv = "produit;date_commande;quantite\nBoulon;01/12/2025;15\n";
        let parsed = parse(csv.as_bytes(), "commandes.csv").unwrap();
        assert_eq!(parsed.chunks.len(), 1);
        assert!(parsed.chunks[0].content.contains("produit: Boulon"));
        assert!(parsed.chunks[0]
            .content
            .contains("date_commande: 01/12/2025"));
    }

    #[test]
    fn quoted_field_keeps_embedded_delimiter() {
        let csv = "name,notes\nAcme,\"late, again\"\n";
        let parsed = parse(csv.as_bytes(), "suppliers.csv").unwrap();
        assert_eq!(parsed.chunks[0].content, "name: Acme | notes: late, again");
    }

    #[test]
    fn numeric_first_row_gets_synthesized_headers() {
        let csv = "10,20\n30,40\n";
        let parsed = parse(csv.as_bytes(), "raw.csv").unwrap();
        assert_eq!(parsed.chunks.len(), 2);
        assert_eq!(parsed.chunks[0].content, "column_1: 10 | column_2: 20");
        assert_eq!(parsed.chunks[0].locator, Locator::Row { row_number: 1 });
        assert_eq!(parsed.tables[0].columns, vec!["column_1", "column_2"]);
    }

    #[test]
    fn date_shaped_first_row_is_not_a_header() {
        let csv = "2025-12-01,5\n2025-12-02,7\n";
        let parsed = parse(csv.as_bytes(), "log.csv").unwrap();
        assert_eq!(parsed.chunks.len(), 2);
        assert!(parsed.chunks[0].content.starts_with("column_1: 2025-12-01"));
    }

    #[test]
    fn empty_cells_are_skipped_in_content() {
        let csv = "a,b,c\n1,,3\n";
        let parsed = parse(csv.as_bytes(), "sparse.csv").unwrap();
        assert_eq!(parsed.chunks[0].content, "a: 1 | c: 3");
        assert_eq!(parsed.tables[0].cell(0, 1), None);
    }

    #[test]
    fn blank_lines_do_not_shift_row_numbers() {
        let csv = "product,qty\nWidget,40\n\nBolt,15\n";
        let parsed = parse(csv.as_bytes(), "orders.csv").unwrap();
        assert_eq!(parsed.chunks.len(), 2);
        assert_eq!(parsed.chunks[0].locator, Locator::Row { row_number: 2 });
        // The blank line occupies line 3; the next record is line 4.
        assert_eq!(parsed.chunks[1].locator, Locator::Row { row_number: 4 });
        assert_eq!(parsed.tables[0].line_numbers, vec![2, 4]);
    }

    #[test]
    fn quoted_newlines_count_toward_line_numbers() {
        let csv = "name,notes\nAcme,\"first line\nsecond line\"\nGlobex,ok\n";
        let parsed = parse(csv.as_bytes(), "suppliers.csv").unwrap();
        assert_eq!(parsed.chunks.len(), 2);
        assert_eq!(parsed.chunks[0].locator, Locator::Row { row_number: 2 });
        // The quoted field spans lines 2-3, so Globex starts on line 4.
        assert_eq!(parsed.chunks[1].locator, Locator::Row { row_number: 4 });
    }

    #[test]
    fn empty_file_is_a_parse_failure() {
        let err = parse(b"", "empty.csv").unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
    }
}
