//! File reader: opens a staged payload and produces raw tables.
//!
//! The declared kind is advisory; the file magic wins on mismatch (a
//! warning is logged). Everything here is synchronous CPU/IO work and is
//! called from the pipeline inside a blocking section.

use std::io::Read;
use std::path::Path;

use calamine::{Data, Reader as CalamineReader, Sheets, open_workbook_auto};

use pricedock_core::{ErrorKind, protocol::FileKind};

use super::StageFailure;
use super::grid::MergeRegion;

/// One workbook sheet's raw cells plus its merged regions, in used-range
/// coordinates.
#[derive(Debug, Clone)]
pub struct SheetData {
    pub name: String,
    pub cells: Vec<Vec<String>>,
    pub merges: Vec<MergeRegion>,
}

/// What a staged file opens into.
#[derive(Debug)]
pub enum SourceDocument {
    /// A workbook with one or more sheets (spreadsheet sources).
    Workbook(Vec<SheetData>),
    /// Tables in document order (csv yields one, PDF may yield several).
    Tables(Vec<Vec<Vec<String>>>),
}

/// Sniff a file kind from magic bytes; `None` means "probably text".
fn sniff_kind(prefix: &[u8]) -> Option<FileKind> {
    if prefix.starts_with(b"PK\x03\x04") {
        return Some(FileKind::Spreadsheet); // zip container: xlsx/ods
    }
    if prefix.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) {
        return Some(FileKind::Spreadsheet); // OLE2 container: legacy xls
    }
    if prefix.starts_with(b"%PDF") {
        return Some(FileKind::Pdf);
    }
    None
}

fn unreadable(message: impl Into<String>) -> StageFailure {
    StageFailure::new(ErrorKind::Unreadable, message)
}

/// Open a staged file, following the magic over the declared kind.
pub fn open(path: &Path, declared: FileKind) -> Result<SourceDocument, StageFailure> {
    let mut prefix = [0u8; 8];
    let read = {
        let mut file = std::fs::File::open(path)
            .map_err(|e| unreadable(format!("cannot open {}: {}", path.display(), e)))?;
        file.read(&mut prefix)
            .map_err(|e| unreadable(format!("cannot read {}: {}", path.display(), e)))?
    };

    let effective = match sniff_kind(&prefix[..read]) {
        Some(sniffed) if sniffed != declared => {
            tracing::warn!(
                path = %path.display(),
                declared = %declared,
                sniffed = %sniffed,
                "Declared file kind disagrees with magic; following the magic"
            );
            sniffed
        }
        Some(sniffed) => sniffed,
        None => {
            if declared != FileKind::Csv {
                tracing::warn!(
                    path = %path.display(),
                    declared = %declared,
                    "No recognizable magic; treating file as csv"
                );
            }
            FileKind::Csv
        }
    };

    match effective {
        FileKind::Spreadsheet => read_workbook(path),
        FileKind::Csv => Ok(SourceDocument::Tables(vec![read_csv(path)?])),
        FileKind::Pdf => Ok(SourceDocument::Tables(read_pdf_tables(path)?)),
    }
}

// ---------------------------------------------------------------------------
// Workbook
// ---------------------------------------------------------------------------

/// Render one cell in its display form; no locale conversion.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

fn read_workbook(path: &Path) -> Result<SourceDocument, StageFailure> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| unreadable(format!("cannot parse workbook {}: {}", path.display(), e)))?;

    // Merged regions are only exposed for xlsx; other formats simply get
    // no fill and rely on the sheet being flat.
    if let Sheets::Xlsx(ref mut xlsx) = workbook {
        if let Err(e) = xlsx.load_merged_regions() {
            tracing::warn!(path = %path.display(), error = %e, "Cannot load merged regions");
        }
    }

    let names = workbook.sheet_names().to_owned();
    let mut sheets = Vec::with_capacity(names.len());

    for name in names {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!(sheet = %name, error = %e, "Skipping unreadable sheet");
                continue;
            }
        };

        let offset = range.start().unwrap_or((0, 0));
        let cells: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();

        let merges = if let Sheets::Xlsx(ref xlsx) = workbook {
            xlsx.merged_regions_by_sheet(&name)
                .iter()
                .map(|(_, _, dimensions)| MergeRegion {
                    first_row: dimensions.start.0.saturating_sub(offset.0) as usize,
                    last_row: dimensions.end.0.saturating_sub(offset.0) as usize,
                    first_col: dimensions.start.1.saturating_sub(offset.1) as usize,
                    last_col: dimensions.end.1.saturating_sub(offset.1) as usize,
                })
                .collect()
        } else {
            Vec::new()
        };

        sheets.push(SheetData { name, cells, merges });
    }

    if sheets.is_empty() {
        return Err(unreadable(format!(
            "workbook {} has no readable sheets",
            path.display()
        )));
    }
    Ok(SourceDocument::Workbook(sheets))
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

fn read_csv(path: &Path) -> Result<Vec<Vec<String>>, StageFailure> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| unreadable(format!("cannot open csv {}: {}", path.display(), e)))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| unreadable(format!("csv parse error in {}: {}", path.display(), e)))?;
        rows.push(record.iter().map(|cell| cell.to_string()).collect());
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// PDF
// ---------------------------------------------------------------------------

/// Split a text line into columns on runs of two or more spaces (or tabs).
fn split_columns(line: &str) -> Vec<String> {
    let normalized = line.replace('\t', "  ");
    normalized
        .split("  ")
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Extract tables from PDF text: consecutive multi-column lines form one
/// table; prose and blank lines separate tables and are discarded.
fn tables_from_text(text: &str) -> Vec<Vec<Vec<String>>> {
    let mut tables: Vec<Vec<Vec<String>>> = Vec::new();
    let mut current: Vec<Vec<String>> = Vec::new();

    for line in text.lines() {
        let columns = split_columns(line);
        if columns.len() >= 2 {
            current.push(columns);
        } else if !current.is_empty() {
            // Single-row fragments are prose artifacts, not tables.
            if current.len() >= 2 {
                tables.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if current.len() >= 2 {
        tables.push(current);
    }
    tables
}

fn read_pdf_tables(path: &Path) -> Result<Vec<Vec<Vec<String>>>, StageFailure> {
    let text = pdf_extract::extract_text(path)
        .map_err(|e| unreadable(format!("cannot extract pdf text {}: {}", path.display(), e)))?;

    let tables = tables_from_text(&text);
    if tables.is_empty() {
        return Err(unreadable(format!(
            "pdf {} contains no tabular content",
            path.display()
        )));
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_kinds() {
        assert_eq!(sniff_kind(b"PK\x03\x04abcd"), Some(FileKind::Spreadsheet));
        assert_eq!(sniff_kind(b"%PDF-1.7\n"), Some(FileKind::Pdf));
        assert_eq!(sniff_kind(&[0xD0, 0xCF, 0x11, 0xE0, 0, 0, 0, 0]), Some(FileKind::Spreadsheet));
        assert_eq!(sniff_kind(b"Name,Price"), None);
    }

    #[test]
    fn test_cell_display_forms() {
        assert_eq!(cell_to_string(&Data::Float(42.0)), "42");
        assert_eq!(cell_to_string(&Data::Float(42.5)), "42.5");
        assert_eq!(cell_to_string(&Data::Int(-3)), "-3");
        assert_eq!(cell_to_string(&Data::String("  Cable ".into())), "  Cable ");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }

    #[test]
    fn test_csv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.csv");
        std::fs::write(&path, "Name,Retail\nCable,9.99\nHub,\"1,299.00\"\n").unwrap();

        let rows = read_csv(&path).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], vec!["Hub", "1,299.00"]);
    }

    #[test]
    fn test_pdf_table_reconstruction() {
        let text = "ACME Wholesale Catalogue\n\n\
                    Name  Wholesale  Retail\n\
                    Cable Cat6  2.10  3.50\n\
                    USB Hub  11.00  19.99\n\n\
                    All prices exclude VAT.\n";
        let tables = tables_from_text(text);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0][0], vec!["Name", "Wholesale", "Retail"]);
        assert_eq!(tables[0][1], vec!["Cable Cat6", "2.10", "3.50"]);
    }

    #[test]
    fn test_pdf_prose_is_discarded() {
        let text = "Just a paragraph of text\nwith no columns at all.\n";
        assert!(tables_from_text(text).is_empty());
    }

    #[test]
    fn test_open_follows_magic_over_declared_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mislabeled.xlsx");
        std::fs::write(&path, "Name,Retail\nCable,9.99\n").unwrap();

        // Declared spreadsheet, magic says text: read as csv.
        let document = open(&path, FileKind::Spreadsheet).unwrap();
        match document {
            SourceDocument::Tables(tables) => assert_eq!(tables[0].len(), 2),
            SourceDocument::Workbook(_) => panic!("expected csv tables"),
        }
    }
}
