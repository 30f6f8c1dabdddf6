//! Normalized grid: one sheet rendered as header + string rows.
//!
//! The header row fixes the column count; data rows are truncated or
//! right-padded to it. Merged regions are forward-filled before empty
//! rows are dropped, so every surviving row is independently
//! interpretable.

/// A merged cell region in sheet coordinates (inclusive, 0-based, already
/// relative to the used range).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRegion {
    pub first_row: usize,
    pub last_row: usize,
    pub first_col: usize,
    pub last_col: usize,
}

/// Header + N data rows of strings.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedGrid {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

fn escape_cell(cell: &str) -> String {
    cell.replace('\\', "\\\\")
        .replace('|', "\\|")
        .replace(['\r', '\n'], " ")
}

impl NormalizedGrid {
    /// Build a grid from raw cells. The first non-blank row becomes the
    /// header; merged regions are forward-filled first; rows where every
    /// cell is empty are dropped.
    pub fn build(mut cells: Vec<Vec<String>>, merges: &[MergeRegion]) -> Option<Self> {
        apply_merges(&mut cells, merges);

        let header_index = cells.iter().position(|row| !is_blank_row(row))?;
        let header: Vec<String> = cells[header_index]
            .iter()
            .map(|cell| cell.trim().to_string())
            .collect();
        let width = header.len();
        if width == 0 {
            return None;
        }

        let rows = cells
            .into_iter()
            .skip(header_index + 1)
            .filter(|row| !is_blank_row(row))
            .map(|mut row| {
                row.truncate(width);
                while row.len() < width {
                    row.push(String::new());
                }
                row
            })
            .collect();

        Some(Self { header, rows })
    }

    /// Concatenate extra tables below an existing grid (PDF documents
    /// with several tables). Header-like repeats are skipped.
    pub fn append_table(&mut self, cells: Vec<Vec<String>>) {
        let width = self.header.len();
        for row in cells {
            if is_blank_row(&row) {
                continue;
            }
            let trimmed: Vec<String> = row.iter().map(|c| c.trim().to_string()).collect();
            if trimmed.len() == width
                && trimmed
                    .iter()
                    .zip(&self.header)
                    .all(|(a, b)| a.eq_ignore_ascii_case(b))
            {
                continue;
            }
            let mut row = row;
            row.truncate(width);
            while row.len() < width {
                row.push(String::new());
            }
            self.rows.push(row);
        }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Render rows `[start, end)` as a Markdown pipe table with the
    /// header replayed on top.
    pub fn to_markdown_range(&self, start: usize, end: usize) -> String {
        let end = end.min(self.rows.len());
        let mut out = String::new();
        render_row(&mut out, &self.header);
        out.push('|');
        for _ in &self.header {
            out.push_str(" --- |");
        }
        out.push('\n');
        for row in &self.rows[start..end] {
            render_row(&mut out, row);
        }
        out
    }

    pub fn to_markdown(&self) -> String {
        self.to_markdown_range(0, self.rows.len())
    }
}

fn render_row(out: &mut String, row: &[String]) {
    out.push('|');
    for cell in row {
        out.push(' ');
        out.push_str(&escape_cell(cell));
        out.push_str(" |");
    }
    out.push('\n');
}

/// Copy each merged region's anchor value into every cell the merge
/// spans.
fn apply_merges(cells: &mut [Vec<String>], merges: &[MergeRegion]) {
    for merge in merges {
        let anchor = cells
            .get(merge.first_row)
            .and_then(|row| row.get(merge.first_col))
            .cloned()
            .unwrap_or_default();
        if anchor.trim().is_empty() {
            continue;
        }
        for row_index in merge.first_row..=merge.last_row {
            let Some(row) = cells.get_mut(row_index) else {
                continue;
            };
            for col_index in merge.first_col..=merge.last_col {
                if let Some(cell) = row.get_mut(col_index) {
                    if cell.trim().is_empty() {
                        *cell = anchor.clone();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_header_fixes_width() {
        let grid = NormalizedGrid::build(
            cells(&[
                &["Name", "Retail"],
                &["Cable", "9.99", "extra"],
                &["Hub"],
            ]),
            &[],
        )
        .unwrap();

        assert_eq!(grid.header(), ["Name", "Retail"]);
        assert_eq!(grid.rows()[0], vec!["Cable", "9.99"]);
        assert_eq!(grid.rows()[1], vec!["Hub", ""]);
    }

    #[test]
    fn test_blank_rows_are_dropped() {
        let grid = NormalizedGrid::build(
            cells(&[
                &["Name", "Retail"],
                &["", ""],
                &["Cable", "9.99"],
                &["  ", ""],
            ]),
            &[],
        )
        .unwrap();
        assert_eq!(grid.row_count(), 1);
    }

    #[test]
    fn test_merged_region_forward_fills() {
        // Category merged over three data rows (rows 1..=3, column 0).
        let grid = NormalizedGrid::build(
            cells(&[
                &["Category", "Name", "Retail"],
                &["Cables", "Cat5e", "3.50"],
                &["", "Cat6", "4.50"],
                &["", "Cat7", "8.00"],
            ]),
            &[MergeRegion {
                first_row: 1,
                last_row: 3,
                first_col: 0,
                last_col: 0,
            }],
        )
        .unwrap();

        assert_eq!(grid.rows()[1][0], "Cables");
        assert_eq!(grid.rows()[2][0], "Cables");
    }

    #[test]
    fn test_markdown_escapes_pipes_and_newlines() {
        let grid = NormalizedGrid::build(
            cells(&[&["Name", "Note"], &["A|B", "line1\nline2"]]),
            &[],
        )
        .unwrap();
        let markdown = grid.to_markdown();
        assert!(markdown.contains("A\\|B"));
        assert!(markdown.contains("line1 line2"));
        assert!(markdown.starts_with("| Name | Note |\n| --- | --- |\n"));
    }

    #[test]
    fn test_append_table_skips_repeated_header() {
        let mut grid =
            NormalizedGrid::build(cells(&[&["Name", "Retail"], &["Cable", "9.99"]]), &[]).unwrap();
        grid.append_table(cells(&[&["Name", "Retail"], &["Hub", "19.99"]]));
        assert_eq!(grid.row_count(), 2);
        assert_eq!(grid.rows()[1][0], "Hub");
    }

    #[test]
    fn test_empty_input_yields_no_grid() {
        assert!(NormalizedGrid::build(vec![], &[]).is_none());
        assert!(NormalizedGrid::build(cells(&[&["", ""]]), &[]).is_none());
    }
}
