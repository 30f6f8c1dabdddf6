//! Sheet selector: pick the one sheet most likely to hold the price list.

use pricedock_core::ErrorKind;

use super::StageFailure;
use super::reader::SheetData;

/// Selector configuration; defaults come from the service config.
#[derive(Debug, Clone)]
pub struct SheetSelector {
    /// Case-insensitive substrings that mark a price-shaped column header.
    pub price_synonyms: Vec<String>,
    /// Sheet names to skip unless nothing else is viable.
    pub name_blacklist: Vec<String>,
    /// Minimum number of data rows for a sheet to be viable.
    pub min_rows: usize,
}

impl Default for SheetSelector {
    fn default() -> Self {
        Self {
            price_synonyms: ["price", "cost", "retail", "wholesale", "rrp", "msrp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            name_blacklist: ["legend", "readme", "contacts", "info", "about"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_rows: 5,
        }
    }
}

/// Does this cell hold something price-shaped? Currency symbols and
/// thousands separators are tolerated.
fn looks_numeric(cell: &str) -> bool {
    let cleaned: String = cell
        .chars()
        .filter(|c| !matches!(c, '€' | '$' | '£' | '¤' | ',' | ' ' | '\u{a0}'))
        .collect();
    if cleaned.is_empty() {
        return false;
    }
    cleaned.parse::<f64>().is_ok()
}

impl SheetSelector {
    fn is_blacklisted(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.name_blacklist.iter().any(|term| lower.contains(term))
    }

    /// Viability score for one sheet; `None` when not viable at all.
    ///
    /// Score components: price-synonym headers (weight 3), numeric
    /// density of the price-shaped columns (weight 2), and a small bonus
    /// for row count so fuller sheets win ties between equally priced
    /// layouts.
    fn score(&self, sheet: &SheetData) -> Option<f64> {
        let header_index = sheet
            .cells
            .iter()
            .position(|row| row.iter().any(|cell| !cell.trim().is_empty()))?;
        let header = &sheet.cells[header_index];
        let data_rows = sheet.cells.len().saturating_sub(header_index + 1);
        if data_rows < self.min_rows {
            return None;
        }

        let price_columns: Vec<usize> = header
            .iter()
            .enumerate()
            .filter(|(_, cell)| {
                let lower = cell.to_lowercase();
                self.price_synonyms.iter().any(|syn| lower.contains(syn))
            })
            .map(|(index, _)| index)
            .collect();
        if price_columns.is_empty() {
            return None;
        }

        let mut numeric_cells = 0usize;
        for row in sheet.cells.iter().skip(header_index + 1) {
            for &column in &price_columns {
                if row.get(column).is_some_and(|cell| looks_numeric(cell)) {
                    numeric_cells += 1;
                }
            }
        }
        let numeric_density =
            numeric_cells as f64 / (data_rows * price_columns.len()).max(1) as f64;

        Some(
            price_columns.len() as f64 * 3.0
                + numeric_density * 2.0
                + (data_rows.min(1000) as f64) / 1000.0,
        )
    }

    /// Pick the winning sheet. Deterministic: strictly-greater scores
    /// replace, so the lowest index wins ties. Blacklisted names only
    /// compete when no other sheet is viable.
    pub fn select<'a>(&self, sheets: &'a [SheetData]) -> Result<&'a SheetData, StageFailure> {
        let mut best: Option<(&SheetData, f64)> = None;
        let mut best_blacklisted: Option<(&SheetData, f64)> = None;

        for sheet in sheets {
            let Some(score) = self.score(sheet) else {
                continue;
            };
            let slot = if self.is_blacklisted(&sheet.name) {
                &mut best_blacklisted
            } else {
                &mut best
            };
            if slot.is_none_or(|(_, existing)| score > existing) {
                *slot = Some((sheet, score));
            }
        }

        best.or(best_blacklisted)
            .map(|(sheet, score)| {
                tracing::debug!(sheet = %sheet.name, score, "Selected sheet");
                sheet
            })
            .ok_or_else(|| {
                StageFailure::new(
                    ErrorKind::NoSuitableSheet,
                    "no sheet reaches the minimum viability score",
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(name: &str, header: &[&str], rows: usize, numeric: bool) -> SheetData {
        let mut cells: Vec<Vec<String>> = vec![header.iter().map(|s| s.to_string()).collect()];
        for i in 0..rows {
            let row = header
                .iter()
                .enumerate()
                .map(|(col, _)| {
                    if col == 0 {
                        format!("Item {}", i)
                    } else if numeric {
                        format!("{}.50", 10 + i)
                    } else {
                        "n/a".to_string()
                    }
                })
                .collect();
            cells.push(row);
        }
        SheetData {
            name: name.to_string(),
            cells,
            merges: Vec::new(),
        }
    }

    #[test]
    fn test_price_sheet_beats_metadata_sheet() {
        let sheets = vec![
            sheet("Contacts", &["Name", "Phone"], 20, false),
            sheet("Prices", &["Name", "Wholesale", "Retail"], 20, true),
        ];
        let selector = SheetSelector::default();
        assert_eq!(selector.select(&sheets).unwrap().name, "Prices");
    }

    #[test]
    fn test_blacklisted_sheet_skipped_unless_only_candidate() {
        let selector = SheetSelector::default();

        let with_alternative = vec![
            sheet("Legend", &["Name", "Price"], 30, true),
            sheet("2024", &["Name", "Price"], 30, true),
        ];
        assert_eq!(selector.select(&with_alternative).unwrap().name, "2024");

        let only_blacklisted = vec![sheet("Legend", &["Name", "Price"], 30, true)];
        assert_eq!(selector.select(&only_blacklisted).unwrap().name, "Legend");
    }

    #[test]
    fn test_tie_breaks_to_lowest_index() {
        let sheets = vec![
            sheet("First", &["Name", "Price"], 30, true),
            sheet("Second", &["Name", "Price"], 30, true),
        ];
        let selector = SheetSelector::default();
        assert_eq!(selector.select(&sheets).unwrap().name, "First");
    }

    #[test]
    fn test_too_few_rows_is_not_viable() {
        let sheets = vec![sheet("Prices", &["Name", "Price"], 3, true)];
        let selector = SheetSelector::default();
        let failure = selector.select(&sheets).unwrap_err();
        assert_eq!(failure.kind, ErrorKind::NoSuitableSheet);
    }

    #[test]
    fn test_numeric_cells_matter() {
        let sheets = vec![
            sheet("Notes", &["Name", "Price"], 20, false),
            sheet("Real", &["Name", "Price"], 20, true),
        ];
        let selector = SheetSelector::default();
        assert_eq!(selector.select(&sheets).unwrap().name, "Real");
    }

    #[test]
    fn test_looks_numeric() {
        assert!(looks_numeric("1,299.00"));
        assert!(looks_numeric("€ 42.50"));
        assert!(looks_numeric("7"));
        assert!(!looks_numeric("n/a"));
        assert!(!looks_numeric(""));
    }
}
