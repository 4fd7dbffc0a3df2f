//src/sheets.rs

use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader};

use crate::error::{FormatError, QpcrResult};
use crate::extract::Row;

/// Every tab of a workbook, materialized as text grids.
///
/// The workbook is read completely and closed on construction, so parsers
/// never hold the file open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    pub tabs: Vec<(String, Vec<Row>)>,
}

impl Workbook {
    pub fn open<P: AsRef<Path>>(path: P) -> QpcrResult<Workbook> {
        let path = path.as_ref();
        let mut sheets = open_workbook_auto(path)?;
        let names = sheets.sheet_names();
        let mut tabs = Vec::with_capacity(names.len());
        for name in names {
            let range = sheets.worksheet_range(&name)?;
            tabs.push((name, range_to_grid(&range)));
        }
        log::info!("Read {} tab(s) from {}", tabs.len(), path.display());
        Ok(Workbook { tabs })
    }

    pub fn tab_names(&self) -> impl Iterator<Item = &str> {
        self.tabs.iter().map(|(name, _)| name.as_str())
    }

    pub fn tab(&self, name: &str) -> Option<&[Row]> {
        self.tabs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, grid)| grid.as_slice())
    }

    pub fn require_tab(&self, name: &str) -> Result<&[Row], FormatError> {
        self.tab(name).ok_or_else(|| FormatError::MissingSheet { sheet: name.to_string() })
    }
}

/// Text of one cell, the way it would appear in a CSV export of the sheet.
pub fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{e:?}"),
    }
}

/// Converts a used range to a grid anchored at cell A1, so fixed row offsets
/// count from the top of the sheet like the instrument software does.
pub fn range_to_grid(range: &Range<Data>) -> Vec<Row> {
    let (row0, col0) = match range.start() {
        Some((r, c)) => (r as usize, c as usize),
        None => return Vec::new(),
    };
    let mut grid: Vec<Row> = vec![Vec::new(); row0];
    for cells in range.rows() {
        let mut row = vec![String::new(); col0];
        row.extend(cells.iter().map(cell_text));
        grid.push(row);
    }
    grid
}

/// Keeps only the first `n` columns (the `A:B` metadata view of a tab).
pub fn first_columns(grid: &[Row], n: usize) -> Vec<Row> {
    grid.iter()
        .map(|row| row.iter().take(n).cloned().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_to_grid_is_anchored_at_a1() {
        let mut range: Range<Data> = Range::new((2, 1), (3, 2));
        range.set_value((2, 1), Data::String("Well".into()));
        range.set_value((2, 2), Data::String("Cq".into()));
        range.set_value((3, 1), Data::Float(1.0));
        range.set_value((3, 2), Data::Float(21.5));

        let grid = range_to_grid(&range);
        assert_eq!(grid.len(), 4);
        assert!(grid[0].is_empty() && grid[1].is_empty());
        assert_eq!(grid[2], vec!["", "Well", "Cq"]);
        assert_eq!(grid[3], vec!["", "1", "21.5"]);
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&Data::Empty), "");
        assert_eq!(cell_text(&Data::Int(7)), "7");
        assert_eq!(cell_text(&Data::Float(0.25)), "0.25");
        assert_eq!(cell_text(&Data::String("Undetermined".into())), "Undetermined");
    }

    #[test]
    fn test_workbook_tabs_and_first_columns() {
        let wb = Workbook {
            tabs: vec![
                ("General Information".into(), vec![vec!["Run".into(), "7".into(), "x".into()]]),
                ("Samples".into(), vec![]),
            ],
        };
        assert_eq!(wb.tab_names().collect::<Vec<_>>(), vec!["General Information", "Samples"]);
        assert!(wb.tab("Samples").is_some());
        assert_eq!(
            wb.require_tab("Results").unwrap_err(),
            FormatError::MissingSheet { sheet: "Results".into() }
        );
        let ab = first_columns(wb.tab("General Information").unwrap(), 2);
        assert_eq!(ab, vec![vec!["Run".to_string(), "7".to_string()]]);
    }
}
