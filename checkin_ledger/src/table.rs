//! The tabular view consumed by the extraction heuristics.
//!
//! Readers for concrete formats (see [`crate::excel`]) produce a [`SheetGrid`];
//! the extraction only ever sees it through [`TabularSource`].

use chrono::NaiveDateTime;

use crate::error::*;

/// The content of one cell, independent of the spreadsheet library.
#[derive(PartialEq, Debug, Clone, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
    Error(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Non-empty text, as opposed to numbers, dates and blanks.
    pub fn is_plain_text(&self) -> bool {
        matches!(self, CellValue::Text(s) if !s.trim().is_empty())
    }

    /// Textual rendering used for identifiers and timestamps.
    ///
    /// Dates render as `YYYY-MM-DD HH:MM:SS` so that they sort chronologically
    /// as strings.
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Empty | CellValue::Error(_) => "".to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(PartialEq, Debug, Clone, Default)]
pub struct Cell {
    pub value: CellValue,
    /// Target of a hyperlink embedded in the cell, if any.
    pub hyperlink: Option<String>,
}

impl Cell {
    pub fn text(s: &str) -> Cell {
        Cell {
            value: CellValue::Text(s.to_string()),
            hyperlink: None,
        }
    }

    pub fn link(label: &str, target: &str) -> Cell {
        Cell {
            value: CellValue::Text(label.to_string()),
            hyperlink: Some(target.to_string()),
        }
    }
}

/// A header row and the data rows below it.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct Table {
    /// Column names. Blank header cells are `None`.
    pub headers: Vec<Option<String>>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    /// The header name, or the `Unnamed: <index>` placeholder for blank headers.
    pub fn header_name(&self, idx: usize) -> String {
        match self.headers.get(idx) {
            Some(Some(s)) => s.clone(),
            _ => format!("Unnamed: {}", idx),
        }
    }

    pub fn header_names(&self) -> Vec<String> {
        (0..self.headers.len())
            .map(|idx| self.header_name(idx))
            .collect()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(col))
    }
}

/// Anything that can present itself as a table given the index of its header row.
pub trait TabularSource {
    /// Reads the table whose header is on row `header_row` (0-based). Rows
    /// above the header are ignored.
    fn read_table(&self, header_row: usize) -> ExtractResult<Table>;
}

/// A fully materialized sheet: every row, header candidates included.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct SheetGrid {
    pub rows: Vec<Vec<Cell>>,
}

impl SheetGrid {
    pub fn new(rows: Vec<Vec<Cell>>) -> SheetGrid {
        SheetGrid { rows }
    }

    /// Builds a grid of text cells. Empty strings become empty cells.
    pub fn from_strings(rows: &[&[&str]]) -> SheetGrid {
        SheetGrid {
            rows: rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|s| {
                            if s.is_empty() {
                                Cell::default()
                            } else {
                                Cell::text(s)
                            }
                        })
                        .collect()
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows
            .iter()
            .all(|row| row.iter().all(|c| c.value.is_empty()))
    }
}

impl TabularSource for SheetGrid {
    fn read_table(&self, header_row: usize) -> ExtractResult<Table> {
        let width = self.rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let header_cells = match self.rows.get(header_row) {
            Some(h) => h,
            None => return Ok(Table::default()),
        };
        let headers: Vec<Option<String>> = (0..width)
            .map(|idx| match header_cells.get(idx) {
                Some(c) if !c.value.is_empty() => Some(c.value.to_text().trim().to_string()),
                _ => None,
            })
            .collect();
        // Blank lines carry nothing for the extraction.
        let rows: Vec<Vec<Cell>> = self
            .rows
            .iter()
            .skip(header_row + 1)
            .filter(|row| row.iter().any(|c| !c.value.is_empty()))
            .cloned()
            .collect();
        Ok(Table { headers, rows })
    }
}
