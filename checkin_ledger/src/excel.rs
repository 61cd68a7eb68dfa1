//! Reading check-in rosters from Excel workbooks (`.xlsx` and legacy `.xls`).

use calamine::{DataType, Range, Reader, Xls, Xlsx};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::{debug, warn};
use snafu::prelude::*;
use std::io::Cursor;

use crate::config::ExtractOptions;
use crate::error::*;
use crate::extract::{extract, Extraction};
use crate::table::{Cell, CellValue, SheetGrid, Table, TabularSource};

/// The workbook containers understood by the reader.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum SheetFormat {
    /// Zipped XML workbook (`.xlsx`).
    Xlsx,
    /// Legacy binary workbook (`.xls`).
    Xls,
}

impl SheetFormat {
    /// Decides the format from the extension, before looking at any byte.
    pub fn from_file_name(file_name: &str) -> ExtractResult<SheetFormat> {
        let lower = file_name.to_lowercase();
        if lower.ends_with(".xlsx") {
            Ok(SheetFormat::Xlsx)
        } else if lower.ends_with(".xls") {
            Ok(SheetFormat::Xls)
        } else {
            UnsupportedFormatSnafu {
                file_name: file_name.to_string(),
            }
            .fail()
        }
    }
}

/// True for the extensions accepted by [`SheetFormat::from_file_name`].
pub fn is_supported_file(file_name: &str) -> bool {
    SheetFormat::from_file_name(file_name).is_ok()
}

/// The first worksheet of a workbook, loaded in memory.
#[derive(PartialEq, Debug, Clone)]
pub struct ExcelSource {
    pub file_name: String,
    pub format: SheetFormat,
    grid: SheetGrid,
}

impl ExcelSource {
    pub fn from_bytes(bytes: &[u8], file_name: &str) -> ExtractResult<ExcelSource> {
        let format = SheetFormat::from_file_name(file_name)?;
        let cursor = Cursor::new(bytes.to_vec());
        let (values, formulas) = match format {
            SheetFormat::Xlsx => {
                let mut workbook: Xlsx<_> = Xlsx::new(cursor)
                    .map_err(calamine::Error::Xlsx)
                    .context(ExtractionSnafu { file_name })?;
                let sheet_name = first_sheet_name(workbook.sheet_names().first(), file_name)?;
                let values = workbook
                    .worksheet_range(&sheet_name)
                    .context(EmptyInputSnafu { file_name })?
                    .map_err(calamine::Error::Xlsx)
                    .context(ExtractionSnafu { file_name })?;
                let formulas = match workbook.worksheet_formula(&sheet_name) {
                    Some(Ok(f)) => Some(f),
                    Some(Err(e)) => {
                        warn!("{}: formulas could not be read: {:?}", file_name, e);
                        None
                    }
                    None => None,
                };
                (values, formulas)
            }
            SheetFormat::Xls => {
                let mut workbook: Xls<_> = Xls::new(cursor)
                    .map_err(calamine::Error::Xls)
                    .context(ExtractionSnafu { file_name })?;
                let sheet_name = first_sheet_name(workbook.sheet_names().first(), file_name)?;
                let values = workbook
                    .worksheet_range(&sheet_name)
                    .context(EmptyInputSnafu { file_name })?
                    .map_err(calamine::Error::Xls)
                    .context(ExtractionSnafu { file_name })?;
                let formulas = match workbook.worksheet_formula(&sheet_name) {
                    Some(Ok(f)) => Some(f),
                    Some(Err(e)) => {
                        warn!("{}: formulas could not be read: {:?}", file_name, e);
                        None
                    }
                    None => None,
                };
                (values, formulas)
            }
        };
        debug!(
            "ExcelSource::from_bytes: {}: {:?} cells starting at {:?}",
            file_name,
            values.get_size(),
            values.start()
        );
        Ok(ExcelSource {
            file_name: file_name.to_string(),
            format,
            grid: grid_from_ranges(&values, formulas.as_ref()),
        })
    }

    pub fn grid(&self) -> &SheetGrid {
        &self.grid
    }
}

impl TabularSource for ExcelSource {
    fn read_table(&self, header_row: usize) -> ExtractResult<Table> {
        self.grid.read_table(header_row)
    }
}

/// Reads a workbook and extracts its identifiers in one step.
pub fn extract_file(
    bytes: &[u8],
    file_name: &str,
    options: &ExtractOptions,
) -> ExtractResult<Extraction> {
    let source = ExcelSource::from_bytes(bytes, file_name)?;
    extract(&source, file_name, options)
}

fn first_sheet_name(name: Option<&String>, file_name: &str) -> ExtractResult<String> {
    name.cloned().context(EmptyInputSnafu { file_name })
}

// Cell values and formulas live in separate ranges that may not start at
// the same position, so formulas are looked up by absolute position.
fn grid_from_ranges(values: &Range<DataType>, formulas: Option<&Range<String>>) -> SheetGrid {
    let (row0, col0) = match values.start() {
        Some(start) => start,
        None => return SheetGrid::default(),
    };
    let rows: Vec<Vec<Cell>> = values
        .rows()
        .enumerate()
        .map(|(ridx, row)| {
            row.iter()
                .enumerate()
                .map(|(cidx, dt)| {
                    let pos = (row0 + ridx as u32, col0 + cidx as u32);
                    let formula = formulas.and_then(|f| f.get_value(pos));
                    read_cell(dt, formula.map(|s| s.as_str()))
                })
                .collect()
        })
        .collect();
    // The range starts at its first used cell; pad so that row and column
    // indexes match the sheet.
    let padded: Vec<Vec<Cell>> = (0..row0)
        .map(|_| Vec::new())
        .chain(rows.into_iter().map(|row| {
            let mut r: Vec<Cell> = vec![Cell::default(); col0 as usize];
            r.extend(row);
            r
        }))
        .collect();
    SheetGrid::new(padded)
}

fn read_cell(dt: &DataType, formula: Option<&str>) -> Cell {
    let value = match dt {
        DataType::String(s) => CellValue::Text(s.clone()),
        DataType::Int(i) => CellValue::Int(*i),
        DataType::Float(f) => CellValue::Float(*f),
        DataType::Bool(b) => CellValue::Bool(*b),
        DataType::DateTime(serial) => match excel_serial_to_datetime(*serial) {
            Some(d) => CellValue::DateTime(d),
            None => CellValue::Float(*serial),
        },
        DataType::Error(e) => CellValue::Error(format!("{:?}", e)),
        DataType::Empty => CellValue::Empty,
        #[allow(unreachable_patterns)]
        other => CellValue::Text(other.to_string()),
    };
    let hyperlink = formula
        .and_then(hyperlink_from_formula)
        .or_else(|| match &value {
            CellValue::Text(s) if is_url(s) => Some(s.trim().to_string()),
            _ => None,
        });
    Cell { value, hyperlink }
}

fn is_url(s: &str) -> bool {
    let s = s.trim().to_lowercase();
    s.starts_with("http://") || s.starts_with("https://")
}

/// The target of a `HYPERLINK("target", "label")` formula.
pub fn hyperlink_from_formula(formula: &str) -> Option<String> {
    let f = formula.trim().trim_start_matches('=');
    if !f.to_uppercase().starts_with("HYPERLINK(") {
        return None;
    }
    let args = &f["HYPERLINK(".len()..];
    let start = args.find('"')? + 1;
    let len = args[start..].find('"')?;
    Some(args[start..start + len].to_string())
}

// Serial of 10000-01-01, the day after the last date Excel can hold.
const EXCEL_SERIAL_MAX: f64 = 2_958_466.0;

/// Converts an Excel serial date (days since 1899-12-30) to a timestamp,
/// rounded to the second. Serials outside Excel's calendar give `None`.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || !(0.0..EXCEL_SERIAL_MAX).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (serial * 86_400.0).round() as i64;
    epoch.checked_add_signed(Duration::seconds(seconds))
}
