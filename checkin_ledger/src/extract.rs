//! Discovery of the identifier, time and image columns of a check-in roster,
//! and extraction of clean `(identifier, time, weight)` rows.

use log::{debug, info};
use snafu::prelude::*;
use std::collections::HashSet;

use crate::config::{ExtractOptions, Weight};
use crate::error::*;
use crate::table::{Cell, Table, TabularSource};

/// Header keywords for the participant name column, in priority order.
pub const IDENTIFIER_KEYWORDS: &[&str] = &[
    "昵称",
    "姓名",
    "用户名",
    "名字",
    "用户",
    "name",
    "nickname",
    "微信昵称",
    "群昵称",
    "参与者",
    "打卡人",
    "用户昵称",
];

/// Header keywords for the submission time column, in priority order.
pub const TIME_KEYWORDS: &[&str] = &[
    "提交时间",
    "时间",
    "打卡时间",
    "参与时间",
    "上传时间",
    "time",
    "submit_time",
    "timestamp",
    "日期时间",
];

// Numbered image columns look like "image1", "Image 2" or "图片3".
const IMAGE_PREFIXES: &[&str] = &["image", "图片"];
const CORRECTION_MARKERS: &[&str] = &["correction", "订正", "更正"];

// The fallback looks at this many non-empty values of the first column.
const TEXT_SAMPLE_SIZE: usize = 10;
const TEXT_RATIO_THRESHOLD: f64 = 0.7;

// The header is tried on the first row, then on the second one (banner row above).
const HEADER_ROW_CANDIDATES: [usize; 2] = [0, 1];

/// A column located by the heuristics.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ColumnRef {
    pub index: usize,
    pub name: String,
}

/// The result of extracting one file. `identifiers`, `times` and `weights`
/// are parallel.
#[derive(PartialEq, Debug, Clone)]
pub struct Extraction {
    pub file_name: String,
    pub identifiers: Vec<String>,
    /// Empty strings when the file has no time column or the cell is blank.
    pub times: Vec<String>,
    pub weights: Vec<u32>,
    pub identifier_column: ColumnRef,
    pub time_column: Option<ColumnRef>,
    /// The (0-based) row used as header.
    pub header_row: usize,
    /// True when the sheet has image columns, i.e. the weights carry a signal.
    pub has_image_columns: bool,
    /// Rows whose cleaned identifier was empty.
    pub dropped_rows: usize,
    /// Rows skipped because the identifier already appeared in the file.
    pub duplicate_rows: usize,
}

impl Extraction {
    /// The weight carried by the sheet itself: one per row when it has image
    /// columns, 1 otherwise.
    pub fn weight(&self) -> Weight {
        if self.has_image_columns {
            Weight::PerRow(self.weights.clone()).simplified()
        } else {
            Weight::Uniform(1)
        }
    }
}

/// Summary of a sheet, without extracting anything.
#[derive(PartialEq, Debug, Clone)]
pub struct TableInfo {
    pub file_name: String,
    pub header_row: usize,
    pub total_rows: usize,
    pub total_columns: usize,
    pub columns: Vec<String>,
    pub identifier_column: Option<String>,
    pub time_column: Option<String>,
    pub image_columns: Vec<String>,
}

fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase()
}

/// Exact match first, then substring match. The keyword order decides
/// between several candidate headers.
fn match_keywords(headers: &[Option<String>], keywords: &[&str]) -> Option<ColumnRef> {
    let normalized: Vec<Option<String>> = headers
        .iter()
        .map(|h| h.as_deref().map(normalize_header))
        .collect();

    let exact = keywords.iter().find_map(|kw| {
        normalized
            .iter()
            .position(|h| h.as_deref() == Some(*kw))
    });
    let found = exact.or_else(|| {
        keywords.iter().find_map(|kw| {
            normalized
                .iter()
                .position(|h| matches!(h, Some(h) if h.contains(kw)))
        })
    });
    found.and_then(|idx| {
        headers[idx].as_ref().map(|name| ColumnRef {
            index: idx,
            name: name.clone(),
        })
    })
}

/// Finds the column holding participant identifiers.
///
/// Headers are matched against [`IDENTIFIER_KEYWORDS`], exactly then by
/// substring. As a last resort the first column is selected when at least
/// 70% of its first non-empty values are text.
pub fn find_identifier_column(
    headers: &[Option<String>],
    sample_rows: &[Vec<Cell>],
) -> Option<ColumnRef> {
    match_keywords(headers, IDENTIFIER_KEYWORDS)
        .or_else(|| first_text_column(headers, sample_rows))
}

fn first_text_column(headers: &[Option<String>], sample_rows: &[Vec<Cell>]) -> Option<ColumnRef> {
    if headers.is_empty() {
        return None;
    }
    let sample: Vec<&Cell> = sample_rows
        .iter()
        .filter_map(|row| row.first())
        .filter(|c| !c.value.is_empty())
        .take(TEXT_SAMPLE_SIZE)
        .collect();
    if sample.is_empty() {
        return None;
    }
    let text_count = sample.iter().filter(|c| c.value.is_plain_text()).count();
    let ratio = text_count as f64 / sample.len() as f64;
    debug!(
        "first_text_column: text ratio {} over {} values",
        ratio,
        sample.len()
    );
    if ratio >= TEXT_RATIO_THRESHOLD {
        Some(ColumnRef {
            index: 0,
            name: headers[0]
                .clone()
                .unwrap_or_else(|| "Unnamed: 0".to_string()),
        })
    } else {
        None
    }
}

/// Finds the submission time column. There is no fallback.
pub fn find_time_column(headers: &[Option<String>]) -> Option<ColumnRef> {
    match_keywords(headers, TIME_KEYWORDS)
}

fn is_cjk_ideograph(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}')
}

/// Normalizes a raw name: keeps word characters, CJK ideographs and
/// whitespace, then collapses whitespace runs and trims.
///
/// This strips emoji and decorations such as `★` or `~`.
pub fn clean_identifier(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace() || is_cjk_ideograph(*c))
        .collect();
    kept.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Cleans the identifier found in a cell. A missing cell gives an empty string.
pub fn clean_cell_identifier(cell: Option<&Cell>) -> String {
    cell.map(|c| clean_identifier(&c.value.to_text()))
        .unwrap_or_default()
}

fn is_image_header(header: &str) -> bool {
    let h = normalize_header(header);
    if CORRECTION_MARKERS.iter().any(|m| h.contains(m)) {
        return false;
    }
    IMAGE_PREFIXES.iter().any(|prefix| match h.strip_prefix(prefix) {
        Some(rest) => {
            let digits = rest.trim_start_matches(|c: char| c == ' ' || c == '_' || c == '-');
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    })
}

/// Indexes of the numbered image columns, correction columns excluded.
pub fn image_columns(headers: &[Option<String>]) -> Vec<usize> {
    headers
        .iter()
        .enumerate()
        .filter_map(|(idx, h)| match h {
            Some(h) if is_image_header(h) => Some(idx),
            _ => None,
        })
        .collect()
}

/// The weight of a row: how many of its image cells carry a hyperlink.
///
/// A row without any linked image (or a sheet without image columns) has
/// weight 1.
pub fn derive_row_weight(image_columns: &[usize], row: &[Cell]) -> u32 {
    let linked = image_columns
        .iter()
        .filter(|idx| matches!(row.get(**idx), Some(c) if c.hyperlink.is_some()))
        .count() as u32;
    if linked == 0 {
        1
    } else {
        linked
    }
}

fn time_text(cell: Option<&Cell>) -> String {
    cell.map(|c| c.value.to_text().trim().to_string())
        .unwrap_or_default()
}

// Reads the table under each header assumption. A header naming the
// identifier column wins on any row before the first-column fallback is
// tried, so a banner row does not hide the real header.
fn locate_table(
    source: &dyn TabularSource,
    file_name: &str,
) -> ExtractResult<(Table, usize, Option<ColumnRef>)> {
    let mut tables: Vec<(Table, usize)> = Vec::new();
    for header_row in HEADER_ROW_CANDIDATES {
        let table = source.read_table(header_row)?;
        if header_row == 0 {
            ensure!(
                !table.rows.is_empty(),
                EmptyInputSnafu {
                    file_name: file_name.to_string()
                }
            );
        }
        if let Some(col) = match_keywords(&table.headers, IDENTIFIER_KEYWORDS) {
            return Ok((table, header_row, Some(col)));
        }
        debug!(
            "locate_table: {}: no identifier header on row {}: {:?}",
            file_name,
            header_row + 1,
            table.header_names()
        );
        tables.push((table, header_row));
    }

    let fallback = tables
        .iter()
        .find_map(|(t, row)| first_text_column(&t.headers, &t.rows).map(|col| (*row, col)));
    if let Some((header_row, col)) = fallback {
        if let Some(pos) = tables.iter().position(|(_, row)| *row == header_row) {
            let (table, _) = tables.swap_remove(pos);
            return Ok((table, header_row, Some(col)));
        }
    }

    // Report the first header row that had any names.
    let pos = tables
        .iter()
        .position(|(t, _)| t.headers.iter().any(|h| h.is_some()))
        .unwrap_or(0);
    if pos < tables.len() {
        let (table, header_row) = tables.swap_remove(pos);
        Ok((table, header_row, None))
    } else {
        Ok((Table::default(), 0, None))
    }
}

/// Extracts the identifiers, times and weights of one sheet.
///
/// Rows keep the file order. Rows with an empty cleaned identifier are
/// dropped, and with [`ExtractOptions::dedupe_within_file`] only the first
/// row of each identifier is kept.
pub fn extract(
    source: &dyn TabularSource,
    file_name: &str,
    options: &ExtractOptions,
) -> ExtractResult<Extraction> {
    let (table, header_row, id_col) = locate_table(source, file_name)?;
    let identifier_column = id_col.context(ColumnNotFoundSnafu {
        file_name: file_name.to_string(),
        headers: table.header_names(),
    })?;
    let time_column = find_time_column(&table.headers);
    let images = image_columns(&table.headers);
    info!(
        "extract: {}: identifier column {:?}, time column {:?}, {} image columns, header on row {}",
        file_name,
        identifier_column.name,
        time_column.as_ref().map(|c| c.name.clone()),
        images.len(),
        header_row + 1
    );

    let mut identifiers: Vec<String> = Vec::new();
    let mut times: Vec<String> = Vec::new();
    let mut weights: Vec<u32> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut dropped_rows = 0;
    let mut duplicate_rows = 0;

    for row in table.rows.iter() {
        let identifier = clean_cell_identifier(row.get(identifier_column.index));
        if identifier.is_empty() {
            dropped_rows += 1;
            continue;
        }
        if options.dedupe_within_file && !seen.insert(identifier.clone()) {
            duplicate_rows += 1;
            continue;
        }
        let time = time_text(time_column.as_ref().and_then(|c| row.get(c.index)));
        times.push(time);
        weights.push(derive_row_weight(&images, row));
        identifiers.push(identifier);
    }
    debug!(
        "extract: {}: {} identifiers, {} rows dropped, {} duplicates",
        file_name,
        identifiers.len(),
        dropped_rows,
        duplicate_rows
    );

    Ok(Extraction {
        file_name: file_name.to_string(),
        identifiers,
        times,
        weights,
        identifier_column,
        time_column,
        header_row,
        has_image_columns: !images.is_empty(),
        dropped_rows,
        duplicate_rows,
    })
}

/// Describes a sheet: its size, its columns and what the heuristics pick.
pub fn inspect(source: &dyn TabularSource, file_name: &str) -> ExtractResult<TableInfo> {
    let (table, header_row, id_col) = locate_table(source, file_name)?;
    let images = image_columns(&table.headers);
    Ok(TableInfo {
        file_name: file_name.to_string(),
        header_row,
        total_rows: table.rows.len(),
        total_columns: table.headers.len(),
        columns: table.header_names(),
        identifier_column: id_col.map(|c| c.name),
        time_column: find_time_column(&table.headers).map(|c| c.name),
        image_columns: images.iter().map(|idx| table.header_name(*idx)).collect(),
    })
}
