use snafu::Snafu;

/// Failures while turning one spreadsheet into identifiers.
///
/// These are per-file: a batch reports the failing file and moves on.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExtractError {
    #[snafu(display("Unsupported file format: {file_name} (only .xlsx and .xls are accepted)"))]
    UnsupportedFormat { file_name: String },

    #[snafu(display("File is empty: {file_name}"))]
    EmptyInput { file_name: String },

    #[snafu(display(
        "No identifier column found in {file_name}, available columns: {}",
        headers.join(", ")
    ))]
    ColumnNotFound {
        file_name: String,
        headers: Vec<String>,
    },

    #[snafu(display("Error while reading {file_name}: {source}"))]
    Extraction {
        file_name: String,
        source: calamine::Error,
    },
}

pub type ExtractResult<T> = Result<T, ExtractError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LedgerError {
    #[snafu(display(
        "Length mismatch: {identifiers} identifiers but {actual} {what}"
    ))]
    LengthMismatch {
        what: &'static str,
        identifiers: usize,
        actual: usize,
    },

    #[snafu(display(
        "Ledger document is missing required fields: {}",
        missing.join(", ")
    ))]
    Format { missing: Vec<String> },

    #[snafu(display("Ledger document could not be decoded: {source}"))]
    InvalidDocument { source: serde_json::Error },

    #[snafu(display("I/O error on {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
