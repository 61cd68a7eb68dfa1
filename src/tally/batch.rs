use log::{info, warn};

use checkin_ledger::*;
use snafu::prelude::*;
use std::fs;

use crate::tally::config_reader::Settings;
use crate::tally::io_common::simplify_file_name;
use crate::tally::*;

#[derive(PartialEq, Debug, Clone)]
pub enum FileStatus {
    Ingested { identifiers: usize, rewarded: usize },
    Rescored { identifiers: usize, rewarded: usize },
    WeightAdjusted { identifiers: usize, old: u32, new: u32 },
    Skipped,
    /// The sheet was read but no row carried an identifier.
    NoIdentifiers,
    /// The file could not be read or understood. The batch goes on.
    Failed(String),
}

impl FileStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, FileStatus::Failed(_) | FileStatus::NoIdentifiers)
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct FileReport {
    pub file_name: String,
    pub status: FileStatus,
}

#[derive(PartialEq, Debug, Clone, Default)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
}

impl BatchReport {
    fn count(&self, f: impl Fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|r| f(&r.status)).count()
    }

    pub fn new_count(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Ingested { .. }))
    }

    pub fn updated_count(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Rescored { .. } | FileStatus::WeightAdjusted { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Skipped))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|s| s.is_failure())
    }

    pub fn total_identifiers(&self) -> usize {
        self.files
            .iter()
            .map(|r| match r.status {
                FileStatus::Ingested { identifiers, .. }
                | FileStatus::Rescored { identifiers, .. }
                | FileStatus::WeightAdjusted { identifiers, .. } => identifiers,
                _ => 0,
            })
            .sum()
    }
}

/// The weight of a file: the one given in the settings, otherwise the one
/// found in the sheet.
pub fn weight_for(extraction: &Extraction, settings: &Settings) -> Weight {
    match settings.file_weights.get(&extraction.file_name) {
        Some(w) => Weight::Uniform(*w),
        None => extraction.weight(),
    }
}

/// Applies an extracted file to the ledger, skipping it when it was already
/// processed the same way.
pub fn apply_extraction<S: LedgerStore>(
    ledger: &mut ScoringLedger<S>,
    extraction: &Extraction,
    settings: &Settings,
) -> TallyResult<FileStatus> {
    if extraction.identifiers.is_empty() {
        warn!("{}: no identifier found", extraction.file_name);
        return Ok(FileStatus::NoIdentifiers);
    }
    let weight = weight_for(extraction, settings);
    let plan = ledger.plan(&extraction.file_name, &weight, &settings.scoring);
    info!("{}: {:?} with weight {:?}", extraction.file_name, plan, weight);
    let outcome = ledger
        .apply(&plan, extraction, &weight, &settings.scoring)
        .context(LedgerSnafu)?;
    let identifiers = extraction.identifiers.len();
    let status = match outcome {
        IngestOutcome::Ingested { rewarded } => FileStatus::Ingested {
            identifiers,
            rewarded,
        },
        IngestOutcome::Rescored { rewarded } => FileStatus::Rescored {
            identifiers,
            rewarded,
        },
        IngestOutcome::WeightAdjusted { old, new } => FileStatus::WeightAdjusted {
            identifiers,
            old,
            new,
        },
        IngestOutcome::Skipped => FileStatus::Skipped,
    };
    Ok(status)
}

/// Processes files in the given order. A file that cannot be read is
/// reported and the batch continues; ledger failures stop the batch.
pub fn process_files<S: LedgerStore>(
    ledger: &mut ScoringLedger<S>,
    paths: &[String],
    settings: &Settings,
) -> TallyResult<BatchReport> {
    let mut report = BatchReport::default();
    for (idx, path) in paths.iter().enumerate() {
        let file_name = simplify_file_name(path);
        info!("Processing {} ({}/{})", file_name, idx + 1, paths.len());
        let status = match read_and_extract(path, &file_name, settings) {
            Ok(extraction) => apply_extraction(ledger, &extraction, settings)?,
            Err(msg) => {
                warn!("{}: {}", file_name, msg);
                FileStatus::Failed(msg)
            }
        };
        report.files.push(FileReport { file_name, status });
    }
    Ok(report)
}

fn read_and_extract(path: &str, file_name: &str, settings: &Settings) -> Result<Extraction, String> {
    // Rejected before reading anything.
    SheetFormat::from_file_name(file_name).map_err(|e| e.to_string())?;
    let bytes = fs::read(path).map_err(|e| format!("cannot read {}: {}", path, e))?;
    extract_file(&bytes, file_name, &settings.extract).map_err(|e| e.to_string())
}
