// ********* Scoring and extraction settings ***********

use crate::document::{FileIngestRecord, FileWeight};
use crate::error::*;

/// The scoring parameters applied to one ingestion.
///
/// They are passed explicitly to every scoring call; the ledger keeps no
/// ambient settings of its own.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct ScoringConfig {
    /// Points for one row of weight 1.
    pub base_score: f64,
    /// How many of the earliest submissions receive the bonus. 0 disables it.
    pub reward_count: usize,
    /// Multiplier applied to the points of rewarded rows.
    pub reward_multiplier: f64,
}

impl ScoringConfig {
    pub const DEFAULT: ScoringConfig = ScoringConfig {
        base_score: 1.0,
        reward_count: 0,
        reward_multiplier: 1.5,
    };

    /// True when a previous ingestion recorded the same scoring parameters.
    pub fn matches(&self, record: &FileIngestRecord) -> bool {
        self.base_score == record.base_score
            && self.reward_count == record.reward_count
            && self.reward_multiplier == record.reward_multiplier
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig::DEFAULT
    }
}

/// Options for the spreadsheet extraction.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ExtractOptions {
    /// Keep only the first row of each identifier within one file.
    ///
    /// When false every row is returned and the ledger scores each of them.
    pub dedupe_within_file: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            dedupe_within_file: true,
        }
    }
}

/// The weight ("码数") applied to the rows of one file.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Weight {
    /// Same weight for every row.
    Uniform(u32),
    /// One weight per row, parallel to the identifiers.
    PerRow(Vec<u32>),
}

impl Weight {
    /// Expands the weight to one value per identifier.
    pub fn per_row(&self, num_identifiers: usize) -> LedgerResult<Vec<u32>> {
        match self {
            Weight::Uniform(w) => Ok(vec![*w; num_identifiers]),
            Weight::PerRow(ws) if ws.len() == num_identifiers => Ok(ws.clone()),
            Weight::PerRow(ws) => LengthMismatchSnafu {
                what: "weights",
                identifiers: num_identifiers,
                actual: ws.len(),
            }
            .fail(),
        }
    }

    /// The value stored in the processed-file registry: the weight itself,
    /// or the average of the per-row weights.
    pub fn file_weight(&self) -> FileWeight {
        match self {
            Weight::Uniform(w) => FileWeight::Uniform(*w),
            Weight::PerRow(ws) if ws.is_empty() => FileWeight::Average(1.0),
            Weight::PerRow(ws) => {
                let total: u64 = ws.iter().map(|w| *w as u64).sum();
                FileWeight::Average(total as f64 / ws.len() as f64)
            }
        }
    }

    /// Collapses per-row weights that are all equal into a uniform weight.
    pub fn simplified(self) -> Weight {
        match self {
            Weight::PerRow(ws) => match ws.first() {
                Some(first) if ws.iter().all(|w| w == first) => Weight::Uniform(*first),
                _ => Weight::PerRow(ws),
            },
            w => w,
        }
    }
}
