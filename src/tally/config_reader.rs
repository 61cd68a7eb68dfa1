use crate::args::{Args, Command};
use crate::tally::*;

use checkin_ledger::{ExtractOptions, ScoringConfig};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::BTreeMap;

pub const DEFAULT_DATA_DIRECTORY: &str = "data";
pub const DEFAULT_RETENTION_HOURS: u64 = 24;

// Accepted ranges for the scoring settings.
const BASE_SCORE_RANGE: (f64, f64) = (0.1, 100.0);
const REWARD_COUNT_MAX: usize = 100;
const REWARD_MULTIPLIER_RANGE: (f64, f64) = (1.0, 10.0);
const WEIGHT_RANGE: (u32, u32) = (1, 100);

/// The JSON configuration file. Every field is optional.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct TallyConfig {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(rename = "dataDirectory")]
    pub data_directory: Option<String>,
    #[serde(rename = "retentionHours")]
    pub retention_hours: Option<u64>,
    #[serde(rename = "baseScore")]
    pub base_score: Option<f64>,
    #[serde(rename = "rewardCount")]
    pub reward_count: Option<usize>,
    #[serde(rename = "rewardMultiplier")]
    pub reward_multiplier: Option<f64>,
    #[serde(rename = "dedupeWithinFile")]
    pub dedupe_within_file: Option<bool>,
    #[serde(rename = "fileWeights")]
    pub file_weights: Option<BTreeMap<String, u32>>,
}

pub fn read_config(path: &str) -> TallyResult<TallyConfig> {
    let contents = std::fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    let config: TallyConfig =
        serde_json::from_str(&contents).context(ParsingConfigSnafu { path })?;
    Ok(config)
}

/// Parses `NAME=N`. The name may itself contain `=`.
pub fn parse_weight_spec(spec: &str) -> TallyResult<(String, u32)> {
    let (name, value) = match spec.rsplit_once('=') {
        Some((name, value)) if !name.trim().is_empty() => (name.trim(), value.trim()),
        _ => whatever!("Invalid weight {:?}: expected FILE_NAME=WEIGHT", spec),
    };
    let weight: u32 = match value.parse() {
        Ok(w) => w,
        Err(_) => whatever!("Invalid weight {:?}: {:?} is not a positive integer", spec, value),
    };
    Ok((name.to_string(), weight))
}

/// The settings of one run: the configuration file overridden by the flags.
#[derive(PartialEq, Debug, Clone)]
pub struct Settings {
    pub session_id: Option<String>,
    pub data_directory: String,
    pub retention: chrono::Duration,
    pub scoring: ScoringConfig,
    pub extract: ExtractOptions,
    /// Weights given explicitly, by file name.
    pub file_weights: BTreeMap<String, u32>,
}

impl Settings {
    pub fn resolve(args: &Args, config: &TallyConfig) -> TallyResult<Settings> {
        let mut scoring = ScoringConfig {
            base_score: config
                .base_score
                .unwrap_or(ScoringConfig::DEFAULT.base_score),
            reward_count: config
                .reward_count
                .unwrap_or(ScoringConfig::DEFAULT.reward_count),
            reward_multiplier: config
                .reward_multiplier
                .unwrap_or(ScoringConfig::DEFAULT.reward_multiplier),
        };
        let mut extract = ExtractOptions {
            dedupe_within_file: config
                .dedupe_within_file
                .unwrap_or(ExtractOptions::default().dedupe_within_file),
        };
        let mut file_weights = config.file_weights.clone().unwrap_or_default();

        if let Command::Ingest {
            weights,
            base_score,
            reward_count,
            reward_multiplier,
            keep_duplicates,
            ..
        } = &args.command
        {
            if let Some(x) = base_score {
                scoring.base_score = *x;
            }
            if let Some(x) = reward_count {
                scoring.reward_count = *x;
            }
            if let Some(x) = reward_multiplier {
                scoring.reward_multiplier = *x;
            }
            if *keep_duplicates {
                extract.dedupe_within_file = false;
            }
            for spec in weights.iter() {
                let (name, w) = parse_weight_spec(spec)?;
                file_weights.insert(name, w);
            }
        }

        validate_scoring(&scoring)?;
        for (name, w) in file_weights.iter() {
            if *w < WEIGHT_RANGE.0 || *w > WEIGHT_RANGE.1 {
                whatever!(
                    "Weight of {} must be between {} and {}, got {}",
                    name,
                    WEIGHT_RANGE.0,
                    WEIGHT_RANGE.1,
                    w
                );
            }
        }

        let retention_hours = config.retention_hours.unwrap_or(DEFAULT_RETENTION_HOURS);
        Ok(Settings {
            session_id: args
                .session
                .clone()
                .or_else(|| config.session_id.clone())
                .filter(|s| !s.trim().is_empty()),
            data_directory: args
                .data_dir
                .clone()
                .or_else(|| config.data_directory.clone())
                .unwrap_or_else(|| DEFAULT_DATA_DIRECTORY.to_string()),
            retention: chrono::Duration::hours(retention_hours as i64),
            scoring,
            extract,
            file_weights,
        })
    }
}

fn validate_scoring(scoring: &ScoringConfig) -> TallyResult<()> {
    if !(scoring.base_score >= BASE_SCORE_RANGE.0 && scoring.base_score <= BASE_SCORE_RANGE.1) {
        whatever!(
            "Base score must be between {} and {}, got {}",
            BASE_SCORE_RANGE.0,
            BASE_SCORE_RANGE.1,
            scoring.base_score
        );
    }
    if scoring.reward_count > REWARD_COUNT_MAX {
        whatever!(
            "Reward count must be at most {}, got {}",
            REWARD_COUNT_MAX,
            scoring.reward_count
        );
    }
    if !(scoring.reward_multiplier >= REWARD_MULTIPLIER_RANGE.0
        && scoring.reward_multiplier <= REWARD_MULTIPLIER_RANGE.1)
    {
        whatever!(
            "Reward multiplier must be between {} and {}, got {}",
            REWARD_MULTIPLIER_RANGE.0,
            REWARD_MULTIPLIER_RANGE.1,
            scoring.reward_multiplier
        );
    }
    Ok(())
}
