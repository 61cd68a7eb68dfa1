//! Scoring rules applied to an in-memory [`LedgerDocument`].
//!
//! Nothing here touches storage: [`crate::ledger::ScoringLedger`] loads the
//! document, calls one of these functions and saves the result.

use log::{debug, info};
use snafu::prelude::*;
use std::collections::HashSet;

use crate::config::{ScoringConfig, Weight};
use crate::document::*;
use crate::error::*;

/// What to do with a file, given what the registry remembers about it.
#[derive(PartialEq, Debug, Clone)]
pub enum IngestPlan {
    /// Never processed.
    New,
    /// Processed with the same weight and scoring settings.
    Skip,
    /// Processed with another uniform weight; the scores are shifted.
    AdjustWeight { old: u32, new: u32 },
    /// Processed with other settings or per-row weights: the previous
    /// contributions are revoked and the file is scored again.
    Rescore,
}

#[derive(PartialEq, Debug, Clone)]
pub struct LeaderboardEntry {
    pub identifier: String,
    pub score: f64,
    /// Distinct files the participant appears in.
    pub participation_count: usize,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Statistics {
    pub participant_count: usize,
    pub files_processed_count: usize,
    pub last_updated: String,
    pub total_score: f64,
}

#[derive(PartialEq, Debug, Clone)]
pub struct ProcessedFile {
    pub file_name: String,
    pub record: FileIngestRecord,
}

fn is_valid_time(t: &str) -> bool {
    let t = t.trim();
    !t.is_empty() && !matches!(t.to_lowercase().as_str(), "nan" | "nat" | "none")
}

/// The identifiers of the `reward_count` earliest rows, earliest first.
///
/// Rows without a usable time are ignored. Times are compared as strings.
pub fn select_rewarded(identifiers: &[String], times: &[String], reward_count: usize) -> Vec<String> {
    if reward_count == 0 {
        return Vec::new();
    }
    let mut pairs: Vec<(&str, &str)> = identifiers
        .iter()
        .zip(times.iter())
        .filter(|(id, t)| !id.trim().is_empty() && is_valid_time(t))
        .map(|(id, t)| (id.trim(), t.as_str()))
        .collect();
    pairs.sort_by(|a, b| a.1.cmp(b.1));
    let mut rewarded: Vec<String> = Vec::new();
    for (id, _) in pairs.into_iter().take(reward_count) {
        if !rewarded.iter().any(|r| r == id) {
            rewarded.push(id.to_string());
        }
    }
    rewarded
}

/// Scores one file and records it in the registry. Returns the number of
/// rewarded identifiers.
///
/// The caller is responsible for not applying the same file twice; see
/// [`plan_ingestion`].
pub fn apply_ingest(
    doc: &mut LedgerDocument,
    identifiers: &[String],
    times: &[String],
    file_name: &str,
    weight: &Weight,
    config: &ScoringConfig,
    timestamp: &str,
) -> LedgerResult<usize> {
    ensure!(
        times.is_empty() || times.len() == identifiers.len(),
        LengthMismatchSnafu {
            what: "times",
            identifiers: identifiers.len(),
            actual: times.len(),
        }
    );
    let weights = weight.per_row(identifiers.len())?;
    let rewarded = if config.reward_count > 0 && times.iter().any(|t| is_valid_time(t)) {
        select_rewarded(identifiers, times, config.reward_count)
    } else {
        Vec::new()
    };
    if !rewarded.is_empty() {
        info!("apply_ingest: {}: rewarded {:?}", file_name, rewarded);
    }
    let rewarded_set: HashSet<&str> = rewarded.iter().map(|s| s.as_str()).collect();

    let mut total_points = 0.0;
    for (identifier, w) in identifiers.iter().zip(weights.iter()) {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            continue;
        }
        let basic_points = config.base_score * (*w as f64);
        let is_rewarded = rewarded_set.contains(identifier);
        let points = if is_rewarded {
            config.reward_multiplier * basic_points
        } else {
            basic_points
        };
        total_points += points;
        let participant = doc.participants.entry(identifier.to_string()).or_default();
        participant.contributions.push(ContributionRecord {
            file_name: file_name.to_string(),
            timestamp: timestamp.to_string(),
            weight: *w,
            base_score: config.base_score,
            points,
            is_rewarded,
        });
        participant.score += points;
    }

    doc.processed_files.insert(
        file_name.to_string(),
        FileIngestRecord {
            processed_date: timestamp.to_string(),
            participant_count: identifiers.len(),
            weight: weight.file_weight(),
            weights,
            base_score: config.base_score,
            total_points,
            reward_count: config.reward_count,
            reward_multiplier: config.reward_multiplier,
            rewarded_identifiers: rewarded.clone(),
        },
    );
    debug!(
        "apply_ingest: {}: {} rows, {} points",
        file_name,
        identifiers.len(),
        total_points
    );
    Ok(rewarded.len())
}

/// Shifts the scores of an already processed file to a new uniform weight.
///
/// Each identifier gains `(new - old) * base score` on its contributions for
/// the file. The old weight and base score come from the registry (1 when
/// the file is unknown). Identifiers without a contribution for the file
/// receive a fresh one worth `base score * new`. Exact only when the file
/// was scored with a uniform weight and no reward.
pub fn apply_weight_change(
    doc: &mut LedgerDocument,
    identifiers: &[String],
    file_name: &str,
    new_weight: u32,
    timestamp: &str,
) {
    let previous = doc.processed_files.get(file_name).cloned();
    let old_weight = previous.as_ref().map(|r| r.weight.as_f64()).unwrap_or(1.0);
    let base_score = previous.as_ref().map(|r| r.base_score).unwrap_or(1.0);
    let delta = (new_weight as f64 - old_weight) * base_score;
    info!(
        "apply_weight_change: {}: weight {} -> {} ({:+} per row)",
        file_name, old_weight, new_weight, delta
    );

    let mut seen: HashSet<&str> = HashSet::new();
    for identifier in identifiers.iter().map(|s| s.trim()) {
        if identifier.is_empty() || !seen.insert(identifier) {
            continue;
        }
        let participant = doc.participants.entry(identifier.to_string()).or_default();
        let mut matched = false;
        for c in participant
            .contributions
            .iter_mut()
            .filter(|c| c.file_name == file_name)
        {
            c.points += delta;
            c.weight = new_weight;
            c.timestamp = timestamp.to_string();
            matched = true;
        }
        if !matched {
            participant.contributions.push(ContributionRecord {
                file_name: file_name.to_string(),
                timestamp: timestamp.to_string(),
                weight: new_weight,
                base_score,
                points: base_score * new_weight as f64,
                is_rewarded: false,
            });
        }
        participant.recompute_score();
    }

    let total_points = file_points(doc, file_name);
    let record = FileIngestRecord {
        processed_date: timestamp.to_string(),
        participant_count: identifiers.len(),
        weight: FileWeight::Uniform(new_weight),
        weights: vec![new_weight; identifiers.len()],
        base_score,
        total_points,
        reward_count: previous.as_ref().map(|r| r.reward_count).unwrap_or(0),
        reward_multiplier: previous
            .as_ref()
            .map(|r| r.reward_multiplier)
            .unwrap_or(ScoringConfig::DEFAULT.reward_multiplier),
        rewarded_identifiers: previous
            .map(|r| r.rewarded_identifiers)
            .unwrap_or_default(),
    };
    doc.processed_files.insert(file_name.to_string(), record);
}

fn file_points(doc: &LedgerDocument, file_name: &str) -> f64 {
    doc.participants
        .values()
        .flat_map(|p| p.contributions.iter())
        .filter(|c| c.file_name == file_name)
        .map(|c| c.points)
        .sum()
}

/// Removes every contribution of a file and its registry entry. Returns the
/// number of contributions removed.
pub fn revoke_file(doc: &mut LedgerDocument, file_name: &str) -> usize {
    let mut removed = 0;
    for participant in doc.participants.values_mut() {
        let before = participant.contributions.len();
        participant.contributions.retain(|c| c.file_name != file_name);
        if participant.contributions.len() != before {
            removed += before - participant.contributions.len();
            participant.recompute_score();
        }
    }
    doc.participants.retain(|_, p| !p.contributions.is_empty());
    doc.processed_files.remove(file_name);
    debug!("revoke_file: {}: {} contributions removed", file_name, removed);
    removed
}

/// Folds the `sources` participants into `target`.
///
/// Returns false, leaving the document untouched, when the target is blank
/// or none of the sources exists.
pub fn merge_into(doc: &mut LedgerDocument, sources: &[String], target: &str) -> bool {
    let target = target.trim();
    if target.is_empty() {
        return false;
    }
    let mut names: Vec<String> = Vec::new();
    for source in sources.iter().map(|s| s.trim()) {
        if !source.is_empty()
            && source != target
            && doc.participants.contains_key(source)
            && !names.iter().any(|n| n == source)
        {
            names.push(source.to_string());
        }
    }
    if names.is_empty() {
        return false;
    }
    // The merged record takes the earliest place among the merged names.
    let position = std::iter::once(target)
        .chain(names.iter().map(|s| s.as_str()))
        .filter_map(|n| doc.participants.get_index_of(n))
        .min()
        .unwrap_or(0);
    let mut merged = doc.participants.shift_remove(target).unwrap_or_default();
    for name in names.iter() {
        if let Some(record) = doc.participants.shift_remove(name) {
            merged.contributions.extend(record.contributions);
        }
    }
    merged.recompute_score();
    let position = position.min(doc.participants.len());
    doc.participants
        .shift_insert(position, target.to_string(), merged);

    for record in doc.processed_files.values_mut() {
        let mut renamed: Vec<String> = Vec::new();
        for id in record.rewarded_identifiers.drain(..) {
            let id = if names.contains(&id) { target.to_string() } else { id };
            if !renamed.contains(&id) {
                renamed.push(id);
            }
        }
        record.rewarded_identifiers = renamed;
    }
    info!("merge_into: {:?} -> {}", names, target);
    true
}

/// Decides how a file should be applied to the ledger.
pub fn plan_ingestion(
    doc: &LedgerDocument,
    file_name: &str,
    weight: &Weight,
    config: &ScoringConfig,
) -> IngestPlan {
    let record = match doc.processed_files.get(file_name) {
        Some(r) => r,
        None => return IngestPlan::New,
    };
    if !config.matches(record) {
        return IngestPlan::Rescore;
    }
    let recorded_uniform = match record.weight {
        FileWeight::Uniform(w) if record.weights.iter().all(|x| *x == w) => Some(w),
        _ => None,
    };
    match (weight.clone().simplified(), recorded_uniform) {
        (Weight::Uniform(new), Some(old)) if new == old => IngestPlan::Skip,
        (Weight::Uniform(new), Some(old)) if record.rewarded_identifiers.is_empty() => {
            IngestPlan::AdjustWeight { old, new }
        }
        (Weight::PerRow(ws), _) if ws == record.weights => IngestPlan::Skip,
        _ => IngestPlan::Rescore,
    }
}

/// Participants by decreasing score. Equal scores keep the order in which
/// the participants first appeared.
pub fn leaderboard_of(doc: &LedgerDocument) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = doc
        .participants
        .iter()
        .map(|(identifier, record)| LeaderboardEntry {
            identifier: identifier.clone(),
            score: record.score,
            participation_count: record.participation_count(),
        })
        .collect();
    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    entries
}

pub fn statistics_of(doc: &LedgerDocument) -> Statistics {
    Statistics {
        participant_count: doc.participants.len(),
        files_processed_count: doc.processed_files.len(),
        last_updated: doc.last_updated.clone(),
        total_score: doc.total_score(),
    }
}

/// The registry, most recently processed first.
pub fn processed_files_of(doc: &LedgerDocument) -> Vec<ProcessedFile> {
    let mut files: Vec<ProcessedFile> = doc
        .processed_files
        .iter()
        .map(|(name, record)| ProcessedFile {
            file_name: name.clone(),
            record: record.clone(),
        })
        .collect();
    files.sort_by(|a, b| b.record.processed_date.cmp(&a.record.processed_date));
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn conserved(doc: &LedgerDocument) -> bool {
        doc.participants
            .values()
            .all(|p| p.score == p.contributions.iter().map(|c| c.points).sum::<f64>())
    }

    #[test]
    fn rewards_the_earliest_rows() {
        let ids = names(&["A", "B", "C", "D"]);
        let times = names(&["09:03", "09:01", "", "09:02"]);
        assert_eq!(select_rewarded(&ids, &times, 2), names(&["B", "D"]));
        assert_eq!(select_rewarded(&ids, &times, 10), names(&["B", "D", "A"]));
        assert!(select_rewarded(&ids, &names(&["nan", "NaT", "", "None"]), 2).is_empty());
    }

    #[test]
    fn reward_multiplies_points() {
        let mut doc = LedgerDocument::new();
        let config = ScoringConfig {
            base_score: 2.0,
            reward_count: 1,
            reward_multiplier: 1.5,
        };
        let ids = names(&["A", "B"]);
        let times = names(&["2024-01-01 09:05:00", "2024-01-01 09:00:00"]);
        let n = apply_ingest(&mut doc, &ids, &times, "d1.xlsx", &Weight::Uniform(2), &config, "t").unwrap();
        assert_eq!(n, 1);
        assert_eq!(doc.participants["B"].score, 6.0);
        assert_eq!(doc.participants["A"].score, 4.0);
        assert!(doc.participants["B"].contributions[0].is_rewarded);
        let record = &doc.processed_files["d1.xlsx"];
        assert_eq!(record.total_points, 10.0);
        assert_eq!(record.rewarded_identifiers, names(&["B"]));
        assert_eq!(record.weights, vec![2, 2]);
    }

    #[test]
    fn no_reward_without_times() {
        let mut doc = LedgerDocument::new();
        let config = ScoringConfig {
            reward_count: 3,
            ..ScoringConfig::DEFAULT
        };
        let n = apply_ingest(&mut doc, &names(&["A"]), &[], "d.xlsx", &Weight::Uniform(1), &config, "t").unwrap();
        assert_eq!(n, 0);
        assert_eq!(doc.participants["A"].score, 1.0);
    }

    #[test]
    fn length_mismatches_are_rejected() {
        let mut doc = LedgerDocument::new();
        let config = ScoringConfig::DEFAULT;
        let res = apply_ingest(&mut doc, &names(&["A", "B"]), &names(&["t"]), "d.xlsx", &Weight::Uniform(1), &config, "t");
        assert!(matches!(res, Err(LedgerError::LengthMismatch { what: "times", .. })));
        let res = apply_ingest(&mut doc, &names(&["A", "B"]), &[], "d.xlsx", &Weight::PerRow(vec![1]), &config, "t");
        assert!(matches!(res, Err(LedgerError::LengthMismatch { what: "weights", .. })));
        assert!(doc.participants.is_empty());
        assert!(doc.processed_files.is_empty());
    }

    #[test]
    fn weight_change_shifts_scores() {
        let mut doc = LedgerDocument::new();
        let config = ScoringConfig::DEFAULT;
        apply_ingest(&mut doc, &names(&["A", "B"]), &[], "d.xlsx", &Weight::Uniform(1), &config, "t").unwrap();
        apply_weight_change(&mut doc, &names(&["A", "B", "C", "A"]), "d.xlsx", 3, "t2");
        assert_eq!(doc.participants["A"].score, 3.0);
        assert_eq!(doc.participants["A"].contributions.len(), 1);
        assert_eq!(doc.participants["A"].contributions[0].weight, 3);
        assert_eq!(doc.participants["C"].score, 3.0);
        let record = &doc.processed_files["d.xlsx"];
        assert_eq!(record.weight, FileWeight::Uniform(3));
        assert_eq!(record.total_points, 9.0);
        assert!(conserved(&doc));
    }

    #[test]
    fn revoke_removes_the_file_entirely() {
        let mut doc = LedgerDocument::new();
        let config = ScoringConfig::DEFAULT;
        apply_ingest(&mut doc, &names(&["A", "B"]), &[], "d1.xlsx", &Weight::Uniform(1), &config, "t").unwrap();
        apply_ingest(&mut doc, &names(&["A"]), &[], "d2.xlsx", &Weight::Uniform(2), &config, "t").unwrap();
        assert_eq!(revoke_file(&mut doc, "d1.xlsx"), 2);
        assert_eq!(doc.participants["A"].score, 2.0);
        assert!(!doc.participants.contains_key("B"));
        assert!(!doc.processed_files.contains_key("d1.xlsx"));
        assert!(conserved(&doc));
    }

    #[test]
    fn plans_follow_the_registry() {
        let mut doc = LedgerDocument::new();
        let config = ScoringConfig::DEFAULT;
        let w1 = Weight::Uniform(1);
        assert_eq!(plan_ingestion(&doc, "d.xlsx", &w1, &config), IngestPlan::New);
        apply_ingest(&mut doc, &names(&["A", "B"]), &[], "d.xlsx", &w1, &config, "t").unwrap();
        assert_eq!(plan_ingestion(&doc, "d.xlsx", &w1, &config), IngestPlan::Skip);
        assert_eq!(
            plan_ingestion(&doc, "d.xlsx", &Weight::Uniform(2), &config),
            IngestPlan::AdjustWeight { old: 1, new: 2 }
        );
        assert_eq!(
            plan_ingestion(&doc, "d.xlsx", &Weight::PerRow(vec![1, 1]), &config),
            IngestPlan::Skip
        );
        assert_eq!(
            plan_ingestion(&doc, "d.xlsx", &Weight::PerRow(vec![1, 2]), &config),
            IngestPlan::Rescore
        );
        let other = ScoringConfig {
            base_score: 2.0,
            ..config
        };
        assert_eq!(plan_ingestion(&doc, "d.xlsx", &w1, &other), IngestPlan::Rescore);
    }

    #[test]
    fn rewarded_files_are_rescored_on_weight_change() {
        let mut doc = LedgerDocument::new();
        let config = ScoringConfig {
            reward_count: 1,
            ..ScoringConfig::DEFAULT
        };
        apply_ingest(&mut doc, &names(&["A"]), &names(&["09:00"]), "d.xlsx", &Weight::Uniform(1), &config, "t").unwrap();
        assert_eq!(
            plan_ingestion(&doc, "d.xlsx", &Weight::Uniform(2), &config),
            IngestPlan::Rescore
        );
    }

    #[test]
    fn leaderboard_is_stable_and_counts_distinct_files() {
        let mut doc = LedgerDocument::new();
        let config = ScoringConfig::DEFAULT;
        apply_ingest(&mut doc, &names(&["B", "A", "C", "C"]), &[], "d1.xlsx", &Weight::Uniform(1), &config, "t").unwrap();
        apply_ingest(&mut doc, &names(&["C"]), &[], "d2.xlsx", &Weight::Uniform(1), &config, "t").unwrap();
        let board = leaderboard_of(&doc);
        let order: Vec<&str> = board.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(order, vec!["C", "B", "A"]);
        assert_eq!(board[0].score, 3.0);
        assert_eq!(board[0].participation_count, 2);
        assert!(board.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn ties_keep_first_appearance_order() {
        let mut doc = LedgerDocument::new();
        let config = ScoringConfig::DEFAULT;
        apply_ingest(&mut doc, &names(&["Zoe", "Bob", "Alice"]), &[], "d1.xlsx", &Weight::Uniform(1), &config, "t").unwrap();
        apply_ingest(&mut doc, &names(&["Carl", "Bob"]), &[], "d2.xlsx", &Weight::Uniform(1), &config, "t").unwrap();
        let order: Vec<String> = leaderboard_of(&doc).into_iter().map(|e| e.identifier).collect();
        assert_eq!(order, names(&["Bob", "Zoe", "Alice", "Carl"]));

        revoke_file(&mut doc, "d2.xlsx");
        let order: Vec<String> = leaderboard_of(&doc).into_iter().map(|e| e.identifier).collect();
        assert_eq!(order, names(&["Zoe", "Bob", "Alice"]));
    }

    #[test]
    fn merged_record_takes_the_earliest_place() {
        let mut doc = LedgerDocument::new();
        let config = ScoringConfig::DEFAULT;
        apply_ingest(&mut doc, &names(&["Zed", "alicee", "Bob", "Alice"]), &[], "d.xlsx", &Weight::Uniform(1), &config, "t").unwrap();
        assert!(merge_into(&mut doc, &names(&["alicee"]), "Alice"));
        let keys: Vec<&str> = doc.participants.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["Zed", "Alice", "Bob"]);
        let order: Vec<String> = leaderboard_of(&doc).into_iter().map(|e| e.identifier).collect();
        assert_eq!(order, names(&["Alice", "Zed", "Bob"]));
    }

    #[test]
    fn merge_sums_and_removes_sources() {
        let mut doc = LedgerDocument::new();
        let config = ScoringConfig::DEFAULT;
        apply_ingest(&mut doc, &names(&["Alice", "Alicee", "alice", "Bob"]), &[], "d.xlsx", &Weight::Uniform(1), &config, "t").unwrap();
        assert!(merge_into(&mut doc, &names(&["Alicee", "alice "]), "Alice"));
        assert_eq!(doc.participants["Alice"].score, 3.0);
        assert!(!doc.participants.contains_key("Alicee"));
        assert!(!doc.participants.contains_key("alice"));
        assert!(!merge_into(&mut doc, &names(&["Nobody"]), "Alice"));
        assert!(!merge_into(&mut doc, &names(&["Bob"]), "  "));
        assert!(doc.participants.contains_key("Bob"));
    }

    #[test]
    fn statistics_count_the_registry() {
        let mut doc = LedgerDocument::new();
        let config = ScoringConfig::DEFAULT;
        apply_ingest(&mut doc, &names(&["A"]), &[], "d1.xlsx", &Weight::Uniform(2), &config, "2024-01-01").unwrap();
        apply_ingest(&mut doc, &names(&["A", "B"]), &[], "d2.xlsx", &Weight::Uniform(1), &config, "2024-01-02").unwrap();
        let stats = statistics_of(&doc);
        assert_eq!(stats.participant_count, 2);
        assert_eq!(stats.files_processed_count, 2);
        assert_eq!(stats.total_score, 4.0);
        let files = processed_files_of(&doc);
        assert_eq!(files[0].file_name, "d2.xlsx");
        assert_eq!(files[1].file_name, "d1.xlsx");
    }
}
