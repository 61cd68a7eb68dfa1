//! The persisted ledger document and the readers for its older shapes.

use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;
use snafu::prelude::*;
use std::collections::BTreeMap;

use crate::error::*;

/// Version written in every saved document.
pub const SCHEMA_VERSION: u32 = 3;

const CURRENT_REQUIRED: &[&str] = &["participants", "processedFiles", "lastUpdated"];
const LEGACY_SHARED_REQUIRED: &[&str] = &["records", "last_updated", "total_files_processed"];
const LEGACY_SPLIT_REQUIRED: &[&str] = &["records_by_nickname", "records_by_name", "last_updated"];

/// ISO-8601 local timestamp with microseconds.
pub fn now_iso() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// One scored row: what a file brought to a participant.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ContributionRecord {
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub timestamp: String,
    pub weight: u32,
    #[serde(rename = "baseScore")]
    pub base_score: f64,
    pub points: f64,
    #[serde(rename = "isRewarded")]
    pub is_rewarded: bool,
}

#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub score: f64,
    pub contributions: Vec<ContributionRecord>,
}

impl ParticipantRecord {
    /// Resets the score to the sum of the contribution points.
    pub fn recompute_score(&mut self) {
        self.score = self.contributions.iter().map(|c| c.points).sum();
    }

    /// Number of distinct files this participant appears in.
    pub fn participation_count(&self) -> usize {
        let mut names: Vec<&str> = self
            .contributions
            .iter()
            .map(|c| c.file_name.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    }
}

/// The file-level weight: an integer when it was uniform, otherwise the
/// average of the per-row weights.
#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileWeight {
    Uniform(u32),
    Average(f64),
}

impl FileWeight {
    pub fn as_f64(&self) -> f64 {
        match self {
            FileWeight::Uniform(w) => *w as f64,
            FileWeight::Average(w) => *w,
        }
    }
}

impl Default for FileWeight {
    fn default() -> Self {
        FileWeight::Uniform(1)
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct FileIngestRecord {
    #[serde(rename = "processedDate")]
    pub processed_date: String,
    #[serde(rename = "participantCount")]
    pub participant_count: usize,
    pub weight: FileWeight,
    pub weights: Vec<u32>,
    #[serde(rename = "baseScore")]
    pub base_score: f64,
    #[serde(rename = "totalPoints")]
    pub total_points: f64,
    #[serde(rename = "rewardCount")]
    pub reward_count: usize,
    #[serde(rename = "rewardMultiplier")]
    pub reward_multiplier: f64,
    #[serde(rename = "rewardedIdentifiers")]
    pub rewarded_identifiers: Vec<String>,
}

/// The full state of one session.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct LedgerDocument {
    #[serde(rename = "schemaVersion", default = "default_schema_version")]
    pub schema_version: u32,
    /// In order of first appearance; leaderboard ties keep this order.
    pub participants: IndexMap<String, ParticipantRecord>,
    #[serde(rename = "processedFiles")]
    pub processed_files: BTreeMap<String, FileIngestRecord>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: String,
}

impl LedgerDocument {
    pub fn new() -> LedgerDocument {
        LedgerDocument {
            schema_version: SCHEMA_VERSION,
            participants: IndexMap::new(),
            processed_files: BTreeMap::new(),
            last_updated: now_iso(),
        }
    }

    pub fn total_score(&self) -> f64 {
        self.participants.values().map(|p| p.score).sum()
    }

    pub fn to_pretty_json(&self) -> LedgerResult<String> {
        serde_json::to_string_pretty(self).context(InvalidDocumentSnafu)
    }

    /// The document with the `exportedAt` and `sessionId` fields added.
    pub fn to_export_json(&self, session_id: &str, exported_at: &str) -> LedgerResult<String> {
        let mut value = serde_json::to_value(self).context(InvalidDocumentSnafu)?;
        if let JSValue::Object(map) = &mut value {
            map.insert("exportedAt".to_string(), JSValue::from(exported_at));
            map.insert("sessionId".to_string(), JSValue::from(session_id));
        }
        serde_json::to_string_pretty(&value).context(InvalidDocumentSnafu)
    }
}

impl Default for LedgerDocument {
    fn default() -> Self {
        LedgerDocument::new()
    }
}

// ********* Legacy shapes ***********

fn one() -> f64 {
    1.0
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct LegacyContribution {
    pub file_name: String,
    #[serde(default)]
    pub date: String,
    #[serde(default = "one")]
    pub weight: f64,
    #[serde(default = "one")]
    pub base_score: f64,
    #[serde(default)]
    pub points: f64,
    #[serde(default)]
    pub is_rewarded: bool,
}

#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyRecord {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub files: Vec<LegacyContribution>,
}

/// Older file records: every field past the count is optional.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyFileRecord {
    #[serde(default)]
    pub processed_date: String,
    #[serde(default)]
    pub nicknames_count: usize,
    pub weight: Option<FileWeight>,
    pub weights: Option<Vec<u32>>,
    pub base_score: Option<f64>,
    pub total_points: Option<f64>,
    pub reward_count: Option<usize>,
    pub reward_multiplier: Option<f64>,
    pub rewarded_users: Option<Vec<String>>,
}

/// Single `records` map keyed by nickname.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct LegacySharedDocument {
    pub records: IndexMap<String, LegacyRecord>,
    #[serde(default)]
    pub processed_files: BTreeMap<String, LegacyFileRecord>,
    pub last_updated: String,
    #[serde(default)]
    pub total_files_processed: usize,
}

/// Records split between nicknames and names.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct LegacySplitDocument {
    pub records_by_nickname: IndexMap<String, LegacyRecord>,
    #[serde(default)]
    pub records_by_name: IndexMap<String, LegacyRecord>,
    #[serde(default)]
    pub processed_files: BTreeMap<String, LegacyFileRecord>,
    pub last_updated: String,
}

/// A ledger document as found on disk, in any of the shapes it has had.
#[derive(PartialEq, Debug, Clone)]
pub enum LedgerShape {
    LegacyShared(LegacySharedDocument),
    LegacySplit(LegacySplitDocument),
    Current(LedgerDocument),
}

fn check_fields(obj: &serde_json::Map<String, JSValue>, required: &[&str]) -> LedgerResult<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|f| !obj.contains_key(**f))
        .map(|f| f.to_string())
        .collect();
    ensure!(missing.is_empty(), FormatSnafu { missing });
    Ok(())
}

impl LedgerShape {
    /// Detects the shape of a decoded document and checks its required fields.
    pub fn from_value(value: JSValue) -> LedgerResult<LedgerShape> {
        let obj = match &value {
            JSValue::Object(obj) => obj,
            _ => {
                return FormatSnafu {
                    missing: CURRENT_REQUIRED.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                }
                .fail()
            }
        };
        if obj.contains_key("schemaVersion") || obj.contains_key("participants") {
            check_fields(obj, CURRENT_REQUIRED)?;
            let doc: LedgerDocument = serde_json::from_value(value).context(InvalidDocumentSnafu)?;
            Ok(LedgerShape::Current(doc))
        } else if obj.contains_key("records_by_nickname") || obj.contains_key("records_by_name") {
            check_fields(obj, LEGACY_SPLIT_REQUIRED)?;
            let doc: LegacySplitDocument =
                serde_json::from_value(value).context(InvalidDocumentSnafu)?;
            Ok(LedgerShape::LegacySplit(doc))
        } else if obj.contains_key("records") {
            check_fields(obj, LEGACY_SHARED_REQUIRED)?;
            let doc: LegacySharedDocument =
                serde_json::from_value(value).context(InvalidDocumentSnafu)?;
            Ok(LedgerShape::LegacyShared(doc))
        } else {
            check_fields(obj, CURRENT_REQUIRED)?;
            // All the current fields are present but none of the markers:
            // unreachable in practice, handled as the current shape.
            let doc: LedgerDocument = serde_json::from_value(value).context(InvalidDocumentSnafu)?;
            Ok(LedgerShape::Current(doc))
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            LedgerShape::LegacyShared(_) => 1,
            LedgerShape::LegacySplit(_) => 2,
            LedgerShape::Current(_) => SCHEMA_VERSION,
        }
    }

    /// Converts to the current shape. Scores of migrated participants are
    /// recomputed from their contributions.
    pub fn into_current(self) -> LedgerDocument {
        match self {
            LedgerShape::Current(doc) => doc,
            LedgerShape::LegacyShared(doc) => {
                info!(
                    "Migrating a legacy ledger with {} records ({} files counted)",
                    doc.records.len(),
                    doc.total_files_processed
                );
                LedgerDocument {
                    schema_version: SCHEMA_VERSION,
                    participants: migrate_records(doc.records),
                    processed_files: migrate_files(doc.processed_files),
                    last_updated: doc.last_updated,
                }
            }
            LedgerShape::LegacySplit(doc) => {
                info!(
                    "Migrating a split ledger with {} nicknames and {} names",
                    doc.records_by_nickname.len(),
                    doc.records_by_name.len()
                );
                let mut participants = migrate_records(doc.records_by_nickname);
                for (name, record) in migrate_records(doc.records_by_name) {
                    participants.entry(name).or_insert(record);
                }
                LedgerDocument {
                    schema_version: SCHEMA_VERSION,
                    participants,
                    processed_files: migrate_files(doc.processed_files),
                    last_updated: doc.last_updated,
                }
            }
        }
    }
}

fn migrate_records(records: IndexMap<String, LegacyRecord>) -> IndexMap<String, ParticipantRecord> {
    records
        .into_iter()
        .filter_map(|(name, record)| {
            let name = name.trim().to_string();
            if name.is_empty() {
                return None;
            }
            let mut participant = ParticipantRecord {
                score: 0.0,
                contributions: record
                    .files
                    .into_iter()
                    .map(|c| ContributionRecord {
                        file_name: c.file_name,
                        timestamp: c.date,
                        weight: c.weight.max(0.0).round() as u32,
                        base_score: c.base_score,
                        points: c.points,
                        is_rewarded: c.is_rewarded,
                    })
                    .collect(),
            };
            participant.recompute_score();
            if participant.score != record.score {
                debug!(
                    "migrate_records: {}: recorded score {} replaced by {}",
                    name, record.score, participant.score
                );
            }
            Some((name, participant))
        })
        .collect()
}

fn migrate_files(
    files: BTreeMap<String, LegacyFileRecord>,
) -> BTreeMap<String, FileIngestRecord> {
    files
        .into_iter()
        .map(|(name, f)| {
            let weight = f.weight.unwrap_or_default();
            let weights = match (f.weights, weight) {
                (Some(ws), _) => ws,
                (None, FileWeight::Uniform(w)) => vec![w; f.nicknames_count],
                (None, FileWeight::Average(_)) => Vec::new(),
            };
            let record = FileIngestRecord {
                processed_date: f.processed_date,
                participant_count: f.nicknames_count,
                weight,
                weights,
                base_score: f.base_score.unwrap_or(1.0),
                total_points: f.total_points.unwrap_or(f.nicknames_count as f64),
                reward_count: f.reward_count.unwrap_or(0),
                reward_multiplier: f.reward_multiplier.unwrap_or(1.0),
                rewarded_identifiers: f.rewarded_users.unwrap_or_default(),
            };
            (name, record)
        })
        .collect()
}

/// Decodes a ledger document of any known shape.
pub fn load_document_str(text: &str) -> LedgerResult<LedgerDocument> {
    let value: JSValue = serde_json::from_str(text).context(InvalidDocumentSnafu)?;
    let shape = LedgerShape::from_value(value)?;
    debug!("load_document_str: schema version {}", shape.version());
    Ok(shape.into_current())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_SHARED: &str = r#"{
        "records": {
            "Alice": {"score": 3.0, "files": [
                {"file_name": "day1.xlsx", "date": "2024-01-01T10:00:00", "weight": 1, "points": 1.0},
                {"file_name": "day2.xlsx", "date": "2024-01-02T10:00:00", "weight": 2, "base_score": 1.0, "points": 3.0, "is_rewarded": true}
            ]},
            "Bob": {"score": 1.0, "files": [
                {"file_name": "day1.xlsx", "date": "2024-01-01T10:00:00", "weight": 1, "points": 1.0}
            ]}
        },
        "processed_files": {
            "day1.xlsx": {"processed_date": "2024-01-01T10:00:00", "nicknames_count": 2, "weight": 1},
            "day2.xlsx": {"processed_date": "2024-01-02T10:00:00", "nicknames_count": 1, "weight": 2,
                          "weights": [2], "base_score": 1.0, "total_points": 3.0, "reward_count": 1,
                          "reward_multiplier": 1.5, "rewarded_users": ["Alice"]}
        },
        "last_updated": "2024-01-02T10:00:00",
        "total_files_processed": 2
    }"#;

    #[test]
    fn migrates_legacy_shared_documents() {
        let doc = load_document_str(LEGACY_SHARED).unwrap();
        assert_eq!(doc.schema_version, SCHEMA_VERSION);
        // Recomputed from contributions, not the stored 3.0.
        assert_eq!(doc.participants["Alice"].score, 4.0);
        assert_eq!(doc.participants["Alice"].participation_count(), 2);
        let day1 = &doc.processed_files["day1.xlsx"];
        assert_eq!(day1.weight, FileWeight::Uniform(1));
        assert_eq!(day1.weights, vec![1, 1]);
        assert_eq!(day1.total_points, 2.0);
        assert_eq!(day1.reward_multiplier, 1.0);
        let day2 = &doc.processed_files["day2.xlsx"];
        assert_eq!(day2.rewarded_identifiers, vec!["Alice".to_string()]);
        assert_eq!(doc.last_updated, "2024-01-02T10:00:00");
    }

    #[test]
    fn migrates_split_documents_preferring_nicknames() {
        let text = r#"{
            "records_by_nickname": {"Alice": {"score": 2.0, "files": [
                {"file_name": "a.xlsx", "weight": 2, "points": 2.0}]}},
            "records_by_name": {
                "Alice": {"score": 1.0, "files": [{"file_name": "a.xlsx", "points": 1.0}]},
                "张三": {"score": 1.0, "files": [{"file_name": "a.xlsx", "points": 1.0}]}
            },
            "last_updated": "2024-01-01T00:00:00"
        }"#;
        let doc = load_document_str(text).unwrap();
        assert_eq!(doc.participants.len(), 2);
        assert_eq!(doc.participants["Alice"].score, 2.0);
        assert_eq!(doc.participants["张三"].contributions[0].weight, 1);
    }

    #[test]
    fn missing_fields_are_reported() {
        let res = load_document_str(r#"{"records": {}, "last_updated": "x"}"#);
        match res {
            Err(LedgerError::Format { missing }) => {
                assert_eq!(missing, vec!["total_files_processed".to_string()])
            }
            other => panic!("unexpected {:?}", other),
        }
        let res = load_document_str(r#"{"participants": {}}"#);
        match res {
            Err(LedgerError::Format { missing }) => {
                assert_eq!(missing, vec!["processedFiles", "lastUpdated"])
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            load_document_str("[1, 2]"),
            Err(LedgerError::Format { .. })
        ));
        assert!(matches!(
            load_document_str("{not json"),
            Err(LedgerError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn current_documents_round_trip_with_export_fields() {
        let mut doc = LedgerDocument::new();
        doc.participants.insert(
            "Alice".to_string(),
            ParticipantRecord {
                score: 1.5,
                contributions: vec![ContributionRecord {
                    file_name: "a.xlsx".to_string(),
                    timestamp: now_iso(),
                    weight: 1,
                    base_score: 1.0,
                    points: 1.5,
                    is_rewarded: true,
                }],
            },
        );
        doc.processed_files.insert(
            "a.xlsx".to_string(),
            FileIngestRecord {
                processed_date: now_iso(),
                participant_count: 1,
                weight: FileWeight::Average(1.5),
                weights: vec![1, 2],
                base_score: 1.0,
                total_points: 1.5,
                reward_count: 1,
                reward_multiplier: 1.5,
                rewarded_identifiers: vec!["Alice".to_string()],
            },
        );
        let text = doc.to_export_json("abc_1", "2024-01-01T00:00:00").unwrap();
        assert!(text.contains("\"exportedAt\""));
        assert!(text.contains("\"sessionId\": \"abc_1\""));
        let back = load_document_str(&text).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn participant_order_survives_save_and_migration() {
        let mut doc = LedgerDocument::new();
        for name in ["Zoe", "Bob", "Alice"] {
            doc.participants
                .insert(name.to_string(), ParticipantRecord::default());
        }
        let back = load_document_str(&doc.to_pretty_json().unwrap()).unwrap();
        let names: Vec<&str> = back.participants.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["Zoe", "Bob", "Alice"]);

        let legacy = r#"{"records": {"Zoe": {"files": []}, "Amy": {"files": []}},
            "last_updated": "x", "total_files_processed": 0}"#;
        let doc = load_document_str(legacy).unwrap();
        let names: Vec<&str> = doc.participants.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["Zoe", "Amy"]);
    }

    #[test]
    fn file_weight_serializes_as_plain_number() {
        assert_eq!(serde_json::to_string(&FileWeight::Uniform(2)).unwrap(), "2");
        assert_eq!(serde_json::to_string(&FileWeight::Average(1.5)).unwrap(), "1.5");
        let w: FileWeight = serde_json::from_str("3").unwrap();
        assert_eq!(w, FileWeight::Uniform(3));
        let w: FileWeight = serde_json::from_str("2.5").unwrap();
        assert_eq!(w.as_f64(), 2.5);
    }
}
