//! The scoring ledger of one session and the storage seam behind it.

use log::{debug, info, warn};

use crate::config::{ScoringConfig, Weight};
use crate::document::*;
use crate::error::*;
use crate::extract::Extraction;
use crate::scoring::*;

/// Durable storage for the ledger document of one session.
pub trait LedgerStore {
    fn session_id(&self) -> &str;

    /// The stored document, or `None` when nothing was saved yet.
    fn load(&self) -> LedgerResult<Option<LedgerDocument>>;

    fn save(&mut self, doc: &LedgerDocument) -> LedgerResult<()>;

    /// Writes a snapshot of `doc` next to the document and returns a handle
    /// to it.
    fn backup(&mut self, doc: &LedgerDocument) -> LedgerResult<String>;
}

/// Keeps the serialized document in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    session_id: String,
    text: Option<String>,
    backups: Vec<String>,
}

impl MemoryStore {
    pub fn new(session_id: &str) -> MemoryStore {
        MemoryStore {
            session_id: session_id.to_string(),
            text: None,
            backups: Vec::new(),
        }
    }

    /// A store whose document is the given text, valid or not.
    pub fn with_text(session_id: &str, text: &str) -> MemoryStore {
        MemoryStore {
            text: Some(text.to_string()),
            ..MemoryStore::new(session_id)
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn backups(&self) -> &[String] {
        &self.backups
    }
}

impl LedgerStore for MemoryStore {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn load(&self) -> LedgerResult<Option<LedgerDocument>> {
        self.text.as_deref().map(load_document_str).transpose()
    }

    fn save(&mut self, doc: &LedgerDocument) -> LedgerResult<()> {
        self.text = Some(doc.to_pretty_json()?);
        Ok(())
    }

    fn backup(&mut self, doc: &LedgerDocument) -> LedgerResult<String> {
        self.backups.push(doc.to_pretty_json()?);
        Ok(format!("memory:{}:{}", self.session_id, self.backups.len()))
    }
}

/// What [`ScoringLedger::apply`] did with a file.
#[derive(PartialEq, Debug, Clone)]
pub enum IngestOutcome {
    Ingested { rewarded: usize },
    Skipped,
    WeightAdjusted { old: u32, new: u32 },
    Rescored { rewarded: usize },
}

#[derive(PartialEq, Debug, Clone)]
pub struct ImportSummary {
    pub participant_count: usize,
    pub file_count: usize,
    /// Handle of the backup taken before the import.
    pub backup: String,
}

/// Every mutating call loads the whole document, changes it and saves it.
pub struct ScoringLedger<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> ScoringLedger<S> {
    pub fn new(store: S) -> ScoringLedger<S> {
        ScoringLedger { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn session_id(&self) -> &str {
        self.store.session_id()
    }

    /// The current document. A missing or unreadable one is replaced by an
    /// empty document.
    pub fn document(&self) -> LedgerDocument {
        match self.store.load() {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                debug!("document: no ledger yet for session {}", self.session_id());
                LedgerDocument::new()
            }
            Err(e) => {
                warn!(
                    "Ledger of session {} could not be read, starting from an empty one: {}",
                    self.session_id(),
                    e
                );
                LedgerDocument::new()
            }
        }
    }

    fn save(&mut self, doc: &mut LedgerDocument) -> LedgerResult<()> {
        doc.last_updated = now_iso();
        self.store.save(doc)
    }

    pub fn is_file_processed(&self, file_name: &str) -> bool {
        self.document().processed_files.contains_key(file_name)
    }

    pub fn plan(&self, file_name: &str, weight: &Weight, config: &ScoringConfig) -> IngestPlan {
        let plan = plan_ingestion(&self.document(), file_name, weight, config);
        debug!("plan: {}: {:?}", file_name, plan);
        plan
    }

    /// Scores a file. Returns the number of rewarded identifiers.
    ///
    /// Calling it twice for the same file counts the file twice; use
    /// [`ScoringLedger::plan`] and [`ScoringLedger::apply`] for re-submitted
    /// files.
    pub fn ingest(
        &mut self,
        identifiers: &[String],
        times: &[String],
        file_name: &str,
        weight: &Weight,
        config: &ScoringConfig,
    ) -> LedgerResult<usize> {
        let mut doc = self.document();
        let rewarded = apply_ingest(
            &mut doc,
            identifiers,
            times,
            file_name,
            weight,
            config,
            &now_iso(),
        )?;
        self.save(&mut doc)?;
        Ok(rewarded)
    }

    /// Moves an already processed file to a new uniform weight.
    ///
    /// Each named participant gains `(new_weight - old_weight) * base_score`,
    /// the base score being the one recorded for the file. With the default
    /// base score of 1 this is the plain weight difference.
    pub fn update_on_weight_change(
        &mut self,
        identifiers: &[String],
        file_name: &str,
        new_weight: u32,
    ) -> LedgerResult<()> {
        let mut doc = self.document();
        apply_weight_change(&mut doc, identifiers, file_name, new_weight, &now_iso());
        self.save(&mut doc)
    }

    /// Revokes the previous scoring of a file and scores it again.
    pub fn reingest(
        &mut self,
        identifiers: &[String],
        times: &[String],
        file_name: &str,
        weight: &Weight,
        config: &ScoringConfig,
    ) -> LedgerResult<usize> {
        let mut doc = self.document();
        revoke_file(&mut doc, file_name);
        let rewarded = apply_ingest(
            &mut doc,
            identifiers,
            times,
            file_name,
            weight,
            config,
            &now_iso(),
        )?;
        self.save(&mut doc)?;
        Ok(rewarded)
    }

    /// Carries out a plan for an extracted file.
    pub fn apply(
        &mut self,
        plan: &IngestPlan,
        extraction: &Extraction,
        weight: &Weight,
        config: &ScoringConfig,
    ) -> LedgerResult<IngestOutcome> {
        let file_name = extraction.file_name.as_str();
        match plan {
            IngestPlan::New => {
                let rewarded = self.ingest(
                    &extraction.identifiers,
                    &extraction.times,
                    file_name,
                    weight,
                    config,
                )?;
                Ok(IngestOutcome::Ingested { rewarded })
            }
            IngestPlan::Skip => {
                info!("{} was already processed with the same weight, skipped", file_name);
                Ok(IngestOutcome::Skipped)
            }
            IngestPlan::AdjustWeight { old, new } => {
                self.update_on_weight_change(&extraction.identifiers, file_name, *new)?;
                Ok(IngestOutcome::WeightAdjusted {
                    old: *old,
                    new: *new,
                })
            }
            IngestPlan::Rescore => {
                let rewarded = self.reingest(
                    &extraction.identifiers,
                    &extraction.times,
                    file_name,
                    weight,
                    config,
                )?;
                Ok(IngestOutcome::Rescored { rewarded })
            }
        }
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        leaderboard_of(&self.document())
    }

    pub fn statistics(&self) -> Statistics {
        statistics_of(&self.document())
    }

    pub fn processed_files(&self) -> Vec<ProcessedFile> {
        processed_files_of(&self.document())
    }

    pub fn backup(&mut self) -> LedgerResult<String> {
        let doc = self.document();
        let handle = self.store.backup(&doc)?;
        info!("Backup of session {} written to {}", self.session_id(), handle);
        Ok(handle)
    }

    /// The document as JSON, with `exportedAt` and `sessionId`.
    pub fn export_document(&self) -> LedgerResult<String> {
        self.document()
            .to_export_json(self.session_id(), &now_iso())
    }

    /// Replaces the document with an imported one, after a backup of the
    /// current one. Nothing is written when the text is not a valid ledger.
    pub fn import_document(&mut self, text: &str) -> LedgerResult<ImportSummary> {
        let mut imported = load_document_str(text)?;
        let backup = self.backup()?;
        self.save(&mut imported)?;
        Ok(ImportSummary {
            participant_count: imported.participants.len(),
            file_count: imported.processed_files.len(),
            backup,
        })
    }

    /// Folds participants into `target`. Returns false when nothing was merged.
    pub fn merge_identifiers(&mut self, sources: &[String], target: &str) -> LedgerResult<bool> {
        let mut doc = self.document();
        if !merge_into(&mut doc, sources, target) {
            return Ok(false);
        }
        self.save(&mut doc)?;
        Ok(true)
    }

    /// Empties the ledger after a backup. Returns the backup handle.
    pub fn clear(&mut self) -> LedgerResult<String> {
        let backup = self.backup()?;
        self.save(&mut LedgerDocument::new())?;
        info!("Ledger of session {} cleared", self.session_id());
        Ok(backup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ColumnRef;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn ledger() -> ScoringLedger<MemoryStore> {
        init();
        ScoringLedger::new(MemoryStore::new("test_1"))
    }

    fn extraction(file_name: &str, ids: &[&str], times: &[&str]) -> Extraction {
        Extraction {
            file_name: file_name.to_string(),
            identifiers: names(ids),
            times: names(times),
            weights: vec![1; ids.len()],
            identifier_column: ColumnRef {
                index: 1,
                name: "昵称".to_string(),
            },
            time_column: None,
            header_row: 0,
            has_image_columns: false,
            dropped_rows: 0,
            duplicate_rows: 0,
        }
    }

    fn assert_conserved(ledger: &ScoringLedger<MemoryStore>) {
        for (name, p) in ledger.document().participants.iter() {
            let sum: f64 = p.contributions.iter().map(|c| c.points).sum();
            assert_eq!(p.score, sum, "score of {}", name);
        }
    }

    #[test]
    fn unchanged_resubmission_is_skipped() {
        let mut ledger = ledger();
        let config = ScoringConfig::DEFAULT;
        let ex = extraction("day1.xlsx", &["Alice", "Bob"], &["", ""]);
        let w = Weight::Uniform(2);
        for expected in [IngestOutcome::Ingested { rewarded: 0 }, IngestOutcome::Skipped] {
            let plan = ledger.plan(&ex.file_name, &w, &config);
            assert_eq!(ledger.apply(&plan, &ex, &w, &config).unwrap(), expected);
        }
        assert!(ledger.is_file_processed("day1.xlsx"));
        assert_eq!(ledger.document().participants["Alice"].score, 2.0);
        assert_eq!(ledger.statistics().files_processed_count, 1);
    }

    #[test]
    fn weight_change_goes_through_adjustment() {
        let mut ledger = ledger();
        let config = ScoringConfig::DEFAULT;
        let ex = extraction("day1.xlsx", &["Alice", "Bob"], &[]);
        let plan = ledger.plan("day1.xlsx", &Weight::Uniform(1), &config);
        ledger.apply(&plan, &ex, &Weight::Uniform(1), &config).unwrap();
        let plan = ledger.plan("day1.xlsx", &Weight::Uniform(3), &config);
        assert_eq!(
            ledger.apply(&plan, &ex, &Weight::Uniform(3), &config).unwrap(),
            IngestOutcome::WeightAdjusted { old: 1, new: 3 }
        );
        assert_eq!(ledger.document().participants["Bob"].score, 3.0);
        assert_conserved(&ledger);
    }

    #[test]
    fn rescore_replaces_previous_contributions() {
        let mut ledger = ledger();
        let config = ScoringConfig::DEFAULT;
        let ex = extraction("day1.xlsx", &["Alice", "Bob"], &[]);
        ledger
            .ingest(&ex.identifiers, &ex.times, "day1.xlsx", &Weight::PerRow(vec![1, 2]), &config)
            .unwrap();
        let w = Weight::PerRow(vec![3, 1]);
        let plan = ledger.plan("day1.xlsx", &w, &config);
        assert_eq!(plan, IngestPlan::Rescore);
        ledger.apply(&plan, &ex, &w, &config).unwrap();
        let doc = ledger.document();
        assert_eq!(doc.participants["Alice"].score, 3.0);
        assert_eq!(doc.participants["Alice"].contributions.len(), 1);
        assert_eq!(doc.participants["Bob"].score, 1.0);
        assert_eq!(doc.processed_files["day1.xlsx"].weight, FileWeight::Average(2.0));
        assert_conserved(&ledger);
    }

    #[test]
    fn score_is_conserved_across_operations() {
        let mut ledger = ledger();
        let config = ScoringConfig {
            base_score: 1.5,
            reward_count: 2,
            reward_multiplier: 2.0,
        };
        ledger
            .ingest(
                &names(&["A", "B", "C"]),
                &names(&["10:02", "10:01", "10:00"]),
                "d1.xlsx",
                &Weight::PerRow(vec![1, 2, 3]),
                &config,
            )
            .unwrap();
        assert_conserved(&ledger);
        ledger
            .ingest(&names(&["A", "D"]), &[], "d2.xlsx", &Weight::Uniform(1), &ScoringConfig::DEFAULT)
            .unwrap();
        ledger.update_on_weight_change(&names(&["A", "D", "E"]), "d2.xlsx", 4).unwrap();
        assert_conserved(&ledger);
        ledger.merge_identifiers(&names(&["D", "E"]), "A").unwrap();
        assert_conserved(&ledger);
        ledger
            .reingest(&names(&["B"]), &[], "d1.xlsx", &Weight::Uniform(1), &config)
            .unwrap();
        assert_conserved(&ledger);
    }

    #[test]
    fn earliest_identifiers_are_rewarded() {
        let mut ledger = ledger();
        let config = ScoringConfig {
            base_score: 1.0,
            reward_count: 2,
            reward_multiplier: 1.5,
        };
        let rewarded = ledger
            .ingest(
                &names(&["A", "B", "C", "D"]),
                &names(&[
                    "2024-01-01 08:03:00",
                    "2024-01-01 08:00:00",
                    "",
                    "2024-01-01 08:01:00",
                ]),
                "d.xlsx",
                &Weight::Uniform(2),
                &config,
            )
            .unwrap();
        assert_eq!(rewarded, 2);
        let doc = ledger.document();
        assert_eq!(doc.participants["B"].score, 3.0);
        assert_eq!(doc.participants["D"].score, 3.0);
        assert_eq!(doc.participants["A"].score, 2.0);
        assert_eq!(doc.participants["C"].score, 2.0);
    }

    #[test]
    fn leaderboard_orders_by_score() {
        let mut ledger = ledger();
        let config = ScoringConfig::DEFAULT;
        ledger
            .ingest(&names(&["Bob", "Alice", "Carol"]), &[], "d1.xlsx", &Weight::Uniform(1), &config)
            .unwrap();
        ledger
            .ingest(&names(&["Carol"]), &[], "d2.xlsx", &Weight::Uniform(1), &config)
            .unwrap();
        let board = ledger.leaderboard();
        let order: Vec<&str> = board.iter().map(|e| e.identifier.as_str()).collect();
        // Bob and Alice tie and keep the order they were first seen in,
        // across a save and a reload.
        assert_eq!(order, vec!["Carol", "Bob", "Alice"]);
        assert_eq!(board[0].participation_count, 2);
    }

    #[test]
    fn export_then_import_restores_the_ledger() {
        let mut ledger = ledger();
        let config = ScoringConfig {
            reward_count: 1,
            ..ScoringConfig::DEFAULT
        };
        ledger
            .ingest(&names(&["Alice", "Bob"]), &names(&["b", "a"]), "d1.xlsx", &Weight::PerRow(vec![1, 2]), &config)
            .unwrap();
        let exported = ledger.export_document().unwrap();
        let before = ledger.document();

        let mut other = ScoringLedger::new(MemoryStore::new("other_2"));
        let summary = other.import_document(&exported).unwrap();
        assert_eq!(summary.participant_count, 2);
        assert_eq!(summary.file_count, 1);
        assert_eq!(other.store().backups().len(), 1);
        let after = other.document();
        assert_eq!(after.participants, before.participants);
        assert_eq!(after.processed_files, before.processed_files);
    }

    #[test]
    fn invalid_import_keeps_the_current_document() {
        let mut ledger = ledger();
        ledger
            .ingest(&names(&["Alice"]), &[], "d1.xlsx", &Weight::Uniform(1), &ScoringConfig::DEFAULT)
            .unwrap();
        let res = ledger.import_document(r#"{"participants": {}}"#);
        assert!(matches!(res, Err(LedgerError::Format { .. })));
        assert!(ledger.store().backups().is_empty());
        assert!(ledger.is_file_processed("d1.xlsx"));
    }

    #[test]
    fn merge_combines_near_duplicates() {
        let mut ledger = ledger();
        let config = ScoringConfig::DEFAULT;
        ledger
            .ingest(&names(&["Alice", "Alicee"]), &[], "d1.xlsx", &Weight::Uniform(1), &config)
            .unwrap();
        ledger
            .ingest(&names(&["alice"]), &[], "d2.xlsx", &Weight::Uniform(2), &config)
            .unwrap();
        assert!(ledger
            .merge_identifiers(&names(&["Alicee", "alice "]), "Alice")
            .unwrap());
        let doc = ledger.document();
        assert_eq!(doc.participants["Alice"].score, 4.0);
        assert!(!doc.participants.contains_key("Alicee"));
        assert!(!doc.participants.contains_key("alice"));
        assert!(!ledger.merge_identifiers(&names(&["Zed"]), "Alice").unwrap());
        assert!(!ledger.merge_identifiers(&names(&["Alice"]), "").unwrap());
    }

    #[test]
    fn clear_backs_up_first() {
        let mut ledger = ledger();
        ledger
            .ingest(&names(&["Alice"]), &[], "d1.xlsx", &Weight::Uniform(1), &ScoringConfig::DEFAULT)
            .unwrap();
        let handle = ledger.clear().unwrap();
        assert_eq!(handle, "memory:test_1:1");
        assert!(ledger.store().backups()[0].contains("Alice"));
        assert_eq!(ledger.statistics().participant_count, 0);
        assert!(!ledger.is_file_processed("d1.xlsx"));
    }

    #[test]
    fn corrupt_documents_are_replaced() {
        init();
        let ledger = ScoringLedger::new(MemoryStore::with_text("s_1", "{ broken"));
        assert_eq!(ledger.statistics().participant_count, 0);
        let mut ledger = ledger;
        ledger
            .ingest(&names(&["A"]), &[], "d.xlsx", &Weight::Uniform(1), &ScoringConfig::DEFAULT)
            .unwrap();
        assert!(ledger.store().text().unwrap().contains("\"schemaVersion\": 3"));
    }

    #[test]
    fn saves_stamp_last_updated() {
        let mut ledger = ledger();
        ledger
            .ingest(&names(&["A"]), &[], "d.xlsx", &Weight::Uniform(1), &ScoringConfig::DEFAULT)
            .unwrap();
        let doc = ledger.document();
        assert!(!doc.last_updated.is_empty());
        assert!(doc.processed_files["d.xlsx"].processed_date <= doc.last_updated);
    }
}
