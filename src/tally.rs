use log::{info, warn};

use checkin_ledger::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::{Path, PathBuf};

use crate::args::{Args, Command};
use crate::tally::batch::*;
use crate::tally::config_reader::*;
use crate::tally::io_common::*;
use crate::tally::session_store::*;

pub mod batch;
pub mod config_reader;
pub mod io_common;
pub mod session_store;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TallyError {
    #[snafu(display("Error opening file {path}"))]
    OpeningFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error writing file {path}"))]
    WritingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing the configuration file {path}"))]
    ParsingConfig {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Spreadsheet could not be processed"))]
    Spreadsheet { source: ExtractError },
    #[snafu(display("Ledger operation failed"))]
    Ledger { source: LedgerError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type TallyResult<T> = Result<T, TallyError>;

/// Runs one command of the command line.
pub fn run(args: &Args) -> TallyResult<()> {
    let config = match &args.config {
        Some(path) => read_config(path)?,
        None => TallyConfig::default(),
    };
    let settings = Settings::resolve(args, &config)?;
    info!("settings: {:?}", settings);

    let data_dir = PathBuf::from(&settings.data_directory);
    let removed = sweep_expired_sessions(&data_dir, settings.retention);
    if !removed.is_empty() {
        info!("{} expired session(s) removed", removed.len());
    }
    if let Some(id) = &settings.session_id {
        if was_swept(&removed, &data_dir, id) {
            warn!(
                "Session {} was idle for more than {} hours and has been removed; it starts over empty",
                id,
                settings.retention.num_hours()
            );
        }
    }

    match &args.command {
        Command::Sessions => return print_sessions(&data_dir),
        Command::Inspect { file } => return inspect_file(file),
        _ => {}
    }

    let session_id = match &settings.session_id {
        Some(id) => id.clone(),
        None => {
            let id = generate_session_id();
            eprintln!("New session: {}", id);
            id
        }
    };
    let store = FileLedgerStore::open(&data_dir, &session_id).context(LedgerSnafu)?;
    let mut ledger = ScoringLedger::new(store);

    match &args.command {
        Command::Ingest { files, .. } => {
            let report = process_files(&mut ledger, files, &settings)?;
            print_batch_report(&report);
            if report.files.iter().all(|f| f.status.is_failure()) {
                whatever!("No file could be processed");
            }
        }
        Command::Leaderboard { limit } => print_leaderboard(&ledger.leaderboard(), *limit),
        Command::Stats => print_statistics(&ledger.statistics()),
        Command::Files => print_processed_files(&ledger.processed_files()),
        Command::Export { out } => {
            let text = ledger.export_document().context(LedgerSnafu)?;
            match out {
                Some(path) if path != "stdout" => {
                    fs::write(path, text).context(WritingFileSnafu { path })?;
                    eprintln!("Ledger of session {} exported to {}", session_id, path);
                }
                _ => println!("{}", text),
            }
        }
        Command::Import { path } => {
            let text = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
            let summary = ledger.import_document(&text).context(LedgerSnafu)?;
            println!(
                "Imported {} participants and {} processed files (previous ledger saved to {})",
                summary.participant_count, summary.file_count, summary.backup
            );
        }
        Command::Merge { into, sources } => {
            if ledger
                .merge_identifiers(sources, into)
                .context(LedgerSnafu)?
            {
                println!("Merged {} into {}", sources.join(", "), into);
            } else {
                warn!("Nothing merged: sources {:?}, target {:?}", sources, into);
                println!("Nothing to merge: none of the given identifiers exist, or the target is empty");
            }
        }
        Command::Clear => {
            let backup = ledger.clear().context(LedgerSnafu)?;
            println!("Ledger cleared (backup saved to {})", backup);
        }
        Command::Backup => {
            let backup = ledger.backup().context(LedgerSnafu)?;
            println!("{}", backup);
        }
        Command::Sessions | Command::Inspect { .. } => {}
    }
    Ok(())
}

fn inspect_file(path: &str) -> TallyResult<()> {
    let file_name = simplify_file_name(path);
    let bytes = fs::read(path).context(OpeningFileSnafu { path })?;
    let source = ExcelSource::from_bytes(&bytes, &file_name).context(SpreadsheetSnafu)?;
    let info = inspect(&source, &file_name).context(SpreadsheetSnafu)?;
    println!("File:              {}", info.file_name);
    println!("Header row:        {}", info.header_row + 1);
    println!("Rows:              {}", info.total_rows);
    println!("Columns:           {}", info.total_columns);
    println!("Column names:      {}", info.columns.join(", "));
    println!(
        "Identifier column: {}",
        info.identifier_column.as_deref().unwrap_or("-")
    );
    println!(
        "Time column:       {}",
        info.time_column.as_deref().unwrap_or("-")
    );
    if !info.image_columns.is_empty() {
        println!("Image columns:     {}", info.image_columns.join(", "));
    }
    Ok(())
}

fn print_sessions(data_dir: &Path) -> TallyResult<()> {
    let sessions = list_sessions(data_dir);
    if sessions.is_empty() {
        println!("No session in {}", data_dir.display());
        return Ok(());
    }
    for s in sessions.iter() {
        println!(
            "{:<24} {}  {:>8} bytes",
            s.session_id,
            s.last_modified.format("%Y-%m-%d %H:%M:%S"),
            s.file_size
        );
    }
    Ok(())
}

fn print_batch_report(report: &BatchReport) {
    for f in report.files.iter() {
        match &f.status {
            FileStatus::Ingested {
                identifiers,
                rewarded,
            } => {
                println!("{}: {} identifiers scored", f.file_name, identifiers);
                if *rewarded > 0 {
                    println!("  {} earliest submissions rewarded", rewarded);
                }
            }
            FileStatus::Rescored {
                identifiers,
                rewarded,
            } => {
                println!("{}: scored again, {} identifiers", f.file_name, identifiers);
                if *rewarded > 0 {
                    println!("  {} earliest submissions rewarded", rewarded);
                }
            }
            FileStatus::WeightAdjusted {
                identifiers,
                old,
                new,
            } => println!(
                "{}: weight {} -> {} for {} identifiers",
                f.file_name, old, new, identifiers
            ),
            FileStatus::Skipped => println!(
                "{}: already processed with the same weight and settings, skipped",
                f.file_name
            ),
            FileStatus::NoIdentifiers => {
                println!("{}: no identifier found in the sheet", f.file_name)
            }
            FileStatus::Failed(msg) => println!("{}: error: {}", f.file_name, msg),
        }
    }
    println!(
        "{} new, {} updated, {} skipped, {} failed, {} identifiers",
        report.new_count(),
        report.updated_count(),
        report.skipped_count(),
        report.failed_count(),
        report.total_identifiers()
    );
}

fn print_leaderboard(entries: &[LeaderboardEntry], limit: Option<usize>) {
    if entries.is_empty() {
        println!("No score recorded yet, ingest some files first.");
        return;
    }
    println!("{:>4}  {:<24} {:>8} {:>6}", "Rank", "Identifier", "Score", "Files");
    for (idx, e) in entries
        .iter()
        .take(limit.unwrap_or(entries.len()))
        .enumerate()
    {
        println!(
            "{:>4}  {:<24} {:>8} {:>6}",
            idx + 1,
            e.identifier,
            format_score(e.score),
            e.participation_count
        );
    }
}

fn print_statistics(stats: &Statistics) {
    println!("Participants:    {}", stats.participant_count);
    println!("Files processed: {}", stats.files_processed_count);
    println!("Total score:     {}", format_score(stats.total_score));
    println!("Last updated:    {}", format_date(&stats.last_updated));
}

fn print_processed_files(files: &[ProcessedFile]) {
    if files.is_empty() {
        println!("No file processed yet.");
        return;
    }
    for f in files.iter() {
        let r = &f.record;
        let reward = if r.reward_count > 0 && !r.rewarded_identifiers.is_empty() {
            format!(
                "first {} x{}",
                r.rewarded_identifiers.len(),
                format_score(r.reward_multiplier)
            )
        } else {
            "-".to_string()
        };
        println!(
            "{:<32} {}  {:>4} ids  weight {:<5} reward {:<12} total {}",
            f.file_name,
            format_date(&r.processed_date),
            r.participant_count,
            format_weight(&r.weight),
            reward,
            format_score(r.total_points)
        );
    }
}
