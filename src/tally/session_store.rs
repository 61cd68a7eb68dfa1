use log::{debug, info, warn};

use checkin_ledger::*;
use chrono::{DateTime, Local};
use snafu::prelude::*;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const RECORDS_PREFIX: &str = "records_";
const BACKUP_PREFIX: &str = "backup_";
const JSON_SUFFIX: &str = ".json";

/// A new session id: 8 hex characters, `_`, then the unix time in seconds.
pub fn generate_session_id() -> String {
    let uuid = uuid::Uuid::new_v4().to_string();
    format!(
        "{}_{}",
        uuid.chars().take(8).collect::<String>(),
        chrono::Utc::now().timestamp()
    )
}

/// The ledger of a session, stored as `records_<session>.json` in a directory.
#[derive(Debug, Clone)]
pub struct FileLedgerStore {
    session_id: String,
    data_dir: PathBuf,
}

impl FileLedgerStore {
    /// Opens the ledger of a session, creating the directory and an empty
    /// ledger when needed.
    pub fn open(data_dir: &Path, session_id: &str) -> LedgerResult<FileLedgerStore> {
        fs::create_dir_all(data_dir).context(IoSnafu {
            path: data_dir.display().to_string(),
        })?;
        let mut store = FileLedgerStore {
            session_id: session_id.to_string(),
            data_dir: data_dir.to_path_buf(),
        };
        if !store.path().exists() {
            info!("Creating the ledger of session {}", session_id);
            store.save(&LedgerDocument::new())?;
        }
        Ok(store)
    }

    pub fn path(&self) -> PathBuf {
        session_path(&self.data_dir, &self.session_id)
    }
}

/// Where the ledger of a session is stored.
pub fn session_path(data_dir: &Path, session_id: &str) -> PathBuf {
    data_dir.join(format!("{}{}{}", RECORDS_PREFIX, session_id, JSON_SUFFIX))
}

/// True when the ledger of `session_id` is among the files removed by a sweep.
pub fn was_swept(removed: &[PathBuf], data_dir: &Path, session_id: &str) -> bool {
    let path = session_path(data_dir, session_id);
    removed.iter().any(|p| *p == path)
}

fn write_document(path: &Path, doc: &LedgerDocument) -> LedgerResult<()> {
    let text = doc.to_pretty_json()?;
    fs::write(path, text).context(IoSnafu {
        path: path.display().to_string(),
    })
}

impl LedgerStore for FileLedgerStore {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn load(&self) -> LedgerResult<Option<LedgerDocument>> {
        let path = self.path();
        match fs::read_to_string(&path) {
            Ok(text) => load_document_str(&text).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(IoSnafu {
                path: path.display().to_string(),
            }),
        }
    }

    fn save(&mut self, doc: &LedgerDocument) -> LedgerResult<()> {
        write_document(&self.path(), doc)
    }

    fn backup(&mut self, doc: &LedgerDocument) -> LedgerResult<String> {
        let path = self.data_dir.join(format!(
            "{}{}_{}{}",
            BACKUP_PREFIX,
            self.session_id,
            Local::now().format("%Y%m%d_%H%M%S"),
            JSON_SUFFIX
        ));
        write_document(&path, doc)?;
        Ok(path.display().to_string())
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub last_modified: DateTime<Local>,
    pub file_size: u64,
    pub path: PathBuf,
}

fn session_id_of(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(RECORDS_PREFIX)
        .and_then(|s| s.strip_suffix(JSON_SUFFIX))
}

fn session_files(data_dir: &Path) -> Vec<(String, PathBuf)> {
    let entries = match fs::read_dir(data_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("session_files: cannot read {}: {}", data_dir.display(), e);
            return Vec::new();
        }
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            session_id_of(&name).map(|id| (id.to_string(), entry.path()))
        })
        .collect()
}

/// The sessions stored in a directory, most recently modified first.
pub fn list_sessions(data_dir: &Path) -> Vec<SessionInfo> {
    let mut sessions: Vec<SessionInfo> = session_files(data_dir)
        .into_iter()
        .filter_map(|(session_id, path)| match fs::metadata(&path).and_then(|m| Ok((m.modified()?, m.len()))) {
            Ok((modified, file_size)) => Some(SessionInfo {
                session_id,
                last_modified: DateTime::<Local>::from(modified),
                file_size,
                path,
            }),
            Err(e) => {
                warn!("Cannot read the session file {}: {}", path.display(), e);
                None
            }
        })
        .collect();
    sessions.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
    sessions
}

/// Deletes the session ledgers not modified since `max_age`. Returns the
/// removed files. Files that cannot be inspected or removed are skipped.
pub fn sweep_expired_sessions(data_dir: &Path, max_age: chrono::Duration) -> Vec<PathBuf> {
    let cutoff = Local::now() - max_age;
    let mut removed = Vec::new();
    for (session_id, path) in session_files(data_dir) {
        let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(m) => DateTime::<Local>::from(m),
            Err(e) => {
                warn!("Cannot read the session file {}: {}", path.display(), e);
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed expired session {} (last modified {})", session_id, modified);
                removed.push(path);
            }
            Err(e) => warn!("Cannot remove the session file {}: {}", path.display(), e),
        }
    }
    removed
}
