use checkin_ledger::FileWeight;
use chrono::NaiveDateTime;
use std::path::Path;

/// The file name of a path, which is also the key of the file in the ledger.
pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

/// Scores without trailing zeros: `3`, `1.5`, `0.33`.
pub fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{:.0}", score)
    } else {
        let s = format!("{:.2}", score);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

pub fn format_weight(weight: &FileWeight) -> String {
    match weight {
        FileWeight::Uniform(w) => w.to_string(),
        FileWeight::Average(w) => format_score(*w),
    }
}

/// `MM-DD HH:MM` for ISO timestamps; anything else is returned as is.
pub fn format_date(iso: &str) -> String {
    match NaiveDateTime::parse_from_str(iso, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(dt) => dt.format("%m-%d %H:%M").to_string(),
        Err(_) => iso.to_string(),
    }
}
