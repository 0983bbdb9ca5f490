//! Marked log sidecar files
//!
//! Marks of a log file `app.log` are kept next to it in `app.log.ulvmark`:
//!
//! ```json
//! { "MarkedLogInfos": [ { "MarkedLineNumber": 12, "MarkedTimestamp": "2024-01-01T10:00:00" } ] }
//! ```

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use ulogview_logs::time;
use ulogview_types::Result;

/// Extension of marked log files
pub const MARKED_FILE_EXTENSION: &str = ".ulvmark";

/// Delay between two attempts to open a busy marked log file
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Mark of one log of a file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkedLogInfo {
    pub file_name: String,
    pub line_number: i32,
    pub timestamp: Option<NaiveDateTime>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MarkedLogFile {
    #[serde(default)]
    marked_log_infos: Vec<MarkedLogRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MarkedLogRecord {
    marked_line_number: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    marked_timestamp: Option<String>,
}

/// Sidecar timestamp text, ISO 8601 without offset
fn format_timestamp(timestamp: NaiveDateTime) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

/// Path of the marked log file of a log file
pub fn marked_file_path(file_name: &str) -> PathBuf {
    PathBuf::from(format!("{file_name}{MARKED_FILE_EXTENSION}"))
}

/// Whether the path is a marked log file itself
pub fn is_marked_file(path: &str) -> bool {
    path.len() > MARKED_FILE_EXTENSION.len()
        && path
            .get(path.len() - MARKED_FILE_EXTENSION.len()..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(MARKED_FILE_EXTENSION))
}

/// Open a file, retrying while it is busy until `timeout`
fn open_with_timeout(path: &Path, timeout: Duration) -> Option<fs::File> {
    let started = Instant::now();
    loop {
        match fs::File::open(path) {
            Ok(file) => return Some(file),
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                if started.elapsed() >= timeout {
                    tracing::warn!(path = %path.display(), error = %e, "Unable to open marked log file");
                    return None;
                }
                std::thread::sleep(OPEN_RETRY_DELAY);
            }
        }
    }
}

/// Load marks of a log file, blocking
///
/// Any failure is logged and treated as no marks.
pub fn load_marked_logs(file_name: &str, open_timeout: Duration) -> Vec<MarkedLogInfo> {
    let path = marked_file_path(file_name);
    let Some(file) = open_with_timeout(&path, open_timeout) else {
        return Vec::new();
    };
    let content: MarkedLogFile = match serde_json::from_reader(std::io::BufReader::new(file)) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Invalid marked log file");
            return Vec::new();
        }
    };
    tracing::debug!(
        file = %file_name,
        count = content.marked_log_infos.len(),
        "Loaded marked logs"
    );
    content
        .marked_log_infos
        .into_iter()
        .map(|record| {
            let timestamp = record.marked_timestamp.as_deref().and_then(|text| {
                let parsed = time::parse_date_time(text);
                if parsed.is_none() {
                    tracing::debug!(
                        line_number = record.marked_line_number,
                        timestamp = %text,
                        "Ignore invalid marked timestamp"
                    );
                }
                parsed
            });
            MarkedLogInfo {
                file_name: file_name.to_string(),
                line_number: record.marked_line_number,
                timestamp,
            }
        })
        .collect()
}

/// Save marks of a log file, blocking
///
/// The file is replaced atomically, or deleted when there is no mark.
pub fn save_marked_logs(file_name: &str, infos: &[MarkedLogInfo]) -> Result<()> {
    let path = marked_file_path(file_name);
    if infos.is_empty() {
        match fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Deleted marked log file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(());
    }

    let content = MarkedLogFile {
        marked_log_infos: infos
            .iter()
            .map(|info| MarkedLogRecord {
                marked_line_number: info.line_number,
                marked_timestamp: info.timestamp.map(format_timestamp),
            })
            .collect(),
    };
    let json = serde_json::to_vec(&content)?;
    let temp_path = PathBuf::from(format!("{}.tmp", path.display()));
    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&temp_path, &path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    tracing::debug!(path = %path.display(), count = infos.len(), "Saved marked logs");
    Ok(())
}
