//! Action logging for hm commands.
//!
//! Every invocation appends one JSON line to the action log. Where the log
//! lives, and whether it is written at all, comes from the resolved config.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Key fragments whose values never reach the log.
const SENSITIVE_KEYS: &[&str] = &["password", "token", "secret", "key", "apikey", "credential"];

/// Represents a single action log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    /// ISO 8601 timestamp when the action occurred
    pub timestamp: DateTime<Utc>,

    /// Repository path where the command was executed
    pub repo_path: String,

    /// Command name (e.g., "directive create", "handoff request")
    pub command: String,

    /// Command arguments as JSON
    pub args: serde_json::Value,

    pub success: bool,

    /// Error message if the command failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,

    /// User who executed the command
    pub user: String,
}

/// Default log location: `<data root>/action.log`.
pub fn default_log_path() -> Option<PathBuf> {
    crate::storage::data_root()
        .ok()
        .map(|root| root.join("action.log"))
}

/// Append an entry for one command to `log_path`.
///
/// Failures are reported on the tracing stream and never fail the command.
pub fn log_action(
    log_path: &Path,
    repo_path: &Path,
    command: &str,
    args: serde_json::Value,
    success: bool,
    error: Option<String>,
    duration_ms: u64,
) {
    let entry = ActionLog {
        timestamp: Utc::now(),
        repo_path: repo_path.to_string_lossy().to_string(),
        command: command.to_string(),
        args: sanitize_args(&args),
        success,
        error,
        duration_ms,
        user: get_current_user(),
    };

    if let Err(e) = write_log_entry(log_path, &entry) {
        tracing::warn!(path = %log_path.display(), error = %e, "failed to write action log");
    }
}

/// Read the last `limit` entries, oldest first. Unparseable lines are skipped.
pub fn read_entries(log_path: &Path, limit: Option<usize>) -> crate::Result<Vec<ActionLog>> {
    if !log_path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(log_path)?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ActionLog>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::debug!(error = %e, "skipping malformed action log line"),
        }
    }
    if let Some(limit) = limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }
    Ok(entries)
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let path = Path::new(path);
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

fn write_log_entry(path: &Path, entry: &ActionLog) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(entry)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", json)
}

fn is_sensitive(key: &str) -> bool {
    key.to_lowercase()
        .split(['_', '-', '.'])
        .any(|part| SENSITIVE_KEYS.contains(&part))
}

/// Redact secret-looking values, shorten paths to their basename and cap
/// string and array sizes.
fn sanitize_args(args: &serde_json::Value) -> serde_json::Value {
    match args {
        serde_json::Value::Object(map) => {
            let sanitized = map
                .iter()
                .map(|(key, value)| {
                    let value = if is_sensitive(key) {
                        serde_json::Value::String("[REDACTED]".to_string())
                    } else {
                        sanitize_args(value)
                    };
                    (key.clone(), value)
                })
                .collect();
            serde_json::Value::Object(sanitized)
        }
        serde_json::Value::Array(arr) => {
            if arr.len() > 10 {
                serde_json::Value::String(format!("[Array with {} items]", arr.len()))
            } else {
                serde_json::Value::Array(arr.iter().map(sanitize_args).collect())
            }
        }
        serde_json::Value::String(s) => {
            let sanitized = if s.contains('/') || s.contains('\\') {
                s.rsplit(['/', '\\']).next().unwrap_or(s).to_string()
            } else {
                s.clone()
            };

            if sanitized.chars().count() > 100 {
                let head: String = sanitized.chars().take(97).collect();
                serde_json::Value::String(format!(
                    "{}... ({} chars)",
                    head,
                    sanitized.chars().count()
                ))
            } else {
                serde_json::Value::String(sanitized)
            }
        }
        _ => args.clone(),
    }
}

fn get_current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
