//! System, config and action-log commands.

use super::{json, open, Output};
use crate::action_log::{self, ActionLog};
use crate::config::{self, ResolvedConfig};
use crate::storage::{get_storage_dir, Storage};
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Result of `hm system init`.
#[derive(Serialize)]
pub struct InitResult {
    /// False when the store already existed
    pub initialized: bool,
    pub storage_path: PathBuf,
}

impl Output for InitResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.initialized {
            format!("Initialized helmsman at {}", self.storage_path.display())
        } else {
            format!("Already initialized at {}", self.storage_path.display())
        }
    }
}

/// Create the store for `repo_path`; existing stores are left untouched.
pub fn system_init(repo_path: &Path) -> Result<InitResult> {
    let already = Storage::exists(repo_path)?;
    let storage = if already {
        open(repo_path)?
    } else {
        Storage::init(repo_path)?
    };
    Ok(InitResult {
        initialized: !already,
        storage_path: storage.root().to_path_buf(),
    })
}

/// Result of `hm system info`.
#[derive(Serialize)]
pub struct InfoResult {
    pub version: &'static str,
    pub commit: &'static str,
    pub built_at: &'static str,
    pub repo_path: PathBuf,
    pub storage_path: PathBuf,
    pub initialized: bool,
}

impl Output for InfoResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "hm {} ({} built {})\nrepo:    {}\nstore:   {}{}",
            self.version,
            self.commit,
            self.built_at,
            self.repo_path.display(),
            self.storage_path.display(),
            if self.initialized { "" } else { " (not initialized)" }
        )
    }
}

pub fn system_info(repo_path: &Path) -> Result<InfoResult> {
    Ok(InfoResult {
        version: env!("CARGO_PKG_VERSION"),
        commit: env!("HM_GIT_COMMIT"),
        built_at: env!("HM_BUILD_TIMESTAMP"),
        repo_path: repo_path.to_path_buf(),
        storage_path: get_storage_dir(repo_path)?,
        initialized: Storage::exists(repo_path)?,
    })
}

/// Result of `hm system rebuild-cache`.
#[derive(Serialize)]
pub struct RebuildResult {
    pub rebuilt: bool,
    pub storage_path: PathBuf,
}

impl Output for RebuildResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Rebuilt cache at {}", self.storage_path.display())
    }
}

pub fn system_rebuild_cache(repo_path: &Path) -> Result<RebuildResult> {
    let mut storage = open(repo_path)?;
    storage.rebuild_cache()?;
    Ok(RebuildResult {
        rebuilt: true,
        storage_path: storage.root().to_path_buf(),
    })
}

/// Result of `hm config show`.
#[derive(Serialize)]
pub struct ConfigShow {
    #[serde(flatten)]
    pub config: ResolvedConfig,
}

impl Output for ConfigShow {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let c = &self.config;
        let log_path = c
            .action_log_path
            .value
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        [
            format!("output-format        = {} ({})", c.output_format.value, c.output_format.source),
            format!("default-priority     = {} ({})", c.default_priority.value, c.default_priority.source),
            format!("action-log           = {} ({})", c.action_log.value, c.action_log.source),
            format!("action-log-path      = {} ({})", log_path, c.action_log_path.source),
            format!(
                "activation-cache-ttl = {}s ({})",
                c.activation_cache_ttl.value, c.activation_cache_ttl.source
            ),
        ]
        .join("\n")
    }
}

pub fn config_show(resolved: &ResolvedConfig) -> ConfigShow {
    ConfigShow {
        config: resolved.clone(),
    }
}

/// Result of `hm config set`.
#[derive(Serialize)]
pub struct ConfigSetResult {
    pub key: String,
    pub value: String,
    pub path: PathBuf,
}

impl Output for ConfigSetResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Set {} = {} in {}", self.key, self.value, self.path.display())
    }
}

/// Set a key in the session config of an initialized repository.
pub fn config_set(repo_path: &Path, key: &str, value: &str) -> Result<ConfigSetResult> {
    let storage = open(repo_path)?;
    let path = storage.session_config_path();
    let mut session = config::read_config(&path)?;
    session.set(key, value).map_err(Error::InvalidInput)?;
    config::write_config(&path, &session)?;
    tracing::debug!(key, value, path = %path.display(), "session config updated");
    Ok(ConfigSetResult {
        key: key.to_string(),
        value: value.to_string(),
        path,
    })
}

/// Result of `hm log`.
#[derive(Serialize)]
pub struct LogEntries {
    pub entries: Vec<ActionLog>,
    pub count: usize,
}

impl Output for LogEntries {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return "No logged actions.".to_string();
        }
        self.entries
            .iter()
            .map(|e| {
                let status = if e.success { "ok" } else { "FAILED" };
                format!(
                    "{} {} {} ({}ms)",
                    e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    e.command,
                    status,
                    e.duration_ms
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Last `limit` entries of the action log; empty when logging is disabled.
pub fn log_show(resolved: &ResolvedConfig, limit: usize) -> Result<LogEntries> {
    let entries = match resolved.action_log_target() {
        Some(path) => action_log::read_entries(path, Some(limit))?,
        None => Vec::new(),
    };
    Ok(LogEntries {
        count: entries.len(),
        entries,
    })
}
