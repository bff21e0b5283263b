//! Configuration for Helmsman.
//!
//! Preferences live in `config.kdl` documents at two levels:
//! - System: `$HM_CONFIG_DIR/config.kdl` (default `~/.config/helmsman/config.kdl`)
//! - Session: `<store root>/config.kdl`, one per repository
//!
//! Keys:
//! - `output-format` - "json" or "human"
//! - `default-priority` - priority for new directives
//! - `action-log` - whether commands are appended to the action log
//! - `action-log-path` - where the action log lives
//! - `activation-cache-ttl` - seconds a requirement lookup may be reused
//!
//! ## Precedence
//!
//! CLI flag > session config > system config > defaults.
//! Use the [`resolver`] module for resolution with source tracking.

pub mod resolver;
pub mod schema;

pub use resolver::{ConfigOverrides, Resolved, ResolvedConfig, ValueSource, resolve_config, resolve_from};
pub use schema::{HelmConfig, OutputFormat, CONFIG_KEYS};

use crate::{Error, Result};
use kdl::KdlDocument;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the system config directory.
pub const CONFIG_DIR_ENV: &str = "HM_CONFIG_DIR";

/// Directory holding the system config.
pub fn system_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    dirs::config_dir().map(|d| d.join("helmsman"))
}

/// Path to the system `config.kdl`, if a config dir can be determined.
pub fn system_config_path() -> Option<PathBuf> {
    system_config_dir().map(|d| d.join("config.kdl"))
}

/// Read a KDL document; a missing file is an empty document.
pub fn read_kdl(path: &Path) -> Result<KdlDocument> {
    if !path.exists() {
        return Ok(KdlDocument::new());
    }
    let content = fs::read_to_string(path)?;
    content
        .parse::<KdlDocument>()
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Read and interpret a config file.
pub fn read_config(path: &Path) -> Result<HelmConfig> {
    Ok(HelmConfig::from_kdl(&read_kdl(path)?))
}

/// Validate and write a config file, creating parent directories.
pub fn write_config(path: &Path, config: &HelmConfig) -> Result<()> {
    config.validate().map_err(Error::Config)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, config.to_kdl().to_string())?;
    Ok(())
}

/// Read the system config, or defaults if no config dir is known.
pub fn read_system_config() -> Result<HelmConfig> {
    match system_config_path() {
        Some(path) => read_config(&path),
        None => Ok(HelmConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let config = read_config(&dir.path().join("config.kdl")).unwrap();
        assert_eq!(config, HelmConfig::default());
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.kdl");
        let mut config = HelmConfig::new();
        config.set("output-format", "human").unwrap();
        config.set("activation-cache-ttl", "5").unwrap();
        write_config(&path, &config).unwrap();

        let read = read_config(&path).unwrap();
        assert_eq!(read.output_format, Some(OutputFormat::Human));
        assert_eq!(read.activation_cache_ttl, Some(5));
    }

    #[test]
    fn test_unparseable_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.kdl");
        fs::write(&path, "output-format \"json").unwrap();
        assert!(matches!(read_config(&path), Err(Error::Config(_))));
    }
}
