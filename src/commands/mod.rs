//! Command implementations for the hm CLI.
//!
//! Each command opens the store, calls into [`crate::governance`] and returns
//! a value implementing [`Output`]. Commands are organized by entity type:
//! - `directive` - creation, hierarchy, progress, next action
//! - `handoff` - phase transitions, specialist activations, requirements
//! - `contract` - attach, resolve, validate
//! - `remediation` - violations and remediation spawning
//! - `system` - init, info, cache rebuild, config, action log

pub mod contract;
pub mod directive;
pub mod handoff;
pub mod remediation;
pub mod system;

pub use contract::*;
pub use directive::*;
pub use handoff::*;
pub use remediation::*;
pub use system::*;

use crate::models::Directive;
use crate::storage::Storage;
use crate::{Error, Result};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Serialize a result for JSON output.
pub(crate) fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

/// Open the store for `repo_path`.
pub(crate) fn open(repo_path: &Path) -> Result<Storage> {
    Storage::open(repo_path)
}

/// Parse a closed-enum CLI value, naming the argument on failure.
pub(crate) fn parse_arg<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    value.parse().map_err(Error::InvalidInput)
}

/// Read a JSON document from a file, or stdin for `-`.
pub(crate) fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(source).map_err(|e| {
        Error::InvalidInput(format!("Cannot read {}: {}", source, e))
    })
}

/// One-line summary used by human output.
pub(crate) fn directive_line(d: &Directive) -> String {
    format!(
        "{} [{} {} {}%] {} ({})",
        d.id, d.current_phase, d.status, d.progress, d.title, d.priority
    )
}
