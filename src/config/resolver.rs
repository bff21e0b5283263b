//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Session config.kdl (`<store root>/config.kdl`)
//! 3. System config.kdl (`$HM_CONFIG_DIR/config.kdl`)
//! 4. Built-in defaults

use crate::Result;
use crate::config::{HelmConfig, OutputFormat, read_config, read_system_config};
use crate::governance::requirements::DEFAULT_CACHE_TTL;
use crate::models::Priority;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    /// Value from CLI flag
    #[serde(rename = "cli")]
    CliFlag,
    /// Value from session-level config
    Session,
    /// Value from system-level config
    System,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Session => write!(f, "session"),
            ValueSource::System => write!(f, "system"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub output_format: Resolved<OutputFormat>,
    pub default_priority: Resolved<Priority>,
    pub action_log: Resolved<bool>,
    /// `None` when no data directory can be determined
    pub action_log_path: Resolved<Option<PathBuf>>,
    /// Seconds
    pub activation_cache_ttl: Resolved<u64>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            output_format: Resolved::new(OutputFormat::Json, ValueSource::Default),
            default_priority: Resolved::new(Priority::Medium, ValueSource::Default),
            action_log: Resolved::new(true, ValueSource::Default),
            action_log_path: Resolved::new(
                crate::action_log::default_log_path(),
                ValueSource::Default,
            ),
            activation_cache_ttl: Resolved::new(DEFAULT_CACHE_TTL.as_secs(), ValueSource::Default),
        }
    }
}

impl ResolvedConfig {
    pub fn output_format(&self) -> OutputFormat {
        self.output_format.value
    }

    pub fn default_priority(&self) -> Priority {
        self.default_priority.value
    }

    /// Where to append the action log, or `None` if it is disabled.
    pub fn action_log_target(&self) -> Option<&Path> {
        if !self.action_log.value {
            return None;
        }
        self.action_log_path.value.as_deref()
    }

    pub fn activation_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.activation_cache_ttl.value)
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output_format: Option<OutputFormat>,
    pub default_priority: Option<Priority>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn with_default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = Some(priority);
        self
    }
}

/// Pick the first set value in precedence order.
fn pick<T: Clone>(cli: Option<&T>, session: Option<&T>, system: Option<&T>, default: Resolved<T>) -> Resolved<T> {
    if let Some(v) = cli {
        Resolved::new(v.clone(), ValueSource::CliFlag)
    } else if let Some(v) = session {
        Resolved::new(v.clone(), ValueSource::Session)
    } else if let Some(v) = system {
        Resolved::new(v.clone(), ValueSource::System)
    } else {
        default
    }
}

/// Resolve configuration with full precedence chain.
///
/// `session_path` is the session config file, absent when the repository
/// has no store yet.
pub fn resolve_config(session_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let system = read_system_config()?;
    let session = match session_path {
        Some(path) => read_config(path)?,
        None => HelmConfig::default(),
    };
    Ok(resolve_from(&system, &session, overrides))
}

/// Resolve from already-loaded config levels.
pub fn resolve_from(system: &HelmConfig, session: &HelmConfig, overrides: &ConfigOverrides) -> ResolvedConfig {
    let defaults = ResolvedConfig::default();
    let expand = |p: &String| Some(crate::action_log::expand_home(p));

    ResolvedConfig {
        output_format: pick(
            overrides.output_format.as_ref(),
            session.output_format.as_ref(),
            system.output_format.as_ref(),
            defaults.output_format,
        ),
        default_priority: pick(
            overrides.default_priority.as_ref(),
            session.default_priority.as_ref(),
            system.default_priority.as_ref(),
            defaults.default_priority,
        ),
        action_log: pick(
            None,
            session.action_log.as_ref(),
            system.action_log.as_ref(),
            defaults.action_log,
        ),
        action_log_path: pick(
            None,
            session.action_log_path.as_ref().map(expand).as_ref(),
            system.action_log_path.as_ref().map(expand).as_ref(),
            defaults.action_log_path,
        ),
        activation_cache_ttl: pick(
            None,
            session.activation_cache_ttl.as_ref(),
            system.activation_cache_ttl.as_ref(),
            defaults.activation_cache_ttl,
        ),
    }
}
