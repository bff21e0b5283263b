//! KDL schema for config.kdl.
//!
//! ```kdl
//! output-format "human"
//! default-priority "high"
//! action-log #true
//! action-log-path "/var/log/helmsman/action.log"
//! activation-cache-ttl 30
//! ```

use crate::models::Priority;
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

/// Every key a config file may carry.
pub const CONFIG_KEYS: &[&str] = &[
    "output-format",
    "default-priority",
    "action-log",
    "action-log-path",
    "activation-cache-ttl",
];

/// Upper bound for `activation-cache-ttl`, in seconds.
pub const MAX_CACHE_TTL_SECS: u64 = 3600;

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Preferences stored in config.kdl. Unset keys fall through to the next level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmConfig {
    pub output_format: Option<OutputFormat>,
    pub default_priority: Option<Priority>,
    pub action_log: Option<bool>,
    pub action_log_path: Option<String>,
    /// Seconds
    pub activation_cache_ttl: Option<u64>,
}

fn first_value<'a>(doc: &'a KdlDocument, key: &str) -> Option<&'a KdlValue> {
    doc.get(key)
        .and_then(|node| node.entries().first())
        .map(|entry| entry.value())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

impl HelmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(path) = &self.action_log_path {
            if path.trim().is_empty() {
                return Err("action-log-path must not be empty".to_string());
            }
        }
        if let Some(ttl) = self.activation_cache_ttl {
            if ttl > MAX_CACHE_TTL_SECS {
                return Err(format!(
                    "activation-cache-ttl must be 0-{}, got {}",
                    MAX_CACHE_TTL_SECS, ttl
                ));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document. Values of the wrong type are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        if let Some(s) = first_value(doc, "output-format").and_then(|v| v.as_string()) {
            config.output_format = OutputFormat::parse(s);
        }
        if let Some(s) = first_value(doc, "default-priority").and_then(|v| v.as_string()) {
            config.default_priority = s.parse().ok();
        }
        if let Some(value) = first_value(doc, "action-log") {
            config.action_log = value
                .as_bool()
                .or_else(|| value.as_string().and_then(parse_bool));
        }
        if let Some(s) = first_value(doc, "action-log-path").and_then(|v| v.as_string()) {
            config.action_log_path = Some(s.to_string());
        }
        if let Some(i) = first_value(doc, "activation-cache-ttl").and_then(|v| v.as_integer()) {
            config.activation_cache_ttl = u64::try_from(i)
                .ok()
                .filter(|ttl| *ttl <= MAX_CACHE_TTL_SECS);
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        let mut push = |key: &str, value: KdlValue| {
            let mut node = KdlNode::new(key);
            node.push(KdlEntry::new(value));
            doc.nodes_mut().push(node);
        };
        if let Some(format) = self.output_format {
            push("output-format", KdlValue::String(format.as_str().to_string()));
        }
        if let Some(priority) = self.default_priority {
            push("default-priority", KdlValue::String(priority.as_str().to_string()));
        }
        if let Some(enabled) = self.action_log {
            push("action-log", KdlValue::Bool(enabled));
        }
        if let Some(path) = &self.action_log_path {
            push("action-log-path", KdlValue::String(path.clone()));
        }
        if let Some(ttl) = self.activation_cache_ttl {
            push("activation-cache-ttl", KdlValue::Integer(i128::from(ttl)));
        }

        doc
    }

    /// Set one key from its string form, as given on the command line.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "output-format" => {
                self.output_format = Some(OutputFormat::parse(value).ok_or_else(|| {
                    format!("output-format must be json or human, got {}", value)
                })?);
            }
            "default-priority" => {
                self.default_priority = Some(value.parse()?);
            }
            "action-log" => {
                self.action_log = Some(
                    parse_bool(value)
                        .ok_or_else(|| format!("action-log must be true or false, got {}", value))?,
                );
            }
            "action-log-path" => {
                self.action_log_path = Some(value.to_string());
            }
            "activation-cache-ttl" => {
                let ttl = value
                    .parse::<u64>()
                    .map_err(|_| format!("activation-cache-ttl must be a number of seconds, got {}", value))?;
                self.activation_cache_ttl = Some(ttl);
            }
            _ => {
                return Err(format!(
                    "Unknown config key: {} (expected one of: {})",
                    key,
                    CONFIG_KEYS.join(", ")
                ));
            }
        }
        self.validate()
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &HelmConfig) {
        if other.output_format.is_some() {
            self.output_format = other.output_format;
        }
        if other.default_priority.is_some() {
            self.default_priority = other.default_priority;
        }
        if other.action_log.is_some() {
            self.action_log = other.action_log;
        }
        if other.action_log_path.is_some() {
            self.action_log_path = other.action_log_path.clone();
        }
        if other.activation_cache_ttl.is_some() {
            self.activation_cache_ttl = other.activation_cache_ttl;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("human"), Some(OutputFormat::Human));
        assert_eq!(OutputFormat::parse("yaml"), None);
    }

    #[test]
    fn test_from_kdl_full() {
        let kdl = r#"
            output-format "human"
            default-priority "critical"
            action-log #false
            action-log-path "/tmp/hm.log"
            activation-cache-ttl 10
        "#;
        let doc: KdlDocument = kdl.parse().unwrap();
        let config = HelmConfig::from_kdl(&doc);
        assert_eq!(config.output_format, Some(OutputFormat::Human));
        assert_eq!(config.default_priority, Some(Priority::Critical));
        assert_eq!(config.action_log, Some(false));
        assert_eq!(config.action_log_path.as_deref(), Some("/tmp/hm.log"));
        assert_eq!(config.activation_cache_ttl, Some(10));
    }

    #[test]
    fn test_from_kdl_ignores_bad_values() {
        let kdl = r#"
            output-format "yaml"
            default-priority "urgent"
            activation-cache-ttl -4
        "#;
        let doc: KdlDocument = kdl.parse().unwrap();
        assert_eq!(HelmConfig::from_kdl(&doc), HelmConfig::default());
    }

    #[test]
    fn test_to_kdl_roundtrip() {
        let config = HelmConfig {
            output_format: Some(OutputFormat::Human),
            default_priority: Some(Priority::Low),
            action_log: Some(true),
            action_log_path: Some("/tmp/a.log".to_string()),
            activation_cache_ttl: Some(0),
        };
        let doc: KdlDocument = config.to_kdl().to_string().parse().unwrap();
        assert_eq!(HelmConfig::from_kdl(&doc), config);
    }

    #[test]
    fn test_set_validates() {
        let mut config = HelmConfig::new();
        config.set("default-priority", "high").unwrap();
        config.set("action-log", "off").unwrap();
        assert_eq!(config.default_priority, Some(Priority::High));
        assert_eq!(config.action_log, Some(false));

        assert!(config.set("default-priority", "urgent").is_err());
        assert!(config.set("activation-cache-ttl", "99999").is_err());
        assert!(config.set("editor", "vim").is_err());
    }

    #[test]
    fn test_merge() {
        let mut base = HelmConfig {
            output_format: Some(OutputFormat::Json),
            default_priority: Some(Priority::Low),
            ..Default::default()
        };
        let over = HelmConfig {
            default_priority: Some(Priority::High),
            activation_cache_ttl: Some(5),
            ..Default::default()
        };
        base.merge(&over);
        assert_eq!(base.output_format, Some(OutputFormat::Json));
        assert_eq!(base.default_priority, Some(Priority::High));
        assert_eq!(base.activation_cache_ttl, Some(5));
    }
}
