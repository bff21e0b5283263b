//! Declarative restrictions attached to a directive and inherited by its descendants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Which of the two contract kinds a contract is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Data,
    Ux,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKind::Data => "data",
            ContractKind::Ux => "ux",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ContractKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "data" => Ok(ContractKind::Data),
            "ux" => Ok(ContractKind::Ux),
            _ => Err(format!("Unknown contract kind: {}", s)),
        }
    }
}

/// Allow-list of storage entities a directive subtree may touch.
///
/// Table and column names compare case-insensitively. A table listed in
/// `allowed_tables` with no entry in `allowed_columns` permits any column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataContract {
    #[serde(default)]
    pub allowed_tables: BTreeSet<String>,

    #[serde(default)]
    pub allowed_columns: BTreeMap<String, BTreeSet<String>>,

    /// Statement verbs that are never permitted (e.g. "DROP")
    #[serde(default)]
    pub forbidden_operations: BTreeSet<String>,
}

impl DataContract {
    pub fn allows_table(&self, table: &str) -> bool {
        self.allowed_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table))
    }

    pub fn allows_column(&self, table: &str, column: &str) -> bool {
        if !self.allows_table(table) {
            return false;
        }
        match self
            .allowed_columns
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(table))
        {
            Some((_, columns)) => columns.iter().any(|c| c.eq_ignore_ascii_case(column)),
            None => true,
        }
    }

    pub fn forbids_operation(&self, verb: &str) -> bool {
        self.forbidden_operations
            .iter()
            .any(|op| op.eq_ignore_ascii_case(verb))
    }
}

/// Allowed UI surface and style limits for a directive subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UxContract {
    /// Component path globs that may be touched
    #[serde(default)]
    pub allowed_paths: Vec<String>,

    /// Component path globs that may never be touched; these win over `allowed_paths`
    #[serde(default)]
    pub forbidden_paths: Vec<String>,

    /// Style/branding tag (e.g. "glass-dark")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_component_lines: Option<u32>,

    /// Minimum accessibility level (1 = A, 2 = AA, 3 = AAA)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_accessibility_level: Option<u8>,
}

/// Contract payload, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContractSpec {
    Data(DataContract),
    Ux(UxContract),
}

impl ContractSpec {
    pub fn kind(&self) -> ContractKind {
        match self {
            ContractSpec::Data(_) => ContractKind::Data,
            ContractSpec::Ux(_) => ContractKind::Ux,
        }
    }
}

/// A contract attached to one directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    /// Unique identifier (e.g., "hmc-a1b2")
    pub id: String,

    /// Entity type marker
    #[serde(rename = "type")]
    pub entity_type: String,

    /// Directive the contract is attached to
    pub directive_id: String,

    pub spec: ContractSpec,

    pub created_at: DateTime<Utc>,
}

impl Contract {
    pub fn new(id: String, directive_id: String, spec: ContractSpec) -> Self {
        Self {
            id,
            entity_type: "contract".to_string(),
            directive_id,
            spec,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> ContractKind {
        self.spec.kind()
    }

    pub fn as_data(&self) -> Option<&DataContract> {
        match &self.spec {
            ContractSpec::Data(data) => Some(data),
            ContractSpec::Ux(_) => None,
        }
    }

    pub fn as_ux(&self) -> Option<&UxContract> {
        match &self.spec {
            ContractSpec::Ux(ux) => Some(ux),
            ContractSpec::Data(_) => None,
        }
    }
}

/// Reference to an ancestor's contract, recorded on a descendant's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRef {
    pub contract_id: String,
    pub kind: ContractKind,
    /// Directive that owns the contract
    pub owner_id: String,
    /// 0 = own contract, 1 = parent, 2 = grandparent, ...
    pub depth: usize,
}
