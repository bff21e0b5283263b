//! Contract engine.
//!
//! A directive holds at most one data contract and one UX contract. Its
//! descendants inherit them read-only; the inherited chain is recorded on
//! each descendant's metadata whenever the hierarchy around it changes.
//! Validation always uses the nearest contract of the relevant kind; further
//! ancestors only contribute advisories.

use crate::governance::hierarchy;
use crate::models::graph::DirectiveGraph;
use crate::models::{Contract, ContractKind, ContractRef, ContractSpec, DataContract, UxContract};
use crate::storage::{Storage, CONTRACT_PREFIX};
use crate::{Error, Result};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

/// A contract as seen from a directive: 0 = own, 1 = parent, ...
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedContract {
    pub depth: usize,
    pub owner_id: String,
    pub contract: Contract,
}

/// Result of [`attach_or_existing`].
#[derive(Debug, Clone, Serialize)]
pub struct AttachOutcome {
    pub created: bool,
    pub contract: Contract,
    /// Directives whose inherited chain was rewritten
    pub refreshed: usize,
}

/// Attach a contract to `directive_id`.
///
/// Any non-terminal directive can own contracts, including one that has no
/// children yet; its descendants inherit them as they are attached.
/// Fails with [`Error::ContractAlreadyExists`] if one of the same kind is
/// already attached.
pub fn attach(storage: &mut Storage, directive_id: &str, spec: ContractSpec) -> Result<(Contract, usize)> {
    hierarchy::ensure_can_own_children(&storage.get_directive(directive_id)?)?;
    validate_spec(&spec)?;

    let id = storage.generate_unique_id(CONTRACT_PREFIX, directive_id)?;
    let contract = Contract::new(id, directive_id.to_string(), spec);
    storage.attach_contract(&contract)?;

    let graph = storage.load_graph()?;
    let refreshed = refresh_subtree(storage, &graph, directive_id)?;
    tracing::info!(directive = directive_id, contract = %contract.id, kind = %contract.kind(), refreshed, "attached contract");
    Ok((contract, refreshed))
}

/// Attach, or fetch the existing contract of the same kind unchanged.
pub fn attach_or_existing(storage: &mut Storage, directive_id: &str, spec: ContractSpec) -> Result<AttachOutcome> {
    match attach(storage, directive_id, spec) {
        Ok((contract, refreshed)) => Ok(AttachOutcome {
            created: true,
            contract,
            refreshed,
        }),
        Err(Error::ContractAlreadyExists { existing, .. }) => Ok(AttachOutcome {
            created: false,
            contract: storage.get_contract(&existing)?,
            refreshed: 0,
        }),
        Err(e) => Err(e),
    }
}

fn validate_spec(spec: &ContractSpec) -> Result<()> {
    match spec {
        ContractSpec::Data(data) => {
            if data.allowed_tables.iter().any(|t| t.trim().is_empty()) {
                return Err(Error::InvalidInput("Empty table name in data contract".to_string()));
            }
            for table in data.allowed_columns.keys() {
                if !data.allows_table(table) {
                    return Err(Error::InvalidInput(format!(
                        "Columns listed for {} which is not an allowed table",
                        table
                    )));
                }
            }
        }
        ContractSpec::Ux(ux) => {
            build_globset(&ux.allowed_paths)?;
            build_globset(&ux.forbidden_paths)?;
            if let Some(level) = ux.min_accessibility_level {
                if !(1..=3).contains(&level) {
                    return Err(Error::InvalidInput(format!(
                        "Accessibility level must be 1 (A), 2 (AA) or 3 (AAA), got {}",
                        level
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Contracts visible from `directive_id`, nearest first.
pub fn resolve(storage: &Storage, directive_id: &str) -> Result<Vec<ResolvedContract>> {
    storage.get_directive(directive_id)?;
    let graph = storage.load_graph()?;
    let mut chain = Vec::new();
    for (depth, owner) in std::iter::once(directive_id)
        .chain(graph.ancestors(directive_id))
        .enumerate()
    {
        for contract in storage.contracts_for(owner)? {
            chain.push(ResolvedContract {
                depth,
                owner_id: owner.to_string(),
                contract,
            });
        }
    }
    Ok(chain)
}

/// Rewrite the inherited chain of `root_id` and all its descendants.
/// Returns the number of directives whose chain changed.
pub(crate) fn refresh_subtree(storage: &mut Storage, graph: &DirectiveGraph, root_id: &str) -> Result<usize> {
    let mut owned: HashMap<String, Vec<Contract>> = HashMap::new();
    let mut changed = 0;

    let targets: Vec<String> = std::iter::once(root_id)
        .chain(graph.descendants(root_id))
        .map(String::from)
        .collect();
    for id in targets {
        let mut refs = Vec::new();
        for (offset, ancestor) in graph.ancestors(&id).into_iter().enumerate() {
            if !owned.contains_key(ancestor) {
                owned.insert(ancestor.to_string(), storage.contracts_for(ancestor)?);
            }
            for contract in owned.get(ancestor).into_iter().flatten() {
                refs.push(ContractRef {
                    contract_id: contract.id.clone(),
                    kind: contract.kind(),
                    owner_id: ancestor.to_string(),
                    depth: offset + 1,
                });
            }
        }

        let mut directive = storage.get_directive(&id)?;
        if directive.inherited_contracts() != refs {
            directive.set_inherited_contracts(&refs)?;
            directive.updated_at = chrono::Utc::now();
            storage.update_directive(&directive)?;
            changed += 1;
        }
    }
    Ok(changed)
}

// === Data operations ===

/// A column reference inside a data operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

/// Structured description of a proposed data change. Names are lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataOperation {
    #[serde(default)]
    pub verbs: BTreeSet<String>,
    #[serde(default)]
    pub tables: BTreeSet<String>,
    #[serde(default)]
    pub columns: BTreeSet<ColumnRef>,
}

struct Patterns {
    verb: Regex,
    table: Regex,
    qualified: Regex,
    update_set: Regex,
    insert_columns: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        verb: Regex::new(
            r"(?i)\b(select|insert|update|delete|drop|truncate|alter|create|upsert|merge|grant|revoke)\b",
        )
        .expect("Invalid regex"),
        table: Regex::new(
            r"(?i)\b(?:from|join|into|update|table)\s+(?:if\s+(?:not\s+)?exists\s+)?([a-z_][a-z0-9_]*(?:\.[a-z_][a-z0-9_]*)?)",
        )
        .expect("Invalid regex"),
        qualified: Regex::new(r"(?i)\b([a-z_][a-z0-9_]*)\.([a-z_][a-z0-9_]*)\b")
            .expect("Invalid regex"),
        update_set: Regex::new(r"(?is)\bupdate\s+([a-z_][a-z0-9_.]*)\s+set\s+(.+?)(?:\bwhere\b|;|$)")
            .expect("Invalid regex"),
        insert_columns: Regex::new(r"(?i)\binto\s+([a-z_][a-z0-9_.]*)\s*\(([^)]*)\)")
            .expect("Invalid regex"),
    })
}

/// Words that follow FROM/INTO/UPDATE in prose rather than naming a table.
const NOT_TABLES: &[&str] = &[
    "a", "an", "the", "all", "each", "every", "some", "this", "that", "these", "those", "its",
    "their", "our", "select", "set", "values", "into", "from", "join", "where", "table",
];

fn table_name(raw: &str) -> Option<String> {
    let name = raw.rsplit('.').next().unwrap_or(raw).to_lowercase();
    (!NOT_TABLES.contains(&name.as_str())).then_some(name)
}

impl DataOperation {
    /// Parse a free-text or SQL-like description.
    ///
    /// Tables follow FROM/JOIN/INTO/UPDATE/TABLE. Columns come from
    /// `table.column` references to a recognised table, UPDATE ... SET
    /// assignments and INSERT column lists.
    pub fn parse(text: &str) -> Self {
        let p = patterns();
        let mut op = DataOperation::default();

        for cap in p.verb.captures_iter(text) {
            op.verbs.insert(cap[1].to_uppercase());
        }
        for cap in p.table.captures_iter(text) {
            if let Some(table) = table_name(&cap[1]) {
                op.tables.insert(table);
            }
        }
        for cap in p.qualified.captures_iter(text) {
            let table = cap[1].to_lowercase();
            if op.tables.contains(&table) {
                op.columns.insert(ColumnRef {
                    table,
                    column: cap[2].to_lowercase(),
                });
            }
        }
        for cap in p.update_set.captures_iter(text) {
            let Some(table) = table_name(&cap[1]) else {
                continue;
            };
            for assignment in cap[2].split(',') {
                if let Some((column, _)) = assignment.split_once('=') {
                    op.add_column(&table, column);
                }
            }
        }
        for cap in p.insert_columns.captures_iter(text) {
            let Some(table) = table_name(&cap[1]) else {
                continue;
            };
            for column in cap[2].split(',') {
                op.add_column(&table, column);
            }
        }
        op
    }

    /// Build from `table` or `table.column` entries.
    pub fn from_entities<S: AsRef<str>>(entities: impl IntoIterator<Item = S>) -> Result<Self> {
        let mut op = DataOperation::default();
        for entity in entities {
            let entity = entity.as_ref().trim();
            match entity.split_once('.') {
                Some((table, column)) if !table.is_empty() && !column.is_empty() => {
                    op.tables.insert(table.to_lowercase());
                    op.add_column(table, column);
                }
                None if !entity.is_empty() => {
                    op.tables.insert(entity.to_lowercase());
                }
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "Expected table or table.column, got: {}",
                        entity
                    )))
                }
            }
        }
        Ok(op)
    }

    fn add_column(&mut self, table: &str, column: &str) {
        let column = column.trim().trim_matches('"').trim_matches('`');
        let valid = !column.is_empty()
            && column
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            self.columns.insert(ColumnRef {
                table: table.to_lowercase(),
                column: column.to_lowercase(),
            });
        }
    }

    /// True if no storage entity was recognised.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }
}

/// One contract rule broken by a proposed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyViolation {
    /// `forbidden_operation`, `table_not_allowed` or `column_not_allowed`
    pub rule: String,
    pub entity: String,
    pub contract_id: String,
    pub message: String,
}

/// Result of [`validate_data`]. Contract failures are values, not errors.
#[derive(Debug, Clone, Serialize)]
pub struct DataValidation {
    pub valid: bool,
    /// Nearest data contract, if any applies
    pub contract_id: Option<String>,
    pub owner_id: Option<String>,
    pub operation: DataOperation,
    pub violations: Vec<PolicyViolation>,
    /// Breaches of further ancestors' contracts that the nearest one allows
    pub advisories: Vec<PolicyViolation>,
}

fn check_data(contract_id: &str, data: &DataContract, op: &DataOperation) -> Vec<PolicyViolation> {
    let mut out = Vec::new();
    for verb in &op.verbs {
        if data.forbids_operation(verb) {
            out.push(PolicyViolation {
                rule: "forbidden_operation".to_string(),
                entity: verb.clone(),
                contract_id: contract_id.to_string(),
                message: format!("{} operations are forbidden", verb),
            });
        }
    }
    for table in &op.tables {
        if !data.allows_table(table) {
            out.push(PolicyViolation {
                rule: "table_not_allowed".to_string(),
                entity: table.clone(),
                contract_id: contract_id.to_string(),
                message: format!("table {} is not in the allow-list", table),
            });
        }
    }
    for col in &op.columns {
        if data.allows_table(&col.table) && !data.allows_column(&col.table, &col.column) {
            out.push(PolicyViolation {
                rule: "column_not_allowed".to_string(),
                entity: format!("{}.{}", col.table, col.column),
                contract_id: contract_id.to_string(),
                message: format!("column {}.{} is not in the allow-list", col.table, col.column),
            });
        } else if !data.allows_table(&col.table) && !op.tables.contains(&col.table) {
            out.push(PolicyViolation {
                rule: "table_not_allowed".to_string(),
                entity: col.table.clone(),
                contract_id: contract_id.to_string(),
                message: format!("table {} is not in the allow-list", col.table),
            });
        }
    }
    out
}

/// Validate a data operation against the nearest data contract.
pub fn validate_data(storage: &Storage, directive_id: &str, op: &DataOperation) -> Result<DataValidation> {
    let data_chain: Vec<(String, String, DataContract)> = resolve(storage, directive_id)?
        .into_iter()
        .filter_map(|r| {
            r.contract
                .as_data()
                .cloned()
                .map(|d| (r.contract.id.clone(), r.owner_id.clone(), d))
        })
        .collect();

    let Some((nearest_id, owner_id, nearest)) = data_chain.first() else {
        return Ok(DataValidation {
            valid: true,
            contract_id: None,
            owner_id: None,
            operation: op.clone(),
            violations: Vec::new(),
            advisories: Vec::new(),
        });
    };

    let violations = check_data(nearest_id, nearest, op);
    let flagged: BTreeSet<&str> = violations.iter().map(|v| v.entity.as_str()).collect();
    let mut advisories = Vec::new();
    for (id, _, further) in data_chain.iter().skip(1) {
        advisories.extend(
            check_data(id, further, op)
                .into_iter()
                .filter(|v| !flagged.contains(v.entity.as_str())),
        );
    }

    if !violations.is_empty() {
        tracing::debug!(directive = directive_id, violations = violations.len(), "data operation rejected by contract");
    }
    Ok(DataValidation {
        valid: violations.is_empty(),
        contract_id: Some(nearest_id.clone()),
        owner_id: Some(owner_id.clone()),
        operation: op.clone(),
        violations,
        advisories,
    })
}

// === UX ===

/// A proposed UI change.
#[derive(Debug, Clone, Default)]
pub struct UxChange {
    pub path: String,
    pub lines: Option<u32>,
    pub accessibility_level: Option<u8>,
}

impl UxChange {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Result of [`validate_ux`].
#[derive(Debug, Clone, Serialize)]
pub struct UxValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub contract_id: Option<String>,
    /// Style tag the change must follow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

fn build_glob(pattern: &str) -> Result<Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| Error::InvalidInput(format!("Invalid path glob {}: {}", pattern, e)))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(build_glob(pattern)?);
    }
    builder
        .build()
        .map_err(|e| Error::InvalidInput(format!("Invalid path globs: {}", e)))
}

fn normalize_path(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    path.strip_prefix("./").unwrap_or(&path).to_string()
}

/// Check a change against one UX contract. Returns the reason it is invalid.
fn check_ux(ux: &UxContract, change: &UxChange) -> Result<Option<String>> {
    let path = normalize_path(&change.path);

    let forbidden = build_globset(&ux.forbidden_paths)?;
    if let Some(&idx) = forbidden.matches(&path).first() {
        return Ok(Some(format!(
            "{} matches forbidden pattern {}",
            path, ux.forbidden_paths[idx]
        )));
    }

    if !ux.allowed_paths.is_empty() && !build_globset(&ux.allowed_paths)?.is_match(&path) {
        return Ok(Some(format!("{} is outside the allowed paths", path)));
    }

    if let (Some(max), Some(lines)) = (ux.max_component_lines, change.lines) {
        if lines > max {
            return Ok(Some(format!(
                "component has {} lines, limit is {}",
                lines, max
            )));
        }
    }
    if let (Some(min), Some(level)) = (ux.min_accessibility_level, change.accessibility_level) {
        if level < min {
            return Ok(Some(format!(
                "accessibility level {} is below the required {}",
                level, min
            )));
        }
    }
    Ok(None)
}

/// Validate a UI change against the nearest UX contract. Forbidden paths
/// win over allowed ones.
pub fn validate_ux(storage: &Storage, directive_id: &str, change: &UxChange) -> Result<UxValidation> {
    let nearest = resolve(storage, directive_id)?
        .into_iter()
        .find(|r| r.contract.kind() == ContractKind::Ux);

    let Some(resolved) = nearest else {
        return Ok(UxValidation {
            valid: true,
            reason: None,
            contract_id: None,
            style: None,
        });
    };
    let Some(ux) = resolved.contract.as_ux() else {
        return Err(Error::InvalidInput(format!(
            "Contract {} is not a UX contract",
            resolved.contract.id
        )));
    };

    let reason = check_ux(ux, change)?;
    Ok(UxValidation {
        valid: reason.is_none(),
        reason,
        contract_id: Some(resolved.contract.id.clone()),
        style: ux.style.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::hierarchy::{self, NewDirective};
    use crate::models::DirectiveStatus;
    use crate::test_utils::TestEnv;

    fn data_contract(tables: &[&str], columns: &[(&str, &[&str])]) -> ContractSpec {
        let mut data = DataContract::default();
        data.allowed_tables = tables.iter().map(|t| t.to_string()).collect();
        for (table, cols) in columns {
            data.allowed_columns.insert(
                table.to_string(),
                cols.iter().map(|c| c.to_string()).collect(),
            );
        }
        ContractSpec::Data(data)
    }

    #[test]
    fn test_parse_sql_like_text() {
        let op = DataOperation::parse(
            "UPDATE ventures SET name = 'x', stage = 3 WHERE id = 1; SELECT s.title FROM stages s JOIN ventures ON ventures.owner = 1",
        );
        assert!(op.verbs.contains("UPDATE"));
        assert!(op.verbs.contains("SELECT"));
        assert_eq!(
            op.tables,
            ["stages", "ventures"].iter().map(|s| s.to_string()).collect()
        );
        let cols: Vec<String> = op
            .columns
            .iter()
            .map(|c| format!("{}.{}", c.table, c.column))
            .collect();
        assert!(cols.contains(&"ventures.name".to_string()));
        assert!(cols.contains(&"ventures.stage".to_string()));
        assert!(cols.contains(&"ventures.owner".to_string()));
    }

    #[test]
    fn test_parse_ignores_prose_articles() {
        let op = DataOperation::parse("Read rows from the ventures table into a report");
        assert!(!op.tables.contains("the"));
        assert!(!op.tables.contains("a"));
    }

    #[test]
    fn test_from_entities() {
        let op = DataOperation::from_entities(["Ventures", "stages.name"]).unwrap();
        assert!(op.tables.contains("ventures"));
        assert!(op.tables.contains("stages"));
        assert_eq!(op.columns.len(), 1);
        assert!(DataOperation::from_entities(["stages."]).is_err());
    }

    #[test]
    fn test_nearest_contract_wins_over_ancestor() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let root = hierarchy::create_directive(&mut storage, NewDirective::titled("Root")).unwrap();
        let child = hierarchy::create_directive(
            &mut storage,
            NewDirective::titled("Child").with_parent(&root.id),
        )
        .unwrap();
        let leaf = hierarchy::create_directive(
            &mut storage,
            NewDirective::titled("Leaf").with_parent(&child.id),
        )
        .unwrap();

        // Root allows stages.owner; nearest contract (child) does not.
        attach(&mut storage, &root.id, data_contract(&["stages"], &[])).unwrap();
        attach(
            &mut storage,
            &child.id,
            data_contract(&["stages", "ventures"], &[("stages", &["id", "name"])]),
        )
        .unwrap();

        let op = DataOperation::from_entities(["stages.owner"]).unwrap();
        let result = validate_data(&storage, &leaf.id, &op).unwrap();
        assert!(!result.valid);
        assert_eq!(result.violations[0].rule, "column_not_allowed");

        // Ventures is allowed by the nearest contract, advisory from root.
        let op = DataOperation::from_entities(["ventures"]).unwrap();
        let result = validate_data(&storage, &leaf.id, &op).unwrap();
        assert!(result.valid);
        assert_eq!(result.advisories.len(), 1);
        assert_eq!(result.advisories[0].entity, "ventures");
    }

    #[test]
    fn test_forbidden_operation() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("D")).unwrap();
        let mut data = DataContract::default();
        data.allowed_tables.insert("ventures".to_string());
        data.forbidden_operations.insert("DROP".to_string());
        attach(&mut storage, &d.id, ContractSpec::Data(data)).unwrap();

        let result =
            validate_data(&storage, &d.id, &DataOperation::parse("DROP TABLE ventures")).unwrap();
        assert!(!result.valid);
        assert_eq!(result.violations[0].rule, "forbidden_operation");
    }

    #[test]
    fn test_no_contract_is_valid() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("Free")).unwrap();
        let result = validate_data(&storage, &d.id, &DataOperation::parse("DELETE FROM users")).unwrap();
        assert!(result.valid);
        assert!(result.contract_id.is_none());
        assert!(validate_ux(&storage, &d.id, &UxChange::path("src/a.tsx")).unwrap().valid);
    }

    #[test]
    fn test_second_attach_returns_existing() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("D")).unwrap();
        let first = attach_or_existing(&mut storage, &d.id, data_contract(&["a"], &[])).unwrap();
        assert!(first.created);
        let second = attach_or_existing(&mut storage, &d.id, data_contract(&["b"], &[])).unwrap();
        assert!(!second.created);
        assert_eq!(second.contract.id, first.contract.id);
        assert!(second.contract.as_data().unwrap().allows_table("a"));

        let err = attach(&mut storage, &d.id, data_contract(&["c"], &[])).unwrap_err();
        assert!(matches!(err, Error::ContractAlreadyExists { .. }));
    }

    #[test]
    fn test_forbidden_path_wins_over_allowed() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("UI")).unwrap();
        let ux = UxContract {
            allowed_paths: vec!["src/components/**".to_string()],
            forbidden_paths: vec!["src/components/auth/**".to_string()],
            style: Some("glass-dark".to_string()),
            max_component_lines: Some(300),
            min_accessibility_level: Some(2),
        };
        attach(&mut storage, &d.id, ContractSpec::Ux(ux)).unwrap();

        let result =
            validate_ux(&storage, &d.id, &UxChange::path("src/components/auth/Login.tsx")).unwrap();
        assert!(!result.valid);
        assert!(result.reason.unwrap().contains("forbidden"));

        let ok = validate_ux(&storage, &d.id, &UxChange::path("./src/components/Card.tsx")).unwrap();
        assert!(ok.valid);
        assert_eq!(ok.style.as_deref(), Some("glass-dark"));

        let outside = validate_ux(&storage, &d.id, &UxChange::path("src/pages/Home.tsx")).unwrap();
        assert!(!outside.valid);

        let mut big = UxChange::path("src/components/Card.tsx");
        big.lines = Some(500);
        assert!(!validate_ux(&storage, &d.id, &big).unwrap().valid);
    }

    #[test]
    fn test_inheritance_recorded_on_descendants() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let root = hierarchy::create_directive(&mut storage, NewDirective::titled("Root")).unwrap();
        let child = hierarchy::create_directive(
            &mut storage,
            NewDirective::titled("Child").with_parent(&root.id),
        )
        .unwrap();
        let (contract, refreshed) =
            attach(&mut storage, &root.id, data_contract(&["ventures"], &[])).unwrap();
        assert_eq!(refreshed, 1);

        let child = storage.get_directive(&child.id).unwrap();
        let refs = child.inherited_contracts();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].contract_id, contract.id);
        assert_eq!(refs[0].depth, 1);

        // A late child picks up the chain when attached.
        let late = hierarchy::create_directive(
            &mut storage,
            NewDirective::titled("Late").with_parent(&root.id),
        )
        .unwrap();
        assert_eq!(late.inherited_contracts().len(), 1);

        let resolved = resolve(&storage, &late.id).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].owner_id, root.id);
    }

    #[test]
    fn test_invalid_glob_rejected_at_attach() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("UI")).unwrap();
        let ux = UxContract {
            forbidden_paths: vec!["src/[".to_string()],
            ..Default::default()
        };
        let err = attach(&mut storage, &d.id, ContractSpec::Ux(ux)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_attach_owner_must_be_open() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("Dropped")).unwrap();
        hierarchy::set_status(&mut storage, &d.id, DirectiveStatus::Cancelled).unwrap();

        let err = attach(&mut storage, &d.id, data_contract(&["a"], &[])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(storage.contracts_for(&d.id).unwrap().is_empty());

        // A leaf child may own a contract for its own future descendants.
        let parent = hierarchy::create_directive(&mut storage, NewDirective::titled("P")).unwrap();
        let leaf = hierarchy::create_directive(
            &mut storage,
            NewDirective::titled("Leaf").with_parent(&parent.id),
        )
        .unwrap();
        assert!(attach(&mut storage, &leaf.id, data_contract(&["a"], &[])).is_ok());
    }
}
