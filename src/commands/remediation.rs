//! Violation and remediation commands.

use super::{json, open, parse_arg, Output};
use crate::governance::remediation::{self, SpawnOutcome};
use crate::models::{Severity, Violation, ViolationStatus};
use crate::storage::VIOLATION_PREFIX;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Arguments of `hm violation add`.
#[derive(Debug, Clone)]
pub struct ViolationArgs {
    pub check: String,
    pub rule: String,
    pub severity: String,
    pub unit: String,
    pub message: Option<String>,
}

/// A recorded violation.
#[derive(Serialize)]
pub struct ViolationResult {
    #[serde(flatten)]
    pub violation: Violation,
    pub group_key: String,
}

impl Output for ViolationResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let v = &self.violation;
        format!(
            "Recorded {} {} ({}) on unit {} [group {}]",
            v.id, v.rule_id, v.severity, v.affected_unit, self.group_key
        )
    }
}

pub fn violation_add(repo_path: &Path, args: ViolationArgs) -> Result<ViolationResult> {
    let severity: Severity = parse_arg(&args.severity)?;
    for (name, value) in [("check", &args.check), ("rule", &args.rule), ("unit", &args.unit)] {
        if value.trim().is_empty() {
            return Err(Error::InvalidInput(format!("--{} must not be empty", name)));
        }
    }

    let mut storage = open(repo_path)?;
    let seed = format!("{}:{}:{}", args.check, args.rule, args.unit);
    let id = storage.generate_unique_id(VIOLATION_PREFIX, &seed)?;
    let mut violation = Violation::new(
        id,
        args.check.trim().to_string(),
        args.rule.trim().to_string(),
        severity,
        args.unit.trim().to_string(),
    );
    violation.message = args.message;
    storage.add_violation(&violation)?;
    tracing::debug!(violation = %violation.id, rule = %violation.rule_id, "violation recorded");

    Ok(ViolationResult {
        group_key: remediation::group_for_rule(&violation.rule_id),
        violation,
    })
}

/// Result of `hm violation list`.
#[derive(Serialize)]
pub struct ViolationList {
    pub violations: Vec<Violation>,
    pub count: usize,
}

impl Output for ViolationList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.violations.is_empty() {
            return "No violations.".to_string();
        }
        self.violations
            .iter()
            .map(|v| {
                let mut line = format!(
                    "{} {} {} unit={} {}",
                    v.id, v.rule_id, v.severity, v.affected_unit, v.status
                );
                if let Some(d) = &v.remediation_directive_id {
                    line.push_str(&format!(" -> {}", d));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn violation_list(
    repo_path: &Path,
    check: Option<&str>,
    status: Option<&str>,
) -> Result<ViolationList> {
    let status: Option<ViolationStatus> = status.map(parse_arg).transpose()?;
    let storage = open(repo_path)?;
    let violations = storage.list_violations(check, status)?;
    Ok(ViolationList {
        count: violations.len(),
        violations,
    })
}

/// One violation group as shown by `hm remediate groups`.
#[derive(Serialize)]
pub struct GroupSummary {
    pub violation_ids: Vec<String>,
    pub rules: Vec<String>,
    pub units: Vec<String>,
    pub max_severity: Option<Severity>,
}

/// Result of `hm remediate groups`.
#[derive(Serialize)]
pub struct GroupsResult {
    pub check_id: String,
    pub groups: BTreeMap<String, GroupSummary>,
}

impl Output for GroupsResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.groups.is_empty() {
            return format!("No open violations for {}.", self.check_id);
        }
        self.groups
            .iter()
            .map(|(key, g)| {
                format!(
                    "{}: {} violation(s), units {}, rules {}",
                    key,
                    g.violation_ids.len(),
                    g.units.join(","),
                    g.rules.join(",")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn summarize(violations: &[Violation]) -> GroupSummary {
    let mut rules: Vec<String> = violations.iter().map(|v| v.rule_id.clone()).collect();
    rules.sort();
    rules.dedup();
    let mut units: Vec<String> = violations.iter().map(|v| v.affected_unit.clone()).collect();
    units.sort();
    units.dedup();
    GroupSummary {
        violation_ids: violations.iter().map(|v| v.id.clone()).collect(),
        rules,
        units,
        max_severity: violations.iter().map(|v| v.severity).max(),
    }
}

pub fn remediate_groups(repo_path: &Path, check: &str) -> Result<GroupsResult> {
    let storage = open(repo_path)?;
    let groups = remediation::group_open_violations(&storage, check)?
        .iter()
        .map(|(key, list)| (key.clone(), summarize(list)))
        .collect();
    Ok(GroupsResult {
        check_id: check.to_string(),
        groups,
    })
}

/// Result of `hm remediate run`.
#[derive(Serialize)]
pub struct RemediationRun {
    pub check_id: String,
    pub outcomes: Vec<SpawnOutcome>,
    pub created: usize,
    pub skipped: usize,
}

impl Output for RemediationRun {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.outcomes.is_empty() {
            return format!("No open violations for {}.", self.check_id);
        }
        let mut lines: Vec<String> = self
            .outcomes
            .iter()
            .map(|o| {
                let verb = if o.created { "created" } else { "linked to" };
                format!(
                    "{}: {} {} ({} violation(s))",
                    o.group_key,
                    verb,
                    o.directive_id,
                    o.linked_violations.len()
                )
            })
            .collect();
        lines.push(format!("{} created, {} skipped", self.created, self.skipped));
        lines.join("\n")
    }
}

pub fn remediate_run(repo_path: &Path, check: &str) -> Result<RemediationRun> {
    let mut storage = open(repo_path)?;
    let outcomes = remediation::run(&mut storage, check)?;
    Ok(RemediationRun {
        check_id: check.to_string(),
        created: outcomes.iter().filter(|o| o.created).count(),
        skipped: outcomes.iter().filter(|o| o.skipped).count(),
        outcomes,
    })
}
