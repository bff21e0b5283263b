//! Violation grouping and remediation spawning.
//!
//! Open violations of one check run are grouped by a static rule -> group
//! table. Each group maps onto at most one open remediation directive per
//! affected unit: the metadata scan finds an existing match, and claim rows
//! in the store make the create path atomic under concurrent callers.

use crate::governance::hierarchy::{self, NewDirective};
use crate::models::{
    Directive, DirectiveStatus, RemediationTag, Severity, Violation, ViolationStatus,
};
use crate::storage::{ClaimOutcome, Storage};
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Known rules and the root cause they share.
const RULE_GROUPS: &[(&str, &str)] = &[
    ("CREWAI-001", "crewai_agents"),
    ("CREWAI-002", "crewai_agents"),
    ("CREWAI-003", "crewai_agents"),
    ("STALE_SD", "directive_hygiene"),
    ("MISSING_ARTIFACT", "directive_hygiene"),
    ("MANUAL_REVIEW_REQUIRED", "directive_hygiene"),
    ("DB-SCHEMA-001", "schema_drift"),
    ("DB-SCHEMA-002", "schema_drift"),
    ("DB-MIGRATION-001", "pending_migrations"),
    ("RLS-001", "row_level_security"),
    ("RLS-002", "row_level_security"),
    ("SEC-SECRET-001", "exposed_secrets"),
];

/// Group key for `rule_id`.
///
/// Unknown rules fall back to the lowercased id with any trailing numeric
/// suffix removed (`FOO-BAR-007` -> `foo_bar`).
pub fn group_for_rule(rule_id: &str) -> String {
    let rule = rule_id.trim();
    if let Some((_, group)) = RULE_GROUPS
        .iter()
        .find(|(r, _)| r.eq_ignore_ascii_case(rule))
    {
        return group.to_string();
    }

    let stem = match rule.rsplit_once('-') {
        Some((head, tail)) if !head.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) => head,
        _ => rule,
    };
    stem.to_lowercase().replace(['-', ' '], "_")
}

/// Open violations of `check_id`, keyed by group.
pub fn group_open_violations(storage: &Storage, check_id: &str) -> Result<BTreeMap<String, Vec<Violation>>> {
    let mut groups: BTreeMap<String, Vec<Violation>> = BTreeMap::new();
    for violation in storage.list_violations(Some(check_id), Some(ViolationStatus::Open))? {
        groups
            .entry(group_for_rule(&violation.rule_id))
            .or_default()
            .push(violation);
    }
    Ok(groups)
}

/// Result of one [`spawn`] call.
#[derive(Debug, Clone, Serialize)]
pub struct SpawnOutcome {
    pub group_key: String,
    pub created: bool,
    pub skipped: bool,
    /// Directive the violations are now linked to
    pub directive_id: String,
    pub affected_units: BTreeSet<String>,
    pub linked_violations: Vec<String>,
}

/// Create or link the remediation directive for one violation group.
pub fn spawn(storage: &mut Storage, group_key: &str, violations: &[Violation]) -> Result<SpawnOutcome> {
    if violations.is_empty() {
        return Err(Error::InvalidInput(format!(
            "No violations given for group {}",
            group_key
        )));
    }
    let units: BTreeSet<String> = violations.iter().map(|v| v.affected_unit.clone()).collect();
    let rules: BTreeSet<String> = violations.iter().map(|v| v.rule_id.clone()).collect();
    let severity = violations
        .iter()
        .map(|v| v.severity)
        .max()
        .unwrap_or(Severity::Low);

    if let Some(existing) = find_match(storage, group_key, &units)? {
        extend_tag(storage, &existing, &units, &rules)?;
        let linked = link(storage, violations, &existing.id)?;
        tracing::info!(group = group_key, directive = %existing.id, "remediation exists, linked");
        return Ok(SpawnOutcome {
            group_key: group_key.to_string(),
            created: false,
            skipped: true,
            directive_id: existing.id,
            affected_units: units,
            linked_violations: linked,
        });
    }

    let check_id = violations[0].check_id.clone();
    let tag = RemediationTag {
        group_key: group_key.to_string(),
        affected_units: units.clone(),
        source_rules: rules,
        check_id,
    };
    let mut new = NewDirective::titled(remediation_title(group_key, &units))
        .with_priority(severity.into());
    new.description = Some(remediation_description(&tag, violations));
    new.metadata.insert(
        crate::models::META_REMEDIATION.to_string(),
        serde_json::to_value(&tag)?,
    );

    let directive = hierarchy::create_directive(storage, new)?;
    match storage.claim_units(group_key, &units, &directive.id) {
        Ok(ClaimOutcome::Claimed) => {}
        Ok(ClaimOutcome::HeldBy(holder)) => {
            // Lost the race: another caller already owns one of these units.
            discard(storage, &directive)?;
            let linked = link(storage, violations, &holder)?;
            tracing::info!(group = group_key, directive = %holder, "remediation claimed concurrently, linked");
            return Ok(SpawnOutcome {
                group_key: group_key.to_string(),
                created: false,
                skipped: true,
                directive_id: holder,
                affected_units: units,
                linked_violations: linked,
            });
        }
        Err(e) => {
            discard(storage, &directive)?;
            return Err(e);
        }
    }

    let linked = link(storage, violations, &directive.id)?;
    tracing::info!(group = group_key, directive = %directive.id, units = units.len(), "remediation created");
    Ok(SpawnOutcome {
        group_key: group_key.to_string(),
        created: true,
        skipped: false,
        directive_id: directive.id,
        affected_units: units,
        linked_violations: linked,
    })
}

/// Spawn for every open group of `check_id`.
pub fn run(storage: &mut Storage, check_id: &str) -> Result<Vec<SpawnOutcome>> {
    let groups = group_open_violations(storage, check_id)?;
    let mut outcomes = Vec::with_capacity(groups.len());
    for (group_key, violations) in groups {
        outcomes.push(spawn(storage, &group_key, &violations)?);
    }
    Ok(outcomes)
}

/// Resolve violations linked to a completed directive and release its claims.
/// Returns the ids of the violations resolved.
pub(crate) fn resolve_for_completed(storage: &mut Storage, directive: &Directive) -> Result<Vec<String>> {
    let mut resolved = Vec::new();
    for mut violation in storage.violations_for_directive(&directive.id)? {
        if violation.status == ViolationStatus::Resolved {
            continue;
        }
        violation.status = ViolationStatus::Resolved;
        violation.updated_at = Utc::now();
        storage.update_violation(&violation)?;
        resolved.push(violation.id);
    }
    let released = storage.release_claims(&directive.id)?;
    if !resolved.is_empty() || released > 0 {
        tracing::info!(directive = %directive.id, resolved = resolved.len(), released, "remediation resolved");
    }
    Ok(resolved)
}

/// First open remediation of `group_key` whose units intersect `units`.
fn find_match(storage: &Storage, group_key: &str, units: &BTreeSet<String>) -> Result<Option<Directive>> {
    for directive in storage.find_open_remediations(group_key)? {
        let Some(tag) = directive.remediation() else {
            continue;
        };
        if !tag.affected_units.is_disjoint(units) {
            return Ok(Some(directive));
        }
    }
    for unit in units {
        if let Some(holder) = storage.claim_holder(group_key, unit)? {
            let directive = storage.get_directive(&holder)?;
            if !directive.status.is_terminal() {
                return Ok(Some(directive));
            }
        }
    }
    Ok(None)
}

/// Merge newly seen units and rules into the existing directive's tag, and
/// claim the new units for it when they are free.
fn extend_tag(
    storage: &mut Storage,
    directive: &Directive,
    units: &BTreeSet<String>,
    rules: &BTreeSet<String>,
) -> Result<()> {
    let Some(mut tag) = directive.remediation() else {
        return Ok(());
    };
    let new_units: BTreeSet<String> = units.difference(&tag.affected_units).cloned().collect();
    let new_rules = !rules.is_subset(&tag.source_rules);
    if new_units.is_empty() && !new_rules {
        return Ok(());
    }

    for unit in &new_units {
        let single: BTreeSet<String> = std::iter::once(unit.clone()).collect();
        if let ClaimOutcome::HeldBy(holder) = storage.claim_units(&tag.group_key, &single, &directive.id)? {
            tracing::debug!(unit = %unit, holder = %holder, "unit already claimed elsewhere");
        }
    }
    tag.affected_units.extend(new_units);
    tag.source_rules.extend(rules.iter().cloned());

    let mut updated = directive.clone();
    updated.set_remediation(&tag)?;
    updated.updated_at = Utc::now();
    storage.update_directive(&updated)
}

/// Point `violations` at `directive_id` and acknowledge them.
fn link(storage: &mut Storage, violations: &[Violation], directive_id: &str) -> Result<Vec<String>> {
    let mut linked = Vec::with_capacity(violations.len());
    for violation in violations {
        let mut current = storage.get_violation(&violation.id)?;
        if current.remediation_directive_id.as_deref() != Some(directive_id)
            || current.status == ViolationStatus::Open
        {
            current.remediation_directive_id = Some(directive_id.to_string());
            if current.status == ViolationStatus::Open {
                current.status = ViolationStatus::Acknowledged;
            }
            current.updated_at = Utc::now();
            storage.update_violation(&current)?;
        }
        linked.push(current.id);
    }
    Ok(linked)
}

/// Cancel a directive created by a spawn that lost its claim.
fn discard(storage: &mut Storage, directive: &Directive) -> Result<()> {
    let mut cancelled = storage.get_directive(&directive.id)?;
    cancelled.status = DirectiveStatus::Cancelled;
    cancelled.updated_at = Utc::now();
    storage.update_directive(&cancelled)?;
    storage.release_claims(&directive.id)?;
    Ok(())
}

fn remediation_title(group_key: &str, units: &BTreeSet<String>) -> String {
    let units: Vec<&str> = units.iter().map(String::as_str).collect();
    format!("Remediate {} (units {})", group_key, units.join(", "))
}

fn remediation_description(tag: &RemediationTag, violations: &[Violation]) -> String {
    let rules: Vec<&str> = tag.source_rules.iter().map(String::as_str).collect();
    let units: Vec<&str> = tag.affected_units.iter().map(String::as_str).collect();
    let mut lines = vec![
        format!(
            "Compliance check {} reported {} violation(s) in group {}.",
            tag.check_id,
            violations.len(),
            tag.group_key
        ),
        format!("Source rules: {}", rules.join(", ")),
        format!("Affected units: {}", units.join(", ")),
    ];
    for violation in violations {
        let message = violation.message.as_deref().unwrap_or("no details");
        lines.push(format!(
            "- [{}] {} unit {}: {}",
            violation.severity, violation.rule_id, violation.affected_unit, message
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Phase, Priority};
    use crate::storage::VIOLATION_PREFIX;
    use crate::test_utils::TestEnv;

    fn add(storage: &mut Storage, check: &str, rule: &str, severity: Severity, unit: &str) -> Violation {
        let id = storage
            .generate_unique_id(VIOLATION_PREFIX, &format!("{}{}{}", check, rule, unit))
            .unwrap();
        let violation = Violation::new(
            id,
            check.to_string(),
            rule.to_string(),
            severity,
            unit.to_string(),
        );
        storage.add_violation(&violation).unwrap();
        violation
    }

    #[test]
    fn test_group_for_rule() {
        assert_eq!(group_for_rule("CREWAI-001"), "crewai_agents");
        assert_eq!(group_for_rule("crewai-003"), "crewai_agents");
        assert_eq!(group_for_rule("STALE_SD"), "directive_hygiene");
        assert_eq!(group_for_rule("FOO-BAR-007"), "foo_bar");
        assert_eq!(group_for_rule("NAMING"), "naming");
    }

    #[test]
    fn test_groups_only_open_violations_of_check() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        add(&mut storage, "scan-1", "CREWAI-001", Severity::High, "7");
        add(&mut storage, "scan-1", "CREWAI-002", Severity::Low, "8");
        add(&mut storage, "scan-1", "STALE_SD", Severity::Low, "3");
        add(&mut storage, "scan-2", "CREWAI-001", Severity::High, "9");

        let groups = group_open_violations(&storage, "scan-1").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["crewai_agents"].len(), 2);
        assert_eq!(groups["directive_hygiene"].len(), 1);
    }

    #[test]
    fn test_second_spawn_for_same_unit_links_to_first() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let v1 = add(&mut storage, "scan-1", "CREWAI-001", Severity::Medium, "7");
        let v2 = add(&mut storage, "scan-1", "CREWAI-002", Severity::Critical, "7");

        let first = spawn(&mut storage, "crewai_agents", std::slice::from_ref(&v1)).unwrap();
        assert!(first.created);
        let second = spawn(&mut storage, "crewai_agents", std::slice::from_ref(&v2)).unwrap();
        assert!(second.skipped);
        assert_eq!(second.directive_id, first.directive_id);

        let d1 = storage.get_directive(&first.directive_id).unwrap();
        assert_eq!(d1.status, DirectiveStatus::Draft);
        assert_eq!(d1.current_phase, Phase::Lead);
        assert_eq!(d1.priority, Priority::Medium);
        let tag = d1.remediation().unwrap();
        assert!(tag.source_rules.contains("CREWAI-002"));

        for id in [&v1.id, &v2.id] {
            let v = storage.get_violation(id).unwrap();
            assert_eq!(v.status, ViolationStatus::Acknowledged);
            assert_eq!(v.remediation_directive_id.as_deref(), Some(first.directive_id.as_str()));
        }
        let open = storage
            .find_open_remediations("crewai_agents")
            .unwrap();
        assert_eq!(open.len(), 1);
    }

    #[test]
    fn test_priority_is_max_severity() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let a = add(&mut storage, "scan-1", "RLS-001", Severity::Low, "1");
        let b = add(&mut storage, "scan-1", "RLS-002", Severity::High, "2");

        let outcome = spawn(&mut storage, "row_level_security", &[a, b]).unwrap();
        let d = storage.get_directive(&outcome.directive_id).unwrap();
        assert_eq!(d.priority, Priority::High);
        assert!(d.title.contains("1, 2"));
        assert!(d.description.unwrap().contains("RLS-002"));
    }

    #[test]
    fn test_disjoint_units_create_separate_directives() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let a = add(&mut storage, "scan-1", "CREWAI-001", Severity::Low, "7");
        let b = add(&mut storage, "scan-1", "CREWAI-001", Severity::Low, "12");

        let first = spawn(&mut storage, "crewai_agents", &[a]).unwrap();
        let second = spawn(&mut storage, "crewai_agents", &[b]).unwrap();
        assert!(first.created && second.created);
        assert_ne!(first.directive_id, second.directive_id);
    }

    #[test]
    fn test_run_is_idempotent() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        add(&mut storage, "scan-1", "CREWAI-001", Severity::High, "7");
        add(&mut storage, "scan-1", "STALE_SD", Severity::Low, "3");

        let first = run(&mut storage, "scan-1").unwrap();
        assert_eq!(first.iter().filter(|o| o.created).count(), 2);

        // Linked violations are acknowledged, so a rerun finds no open groups.
        assert!(run(&mut storage, "scan-1").unwrap().is_empty());

        add(&mut storage, "scan-1", "CREWAI-003", Severity::Low, "7");
        let third = run(&mut storage, "scan-1").unwrap();
        assert_eq!(third.len(), 1);
        assert!(third[0].skipped);
    }

    #[test]
    fn test_claims_block_duplicate_when_metadata_scan_misses() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let v = add(&mut storage, "scan-1", "CREWAI-001", Severity::Low, "7");
        let first = spawn(&mut storage, "crewai_agents", std::slice::from_ref(&v)).unwrap();

        // Strip the tag so only the claim row still records ownership.
        let mut d1 = storage.get_directive(&first.directive_id).unwrap();
        d1.metadata.remove(crate::models::META_REMEDIATION);
        storage.update_directive(&d1).unwrap();

        let again = add(&mut storage, "scan-1", "CREWAI-002", Severity::Low, "7");
        let second = spawn(&mut storage, "crewai_agents", &[again]).unwrap();
        assert!(second.skipped);
        assert_eq!(second.directive_id, first.directive_id);
    }

    #[test]
    fn test_completion_resolves_and_releases() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let v = add(&mut storage, "scan-1", "CREWAI-001", Severity::Low, "7");
        let outcome = spawn(&mut storage, "crewai_agents", std::slice::from_ref(&v)).unwrap();
        assert!(storage.claim_holder("crewai_agents", "7").unwrap().is_some());

        let d = storage.get_directive(&outcome.directive_id).unwrap();
        let resolved = resolve_for_completed(&mut storage, &d).unwrap();
        assert_eq!(resolved, vec![v.id.clone()]);
        assert_eq!(
            storage.get_violation(&v.id).unwrap().status,
            ViolationStatus::Resolved
        );
        assert!(storage.claim_holder("crewai_agents", "7").unwrap().is_none());
    }

    #[test]
    fn test_spawn_rejects_empty_group() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        assert!(matches!(
            spawn(&mut storage, "crewai_agents", &[]),
            Err(Error::InvalidInput(_))
        ));
    }
}
