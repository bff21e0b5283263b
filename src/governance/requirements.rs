//! Specialist review requirements per phase.
//!
//! The phase -> specialist mapping is a static table over closed enums.
//! Activation lookups may be served from an explicit TTL cache owned by the
//! [`RequirementValidator`]; the handoff state machine always asks for a fresh read.

use crate::models::{
    ActivationStatus, Phase, Specialist, SubAgentActivation, TechnicalSurface, Verdict,
};
use crate::storage::Storage;
use crate::Result;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Default lifetime of cached activation lookups.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// When a requirement rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "when", content = "surface", rename_all = "snake_case")]
pub enum Trigger {
    Always,
    Surface(TechnicalSurface),
}

/// One row of the requirement table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequirementRule {
    pub phase: Phase,
    pub specialist: Specialist,
    pub trigger: Trigger,
}

const fn rule(phase: Phase, specialist: Specialist, trigger: Trigger) -> RequirementRule {
    RequirementRule {
        phase,
        specialist,
        trigger,
    }
}

const RULES: &[RequirementRule] = &[
    rule(Phase::Plan, Specialist::Database, Trigger::Surface(TechnicalSurface::Database)),
    rule(Phase::Plan, Specialist::Security, Trigger::Surface(TechnicalSurface::Security)),
    rule(Phase::Plan, Specialist::Design, Trigger::Surface(TechnicalSurface::Ui)),
    rule(Phase::Plan, Specialist::Integration, Trigger::Surface(TechnicalSurface::Integration)),
    rule(Phase::Exec, Specialist::Testing, Trigger::Always),
    rule(Phase::Exec, Specialist::Performance, Trigger::Surface(TechnicalSurface::Performance)),
    rule(Phase::PlanVerify, Specialist::Testing, Trigger::Always),
    rule(Phase::PlanVerify, Specialist::Security, Trigger::Surface(TechnicalSurface::Security)),
    rule(Phase::LeadFinal, Specialist::Documentation, Trigger::Always),
];

/// PLAN needs one of these when the directive declares none of database, security or ui.
const PLAN_FALLBACK: &[Specialist] = &[Specialist::Database, Specialist::Security, Specialist::Design];

/// Static rules for `phase`, regardless of surface.
pub fn requirements_for(phase: Phase) -> Vec<RequirementRule> {
    RULES.iter().copied().filter(|r| r.phase == phase).collect()
}

/// Concrete requirement for a directive with the given surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseRequirement {
    pub phase: Phase,
    /// Every one of these must have run
    pub required: Vec<Specialist>,
    /// At least one of these must have run (empty = no alternative group)
    pub any_of: Vec<Specialist>,
}

impl PhaseRequirement {
    pub fn for_surface(phase: Phase, surface: &BTreeSet<TechnicalSurface>) -> Self {
        let required = RULES
            .iter()
            .filter(|r| r.phase == phase)
            .filter(|r| match r.trigger {
                Trigger::Always => true,
                Trigger::Surface(s) => surface.contains(&s),
            })
            .map(|r| r.specialist)
            .collect();

        let specific = [
            TechnicalSurface::Database,
            TechnicalSurface::Security,
            TechnicalSurface::Ui,
        ];
        let any_of = if phase == Phase::Plan && !specific.iter().any(|s| surface.contains(s)) {
            PLAN_FALLBACK.to_vec()
        } else {
            Vec::new()
        };

        Self {
            phase,
            required,
            any_of,
        }
    }

    /// Evaluate against activations recorded for this phase, oldest first.
    pub fn evaluate(&self, directive_id: &str, activations: &[SubAgentActivation]) -> RequirementCheck {
        let satisfied = satisfied_specialists(activations);

        let mut missing: Vec<String> = self
            .required
            .iter()
            .filter(|s| !satisfied.contains(s))
            .map(|s| s.code().to_string())
            .collect();
        if !self.any_of.is_empty() && !self.any_of.iter().any(|s| satisfied.contains(s)) {
            let group: Vec<&str> = self.any_of.iter().map(|s| s.code()).collect();
            missing.push(group.join("|"));
        }

        RequirementCheck {
            directive_id: directive_id.to_string(),
            phase: self.phase,
            met: missing.is_empty(),
            missing,
            satisfied: satisfied.into_iter().collect(),
        }
    }
}

/// Specialists whose latest counted activation did not fail.
///
/// Only `activated` and `completed` records count; a `skipped` record neither
/// satisfies nor overrides an earlier one.
fn satisfied_specialists(activations: &[SubAgentActivation]) -> BTreeSet<Specialist> {
    let mut latest: HashMap<Specialist, Verdict> = HashMap::new();
    for activation in activations {
        if matches!(
            activation.status,
            ActivationStatus::Activated | ActivationStatus::Completed
        ) {
            latest.insert(activation.specialist, activation.verdict);
        }
    }
    latest
        .into_iter()
        .filter(|(_, verdict)| *verdict != Verdict::Fail)
        .map(|(specialist, _)| specialist)
        .collect()
}

/// Outcome of a requirement check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequirementCheck {
    pub directive_id: String,
    pub phase: Phase,
    pub met: bool,
    /// Missing specialist codes; an alternative group reads `A|B|C`
    pub missing: Vec<String>,
    pub satisfied: Vec<Specialist>,
}

struct CachedActivations {
    fetched_at: Instant,
    activations: Vec<SubAgentActivation>,
}

/// Read-only validator with an explicit activation cache.
pub struct RequirementValidator {
    ttl: Duration,
    cache: HashMap<(String, Phase), CachedActivations>,
}

impl Default for RequirementValidator {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl RequirementValidator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: HashMap::new(),
        }
    }

    /// Check `phase` for `directive_id`, using cached activations while fresh.
    pub fn check(&mut self, storage: &Storage, directive_id: &str, phase: Phase) -> Result<RequirementCheck> {
        let directive = storage.get_directive(directive_id)?;
        let requirement = PhaseRequirement::for_surface(phase, &directive.technical_surface);

        let key = (directive_id.to_string(), phase);
        let stale = self
            .cache
            .get(&key)
            .is_none_or(|entry| entry.fetched_at.elapsed() >= self.ttl);
        if stale {
            let activations = storage.list_activations(directive_id, phase)?;
            self.cache.insert(
                key.clone(),
                CachedActivations {
                    fetched_at: Instant::now(),
                    activations,
                },
            );
        }

        let activations = self
            .cache
            .get(&key)
            .map(|entry| entry.activations.as_slice())
            .unwrap_or_default();
        Ok(requirement.evaluate(directive_id, activations))
    }

    /// Check against the store, bypassing and refreshing the cache.
    pub fn check_fresh(&mut self, storage: &Storage, directive_id: &str, phase: Phase) -> Result<RequirementCheck> {
        self.cache.remove(&(directive_id.to_string(), phase));
        self.check(storage, directive_id, phase)
    }

    /// Drop every cached lookup for `directive_id`.
    pub fn invalidate(&mut self, directive_id: &str) {
        self.cache.retain(|(id, _), _| id != directive_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::hierarchy::{self, NewDirective};
    use crate::test_utils::TestEnv;

    fn activation(specialist: Specialist, status: ActivationStatus, verdict: Verdict) -> SubAgentActivation {
        SubAgentActivation::new(
            "hma-0000".to_string(),
            "hm-0000".to_string(),
            Phase::Exec,
            specialist,
            status,
            verdict,
        )
    }

    #[test]
    fn test_static_table() {
        assert!(requirements_for(Phase::Lead).is_empty());
        assert!(requirements_for(Phase::Complete).is_empty());
        let exec: Vec<_> = requirements_for(Phase::Exec).iter().map(|r| r.specialist).collect();
        assert_eq!(exec, vec![Specialist::Testing, Specialist::Performance]);
    }

    #[test]
    fn test_plan_fallback_when_no_specific_surface() {
        let req = PhaseRequirement::for_surface(Phase::Plan, &BTreeSet::new());
        assert!(req.required.is_empty());
        assert_eq!(req.any_of.len(), 3);

        let surface: BTreeSet<_> = [TechnicalSurface::Database, TechnicalSurface::Integration]
            .into_iter()
            .collect();
        let req = PhaseRequirement::for_surface(Phase::Plan, &surface);
        assert_eq!(req.required, vec![Specialist::Database, Specialist::Integration]);
        assert!(req.any_of.is_empty());
    }

    #[test]
    fn test_latest_failed_activation_does_not_count() {
        let req = PhaseRequirement::for_surface(Phase::Exec, &BTreeSet::new());
        let acts = vec![
            activation(Specialist::Testing, ActivationStatus::Completed, Verdict::Pass),
            activation(Specialist::Testing, ActivationStatus::Completed, Verdict::Fail),
        ];
        let check = req.evaluate("hm-0000", &acts);
        assert!(!check.met);
        assert_eq!(check.missing, vec!["TESTING"]);
    }

    #[test]
    fn test_skipped_activation_neither_counts_nor_overrides() {
        let req = PhaseRequirement::for_surface(Phase::Exec, &BTreeSet::new());
        let only_skipped = vec![activation(
            Specialist::Testing,
            ActivationStatus::Skipped,
            Verdict::Pass,
        )];
        assert!(!req.evaluate("hm-0000", &only_skipped).met);

        let passed_then_skipped = vec![
            activation(Specialist::Testing, ActivationStatus::Activated, Verdict::Conditional),
            activation(Specialist::Testing, ActivationStatus::Skipped, Verdict::Fail),
        ];
        assert!(req.evaluate("hm-0000", &passed_then_skipped).met);
    }

    #[test]
    fn test_fallback_group_reported_as_alternatives() {
        let req = PhaseRequirement::for_surface(Phase::Plan, &BTreeSet::new());
        let check = req.evaluate("hm-0000", &[]);
        assert_eq!(check.missing, vec!["DATABASE|SECURITY|DESIGN"]);
    }

    #[test]
    fn test_cache_serves_until_fresh_read() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("Cached")).unwrap();
        let mut validator = RequirementValidator::new(Duration::from_secs(3600));

        assert!(!validator.check(&storage, &d.id, Phase::Exec).unwrap().met);

        let mut act = activation(Specialist::Testing, ActivationStatus::Completed, Verdict::Pass);
        act.id = "hma-0001".to_string();
        act.directive_id = d.id.clone();
        storage.record_activation(&act).unwrap();

        assert!(!validator.check(&storage, &d.id, Phase::Exec).unwrap().met);
        assert!(validator.check_fresh(&storage, &d.id, Phase::Exec).unwrap().met);

        validator.invalidate(&d.id);
        assert!(validator.check(&storage, &d.id, Phase::Exec).unwrap().met);
    }

    #[test]
    fn test_cache_entries_expire_after_ttl() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("Expiring")).unwrap();
        let mut validator = RequirementValidator::new(Duration::from_millis(50));
        assert!(!validator.check(&storage, &d.id, Phase::Exec).unwrap().met);

        let mut act = activation(Specialist::Testing, ActivationStatus::Completed, Verdict::Pass);
        act.id = "hma-0002".to_string();
        act.directive_id = d.id.clone();
        storage.record_activation(&act).unwrap();

        std::thread::sleep(Duration::from_millis(80));
        assert!(validator.check(&storage, &d.id, Phase::Exec).unwrap().met);
    }

    #[test]
    fn test_zero_ttl_always_reads_store() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("Uncached")).unwrap();
        let mut validator = RequirementValidator::new(Duration::ZERO);
        assert!(!validator.check(&storage, &d.id, Phase::Exec).unwrap().met);

        let mut act = activation(Specialist::Testing, ActivationStatus::Completed, Verdict::Pass);
        act.id = "hma-0003".to_string();
        act.directive_id = d.id.clone();
        storage.record_activation(&act).unwrap();

        assert!(validator.check(&storage, &d.id, Phase::Exec).unwrap().met);
    }
}
