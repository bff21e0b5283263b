//! Handoff, activation and requirement commands.

use super::{directive_line, json, open, parse_arg, read_input, Output};
use crate::governance::handoff::{self, TransitionOutcome};
use crate::governance::requirements::{
    requirements_for, PhaseRequirement, RequirementCheck, RequirementRule, RequirementValidator, Trigger,
};
use crate::models::{
    ActivationStatus, HandoffPacket, PacketContent, Phase, Specialist, SubAgentActivation, Verdict,
};
use crate::storage::{validate_directive_id, ACTIVATION_PREFIX};
use crate::{Error, Result};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Result of an accepted `hm handoff request`.
#[derive(Serialize)]
pub struct TransitionResult {
    pub accepted: bool,
    #[serde(flatten)]
    pub outcome: TransitionOutcome,
}

impl Output for TransitionResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let o = &self.outcome;
        let mut lines = vec![
            format!(
                "Accepted {} {} -> {}",
                o.packet.id, o.packet.from_phase, o.packet.to_phase
            ),
            format!("  {}", directive_line(&o.directive)),
        ];
        for step in &o.rollup {
            let done = if step.auto_completed { " (completed)" } else { "" };
            lines.push(format!("  rollup {} -> {}%{}", step.directive_id, step.progress, done));
        }
        if !o.resolved_violations.is_empty() {
            lines.push(format!("  resolved violations: {}", o.resolved_violations.join(", ")));
        }
        lines.join("\n")
    }
}

/// Request a phase transition with a packet read from `packet_source`.
pub fn handoff_request(
    repo_path: &Path,
    id: &str,
    from: &str,
    to: &str,
    packet_source: &str,
    cache_ttl: Duration,
) -> Result<TransitionResult> {
    validate_directive_id(id)?;
    let from: Phase = parse_arg(from)?;
    let to: Phase = parse_arg(to)?;
    let content: PacketContent = serde_json::from_str(&read_input(packet_source)?)
        .map_err(|e| Error::InvalidInput(format!("Invalid handoff packet: {}", e)))?;

    let mut storage = open(repo_path)?;
    let mut validator = RequirementValidator::new(cache_ttl);
    let outcome = handoff::request_transition(&mut storage, &mut validator, id, from, to, content)?;
    Ok(TransitionResult {
        accepted: true,
        outcome,
    })
}

/// Handoff packets of one directive.
#[derive(Serialize)]
pub struct HandoffList {
    pub directive_id: String,
    pub handoffs: Vec<HandoffPacket>,
    pub count: usize,
}

impl Output for HandoffList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.handoffs.is_empty() {
            return format!("No handoffs for {}.", self.directive_id);
        }
        self.handoffs
            .iter()
            .map(|p| {
                let mut line = format!(
                    "{} {} -> {} {}{}",
                    p.id,
                    p.from_phase,
                    p.to_phase,
                    p.status,
                    if p.system { " (system)" } else { "" }
                );
                if let Some(r) = &p.rejection {
                    line.push_str(&format!(": {} {}", r.code, r.detail));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn handoff_list(repo_path: &Path, id: &str) -> Result<HandoffList> {
    validate_directive_id(id)?;
    let storage = open(repo_path)?;
    let handoffs = handoff::list_handoffs(&storage, id)?;
    Ok(HandoffList {
        directive_id: id.to_string(),
        count: handoffs.len(),
        handoffs,
    })
}

/// Arguments of `hm activation record`.
#[derive(Debug, Clone)]
pub struct ActivationArgs {
    pub id: String,
    pub phase: String,
    pub specialist: String,
    pub status: String,
    pub verdict: String,
    pub summary: Option<String>,
}

/// A recorded activation.
#[derive(Serialize)]
pub struct ActivationResult {
    #[serde(flatten)]
    pub activation: SubAgentActivation,
}

impl Output for ActivationResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let a = &self.activation;
        format!(
            "Recorded {}: {} at {} for {} ({:?}, {:?})",
            a.id, a.specialist, a.phase, a.directive_id, a.status, a.verdict
        )
    }
}

pub fn activation_record(repo_path: &Path, args: ActivationArgs) -> Result<ActivationResult> {
    validate_directive_id(&args.id)?;
    let phase: Phase = parse_arg(&args.phase)?;
    let specialist: Specialist = parse_arg(&args.specialist)?;
    let status: ActivationStatus = parse_arg(&args.status)?;
    let verdict: Verdict = parse_arg(&args.verdict)?;

    let mut storage = open(repo_path)?;
    storage.get_directive(&args.id)?;
    let activation_id = storage.generate_unique_id(ACTIVATION_PREFIX, &args.id)?;
    let mut activation =
        SubAgentActivation::new(activation_id, args.id.clone(), phase, specialist, status, verdict);
    activation.summary = args.summary;
    storage.record_activation(&activation)?;
    tracing::debug!(directive = %args.id, specialist = %specialist, phase = %phase, "activation recorded");
    Ok(ActivationResult { activation })
}

/// Activations of a directive in one phase.
#[derive(Serialize)]
pub struct ActivationList {
    pub activations: Vec<SubAgentActivation>,
    pub count: usize,
}

impl Output for ActivationList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.activations.is_empty() {
            return "No activations.".to_string();
        }
        self.activations
            .iter()
            .map(|a| format!("{} {} {:?} {:?}", a.id, a.specialist, a.status, a.verdict))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn activation_list(repo_path: &Path, id: &str, phase: &str) -> Result<ActivationList> {
    validate_directive_id(id)?;
    let phase: Phase = parse_arg(phase)?;
    let storage = open(repo_path)?;
    storage.get_directive(id)?;
    let activations = storage.list_activations(id, phase)?;
    Ok(ActivationList {
        count: activations.len(),
        activations,
    })
}

/// Result of `hm requirements show`.
#[derive(Serialize)]
pub struct RequirementsShow {
    pub phase: Phase,
    pub rules: Vec<RequirementRule>,
    /// Present when resolved for a directive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<PhaseRequirement>,
}

impl Output for RequirementsShow {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let codes = |list: &[Specialist]| {
            list.iter().map(|s| s.code()).collect::<Vec<_>>().join(", ")
        };
        match &self.resolved {
            Some(req) => {
                let mut lines = vec![format!("{} requires: {}", self.phase, codes(&req.required))];
                if !req.any_of.is_empty() {
                    lines.push(format!("  and one of: {}", codes(&req.any_of)));
                }
                lines.join("\n")
            }
            None if self.rules.is_empty() => format!("{} requires no specialists", self.phase),
            None => self
                .rules
                .iter()
                .map(|r| {
                    let when = match r.trigger {
                        Trigger::Always => "always".to_string(),
                        Trigger::Surface(s) => format!("if {}", s),
                    };
                    format!("{} {} ({})", self.phase, r.specialist, when)
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

pub fn requirements_show(repo_path: &Path, phase: &str, directive: Option<&str>) -> Result<RequirementsShow> {
    let phase: Phase = parse_arg(phase)?;
    let resolved = match directive {
        Some(id) => {
            validate_directive_id(id)?;
            let storage = open(repo_path)?;
            let d = storage.get_directive(id)?;
            Some(PhaseRequirement::for_surface(phase, &d.technical_surface))
        }
        None => None,
    };
    Ok(RequirementsShow {
        phase,
        rules: requirements_for(phase),
        resolved,
    })
}

/// Result of `hm requirements check`.
#[derive(Serialize)]
pub struct RequirementsCheckResult {
    #[serde(flatten)]
    pub check: RequirementCheck,
}

impl Output for RequirementsCheckResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let c = &self.check;
        if c.met {
            format!("{} meets {} requirements", c.directive_id, c.phase)
        } else {
            format!(
                "{} does not meet {} requirements; missing: {}",
                c.directive_id,
                c.phase,
                c.missing.join(", ")
            )
        }
    }
}

/// Advisory check; reads through the activation cache (`activation-cache-ttl`).
pub fn requirements_check(
    repo_path: &Path,
    id: &str,
    phase: &str,
    cache_ttl: Duration,
) -> Result<RequirementsCheckResult> {
    validate_directive_id(id)?;
    let phase: Phase = parse_arg(phase)?;
    let storage = open(repo_path)?;
    let mut validator = RequirementValidator::new(cache_ttl);
    Ok(RequirementsCheckResult {
        check: validator.check(&storage, id, phase)?,
    })
}
