//! Phase handoff state machine.
//!
//! `LEAD -> PLAN -> EXEC -> PLAN_VERIFY -> LEAD_FINAL -> COMPLETE`, one step
//! per accepted request. A request passes four gates in order: phase order,
//! packet completeness, specialist requirements of the phase being left, and
//! dependency clearance. Every attempt is persisted; rejections keep the
//! failing rule on the packet.

use crate::governance::remediation;
use crate::governance::requirements::RequirementValidator;
use crate::governance::rollup::{self, RollupStep};
use crate::models::{
    Directive, DirectiveStatus, HandoffPacket, HandoffStatus, PacketContent, Phase, Rejection,
};
use crate::storage::{Storage, HANDOFF_PREFIX};
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;

/// Result of an accepted transition.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub packet: HandoffPacket,
    pub directive: Directive,
    /// Ancestor progress updates triggered by a child completing
    pub rollup: Vec<RollupStep>,
    /// Violations resolved because a remediation directive completed
    pub resolved_violations: Vec<String>,
}

/// Request `directive_id` to move from `from` to `to`.
///
/// Every failure after the packet is recorded marks it rejected with the
/// failing rule. The phase change and the packet acceptance are committed
/// together, and only if the directive is still at `from`.
pub fn request_transition(
    storage: &mut Storage,
    validator: &mut RequirementValidator,
    directive_id: &str,
    from: Phase,
    to: Phase,
    content: PacketContent,
) -> Result<TransitionOutcome> {
    storage.get_directive(directive_id)?;
    let id = storage.generate_unique_id(HANDOFF_PREFIX, directive_id)?;
    let mut packet = HandoffPacket::new(id, directive_id.to_string(), from, to, content);
    storage.save_handoff(&packet)?;

    let directive = match admit(storage, validator, &mut packet) {
        Ok(directive) => directive,
        Err(err) => return Err(reject(storage, packet, err)),
    };
    validator.invalidate(directive_id);
    tracing::info!(directive = directive_id, %from, %to, packet = %packet.id, "transition accepted");

    // The transition is committed; follow-up failures are logged, not returned.
    let mut resolved_violations = Vec::new();
    let mut steps = Vec::new();
    if to == Phase::Complete {
        match remediation::resolve_for_completed(storage, &directive) {
            Ok(ids) => resolved_violations = ids,
            Err(e) => tracing::error!(directive = directive_id, error = %e, "failed to resolve linked violations"),
        }
        if let Some(parent_id) = &directive.parent_id {
            match rollup::recompute(storage, parent_id) {
                Ok(rolled) => steps = rolled,
                Err(e) => tracing::error!(directive = directive_id, parent = %parent_id, error = %e, "rollup failed"),
            }
        }
    }

    Ok(TransitionOutcome {
        packet,
        directive: storage.get_directive(directive_id).unwrap_or(directive),
        rollup: steps,
        resolved_violations,
    })
}

/// Run every gate, then commit. Returns the directive as committed.
fn admit(
    storage: &mut Storage,
    validator: &mut RequirementValidator,
    packet: &mut HandoffPacket,
) -> Result<Directive> {
    let (from, to) = (packet.from_phase, packet.to_phase);
    let directive = storage.get_directive(&packet.directive_id)?;
    check_gates(storage, validator, &directive, packet)?;

    // Preconditions are re-read right before commit.
    let mut directive = storage.get_directive(&packet.directive_id)?;
    check_phase(&directive, from, to)?;
    check_dependencies(storage, &directive, to)?;

    let now = Utc::now();
    packet.status = HandoffStatus::Accepted;
    packet.decided_at = Some(now);
    directive.current_phase = to;
    apply_status_effects(&mut directive, to);
    directive.updated_at = now;

    if !storage.commit_transition(&directive, packet)? {
        return Err(Error::OutOfOrder {
            from: from.to_string(),
            to: to.to_string(),
            detail: format!("{} left {} before this request was committed", directive.id, from),
        });
    }
    Ok(directive)
}

fn check_gates(
    storage: &Storage,
    validator: &mut RequirementValidator,
    directive: &Directive,
    packet: &HandoffPacket,
) -> Result<()> {
    check_phase(directive, packet.from_phase, packet.to_phase)?;

    let missing = packet.content.missing_fields();
    if !missing.is_empty() {
        return Err(Error::IncompletePacket {
            missing: missing.into_iter().map(String::from).collect(),
        });
    }

    let check = validator.check_fresh(storage, &directive.id, packet.from_phase)?;
    if !check.met {
        return Err(Error::UnmetRequirements {
            phase: packet.from_phase.to_string(),
            missing: check.missing,
        });
    }

    check_dependencies(storage, directive, packet.to_phase)
}

fn check_phase(directive: &Directive, from: Phase, to: Phase) -> Result<()> {
    let out_of_order = |detail: String| Error::OutOfOrder {
        from: from.to_string(),
        to: to.to_string(),
        detail,
    };
    if from.next() != Some(to) {
        return Err(out_of_order(format!(
            "{} is not the immediate successor of {}",
            to, from
        )));
    }
    if directive.current_phase != from {
        return Err(out_of_order(format!(
            "{} is at {}",
            directive.id, directive.current_phase
        )));
    }
    if directive.status.is_terminal() {
        return Err(out_of_order(format!("{} is {}", directive.id, directive.status)));
    }
    Ok(())
}

/// A child waits for its chain predecessor; a parent cannot complete before its children.
fn check_dependencies(storage: &Storage, directive: &Directive, to: Phase) -> Result<()> {
    let mut blocking = Vec::new();

    if directive.parent_id.is_some() {
        let graph = storage.load_graph()?;
        if let Some(before) = graph.predecessor(&directive.id) {
            if storage.get_directive(before)?.status != DirectiveStatus::Completed {
                blocking.push(before.to_string());
            }
        }
    }

    if to == Phase::Complete && directive.is_parent() {
        blocking.extend(
            storage
                .get_children(&directive.id)?
                .into_iter()
                .filter(|c| c.status != DirectiveStatus::Completed)
                .map(|c| c.id),
        );
    }

    if blocking.is_empty() {
        Ok(())
    } else {
        Err(Error::DependencyNotCleared {
            directive: directive.id.clone(),
            blocking,
        })
    }
}

fn apply_status_effects(directive: &mut Directive, to: Phase) {
    match to {
        Phase::Plan => {
            if matches!(
                directive.status,
                DirectiveStatus::Draft | DirectiveStatus::PendingApproval
            ) {
                directive.status = DirectiveStatus::Active;
            }
        }
        Phase::Exec => directive.status = DirectiveStatus::InProgress,
        Phase::Complete => {
            directive.status = DirectiveStatus::Completed;
            directive.completed_at = Some(Utc::now());
            if !directive.is_parent() {
                directive.progress = 100;
            }
        }
        _ => {}
    }
}

fn reject(storage: &mut Storage, mut packet: HandoffPacket, err: Error) -> Error {
    packet.status = HandoffStatus::Rejected;
    packet.rejection = Some(Rejection {
        code: err.code().to_string(),
        detail: err.to_string(),
    });
    packet.decided_at = Some(Utc::now());
    if let Err(e) = storage.save_handoff(&packet) {
        tracing::error!(packet = %packet.id, error = %e, "failed to record rejection");
    }

    if err.category() == "gating" {
        tracing::warn!(
            directive = %packet.directive_id,
            from = %packet.from_phase,
            to = %packet.to_phase,
            code = err.code(),
            "transition rejected"
        );
    } else {
        tracing::error!(directive = %packet.directive_id, error = %err, "transition failed");
    }
    err
}

/// Record the accepted packet for a parent completed by rollup.
pub(crate) fn record_system_completion(
    storage: &mut Storage,
    parent: &Directive,
    from: Phase,
    children: &[Directive],
) -> Result<HandoffPacket> {
    let ids: Vec<&str> = children.iter().map(|c| c.id.as_str()).collect();
    let content = PacketContent {
        executive_summary: format!("All {} children of {} completed", children.len(), parent.id),
        deliverables_manifest: format!("Child directives: {}", ids.join(", ")),
        completeness_report: format!("100% ({0}/{0} children completed)", children.len()),
        key_decisions: "Completed automatically by progress rollup".to_string(),
        known_issues: "None recorded".to_string(),
        resource_utilization: "Not tracked for automatic completion".to_string(),
        action_items: "None".to_string(),
    };

    let id = storage.generate_unique_id(HANDOFF_PREFIX, &parent.id)?;
    let mut packet = HandoffPacket::new(id, parent.id.clone(), from, Phase::Complete, content);
    packet.status = HandoffStatus::Accepted;
    packet.system = true;
    packet.decided_at = Some(packet.created_at);
    storage.save_handoff(&packet)?;
    Ok(packet)
}

/// Handoff history of a directive, oldest first.
pub fn list_handoffs(storage: &Storage, directive_id: &str) -> Result<Vec<HandoffPacket>> {
    storage.get_directive(directive_id)?;
    storage.list_handoffs(directive_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::hierarchy::{self, NewDirective};
    use crate::governance::requirements::PhaseRequirement;
    use crate::models::{ActivationStatus, SubAgentActivation, Verdict};
    use crate::storage::{Record, ACTIVATION_PREFIX};
    use crate::test_utils::TestEnv;
    use std::sync::Barrier;
    use std::thread;

    fn full_packet() -> PacketContent {
        PacketContent {
            executive_summary: "Phase work finished".to_string(),
            deliverables_manifest: "schema.sql".to_string(),
            completeness_report: "100%".to_string(),
            key_decisions: "Use existing tables".to_string(),
            known_issues: "None".to_string(),
            resource_utilization: "1 day".to_string(),
            action_items: "Review".to_string(),
        }
    }

    /// Record passing activations for everything `phase` needs.
    fn satisfy(storage: &mut Storage, id: &str, phase: Phase) {
        let directive = storage.get_directive(id).unwrap();
        let req = PhaseRequirement::for_surface(phase, &directive.technical_surface);
        let mut needed = req.required.clone();
        needed.extend(req.any_of.first().copied());
        for specialist in needed {
            let act = SubAgentActivation::new(
                storage.generate_unique_id(ACTIVATION_PREFIX, id).unwrap(),
                id.to_string(),
                phase,
                specialist,
                ActivationStatus::Completed,
                Verdict::Pass,
            );
            storage.record_activation(&act).unwrap();
        }
    }

    fn advance(storage: &mut Storage, id: &str, from: Phase) -> Result<TransitionOutcome> {
        satisfy(storage, id, from);
        let to = from.next().unwrap();
        request_transition(
            storage,
            &mut RequirementValidator::default(),
            id,
            from,
            to,
            full_packet(),
        )
    }

    #[test]
    fn test_skipping_a_phase_is_out_of_order() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("Skip")).unwrap();

        let err = request_transition(
            &mut storage,
            &mut RequirementValidator::default(),
            &d.id,
            Phase::Lead,
            Phase::Exec,
            full_packet(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { .. }));

        assert_eq!(storage.get_directive(&d.id).unwrap().current_phase, Phase::Lead);
        let history = storage.list_handoffs(&d.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, HandoffStatus::Rejected);
        assert_eq!(history[0].rejection.as_ref().unwrap().code, "OutOfOrder");
    }

    #[test]
    fn test_incomplete_packet_rejected() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("Thin")).unwrap();

        let mut content = full_packet();
        content.known_issues = String::new();
        let err = request_transition(
            &mut storage,
            &mut RequirementValidator::default(),
            &d.id,
            Phase::Lead,
            Phase::Plan,
            content,
        )
        .unwrap_err();
        match err {
            Error::IncompletePacket { missing } => assert_eq!(missing, vec!["known_issues"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unmet_requirements_rejected() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("Plan")).unwrap();
        advance(&mut storage, &d.id, Phase::Lead).unwrap();

        let err = request_transition(
            &mut storage,
            &mut RequirementValidator::default(),
            &d.id,
            Phase::Plan,
            Phase::Exec,
            full_packet(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnmetRequirements { .. }));
    }

    #[test]
    fn test_full_lifecycle_sets_status() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("Whole")).unwrap();

        let out = advance(&mut storage, &d.id, Phase::Lead).unwrap();
        assert_eq!(out.directive.status, DirectiveStatus::Active);
        let out = advance(&mut storage, &d.id, Phase::Plan).unwrap();
        assert_eq!(out.directive.status, DirectiveStatus::InProgress);
        advance(&mut storage, &d.id, Phase::Exec).unwrap();
        advance(&mut storage, &d.id, Phase::PlanVerify).unwrap();
        let out = advance(&mut storage, &d.id, Phase::LeadFinal).unwrap();

        assert_eq!(out.directive.current_phase, Phase::Complete);
        assert_eq!(out.directive.status, DirectiveStatus::Completed);
        assert_eq!(out.directive.progress, 100);
        assert_eq!(out.packet.status, HandoffStatus::Accepted);
    }

    #[test]
    fn test_chained_child_waits_for_predecessor() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let parent = hierarchy::create_directive(&mut storage, NewDirective::titled("Parent")).unwrap();
        let kids = hierarchy::decompose(
            &mut storage,
            &parent.id,
            vec![NewDirective::titled("first"), NewDirective::titled("second")],
        )
        .unwrap();

        let err = advance(&mut storage, &kids[1].id, Phase::Plan).unwrap_err();
        match err {
            Error::DependencyNotCleared { blocking, .. } => assert_eq!(blocking, vec![kids[0].id.clone()]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            storage.get_directive(&kids[1].id).unwrap().current_phase,
            Phase::Plan
        );

        // The head of the chain is free to move.
        advance(&mut storage, &kids[0].id, Phase::Plan).unwrap();
    }

    #[test]
    fn test_child_completion_completes_parent() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let parent = hierarchy::create_directive(&mut storage, NewDirective::titled("Parent")).unwrap();
        let child = hierarchy::create_directive(
            &mut storage,
            NewDirective::titled("Only child").with_parent(&parent.id),
        )
        .unwrap();

        let mut phase = Phase::Plan;
        let mut last = None;
        while phase != Phase::Complete {
            last = Some(advance(&mut storage, &child.id, phase).unwrap());
            phase = phase.next().unwrap();
        }

        let out = last.unwrap();
        assert_eq!(out.rollup.len(), 1);
        assert!(out.rollup[0].auto_completed);

        let parent = storage.get_directive(&parent.id).unwrap();
        assert_eq!(parent.status, DirectiveStatus::Completed);
        assert_eq!(parent.progress, 100);
        assert!(list_handoffs(&storage, &parent.id).unwrap().iter().any(|p| p.system));
    }

    #[test]
    fn test_parent_cannot_complete_before_children() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let parent = hierarchy::create_directive(&mut storage, NewDirective::titled("Parent")).unwrap();
        hierarchy::create_directive(&mut storage, NewDirective::titled("Kid").with_parent(&parent.id))
            .unwrap();

        let mut p = storage.get_directive(&parent.id).unwrap();
        p.current_phase = Phase::LeadFinal;
        storage.update_directive(&p).unwrap();

        let err = advance(&mut storage, &parent.id, Phase::LeadFinal).unwrap_err();
        assert!(matches!(err, Error::DependencyNotCleared { .. }));
    }

    #[test]
    fn test_stale_from_phase_is_rejected() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("Stale")).unwrap();
        advance(&mut storage, &d.id, Phase::Lead).unwrap();

        let err = advance(&mut storage, &d.id, Phase::Lead).unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { .. }));
        assert_eq!(storage.get_directive(&d.id).unwrap().current_phase, Phase::Plan);
    }

    #[test]
    fn test_concurrent_requests_accept_once() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();

        for round in 0..20 {
            let d = hierarchy::create_directive(
                &mut storage,
                NewDirective::titled(format!("Raced {}", round)),
            )
            .unwrap();
            let barrier = Barrier::new(2);

            let results: Vec<Result<TransitionOutcome>> = thread::scope(|scope| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        let (env, barrier, id) = (&env, &barrier, d.id.as_str());
                        scope.spawn(move || {
                            let mut handle = env.open_storage();
                            barrier.wait();
                            request_transition(
                                &mut handle,
                                &mut RequirementValidator::default(),
                                id,
                                Phase::Lead,
                                Phase::Plan,
                                full_packet(),
                            )
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "round {}", round);
            assert!(results.iter().any(|r| matches!(r, Err(Error::OutOfOrder { .. }))));

            let history = storage.list_handoffs(&d.id).unwrap();
            let accepted = history.iter().filter(|p| p.status == HandoffStatus::Accepted).count();
            let rejected = history.iter().filter(|p| p.status == HandoffStatus::Rejected).count();
            assert_eq!((accepted, rejected), (1, 1));
            assert_eq!(storage.get_directive(&d.id).unwrap().current_phase, Phase::Plan);
        }
    }

    #[test]
    fn test_store_failure_marks_packet_rejected() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = hierarchy::create_directive(&mut storage, NewDirective::titled("Broken")).unwrap();

        // Activation lookups now fail with an I/O error.
        let activations = storage.root().join(SubAgentActivation::FILE);
        std::fs::remove_file(&activations).unwrap();
        std::fs::create_dir(&activations).unwrap();

        let err = request_transition(
            &mut storage,
            &mut RequirementValidator::default(),
            &d.id,
            Phase::Lead,
            Phase::Plan,
            full_packet(),
        )
        .unwrap_err();
        assert_eq!(err.category(), "store");

        let history = storage.list_handoffs(&d.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, HandoffStatus::Rejected);
        assert_eq!(history[0].rejection.as_ref().unwrap().code, err.code());
        assert_eq!(storage.get_directive(&d.id).unwrap().current_phase, Phase::Lead);
    }
}
