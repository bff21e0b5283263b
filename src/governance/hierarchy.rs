//! Directive hierarchy: creation, exclusive parent ownership and sibling
//! dependency chains.
//!
//! Structural checks run against a
//! [`DirectiveGraph`](crate::models::graph::DirectiveGraph) snapshot loaded
//! from the store at the start of each operation; single parent ownership and
//! uniqueness of chain links are enforced again by the store at write time.

use crate::governance::{contracts, rollup};
use crate::governance::rollup::RollupStep;
use crate::models::graph::ParentLink;
use crate::models::{
    ContractRef, DependencyEdge, Directive, DirectiveStatus, Phase, Priority, RelationshipType,
    TechnicalSurface,
};
use crate::storage::{DirectiveGuard, Storage, DIRECTIVE_PREFIX};
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Input for [`create_directive`].
#[derive(Debug, Clone, Default)]
pub struct NewDirective {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub technical_surface: BTreeSet<TechnicalSurface>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub parent_id: Option<String>,
}

impl NewDirective {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_surface(mut self, surface: TechnicalSurface) -> Self {
        self.technical_surface.insert(surface);
        self
    }
}

/// Result of [`set_parent`].
#[derive(Debug, Clone, Serialize)]
pub struct SetParentOutcome {
    pub child: Directive,
    pub parent: Directive,
    /// False if the child already had this parent
    pub changed: bool,
    pub inherited_contracts: Vec<ContractRef>,
    pub rollup: Vec<RollupStep>,
}

/// Result of [`detach`].
#[derive(Debug, Clone, Serialize)]
pub struct DetachOutcome {
    pub child: Directive,
    pub former_parent: Directive,
    pub rollup: Vec<RollupStep>,
}

/// Recommended next step for a directive, typically a parent orchestrating children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NextAction {
    LeadToPlan,
    PlanToExec,
    WorkOnChild { child_id: String, title: String, phase: Phase },
    FinalizeParent,
    /// Non-parent directive past PLAN: request its next handoff
    Advance { to: Phase },
    Waiting { blocked_by: Vec<String> },
    Done,
}

impl NextAction {
    pub fn code(&self) -> &'static str {
        match self {
            NextAction::LeadToPlan => "LEAD_TO_PLAN",
            NextAction::PlanToExec => "PLAN_TO_EXEC",
            NextAction::WorkOnChild { .. } => "WORK_ON_CHILD",
            NextAction::FinalizeParent => "FINALIZE_PARENT",
            NextAction::Advance { .. } => "ADVANCE",
            NextAction::Waiting { .. } => "WAITING",
            NextAction::Done => "DONE",
        }
    }
}

/// Structural report produced by [`validate_children`].
#[derive(Debug, Clone, Serialize)]
pub struct ChildrenReport {
    pub directive_id: String,
    pub valid: bool,
    pub child_count: usize,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

/// Create a directive, attaching it to `parent_id` when given.
pub fn create_directive(storage: &mut Storage, new: NewDirective) -> Result<Directive> {
    let title = new.title.trim().to_string();
    if title.is_empty() {
        return Err(Error::InvalidInput("Title must not be empty".to_string()));
    }
    if let Some(parent_id) = &new.parent_id {
        ensure_can_own_children(&storage.get_directive(parent_id)?)?;
    }

    let id = storage.generate_unique_id(DIRECTIVE_PREFIX, &title)?;
    let mut directive = Directive::new(id, title);
    directive.description = new.description;
    directive.priority = new.priority;
    directive.technical_surface = new.technical_surface;
    directive.metadata = new.metadata;
    storage.create_directive(&directive)?;
    tracing::debug!(directive = %directive.id, "created directive");

    match new.parent_id {
        Some(parent_id) => Ok(set_parent(storage, &directive.id, &parent_id)?.child),
        None => Ok(directive),
    }
}

/// Terminal directives take no new children or contracts.
pub(crate) fn ensure_can_own_children(parent: &Directive) -> Result<()> {
    if parent.status.is_terminal() {
        return Err(Error::InvalidInput(format!(
            "{} is {} and cannot take new children or contracts",
            parent.id, parent.status
        )));
    }
    Ok(())
}

/// Place `child_id` under `parent_id`.
///
/// Re-setting the current parent is a no-op. Moving a child to a different
/// parent requires [`detach`] first.
pub fn set_parent(storage: &mut Storage, child_id: &str, parent_id: &str) -> Result<SetParentOutcome> {
    let mut child = storage.get_directive(child_id)?;
    let mut parent = storage.get_directive(parent_id)?;
    let mut graph = storage.load_graph()?;

    if graph.check_parent(child_id, parent_id)? == ParentLink::Existing {
        return Ok(SetParentOutcome {
            inherited_contracts: child.inherited_contracts(),
            child,
            parent,
            changed: false,
            rollup: Vec::new(),
        });
    }
    ensure_can_own_children(&parent)?;

    let now = Utc::now();
    child.parent_id = Some(parent_id.to_string());
    if !child.is_parent() {
        child.relationship_type = RelationshipType::Child;
    }
    if child.current_phase == Phase::Lead {
        // The parent's LEAD approval covers its children.
        child.current_phase = Phase::Plan;
    }
    child.updated_at = now;
    // The snapshot may be stale; the store has the final say on ownership.
    if !storage.update_directive_if(&child, DirectiveGuard::ParentFreeOr(parent_id))? {
        let existing = storage.get_directive(child_id)?.parent_id.unwrap_or_default();
        return Err(Error::MultipleParents {
            child: child_id.to_string(),
            existing,
        });
    }

    if parent.relationship_type != RelationshipType::Parent {
        parent.relationship_type = RelationshipType::Parent;
        parent.updated_at = now;
        storage.update_directive(&parent)?;
    }

    graph.attach(child_id, parent_id);
    contracts::refresh_subtree(storage, &graph, child_id)?;
    let steps = rollup::recompute(storage, parent_id)?;

    tracing::info!(child = child_id, parent = parent_id, "set parent");
    let child = storage.get_directive(child_id)?;
    Ok(SetParentOutcome {
        inherited_contracts: child.inherited_contracts(),
        child,
        parent: storage.get_directive(parent_id)?,
        changed: true,
        rollup: steps,
    })
}

/// Remove `child_id` from its parent. Children that are part of a dependency
/// chain cannot be detached.
pub fn detach(storage: &mut Storage, child_id: &str) -> Result<DetachOutcome> {
    let mut child = storage.get_directive(child_id)?;
    let Some(parent_id) = child.parent_id.clone() else {
        return Err(Error::InvalidInput(format!("{} has no parent", child_id)));
    };
    let mut graph = storage.load_graph()?;
    if graph.has_chain_links(child_id) {
        return Err(Error::InvalidChain(format!(
            "{} is part of the dependency chain of {}; chains are immutable",
            child_id, parent_id
        )));
    }

    let now = Utc::now();
    child.parent_id = None;
    if child.relationship_type == RelationshipType::Child {
        child.relationship_type = RelationshipType::Standalone;
    }
    child.updated_at = now;
    storage.update_directive(&child)?;

    graph.detach(child_id);
    contracts::refresh_subtree(storage, &graph, child_id)?;

    let mut steps = Vec::new();
    if graph.children_of(&parent_id).is_empty() {
        let mut parent = storage.get_directive(&parent_id)?;
        parent.relationship_type = RelationshipType::Standalone;
        parent.updated_at = now;
        storage.update_directive(&parent)?;
    } else {
        steps = rollup::recompute(storage, &parent_id)?;
    }

    tracing::info!(child = child_id, parent = %parent_id, "detached");
    Ok(DetachOutcome {
        child: storage.get_directive(child_id)?,
        former_parent: storage.get_directive(&parent_id)?,
        rollup: steps,
    })
}

/// Link `before_id -> after_id` in the sibling chain of `parent_id`.
///
/// Chains may only grow while no sibling has advanced past its starting phase.
pub fn add_dependency_edge(
    storage: &mut Storage,
    parent_id: &str,
    before_id: &str,
    after_id: &str,
) -> Result<DependencyEdge> {
    storage.get_directive(parent_id)?;
    let graph = storage.load_graph()?;
    graph.check_chain_edge(parent_id, before_id, after_id)?;

    for sibling in storage.get_children(parent_id)? {
        if sibling.current_phase > Phase::Plan || storage.has_accepted_handoff(&sibling.id)? {
            return Err(Error::InvalidChain(format!(
                "chain of {} is fixed: {} has already advanced",
                parent_id, sibling.id
            )));
        }
    }

    let edge = DependencyEdge::new(
        parent_id.to_string(),
        before_id.to_string(),
        after_id.to_string(),
    );
    storage.add_edge(&edge)?;
    tracing::debug!(parent = parent_id, before = before_id, after = after_id, "chain edge");
    Ok(edge)
}

/// Direct children in execution order.
pub fn get_children(storage: &Storage, parent_id: &str) -> Result<Vec<Directive>> {
    storage.get_directive(parent_id)?;
    let graph = storage.load_graph()?;
    let mut children = storage.get_children(parent_id)?;
    let order = graph.chain_order(parent_id);
    children.sort_by_key(|c| order.iter().position(|id| *id == c.id).unwrap_or(usize::MAX));
    Ok(children)
}

/// Ancestors of `id`, nearest first.
pub fn get_ancestor_chain(storage: &Storage, id: &str) -> Result<Vec<Directive>> {
    storage.get_directive(id)?;
    let graph = storage.load_graph()?;
    graph
        .ancestors(id)
        .into_iter()
        .map(|ancestor| storage.get_directive(ancestor))
        .collect()
}

/// Create `children` under `parent_id` and chain them in the given order.
pub fn decompose(
    storage: &mut Storage,
    parent_id: &str,
    children: Vec<NewDirective>,
) -> Result<Vec<Directive>> {
    let parent = storage.get_directive(parent_id)?;
    ensure_can_own_children(&parent)?;
    if children.is_empty() {
        return Err(Error::InvalidInput(
            "Decomposition needs at least one child".to_string(),
        ));
    }
    if children.iter().any(|c| c.title.trim().is_empty()) {
        return Err(Error::InvalidInput("Title must not be empty".to_string()));
    }
    if !storage.get_children(parent_id)?.is_empty() {
        return Err(Error::InvalidInput(format!(
            "{} is already decomposed",
            parent_id
        )));
    }

    let mut created: Vec<Directive> = Vec::with_capacity(children.len());
    for new in children {
        let child = create_directive(storage, new.with_parent(parent_id))?;
        if let Some(previous) = created.last() {
            add_dependency_edge(storage, parent_id, &previous.id, &child.id)?;
        }
        created.push(child);
    }

    tracing::info!(parent = parent_id, children = created.len(), "decomposed");
    created
        .iter()
        .map(|c| storage.get_directive(&c.id))
        .collect()
}

/// Set progress of a leaf or standalone directive and roll it up.
pub fn set_progress(storage: &mut Storage, id: &str, progress: u8) -> Result<(Directive, Vec<RollupStep>)> {
    if progress > 100 {
        return Err(Error::InvalidInput(format!(
            "Progress must be between 0 and 100, got {}",
            progress
        )));
    }
    let mut directive = storage.get_directive(id)?;
    if directive.is_parent() {
        return Err(Error::InvalidInput(format!(
            "Progress of parent {} is derived from its children",
            id
        )));
    }
    if directive.status.is_terminal() {
        return Err(Error::InvalidInput(format!("{} is {}", id, directive.status)));
    }

    directive.progress = progress;
    directive.updated_at = Utc::now();
    storage.update_directive(&directive)?;

    let steps = match directive.parent_id.clone() {
        Some(parent_id) => rollup::recompute(storage, &parent_id)?,
        None => Vec::new(),
    };
    Ok((storage.get_directive(id)?, steps))
}

/// Manually move a directive's status. `completed` is only reachable through
/// the handoff lifecycle.
pub fn set_status(storage: &mut Storage, id: &str, status: DirectiveStatus) -> Result<Directive> {
    if status == DirectiveStatus::Completed {
        return Err(Error::InvalidInput(
            "completed is reached only through the phase lifecycle".to_string(),
        ));
    }
    let mut directive = storage.get_directive(id)?;
    if directive.status.is_terminal() {
        return Err(Error::InvalidInput(format!(
            "{} is already {}",
            id, directive.status
        )));
    }

    directive.status = status;
    directive.updated_at = Utc::now();
    storage.update_directive(&directive)?;

    if status == DirectiveStatus::Cancelled {
        let released = storage.release_claims(id)?;
        tracing::info!(directive = id, released, "cancelled");
    }
    Ok(directive)
}

/// Recommend what to do next with `id`.
pub fn next_action(storage: &Storage, id: &str) -> Result<NextAction> {
    let directive = storage.get_directive(id)?;
    if directive.status.is_terminal() {
        return Ok(NextAction::Done);
    }
    match directive.current_phase {
        Phase::Lead => return Ok(NextAction::LeadToPlan),
        Phase::Plan => return Ok(NextAction::PlanToExec),
        Phase::Complete => return Ok(NextAction::Done),
        _ => {}
    }
    if !directive.is_parent() {
        let to = directive.current_phase.next().unwrap_or(Phase::Complete);
        return Ok(NextAction::Advance { to });
    }

    let graph = storage.load_graph()?;
    let children = get_children(storage, id)?;
    if children.iter().all(|c| c.status == DirectiveStatus::Completed) {
        return Ok(NextAction::FinalizeParent);
    }

    let mut cancelled = Vec::new();
    for child in &children {
        match child.status {
            DirectiveStatus::Completed => continue,
            DirectiveStatus::Cancelled => {
                cancelled.push(child.id.clone());
                continue;
            }
            _ => {}
        }
        let cleared = match graph.predecessor(&child.id) {
            Some(before) => storage.get_directive(before)?.status == DirectiveStatus::Completed,
            None => true,
        };
        if cleared {
            return Ok(NextAction::WorkOnChild {
                child_id: child.id.clone(),
                title: child.title.clone(),
                phase: child.current_phase,
            });
        }
        let blocked_by = graph
            .predecessor(&child.id)
            .map(|b| vec![b.to_string()])
            .unwrap_or_default();
        return Ok(NextAction::Waiting { blocked_by });
    }
    Ok(NextAction::Waiting {
        blocked_by: cancelled,
    })
}

/// Check the structure of `id`'s decomposition.
pub fn validate_children(storage: &Storage, id: &str) -> Result<ChildrenReport> {
    let directive = storage.get_directive(id)?;
    let graph = storage.load_graph()?;
    let children = storage.get_children(id)?;
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    if children.is_empty() {
        issues.push(format!("{} has no children", id));
    }
    for child in &children {
        if child.relationship_type == RelationshipType::Standalone {
            issues.push(format!("{} is owned by {} but marked standalone", child.id, id));
        }
    }

    let edges = storage.list_edges(Some(id))?;
    for edge in &edges {
        for endpoint in [&edge.before_id, &edge.after_id] {
            if graph.parent_of(endpoint) != Some(id) {
                issues.push(format!(
                    "chain edge {} -> {} references {} which is not a child",
                    edge.before_id, edge.after_id, endpoint
                ));
            }
        }
    }
    if !edges.is_empty() {
        let heads = children
            .iter()
            .filter(|c| graph.predecessor(&c.id).is_none() && graph.has_chain_links(&c.id))
            .count();
        if heads > 1 {
            issues.push(format!("{} has {} separate dependency chains", id, heads));
        }
        for child in children.iter().filter(|c| !graph.has_chain_links(&c.id)) {
            warnings.push(format!("{} is outside the dependency chain", child.id));
        }
    }

    if directive.status == DirectiveStatus::Draft {
        for child in &children {
            if child.current_phase > Phase::Plan || child.progress > 0 {
                warnings.push(format!(
                    "{} has progressed while parent {} is still draft",
                    child.id, id
                ));
            }
        }
    }

    Ok(ChildrenReport {
        directive_id: id.to_string(),
        valid: issues.is_empty(),
        child_count: children.len(),
        issues,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;
    use std::sync::Barrier;
    use std::thread;

    fn create(storage: &mut Storage, title: &str) -> Directive {
        create_directive(storage, NewDirective::titled(title)).unwrap()
    }

    #[test]
    fn test_create_with_parent_starts_child_at_plan() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let parent = create(&mut storage, "Venture MVP");
        let child = create_directive(
            &mut storage,
            NewDirective::titled("Schema").with_parent(&parent.id),
        )
        .unwrap();

        assert_eq!(child.current_phase, Phase::Plan);
        assert_eq!(child.relationship_type, RelationshipType::Child);
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
        assert!(storage.get_directive(&parent.id).unwrap().is_parent());
    }

    #[test]
    fn test_create_rejects_empty_title() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let err = create_directive(&mut storage, NewDirective::titled("   ")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_set_parent_rejects_cycle() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let a = create(&mut storage, "A");
        let b = create(&mut storage, "B");
        set_parent(&mut storage, &b.id, &a.id).unwrap();

        let err = set_parent(&mut storage, &a.id, &b.id).unwrap_err();
        assert!(matches!(err, Error::CycleDetected(_)));
    }

    #[test]
    fn test_set_parent_rejects_second_parent_and_is_idempotent() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let a = create(&mut storage, "A");
        let b = create(&mut storage, "B");
        let c = create(&mut storage, "C");
        set_parent(&mut storage, &c.id, &a.id).unwrap();

        let again = set_parent(&mut storage, &c.id, &a.id).unwrap();
        assert!(!again.changed);

        let err = set_parent(&mut storage, &c.id, &b.id).unwrap_err();
        assert!(matches!(err, Error::MultipleParents { .. }));
    }

    #[test]
    fn test_detach_then_reparent() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let a = create(&mut storage, "A");
        let b = create(&mut storage, "B");
        let c = create(&mut storage, "C");
        set_parent(&mut storage, &c.id, &a.id).unwrap();

        let outcome = detach(&mut storage, &c.id).unwrap();
        assert_eq!(outcome.former_parent.relationship_type, RelationshipType::Standalone);
        assert_eq!(outcome.child.relationship_type, RelationshipType::Standalone);

        set_parent(&mut storage, &c.id, &b.id).unwrap();
        assert_eq!(
            storage.get_directive(&c.id).unwrap().parent_id.as_deref(),
            Some(b.id.as_str())
        );
    }

    #[test]
    fn test_decompose_chains_children_in_order() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let parent = create(&mut storage, "Parent");
        let children = decompose(
            &mut storage,
            &parent.id,
            vec![
                NewDirective::titled("First"),
                NewDirective::titled("Second"),
                NewDirective::titled("Third"),
            ],
        )
        .unwrap();

        let ordered = get_children(&storage, &parent.id).unwrap();
        let ids: Vec<_> = ordered.iter().map(|c| c.id.clone()).collect();
        let expected: Vec<_> = children.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, expected);

        let graph = storage.load_graph().unwrap();
        assert_eq!(graph.predecessor(&children[2].id), Some(children[1].id.as_str()));

        // Chained children cannot be detached.
        let err = detach(&mut storage, &children[1].id).unwrap_err();
        assert!(matches!(err, Error::InvalidChain(_)));
    }

    #[test]
    fn test_chain_edge_rejects_branch() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let parent = create(&mut storage, "Parent");
        let kids: Vec<Directive> = ["x", "y", "z"]
            .iter()
            .map(|t| {
                create_directive(&mut storage, NewDirective::titled(*t).with_parent(&parent.id))
                    .unwrap()
            })
            .collect();

        add_dependency_edge(&mut storage, &parent.id, &kids[0].id, &kids[1].id).unwrap();
        let err =
            add_dependency_edge(&mut storage, &parent.id, &kids[0].id, &kids[2].id).unwrap_err();
        assert!(matches!(err, Error::InvalidChain(_)));
        let err =
            add_dependency_edge(&mut storage, &parent.id, &kids[1].id, &kids[0].id).unwrap_err();
        assert!(matches!(err, Error::InvalidChain(_)));
    }

    #[test]
    fn test_set_progress_rejected_for_parent() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let parent = create(&mut storage, "Parent");
        create_directive(&mut storage, NewDirective::titled("Kid").with_parent(&parent.id)).unwrap();

        let err = set_progress(&mut storage, &parent.id, 50).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let err = set_progress(&mut storage, &parent.id, 101).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_progress_rollup_scenario() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let parent = create(&mut storage, "Parent");
        let specs = [
            (Priority::Critical, 100),
            (Priority::High, 50),
            (Priority::Low, 0),
        ];
        for (priority, progress) in specs {
            let child = create_directive(
                &mut storage,
                NewDirective::titled("kid")
                    .with_parent(&parent.id)
                    .with_priority(priority),
            )
            .unwrap();
            set_progress(&mut storage, &child.id, progress).unwrap();
        }
        assert_eq!(storage.get_directive(&parent.id).unwrap().progress, 81);
    }

    #[test]
    fn test_set_status_guards_completed() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = create(&mut storage, "D");
        assert!(set_status(&mut storage, &d.id, DirectiveStatus::Completed).is_err());
        let cancelled = set_status(&mut storage, &d.id, DirectiveStatus::Cancelled).unwrap();
        assert_eq!(cancelled.status, DirectiveStatus::Cancelled);
        assert!(set_status(&mut storage, &d.id, DirectiveStatus::Active).is_err());
    }

    #[test]
    fn test_next_action_walks_lifecycle_and_chain() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let parent = create(&mut storage, "Parent");
        assert_eq!(next_action(&storage, &parent.id).unwrap(), NextAction::LeadToPlan);

        let kids = decompose(
            &mut storage,
            &parent.id,
            vec![NewDirective::titled("one"), NewDirective::titled("two")],
        )
        .unwrap();

        let mut p = storage.get_directive(&parent.id).unwrap();
        p.current_phase = Phase::Exec;
        storage.update_directive(&p).unwrap();

        match next_action(&storage, &parent.id).unwrap() {
            NextAction::WorkOnChild { child_id, .. } => assert_eq!(child_id, kids[0].id),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_validate_children_reports_missing_children() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let d = create(&mut storage, "Empty");
        let report = validate_children(&storage, &d.id).unwrap();
        assert!(!report.valid);
        assert_eq!(report.child_count, 0);
    }

    #[test]
    fn test_ancestor_chain_nearest_first() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let root = create(&mut storage, "Root");
        let mid = create_directive(&mut storage, NewDirective::titled("Mid").with_parent(&root.id))
            .unwrap();
        let leaf = create_directive(&mut storage, NewDirective::titled("Leaf").with_parent(&mid.id))
            .unwrap();

        let chain: Vec<String> = get_ancestor_chain(&storage, &leaf.id)
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(chain, vec![mid.id, root.id]);
    }

    #[test]
    fn test_concurrent_set_parent_has_one_winner() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();

        for round in 0..20 {
            let p1 = create(&mut storage, &format!("First owner {}", round));
            let p2 = create(&mut storage, &format!("Second owner {}", round));
            let child = create(&mut storage, &format!("Contested {}", round));
            let barrier = Barrier::new(2);

            let results: Vec<Result<SetParentOutcome>> = thread::scope(|scope| {
                let handles: Vec<_> = [p1.id.as_str(), p2.id.as_str()]
                    .into_iter()
                    .map(|parent| {
                        let (env, barrier, child) = (&env, &barrier, child.id.as_str());
                        scope.spawn(move || {
                            let mut handle = env.open_storage();
                            barrier.wait();
                            set_parent(&mut handle, child, parent)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let winners: Vec<&SetParentOutcome> =
                results.iter().filter_map(|r| r.as_ref().ok()).collect();
            assert_eq!(winners.len(), 1, "round {}", round);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(Error::MultipleParents { .. }))));

            let stored = storage.get_directive(&child.id).unwrap();
            assert_eq!(stored.parent_id, winners[0].child.parent_id);
            let graph = storage.load_graph().unwrap();
            let owners = [&p1.id, &p2.id]
                .iter()
                .filter(|p| graph.children_of(p.as_str()).contains(&child.id.as_str()))
                .count();
            assert_eq!(owners, 1);
        }
    }
}
