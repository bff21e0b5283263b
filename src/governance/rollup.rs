//! Weighted progress rollup.
//!
//! A parent's progress is `round(Σ progress·weight / Σ weight)` over its
//! direct children, with weights from [`Priority::weight`]. Recomputation
//! walks upward until it reaches a root. When every child of a parent is
//! completed the parent is completed too, with a system handoff on record.

use crate::governance::{handoff, remediation};
use crate::models::{Directive, DirectiveStatus, Phase, Priority};
use crate::storage::Storage;
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;

/// What one level of a rollup pass did.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RollupStep {
    pub directive_id: String,
    pub progress: u8,
    /// True if this pass completed the directive
    pub auto_completed: bool,
}

/// Weighted progress of `children`, or `None` when there are none.
pub fn weighted_progress(children: &[(u8, Priority)]) -> Option<u8> {
    let total_weight: u32 = children.iter().map(|(_, p)| p.weight()).sum();
    if total_weight == 0 {
        return None;
    }
    let weighted: u32 = children
        .iter()
        .map(|(progress, priority)| u32::from(*progress) * priority.weight())
        .sum();
    let value = (f64::from(weighted) / f64::from(total_weight)).round();
    Some(value.clamp(0.0, 100.0) as u8)
}

/// Recompute `parent_id` and every ancestor above it.
///
/// A parent with no children is written as 0 and reported as
/// [`Error::IncompleteDecomposition`].
pub fn recompute(storage: &mut Storage, parent_id: &str) -> Result<Vec<RollupStep>> {
    let mut steps = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(parent_id.to_string());

    while let Some(id) = current.take() {
        if !seen.insert(id.clone()) {
            break;
        }
        let (step, next) = recompute_one(storage, &id)?;
        steps.push(step);
        current = next;
    }

    Ok(steps)
}

fn recompute_one(storage: &mut Storage, parent_id: &str) -> Result<(RollupStep, Option<String>)> {
    let mut parent = storage.get_directive(parent_id)?;
    let children = storage.get_children(parent_id)?;

    let inputs: Vec<(u8, Priority)> = children.iter().map(|c| (c.progress, c.priority)).collect();
    let Some(progress) = weighted_progress(&inputs) else {
        if parent.progress != 0 {
            parent.progress = 0;
            parent.updated_at = Utc::now();
            storage.update_directive(&parent)?;
        }
        return Err(Error::IncompleteDecomposition(parent_id.to_string()));
    };

    if parent.progress != progress {
        tracing::debug!(directive = parent_id, from = parent.progress, to = progress, "rollup");
        parent.progress = progress;
        parent.updated_at = Utc::now();
        storage.update_directive(&parent)?;
    }

    let auto_completed = complete_if_children_done(storage, &mut parent, &children)?;
    let step = RollupStep {
        directive_id: parent.id.clone(),
        progress: parent.progress,
        auto_completed,
    };
    Ok((step, parent.parent_id.clone()))
}

/// Complete `parent` if every child is completed. Safe to call repeatedly.
fn complete_if_children_done(
    storage: &mut Storage,
    parent: &mut Directive,
    children: &[Directive],
) -> Result<bool> {
    if parent.status == DirectiveStatus::Completed
        || parent.status == DirectiveStatus::Cancelled
        || children.is_empty()
        || children.iter().any(|c| c.status != DirectiveStatus::Completed)
    {
        return Ok(false);
    }

    let from = parent.current_phase;
    let now = Utc::now();
    parent.current_phase = Phase::Complete;
    parent.status = DirectiveStatus::Completed;
    parent.completed_at = Some(now);
    parent.updated_at = now;
    storage.update_directive(parent)?;
    handoff::record_system_completion(storage, parent, from, children)?;
    remediation::resolve_for_completed(storage, parent)?;

    tracing::info!(directive = %parent.id, "parent auto-completed");
    Ok(true)
}
