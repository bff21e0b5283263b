//! Directive commands.

use super::{directive_line, json, open, parse_arg, Output};
use crate::governance::hierarchy::{
    self, ChildrenReport, DetachOutcome, NewDirective, NextAction, SetParentOutcome,
};
use crate::governance::rollup::RollupStep;
use crate::models::{DependencyEdge, Directive, Priority, TechnicalSurface, RESERVED_METADATA_KEYS};
use crate::storage::{validate_directive_id, DirectiveFilter};
use crate::{Error, Result};
use serde::Serialize;
use std::path::Path;

/// Arguments of `hm directive create`.
#[derive(Debug, Clone, Default)]
pub struct CreateArgs {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub surface: Vec<String>,
    pub parent: Option<String>,
    pub meta: Vec<String>,
}

/// A single directive.
#[derive(Serialize)]
pub struct DirectiveResult {
    #[serde(flatten)]
    pub directive: Directive,
}

impl Output for DirectiveResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let d = &self.directive;
        let mut lines = vec![directive_line(d)];
        if let Some(desc) = &d.description {
            lines.push(format!("  {}", desc.replace('\n', "\n  ")));
        }
        lines.push(format!("  relationship: {}", d.relationship_type));
        if let Some(parent) = &d.parent_id {
            lines.push(format!("  parent: {}", parent));
        }
        if !d.technical_surface.is_empty() {
            let surface: Vec<String> = d.technical_surface.iter().map(|s| s.to_string()).collect();
            lines.push(format!("  surface: {}", surface.join(", ")));
        }
        for r in d.inherited_contracts() {
            lines.push(format!(
                "  inherits {} contract {} from {} (depth {})",
                r.kind, r.contract_id, r.owner_id, r.depth
            ));
        }
        if let Some(tag) = d.remediation() {
            let units: Vec<&str> = tag.affected_units.iter().map(String::as_str).collect();
            lines.push(format!("  remediates {} units {}", tag.group_key, units.join(", ")));
        }
        lines.join("\n")
    }
}

/// A list of directives.
#[derive(Serialize)]
pub struct DirectiveList {
    pub directives: Vec<Directive>,
    pub count: usize,
}

impl DirectiveList {
    fn new(directives: Vec<Directive>) -> Self {
        Self {
            count: directives.len(),
            directives,
        }
    }
}

impl Output for DirectiveList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.directives.is_empty() {
            return "No directives.".to_string();
        }
        self.directives
            .iter()
            .map(directive_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn parse_meta(entries: &[String]) -> Result<Vec<(String, serde_json::Value)>> {
    entries
        .iter()
        .map(|entry| {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                Error::InvalidInput(format!("Metadata must be key=value, got: {}", entry))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::InvalidInput(format!("Empty metadata key in: {}", entry)));
            }
            if RESERVED_METADATA_KEYS.contains(&key) {
                return Err(Error::InvalidInput(format!("Metadata key '{}' is reserved", key)));
            }
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

/// Create a directive.
pub fn directive_create(repo_path: &Path, args: CreateArgs, default_priority: Priority) -> Result<DirectiveResult> {
    let mut storage = open(repo_path)?;

    let mut new = NewDirective::titled(args.title);
    new.description = args.description;
    new.priority = match args.priority {
        Some(p) => parse_arg(&p)?,
        None => default_priority,
    };
    for s in &args.surface {
        new = new.with_surface(parse_arg::<TechnicalSurface>(s)?);
    }
    for (key, value) in parse_meta(&args.meta)? {
        new.metadata.insert(key, value);
    }
    if let Some(parent) = &args.parent {
        validate_directive_id(parent)?;
        new = new.with_parent(parent);
    }

    let directive = hierarchy::create_directive(&mut storage, new)?;
    Ok(DirectiveResult { directive })
}

pub fn directive_show(repo_path: &Path, id: &str) -> Result<DirectiveResult> {
    validate_directive_id(id)?;
    let storage = open(repo_path)?;
    Ok(DirectiveResult {
        directive: storage.get_directive(id)?,
    })
}

pub fn directive_list(
    repo_path: &Path,
    status: Option<&str>,
    phase: Option<&str>,
    parent: Option<&str>,
) -> Result<DirectiveList> {
    let storage = open(repo_path)?;
    let filter = DirectiveFilter {
        status: status.map(parse_arg).transpose()?,
        phase: phase.map(parse_arg).transpose()?,
        parent_id: parent.map(String::from),
    };
    Ok(DirectiveList::new(storage.list_directives(&filter)?))
}

/// Result of `hm directive set-parent`.
#[derive(Serialize)]
pub struct SetParentResult {
    #[serde(flatten)]
    pub outcome: SetParentOutcome,
}

fn rollup_lines(steps: &[RollupStep]) -> Vec<String> {
    steps
        .iter()
        .map(|s| {
            let done = if s.auto_completed { " (completed)" } else { "" };
            format!("  rollup {} -> {}%{}", s.directive_id, s.progress, done)
        })
        .collect()
}

impl Output for SetParentResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let o = &self.outcome;
        if !o.changed {
            return format!("{} is already a child of {}", o.child.id, o.parent.id);
        }
        let mut lines = vec![format!(
            "{} is now a child of {} (phase {})",
            o.child.id, o.parent.id, o.child.current_phase
        )];
        if !o.inherited_contracts.is_empty() {
            lines.push(format!("  inherits {} contract(s)", o.inherited_contracts.len()));
        }
        lines.extend(rollup_lines(&o.rollup));
        lines.join("\n")
    }
}

pub fn directive_set_parent(repo_path: &Path, child: &str, parent: &str) -> Result<SetParentResult> {
    validate_directive_id(child)?;
    validate_directive_id(parent)?;
    let mut storage = open(repo_path)?;
    Ok(SetParentResult {
        outcome: hierarchy::set_parent(&mut storage, child, parent)?,
    })
}

/// Result of `hm directive detach`.
#[derive(Serialize)]
pub struct DetachResult {
    #[serde(flatten)]
    pub outcome: DetachOutcome,
}

impl Output for DetachResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let o = &self.outcome;
        let mut lines = vec![format!(
            "Detached {} from {} ({} is now {})",
            o.child.id, o.former_parent.id, o.former_parent.id, o.former_parent.relationship_type
        )];
        lines.extend(rollup_lines(&o.rollup));
        lines.join("\n")
    }
}

pub fn directive_detach(repo_path: &Path, child: &str) -> Result<DetachResult> {
    validate_directive_id(child)?;
    let mut storage = open(repo_path)?;
    Ok(DetachResult {
        outcome: hierarchy::detach(&mut storage, child)?,
    })
}

/// A directive after an update, with any rollup it caused.
#[derive(Serialize)]
pub struct DirectiveUpdated {
    pub directive: Directive,
    pub rollup: Vec<RollupStep>,
}

impl Output for DirectiveUpdated {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("Updated {}", directive_line(&self.directive))];
        lines.extend(rollup_lines(&self.rollup));
        lines.join("\n")
    }
}

pub fn directive_progress(repo_path: &Path, id: &str, value: u8) -> Result<DirectiveUpdated> {
    validate_directive_id(id)?;
    let mut storage = open(repo_path)?;
    let (directive, rollup) = hierarchy::set_progress(&mut storage, id, value)?;
    Ok(DirectiveUpdated { directive, rollup })
}

pub fn directive_status(repo_path: &Path, id: &str, status: &str) -> Result<DirectiveUpdated> {
    validate_directive_id(id)?;
    let status = parse_arg(status)?;
    let mut storage = open(repo_path)?;
    Ok(DirectiveUpdated {
        directive: hierarchy::set_status(&mut storage, id, status)?,
        rollup: Vec::new(),
    })
}

pub fn directive_children(repo_path: &Path, id: &str) -> Result<DirectiveList> {
    validate_directive_id(id)?;
    let storage = open(repo_path)?;
    Ok(DirectiveList::new(hierarchy::get_children(&storage, id)?))
}

pub fn directive_ancestors(repo_path: &Path, id: &str) -> Result<DirectiveList> {
    validate_directive_id(id)?;
    let storage = open(repo_path)?;
    Ok(DirectiveList::new(hierarchy::get_ancestor_chain(&storage, id)?))
}

pub fn directive_decompose(
    repo_path: &Path,
    id: &str,
    titles: Vec<String>,
    default_priority: Priority,
) -> Result<DirectiveList> {
    validate_directive_id(id)?;
    let mut storage = open(repo_path)?;
    let children = titles
        .into_iter()
        .map(|t| NewDirective::titled(t).with_priority(default_priority))
        .collect();
    Ok(DirectiveList::new(hierarchy::decompose(&mut storage, id, children)?))
}

/// Result of `hm directive chain`.
#[derive(Serialize)]
pub struct ChainResult {
    pub edge: DependencyEdge,
}

impl Output for ChainResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "{} -> {} (under {})",
            self.edge.before_id, self.edge.after_id, self.edge.parent_id
        )
    }
}

/// Chain two siblings; the parent is taken from `before`.
pub fn directive_chain(repo_path: &Path, before: &str, after: &str) -> Result<ChainResult> {
    validate_directive_id(before)?;
    validate_directive_id(after)?;
    let mut storage = open(repo_path)?;
    let parent = storage.get_directive(before)?.parent_id.ok_or_else(|| {
        Error::InvalidChain(format!("{} has no parent; only siblings can be chained", before))
    })?;
    Ok(ChainResult {
        edge: hierarchy::add_dependency_edge(&mut storage, &parent, before, after)?,
    })
}

/// Result of `hm directive next`.
#[derive(Serialize)]
pub struct NextResult {
    pub directive_id: String,
    #[serde(flatten)]
    pub next: NextAction,
}

impl Output for NextResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match &self.next {
            NextAction::WorkOnChild {
                child_id,
                title,
                phase,
            } => format!("WORK_ON_CHILD {} ({}, at {})", child_id, title, phase),
            NextAction::Advance { to } => format!("ADVANCE to {}", to),
            NextAction::Waiting { blocked_by } => format!("WAITING on {}", blocked_by.join(", ")),
            other => other.code().to_string(),
        }
    }
}

pub fn directive_next(repo_path: &Path, id: &str) -> Result<NextResult> {
    validate_directive_id(id)?;
    let storage = open(repo_path)?;
    Ok(NextResult {
        directive_id: id.to_string(),
        next: hierarchy::next_action(&storage, id)?,
    })
}

/// Result of `hm directive validate-children`.
#[derive(Serialize)]
pub struct ChildrenReportResult {
    #[serde(flatten)]
    pub report: ChildrenReport,
}

impl Output for ChildrenReportResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let r = &self.report;
        let verdict = if r.valid { "valid" } else { "INVALID" };
        let mut lines = vec![format!(
            "{}: {} ({} children)",
            r.directive_id, verdict, r.child_count
        )];
        lines.extend(r.issues.iter().map(|i| format!("  issue: {}", i)));
        lines.extend(r.warnings.iter().map(|w| format!("  warning: {}", w)));
        lines.join("\n")
    }
}

pub fn directive_validate_children(repo_path: &Path, id: &str) -> Result<ChildrenReportResult> {
    validate_directive_id(id)?;
    let storage = open(repo_path)?;
    Ok(ChildrenReportResult {
        report: hierarchy::validate_children(&storage, id)?,
    })
}
