//! Arena-indexed directive hierarchy.
//!
//! Nodes live in a `Vec` and refer to each other by index, so parent links,
//! child lists and chain edges never form reference cycles. Ancestor walks are
//! O(depth) and chain checks are O(chain length).

use crate::{Error, Result};
use std::collections::HashMap;

/// Index of a node in the arena.
pub type NodeIdx = usize;

#[derive(Debug, Clone)]
struct Node {
    id: String,
    parent: Option<NodeIdx>,
    children: Vec<NodeIdx>,
    /// Chain successor among siblings
    next: Option<NodeIdx>,
    /// Chain predecessor among siblings
    prev: Option<NodeIdx>,
}

/// Snapshot of parent/child ownership and sibling dependency chains.
#[derive(Debug, Clone, Default)]
pub struct DirectiveGraph {
    nodes: Vec<Node>,
    index: HashMap<String, NodeIdx>,
}

/// Result of checking a proposed parent link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentLink {
    /// The link does not exist yet and may be created
    New,
    /// The child already has exactly this parent
    Existing,
}

impl DirectiveGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from `(id, parent_id)` pairs and `(before, after)` chain edges.
    ///
    /// Parents and edge endpoints that are not listed as ids are added as bare nodes.
    pub fn build<'a>(
        directives: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
        edges: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut graph = Self::new();
        let mut links = Vec::new();
        for (id, parent) in directives {
            graph.insert(id);
            if let Some(parent) = parent {
                links.push((id, parent));
            }
        }
        for (child, parent) in links {
            graph.attach(child, parent);
        }
        for (before, after) in edges {
            graph.link_chain(before, after);
        }
        graph
    }

    /// Add a node, returning the existing index if the id is already present.
    pub fn insert(&mut self, id: &str) -> NodeIdx {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node {
            id: id.to_string(),
            parent: None,
            children: Vec::new(),
            next: None,
            prev: None,
        });
        self.index.insert(id.to_string(), idx);
        idx
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        let idx = *self.index.get(id)?;
        self.nodes[idx].parent.map(|p| self.nodes[p].id.as_str())
    }

    pub fn children_of(&self, id: &str) -> Vec<&str> {
        match self.index.get(id) {
            Some(&idx) => self.nodes[idx]
                .children
                .iter()
                .map(|&c| self.nodes[c].id.as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Ancestors of `id`, nearest first.
    ///
    /// The walk is bounded by the node count so corrupted data cannot loop forever.
    pub fn ancestors(&self, id: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let Some(&start) = self.index.get(id) else {
            return chain;
        };
        let mut current = self.nodes[start].parent;
        while let Some(idx) = current {
            if chain.len() >= self.nodes.len() {
                break;
            }
            chain.push(self.nodes[idx].id.as_str());
            current = self.nodes[idx].parent;
        }
        chain
    }

    /// True if `ancestor` appears on the parent chain of `id`.
    pub fn is_ancestor(&self, ancestor: &str, id: &str) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// All descendants of `id` in breadth-first order.
    pub fn descendants(&self, id: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let Some(&start) = self.index.get(id) else {
            return out;
        };
        let mut queue = std::collections::VecDeque::from(self.nodes[start].children.clone());
        while let Some(idx) = queue.pop_front() {
            if out.len() >= self.nodes.len() {
                break;
            }
            out.push(self.nodes[idx].id.as_str());
            queue.extend(self.nodes[idx].children.iter().copied());
        }
        out
    }

    /// Check whether `child` may be placed under `parent`.
    pub fn check_parent(&self, child: &str, parent: &str) -> Result<ParentLink> {
        if child == parent {
            return Err(Error::CycleDetected(format!(
                "{} cannot be its own parent",
                child
            )));
        }
        if self.is_ancestor(child, parent) {
            return Err(Error::CycleDetected(format!(
                "{} is already a descendant of {}",
                parent, child
            )));
        }
        match self.parent_of(child) {
            Some(existing) if existing == parent => Ok(ParentLink::Existing),
            Some(existing) => Err(Error::MultipleParents {
                child: child.to_string(),
                existing: existing.to_string(),
            }),
            None => Ok(ParentLink::New),
        }
    }

    /// Set `child`'s parent in the snapshot. Callers run [`check_parent`](Self::check_parent) first.
    pub fn attach(&mut self, child: &str, parent: &str) {
        let child_idx = self.insert(child);
        let parent_idx = self.insert(parent);
        if self.nodes[child_idx].parent == Some(parent_idx) {
            return;
        }
        self.detach(child);
        self.nodes[child_idx].parent = Some(parent_idx);
        self.nodes[parent_idx].children.push(child_idx);
    }

    /// Remove `child` from its parent's child list.
    pub fn detach(&mut self, child: &str) {
        let Some(&child_idx) = self.index.get(child) else {
            return;
        };
        if let Some(parent_idx) = self.nodes[child_idx].parent.take() {
            self.nodes[parent_idx].children.retain(|&c| c != child_idx);
        }
    }

    /// Check whether `before -> after` keeps the sibling chain simple.
    pub fn check_chain_edge(&self, parent: &str, before: &str, after: &str) -> Result<()> {
        if before == after {
            return Err(Error::InvalidChain(format!(
                "{} cannot depend on itself",
                before
            )));
        }
        for id in [before, after] {
            if self.parent_of(id) != Some(parent) {
                return Err(Error::InvalidChain(format!(
                    "{} is not a child of {}",
                    id, parent
                )));
            }
        }
        let (Some(&before_idx), Some(&after_idx)) = (self.index.get(before), self.index.get(after))
        else {
            return Err(Error::InvalidChain("unknown chain endpoint".to_string()));
        };
        if let Some(next) = self.nodes[before_idx].next {
            return Err(Error::InvalidChain(format!(
                "{} already precedes {}; chains cannot branch",
                before, self.nodes[next].id
            )));
        }
        if let Some(prev) = self.nodes[after_idx].prev {
            return Err(Error::InvalidChain(format!(
                "{} already follows {}; chains cannot join",
                after, self.nodes[prev].id
            )));
        }
        // Walking forward from `after` must never reach `before`.
        let mut current = Some(after_idx);
        let mut steps = 0;
        while let Some(idx) = current {
            if idx == before_idx || steps > self.nodes.len() {
                return Err(Error::InvalidChain(format!(
                    "{} -> {} would create a cycle",
                    before, after
                )));
            }
            current = self.nodes[idx].next;
            steps += 1;
        }
        Ok(())
    }

    /// Record `before -> after` in the snapshot. Callers run [`check_chain_edge`](Self::check_chain_edge) first.
    pub fn link_chain(&mut self, before: &str, after: &str) {
        let before_idx = self.insert(before);
        let after_idx = self.insert(after);
        self.nodes[before_idx].next = Some(after_idx);
        self.nodes[after_idx].prev = Some(before_idx);
    }

    /// The sibling that must complete before `id`, if any.
    pub fn predecessor(&self, id: &str) -> Option<&str> {
        let idx = *self.index.get(id)?;
        self.nodes[idx].prev.map(|p| self.nodes[p].id.as_str())
    }

    pub fn has_chain_links(&self, id: &str) -> bool {
        self.index
            .get(id)
            .map(|&idx| self.nodes[idx].prev.is_some() || self.nodes[idx].next.is_some())
            .unwrap_or(false)
    }

    /// Children of `parent` in execution order: each chain from its head, then unchained children.
    pub fn chain_order(&self, parent: &str) -> Vec<&str> {
        let Some(&parent_idx) = self.index.get(parent) else {
            return Vec::new();
        };
        let children = &self.nodes[parent_idx].children;
        let mut ordered = Vec::with_capacity(children.len());
        for &head in children
            .iter()
            .filter(|&&c| self.nodes[c].prev.is_none() && self.nodes[c].next.is_some())
        {
            let mut current = Some(head);
            while let Some(idx) = current {
                if ordered.len() > children.len() {
                    break;
                }
                ordered.push(self.nodes[idx].id.as_str());
                current = self.nodes[idx].next;
            }
        }
        for &child in children {
            let id = self.nodes[child].id.as_str();
            if !ordered.contains(&id) {
                ordered.push(id);
            }
        }
        ordered
    }
}
