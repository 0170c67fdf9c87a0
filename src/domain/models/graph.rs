//! Dependency graph over issues.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One issue in the dependency graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Issue this node stands for
    pub issue_number: u64,
    /// Issues that must close before this one can start
    pub depends_on: BTreeSet<u64>,
    /// Issues waiting on this one
    pub blocks: BTreeSet<u64>,
    /// Informational links; never affect ordering
    pub related_to: BTreeSet<u64>,
}

impl GraphNode {
    /// Node without edges.
    pub fn new(issue_number: u64) -> Self {
        Self {
            issue_number,
            ..Default::default()
        }
    }
}

/// Directed relationship graph built from a batch of issues.
///
/// A cyclic graph stays usable for every query; `cycles` is a warning list
/// and may report the same cycle more than once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// Every issue of the batch plus referenced ones, by number
    pub nodes: BTreeMap<u64, GraphNode>,
    /// Nodes with nothing to wait on
    pub roots: Vec<u64>,
    /// Nodes nothing waits on
    pub leaves: Vec<u64>,
    /// Dependency cycles, each starting and ending on the same issue
    pub cycles: Vec<Vec<u64>>,
}

impl DependencyGraph {
    /// Node for `issue_number`.
    pub fn node(&self, issue_number: u64) -> Option<&GraphNode> {
        self.nodes.get(&issue_number)
    }

    pub fn contains(&self, issue_number: u64) -> bool {
        self.nodes.contains_key(&issue_number)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether any cycle was found.
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Recompute `roots` and `leaves` from the node edges.
    pub fn refresh_endpoints(&mut self) {
        self.roots = self
            .nodes
            .values()
            .filter(|n| n.depends_on.is_empty())
            .map(|n| n.issue_number)
            .collect();
        self.leaves = self
            .nodes
            .values()
            .filter(|n| n.blocks.is_empty())
            .map(|n| n.issue_number)
            .collect();
    }
}

/// Outcome of graph validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphValidation {
    /// Cycles; the graph is still usable but ordering is undefined
    pub errors: Vec<String>,
    /// Dangling references to issues outside the batch
    pub warnings: Vec<String>,
}

impl GraphValidation {
    /// No errors; warnings are allowed.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}
