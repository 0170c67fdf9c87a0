//! Dependency graph analysis over tracker issues.
//!
//! Every query recomputes from the graph; nothing is memoized, so a graph can
//! be edited and re-queried freely.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    DependencyGraph, GraphNode, GraphValidation, Issue, IssueState, RelationKind,
};

/// Builds and queries issue dependency graphs.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraphAnalyzer;

fn detect_cycles_util(
    node: u64,
    graph: &DependencyGraph,
    visited: &mut HashSet<u64>,
    rec_stack: &mut HashSet<u64>,
    path: &mut Vec<u64>,
    cycles: &mut Vec<Vec<u64>>,
) {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(current) = graph.node(node) {
        for &dep in &current.depends_on {
            if !graph.contains(dep) {
                continue;
            }
            if !visited.contains(&dep) {
                detect_cycles_util(dep, graph, visited, rec_stack, path, cycles);
            } else if rec_stack.contains(&dep) {
                if let Some(start) = path.iter().position(|&n| n == dep) {
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep);
                    cycles.push(cycle);
                }
            }
        }
    }

    rec_stack.remove(&node);
    path.pop();
}

impl DependencyGraphAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Build the graph for a batch of issues from their parsed relationships.
    #[instrument(skip(self, issues), fields(issue_count = issues.len()))]
    pub fn build_graph(&self, issues: &[Issue]) -> DependencyGraph {
        let mut graph = DependencyGraph::default();
        for issue in issues {
            graph
                .nodes
                .entry(issue.number)
                .or_insert_with(|| GraphNode::new(issue.number));
        }

        for issue in issues {
            let a = issue.number;
            for rel in &issue.relationships {
                let b = rel.issue_number;
                if a == b {
                    continue;
                }
                match rel.kind {
                    // Subtasks are structural prerequisites of their parent.
                    RelationKind::BlockedBy | RelationKind::Subtask => {
                        add_edge(&mut graph, b, a);
                    }
                    RelationKind::Blocks => add_edge(&mut graph, a, b),
                    RelationKind::Related => {
                        if let Some(node) = graph.nodes.get_mut(&a) {
                            node.related_to.insert(b);
                        }
                        if let Some(node) = graph.nodes.get_mut(&b) {
                            node.related_to.insert(a);
                        }
                    }
                }
            }
        }

        graph.refresh_endpoints();
        graph.cycles = self.detect_cycles(&graph);
        debug!(
            nodes = graph.len(),
            roots = graph.roots.len(),
            cycles = graph.cycles.len(),
            "dependency graph built"
        );
        graph
    }

    /// Every cycle reachable by DFS over `depends_on`, closing node repeated.
    ///
    /// The same cycle can be reported from more than one entry point.
    pub fn detect_cycles(&self, graph: &DependencyGraph) -> Vec<Vec<u64>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();
        let mut cycles = Vec::new();

        for &issue in graph.nodes.keys() {
            if !visited.contains(&issue) {
                detect_cycles_util(issue, graph, &mut visited, &mut rec_stack, &mut path, &mut cycles);
            }
        }
        cycles
    }

    /// Number of issues transitively waiting on `issue`.
    pub fn calculate_blocking_score(&self, graph: &DependencyGraph, issue: u64) -> usize {
        let mut visited = HashSet::new();
        let mut stack = vec![issue];
        while let Some(current) = stack.pop() {
            let Some(node) = graph.node(current) else {
                continue;
            };
            for &next in &node.blocks {
                if next != issue && visited.insert(next) {
                    stack.push(next);
                }
            }
        }
        visited.len()
    }

    /// Distance from the nearest root along `blocks` edges; `None` when no
    /// root reaches the issue.
    pub fn calculate_depth_from_root(&self, graph: &DependencyGraph, issue: u64) -> Option<usize> {
        let mut distance: HashMap<u64, usize> = HashMap::new();
        let mut queue = VecDeque::new();
        for &root in &graph.roots {
            distance.insert(root, 0);
            queue.push_back(root);
        }
        while let Some(current) = queue.pop_front() {
            if current == issue {
                return distance.get(&current).copied();
            }
            let depth = distance[&current];
            if let Some(node) = graph.node(current) {
                for &next in &node.blocks {
                    if !distance.contains_key(&next) {
                        distance.insert(next, depth + 1);
                        queue.push_back(next);
                    }
                }
            }
        }
        None
    }

    /// Open issues whose every dependency is closed.
    ///
    /// A dependency with no known status counts as open.
    pub fn get_unblocked_issues(
        &self,
        graph: &DependencyGraph,
        statuses: &HashMap<u64, IssueState>,
    ) -> Vec<u64> {
        graph
            .nodes
            .values()
            .filter(|node| statuses.get(&node.issue_number) == Some(&IssueState::Open))
            .filter(|node| {
                node.depends_on
                    .iter()
                    .all(|dep| statuses.get(dep) == Some(&IssueState::Closed))
            })
            .map(|node| node.issue_number)
            .collect()
    }

    pub fn validate_graph(&self, graph: &DependencyGraph) -> GraphValidation {
        let mut validation = GraphValidation::default();
        for cycle in &graph.cycles {
            validation
                .errors
                .push(DomainError::DependencyCycle(cycle.clone()).to_string());
        }
        for node in graph.nodes.values() {
            for dep in node.depends_on.iter().filter(|d| !graph.contains(**d)) {
                validation.warnings.push(format!(
                    "#{} depends on #{dep}, which is not in the graph",
                    node.issue_number
                ));
            }
            for blocked in node.blocks.iter().filter(|b| !graph.contains(**b)) {
                validation.warnings.push(format!(
                    "#{} blocks #{blocked}, which is not in the graph",
                    node.issue_number
                ));
            }
        }
        validation
    }

    /// Shortest chain of `blocks` edges from `from` to `to`, both included.
    pub fn get_dependency_path(&self, graph: &DependencyGraph, from: u64, to: u64) -> Option<Vec<u64>> {
        if !graph.contains(from) {
            return None;
        }
        let mut parent: HashMap<u64, u64> = HashMap::new();
        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(&prev) = parent.get(&cursor) {
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            if let Some(node) = graph.node(current) {
                for &next in &node.blocks {
                    if seen.insert(next) {
                        parent.insert(next, current);
                        queue.push_back(next);
                    }
                }
            }
        }
        None
    }

    /// Order candidates: most blocking first, then shallowest, then lowest number.
    pub fn prioritize(&self, graph: &DependencyGraph, candidates: &[u64]) -> Vec<u64> {
        let mut scored: Vec<(u64, usize, Option<usize>)> = candidates
            .iter()
            .map(|&n| {
                (
                    n,
                    self.calculate_blocking_score(graph, n),
                    self.calculate_depth_from_root(graph, n),
                )
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| compare_depth(a.2, b.2))
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.into_iter().map(|(n, _, _)| n).collect()
    }

    /// Dependencies before dependents. Fails on a cyclic graph.
    pub fn topological_order(&self, graph: &DependencyGraph) -> DomainResult<Vec<u64>> {
        if let Some(cycle) = self.detect_cycles(graph).into_iter().next() {
            return Err(DomainError::DependencyCycle(cycle));
        }

        let mut in_degree: HashMap<u64, usize> = graph
            .nodes
            .values()
            .map(|n| {
                let degree = n.depends_on.iter().filter(|d| graph.contains(**d)).count();
                (n.issue_number, degree)
            })
            .collect();

        let mut ready: BTreeSet<u64> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();
        let mut sorted = Vec::with_capacity(graph.len());

        while let Some(current) = ready.pop_first() {
            sorted.push(current);
            if let Some(node) = graph.node(current) {
                for next in &node.blocks {
                    if let Some(degree) = in_degree.get_mut(next) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(*next);
                        }
                    }
                }
            }
        }

        if sorted.len() != graph.len() {
            return Err(DomainError::DependencyCycle(Vec::new()));
        }
        Ok(sorted)
    }
}

/// `dependent` waits on `prerequisite`. Reverse edges only land on nodes
/// present in the graph.
fn add_edge(graph: &mut DependencyGraph, prerequisite: u64, dependent: u64) {
    if let Some(node) = graph.nodes.get_mut(&dependent) {
        node.depends_on.insert(prerequisite);
    }
    if let Some(node) = graph.nodes.get_mut(&prerequisite) {
        node.blocks.insert(dependent);
    }
}

fn compare_depth(a: Option<usize>, b: Option<usize>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(n: u64) -> Issue {
        Issue::new(n, format!("Issue {n}"))
    }

    fn chain() -> Vec<Issue> {
        // 1 <- 2 <- 3, and 4 related to 1
        vec![
            issue(1).with_relationship(RelationKind::Related, 4),
            issue(2).with_relationship(RelationKind::BlockedBy, 1),
            issue(3).with_relationship(RelationKind::BlockedBy, 2),
            issue(4),
        ]
    }

    #[test]
    fn test_roots_and_leaves() {
        let graph = DependencyGraphAnalyzer::new().build_graph(&chain());
        assert_eq!(graph.roots, vec![1, 4]);
        assert_eq!(graph.leaves, vec![3, 4]);
        assert!(graph.node(4).unwrap().related_to.contains(&1));
        assert!(graph.node(1).unwrap().related_to.contains(&4));
        assert!(!graph.has_cycles());
    }

    #[test]
    fn test_blocks_mirrors_blocked_by() {
        let issues = vec![issue(1).with_relationship(RelationKind::Blocks, 2), issue(2)];
        let graph = DependencyGraphAnalyzer::new().build_graph(&issues);
        assert!(graph.node(2).unwrap().depends_on.contains(&1));
        assert!(graph.node(1).unwrap().blocks.contains(&2));
    }

    #[test]
    fn test_subtask_is_prerequisite_of_parent() {
        let issues = vec![issue(10).with_relationship(RelationKind::Subtask, 11), issue(11)];
        let graph = DependencyGraphAnalyzer::new().build_graph(&issues);
        assert!(graph.node(10).unwrap().depends_on.contains(&11));
        assert!(graph.node(11).unwrap().blocks.contains(&10));
    }

    #[test]
    fn test_self_reference_ignored() {
        let issues = vec![issue(1).with_relationship(RelationKind::BlockedBy, 1)];
        let graph = DependencyGraphAnalyzer::new().build_graph(&issues);
        assert!(graph.node(1).unwrap().depends_on.is_empty());
        assert!(!graph.has_cycles());
    }

    #[test]
    fn test_cycle_detected() {
        let issues = vec![
            issue(10).with_relationship(RelationKind::BlockedBy, 11),
            issue(11).with_relationship(RelationKind::BlockedBy, 10),
        ];
        let analyzer = DependencyGraphAnalyzer::new();
        let graph = analyzer.build_graph(&issues);
        assert!(graph.has_cycles());
        let cycle = &graph.cycles[0];
        assert!(cycle.contains(&10) && cycle.contains(&11));
        assert!(!analyzer.validate_graph(&graph).is_valid());
        assert!(matches!(
            analyzer.topological_order(&graph),
            Err(DomainError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_unblocked_requires_closed_dependencies() {
        let analyzer = DependencyGraphAnalyzer::new();
        let graph = analyzer.build_graph(&chain());
        let statuses = HashMap::from([
            (1, IssueState::Closed),
            (2, IssueState::Open),
            (3, IssueState::Open),
            (4, IssueState::Open),
        ]);
        assert_eq!(analyzer.get_unblocked_issues(&graph, &statuses), vec![2, 4]);
    }

    #[test]
    fn test_unknown_dependency_status_blocks() {
        let analyzer = DependencyGraphAnalyzer::new();
        let issues = vec![issue(5).with_relationship(RelationKind::BlockedBy, 99)];
        let graph = analyzer.build_graph(&issues);
        let statuses = HashMap::from([(5, IssueState::Open)]);
        assert!(analyzer.get_unblocked_issues(&graph, &statuses).is_empty());
        let validation = analyzer.validate_graph(&graph);
        assert!(validation.is_valid());
        assert_eq!(validation.warnings.len(), 1);
    }

    #[test]
    fn test_scores_depths_and_paths() {
        let analyzer = DependencyGraphAnalyzer::new();
        let graph = analyzer.build_graph(&chain());
        assert_eq!(analyzer.calculate_blocking_score(&graph, 1), 2);
        assert_eq!(analyzer.calculate_blocking_score(&graph, 3), 0);
        assert_eq!(analyzer.calculate_depth_from_root(&graph, 3), Some(2));
        assert_eq!(analyzer.get_dependency_path(&graph, 1, 3), Some(vec![1, 2, 3]));
        assert_eq!(analyzer.get_dependency_path(&graph, 3, 1), None);
        assert_eq!(analyzer.prioritize(&graph, &[4, 3, 2, 1]), vec![1, 2, 4, 3]);
        assert_eq!(analyzer.topological_order(&graph).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_depth_unreachable_in_pure_cycle() {
        let analyzer = DependencyGraphAnalyzer::new();
        let issues = vec![
            issue(1).with_relationship(RelationKind::BlockedBy, 2),
            issue(2).with_relationship(RelationKind::BlockedBy, 1),
        ];
        let graph = analyzer.build_graph(&issues);
        assert_eq!(analyzer.calculate_depth_from_root(&graph, 1), None);
    }
}
