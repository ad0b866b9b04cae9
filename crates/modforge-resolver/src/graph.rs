//! Working dependency graph: identity-indexed nodes in an arena, edges
//! tagged with dependency kind and role.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use modforge_core::candidate::{DependencyKind, DependencyRole, VersionCandidate};
use modforge_core::identity::ModIdentity;
use modforge_core::tags::CompatTags;

use crate::constraint::ConstraintSet;

/// A mod in the working graph with its merged constraints and, once
/// decided, its assigned version.
#[derive(Debug, Clone)]
pub struct ConstraintNode {
    pub identity: ModIdentity,
    pub constraints: ConstraintSet,
    pub assigned: Option<VersionCandidate>,
}

impl ConstraintNode {
    pub fn is_root(&self) -> bool {
        self.constraints.has_root()
    }

    /// Whether the assignment exists and still satisfies every constraint.
    pub fn is_settled(&self) -> bool {
        self.assigned
            .as_ref()
            .is_some_and(|c| self.constraints.admits(c))
    }
}

impl fmt::Display for ConstraintNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.assigned {
            Some(c) => write!(f, "{}@{}", self.identity, c.version),
            None => write!(f, "{} (unresolved)", self.identity),
        }
    }
}

/// Edge label: `from` depends on `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepEdge {
    pub kind: DependencyKind,
    pub role: DependencyRole,
}

impl DepEdge {
    pub fn required() -> Self {
        Self {
            kind: DependencyKind::Required,
            role: DependencyRole::Direct,
        }
    }

    pub fn is_hard(&self) -> bool {
        self.kind == DependencyKind::Required
    }

    fn label(&self) -> Option<&'static str> {
        match (self.kind, self.role) {
            (_, DependencyRole::SubMod) => Some("sub-mod"),
            (DependencyKind::Optional, _) => Some("optional"),
            (_, DependencyRole::Alternative) => Some("alternative"),
            _ => None,
        }
    }
}

/// The dependency graph of one resolution run.
#[derive(Debug, Default)]
pub struct ResolutionGraph {
    graph: StableDiGraph<ConstraintNode, DepEdge>,
    index: BTreeMap<ModIdentity, NodeIndex>,
}

impl ResolutionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the node for `identity`. New nodes start with the
    /// environment's tags as their only constraint.
    pub fn insert(&mut self, identity: &ModIdentity, environment: &CompatTags) -> (NodeIndex, bool) {
        if let Some(&idx) = self.index.get(identity) {
            return (idx, false);
        }
        let idx = self.graph.add_node(ConstraintNode {
            identity: identity.clone(),
            constraints: ConstraintSet::for_environment(environment),
            assigned: None,
        });
        self.index.insert(identity.clone(), idx);
        (idx, true)
    }

    pub fn find(&self, identity: &ModIdentity) -> Option<NodeIndex> {
        self.index.get(identity).copied()
    }

    /// Look up a node by slug or project id.
    pub fn find_ref(&self, reference: &str) -> Option<NodeIndex> {
        self.index
            .iter()
            .find(|(id, _)| id.matches(reference))
            .map(|(_, &idx)| idx)
    }

    pub fn node(&self, idx: NodeIndex) -> &ConstraintNode {
        &self.graph[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut ConstraintNode {
        &mut self.graph[idx]
    }

    pub fn contains(&self, idx: NodeIndex) -> bool {
        self.graph.contains_node(idx)
    }

    /// Add a dependency edge. A second edge between the same pair only
    /// upgrades an optional edge to a required one.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, edge: DepEdge) {
        if let Some(existing) = self.graph.find_edge(from, to) {
            if let Some(weight) = self.graph.edge_weight_mut(existing) {
                if edge.is_hard() && !weight.is_hard() {
                    *weight = edge;
                }
            }
            return;
        }
        self.graph.add_edge(from, to, edge);
    }

    /// Remove every outgoing edge of `idx`, returning the former targets.
    pub fn detach_dependencies(&mut self, idx: NodeIndex) -> Vec<NodeIndex> {
        let edges: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.id(), e.target()))
            .collect();
        let mut targets = Vec::with_capacity(edges.len());
        for (edge, target) in edges {
            self.graph.remove_edge(edge);
            targets.push(target);
        }
        targets
    }

    pub fn remove_node(&mut self, idx: NodeIndex) -> Option<ConstraintNode> {
        let node = self.graph.remove_node(idx)?;
        self.index.remove(&node.identity);
        Some(node)
    }

    /// Direct dependencies of a node, in identity order.
    pub fn dependencies_of(&self, idx: NodeIndex) -> Vec<(NodeIndex, &DepEdge)> {
        let mut deps: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.target(), e.weight()))
            .collect();
        deps.sort_by(|a, b| self.graph[a.0].identity.cmp(&self.graph[b.0].identity));
        deps
    }

    /// Reverse dependencies (who depends on this node), in identity order.
    pub fn dependents_of(&self, idx: NodeIndex) -> Vec<(NodeIndex, &DepEdge)> {
        let mut deps: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (e.source(), e.weight()))
            .collect();
        deps.sort_by(|a, b| self.graph[a.0].identity.cmp(&self.graph[b.0].identity));
        deps
    }

    /// All nodes in identity order.
    pub fn nodes(&self) -> Vec<NodeIndex> {
        self.index.values().copied().collect()
    }

    /// Root selections in identity order.
    pub fn roots(&self) -> Vec<NodeIndex> {
        self.index
            .values()
            .copied()
            .filter(|&idx| self.graph[idx].is_root())
            .collect()
    }

    /// A path from `from` to `to` following only required edges.
    pub fn hard_path(&self, from: NodeIndex, to: NodeIndex) -> Option<Vec<NodeIndex>> {
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        if self.hard_dfs(from, to, &mut path, &mut visited) {
            Some(path)
        } else {
            None
        }
    }

    /// Every mod with a path of required edges to `idx`, in identity order.
    pub fn hard_dependents(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut seen: BTreeSet<NodeIndex> = BTreeSet::new();
        let mut queue = VecDeque::from([idx]);
        while let Some(current) = queue.pop_front() {
            for (parent, edge) in self.dependents_of(current) {
                if edge.is_hard() && parent != idx && seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        let mut dependents: Vec<NodeIndex> = seen.into_iter().collect();
        dependents.sort_by(|a, b| self.graph[*a].identity.cmp(&self.graph[*b].identity));
        dependents
    }

    /// Nodes no root can reach, in identity order.
    pub fn unreachable(&self) -> Vec<NodeIndex> {
        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = self.roots().into();
        while let Some(idx) = queue.pop_front() {
            if !seen.insert(idx) {
                continue;
            }
            for (child, _) in self.dependencies_of(idx) {
                queue.push_back(child);
            }
        }
        self.nodes().into_iter().filter(|i| !seen.contains(i)).collect()
    }

    /// The chain of mods from a root down to `idx`, root first.
    ///
    /// Walks incoming edges breadth first, preferring the smallest identity
    /// at each step, so the same graph always yields the same chain.
    pub fn provenance_chain(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut came_from: BTreeMap<NodeIndex, NodeIndex> = BTreeMap::new();
        let mut seen: BTreeSet<NodeIndex> = BTreeSet::from([idx]);
        let mut queue = VecDeque::from([idx]);
        let mut found = None;
        while let Some(current) = queue.pop_front() {
            if self.graph[current].is_root() {
                found = Some(current);
                break;
            }
            for (parent, _) in self.dependents_of(current) {
                if seen.insert(parent) {
                    came_from.insert(parent, current);
                    queue.push_back(parent);
                }
            }
        }

        let Some(mut current) = found else {
            return vec![idx];
        };
        let mut chain = vec![current];
        while let Some(&next) = came_from.get(&current) {
            chain.push(next);
            current = next;
        }
        chain
    }

    /// Print the dependency tree of every root.
    pub fn print_tree(&self, max_depth: Option<usize>) -> String {
        let mut output = String::new();
        let mut visited = HashSet::new();
        for root in self.roots() {
            output.push_str(&format!("{}\n", self.graph[root]));
            visited.insert(root);
            let deps = self.dependencies_of(root);
            let count = deps.len();
            for (i, (idx, edge)) in deps.iter().enumerate() {
                let is_last = i == count - 1;
                self.print_subtree(
                    &mut output,
                    *idx,
                    edge,
                    "",
                    is_last,
                    1,
                    max_depth,
                    &mut visited,
                );
            }
            visited.remove(&root);
        }
        output
    }

    #[allow(clippy::too_many_arguments)]
    fn print_subtree(
        &self,
        output: &mut String,
        idx: NodeIndex,
        edge: &DepEdge,
        prefix: &str,
        is_last: bool,
        depth: usize,
        max_depth: Option<usize>,
        visited: &mut HashSet<NodeIndex>,
    ) {
        let connector = if is_last { "└── " } else { "├── " };
        let node = &self.graph[idx];
        let label = edge.label().map(|l| format!(" ({l})")).unwrap_or_default();
        let cycle = if visited.contains(&idx) { " (*)" } else { "" };
        output.push_str(&format!("{prefix}{connector}{node}{label}{cycle}\n"));

        if let Some(max) = max_depth {
            if depth >= max {
                return;
            }
        }

        if !visited.insert(idx) {
            return;
        }

        let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
        let deps = self.dependencies_of(idx);
        let count = deps.len();
        for (i, (child, child_edge)) in deps.iter().enumerate() {
            let is_last = i == count - 1;
            self.print_subtree(
                output,
                *child,
                child_edge,
                &child_prefix,
                is_last,
                depth + 1,
                max_depth,
                visited,
            );
        }

        visited.remove(&idx);
    }

    /// Find the path from a root to a mod named by slug or project id.
    pub fn find_path(&self, reference: &str) -> Option<Vec<&ConstraintNode>> {
        let target = self.find_ref(reference)?;
        let chain = self.provenance_chain(target);
        if !self.graph[chain[0]].is_root() {
            return None;
        }
        Some(chain.iter().map(|&idx| &self.graph[idx]).collect())
    }

    /// Build an inverted dependency tree (reverse edges) for a single mod.
    pub fn print_inverted_tree(&self, reference: &str) -> String {
        let mut output = String::new();
        let Some(idx) = self.find_ref(reference) else {
            return output;
        };

        let node = &self.graph[idx];
        let root_mark = if node.is_root() { " (root)" } else { "" };
        output.push_str(&format!("{node}{root_mark}\n"));

        let mut visited = HashSet::new();
        visited.insert(idx);

        let dependents = self.dependents_of(idx);
        let count = dependents.len();
        for (i, (dep_idx, _)) in dependents.iter().enumerate() {
            let is_last = i == count - 1;
            self.print_inverted_subtree(&mut output, *dep_idx, "", is_last, &mut visited);
        }

        output
    }

    fn print_inverted_subtree(
        &self,
        output: &mut String,
        idx: NodeIndex,
        prefix: &str,
        is_last: bool,
        visited: &mut HashSet<NodeIndex>,
    ) {
        let connector = if is_last { "└── " } else { "├── " };
        let node = &self.graph[idx];
        let root_mark = if node.is_root() { " (root)" } else { "" };
        output.push_str(&format!("{prefix}{connector}{node}{root_mark}\n"));

        if !visited.insert(idx) {
            return;
        }

        let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
        let dependents = self.dependents_of(idx);
        let count = dependents.len();
        for (i, (dep_idx, _)) in dependents.iter().enumerate() {
            let is_last = i == count - 1;
            self.print_inverted_subtree(output, *dep_idx, &child_prefix, is_last, visited);
        }

        visited.remove(&idx);
    }

    fn hard_dfs(
        &self,
        current: NodeIndex,
        target: NodeIndex,
        path: &mut Vec<NodeIndex>,
        visited: &mut HashSet<NodeIndex>,
    ) -> bool {
        path.push(current);
        if current == target {
            return true;
        }
        if !visited.insert(current) {
            path.pop();
            return false;
        }
        for (child, edge) in self.dependencies_of(current) {
            if !edge.is_hard() {
                continue;
            }
            if self.hard_dfs(child, target, path, visited) {
                return true;
            }
        }
        path.pop();
        false
    }

    /// Number of mods in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
