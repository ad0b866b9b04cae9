//! Manifest builder: deterministic topological order over the final
//! assignment, dependencies before dependents.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use petgraph::stable_graph::NodeIndex;
use serde::Serialize;

use modforge_core::candidate::{DependencyKind, DependencyRole};
use modforge_core::identity::ModIdentity;
use modforge_core::lockfile::{LockedEnvironment, LockedMod, Lockfile};
use modforge_core::tags::CompatTags;

use crate::constraint::Provenance;
use crate::error::ResolveError;
use crate::graph::ResolutionGraph;

/// One mod to install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub identity: ModIdentity,
    pub version: String,
    pub version_id: String,
    /// Download URL of the primary file, when the registry gave one.
    pub source: Option<String>,
    pub sha512: Option<String>,
    pub sha1: Option<String>,
    /// Why the mod is included: `root`, `required by moda`, ...
    pub reason: String,
    pub dependencies: Vec<ModIdentity>,
}

/// The ordered install list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slugs in install order.
    pub fn slugs(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.identity.slug.as_str()).collect()
    }

    /// Install position of the mod named by slug or project id.
    pub fn position(&self, reference: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.identity.matches(reference))
    }

    pub fn get(&self, reference: &str) -> Option<&ManifestEntry> {
        self.position(reference).map(|i| &self.entries[i])
    }

    /// Lockfile form of the manifest for the given environment.
    pub fn to_lockfile(&self, environment: &CompatTags) -> Lockfile {
        let minecraft = environment
            .game_versions
            .as_ref()
            .and_then(|v| v.iter().next().cloned())
            .unwrap_or_default();
        let loaders = environment
            .loaders
            .as_ref()
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default();

        Lockfile {
            environment: LockedEnvironment { minecraft, loaders },
            mods: self
                .entries
                .iter()
                .map(|e| LockedMod {
                    slug: e.identity.slug.clone(),
                    project_id: e.identity.project_id.clone(),
                    version: e.version.clone(),
                    version_id: e.version_id.clone(),
                    source: e.source.clone(),
                    sha512: e.sha512.clone(),
                    sha1: e.sha1.clone(),
                    reason: e.reason.clone(),
                    dependencies: e.dependencies.iter().map(|d| d.slug.clone()).collect(),
                })
                .collect(),
        }
    }
}

/// Order the assigned graph into a manifest.
///
/// Required edges always constrain the order. Included optional edges are
/// added in identity order unless they would close a cycle, in which case
/// they are left out of the ordering only.
pub fn build(graph: &ResolutionGraph) -> Result<Manifest, ResolveError> {
    let nodes = graph.nodes();
    for &idx in &nodes {
        if graph.node(idx).assigned.is_none() {
            return Err(ResolveError::internal(format!(
                "{} reached the manifest without an assigned version",
                graph.node(idx).identity
            )));
        }
    }

    // node -> the nodes it must come after
    let mut after: BTreeMap<NodeIndex, BTreeSet<NodeIndex>> =
        nodes.iter().map(|&i| (i, BTreeSet::new())).collect();
    let mut optional = Vec::new();
    for &idx in &nodes {
        for (dep, edge) in graph.dependencies_of(idx) {
            if edge.is_hard() {
                after.entry(idx).or_default().insert(dep);
            } else {
                optional.push((idx, dep));
            }
        }
    }
    for (from, to) in optional {
        if !depends_on(&after, to, from) {
            after.entry(from).or_default().insert(to);
        } else {
            tracing::debug!(
                "ordering ignores optional edge {} -> {} (closes a cycle)",
                graph.node(from).identity,
                graph.node(to).identity
            );
        }
    }

    let mut remaining: BTreeMap<NodeIndex, usize> =
        after.iter().map(|(&i, deps)| (i, deps.len())).collect();
    let mut dependents: BTreeMap<NodeIndex, Vec<NodeIndex>> = BTreeMap::new();
    for (&idx, deps) in &after {
        for &dep in deps {
            dependents.entry(dep).or_default().push(idx);
        }
    }

    let mut ready: BinaryHeap<Reverse<(&ModIdentity, NodeIndex)>> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(&i, _)| Reverse((&graph.node(i).identity, i)))
        .collect();

    let mut entries = Vec::with_capacity(nodes.len());
    while let Some(Reverse((_, idx))) = ready.pop() {
        entries.push(entry_for(graph, idx)?);
        for &dependent in dependents.get(&idx).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(count) = remaining.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse((&graph.node(dependent).identity, dependent)));
                }
            }
        }
    }

    if entries.len() != nodes.len() {
        let stuck: Vec<String> = remaining
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(&i, _)| graph.node(i).identity.to_string())
            .collect();
        return Err(ResolveError::internal(format!(
            "dependency cycle among {}",
            stuck.join(", ")
        )));
    }

    Ok(Manifest { entries })
}

fn depends_on(
    after: &BTreeMap<NodeIndex, BTreeSet<NodeIndex>>,
    from: NodeIndex,
    to: NodeIndex,
) -> bool {
    let mut stack = vec![from];
    let mut seen = BTreeSet::new();
    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        if let Some(deps) = after.get(&current) {
            stack.extend(deps.iter().copied());
        }
    }
    false
}

fn entry_for(graph: &ResolutionGraph, idx: NodeIndex) -> Result<ManifestEntry, ResolveError> {
    let node = graph.node(idx);
    let candidate = node
        .assigned
        .as_ref()
        .ok_or_else(|| ResolveError::internal(format!("{} lost its assignment", node.identity)))?;

    let mut dependencies: Vec<ModIdentity> = graph
        .dependencies_of(idx)
        .into_iter()
        .map(|(dep, _)| graph.node(dep).identity.clone())
        .collect();
    dependencies.sort();

    Ok(ManifestEntry {
        identity: node.identity.clone(),
        version: candidate.version.to_string(),
        version_id: candidate.version_id.clone(),
        source: candidate.file.as_ref().map(|f| f.url.clone()),
        sha512: candidate.file.as_ref().and_then(|f| f.sha512.clone()),
        sha1: candidate.file.as_ref().and_then(|f| f.sha1.clone()),
        reason: reason_for(graph, idx),
        dependencies,
    })
}

fn reason_for(graph: &ResolutionGraph, idx: NodeIndex) -> String {
    let node = graph.node(idx);
    for c in node.constraints.constraints() {
        if let Provenance::Substitution { replaced, .. } = &c.origin {
            return format!("substitute for {replaced}");
        }
    }
    if node.constraints.constraints().iter().any(|c| matches!(c.origin, Provenance::Root { .. })) {
        return "root".to_string();
    }
    let dependents = graph.dependents_of(idx);
    let pick = dependents
        .iter()
        .find(|(_, e)| e.is_hard())
        .or_else(|| dependents.first());
    match pick {
        Some((parent, edge)) => {
            let parent = &graph.node(*parent).identity;
            match (edge.kind, edge.role) {
                (_, DependencyRole::SubMod) => format!("sub-mod of {parent}"),
                (DependencyKind::Optional, _) => format!("optional of {parent}"),
                _ => format!("required by {parent}"),
            }
        }
        None => "root".to_string(),
    }
}
