//! Constraint model: version ranges and compatibility tags placed on a mod,
//! each remembering who imposed it.

use std::fmt;

use modforge_core::candidate::{DependencyKind, DependencyRole, VersionCandidate};
use modforge_core::identity::ModIdentity;
use modforge_core::tags::{CompatTags, TagKind};
use modforge_core::version::VersionRange;

/// Who imposed a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// The pack's loader and game version.
    Environment,
    /// A root selection, with the requirement as the user wrote it.
    Root { requirement: String },
    /// A dependency declared by an assigned candidate.
    Dependency {
        parent: ModIdentity,
        parent_version: String,
        kind: DependencyKind,
        role: DependencyRole,
    },
    /// A policy substitution that put this mod in place of another.
    Substitution {
        parent: Option<ModIdentity>,
        replaced: ModIdentity,
        rule: String,
    },
}

impl Provenance {
    /// The mod whose choice produced this constraint, if any.
    pub fn parent(&self) -> Option<&ModIdentity> {
        match self {
            Self::Dependency { parent, .. } => Some(parent),
            Self::Substitution { parent, .. } => parent.as_ref(),
            Self::Environment | Self::Root { .. } => None,
        }
    }

    pub fn is_root(&self) -> bool {
        match self {
            Self::Root { .. } => true,
            Self::Substitution { parent, .. } => parent.is_none(),
            Self::Environment | Self::Dependency { .. } => false,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => f.write_str("pack environment"),
            Self::Root { requirement } => write!(f, "root selection `{requirement}`"),
            Self::Dependency {
                parent,
                parent_version,
                kind,
                role,
            } => {
                let how = match (kind, role) {
                    (_, DependencyRole::SubMod) => "sub-mod",
                    (DependencyKind::Optional, _) => "optional dependency",
                    _ => "dependency",
                };
                write!(f, "{how} of {parent}@{parent_version}")
            }
            Self::Substitution {
                parent: Some(parent),
                replaced,
                rule,
            } => write!(f, "substitute for {replaced} needed by {parent} ({rule})"),
            Self::Substitution {
                parent: None,
                replaced,
                rule,
            } => write!(f, "substitute for root {replaced} ({rule})"),
        }
    }
}

/// A single restriction on which versions of a mod are acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub range: VersionRange,
    pub tags: Option<CompatTags>,
    pub origin: Provenance,
}

impl Constraint {
    pub fn new(range: VersionRange, origin: Provenance) -> Self {
        Self {
            range,
            tags: None,
            origin,
        }
    }

    pub fn with_tags(mut self, tags: CompatTags) -> Self {
        self.tags = Some(tags);
        self
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.range)?;
        if let Some(tags) = &self.tags {
            write!(f, " [{tags}]")?;
        }
        write!(f, " from {}", self.origin)
    }
}

/// Why a merge produced an empty constraint set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeFailure {
    EmptyRange,
    EmptyTags(TagKind),
}

/// An unsatisfiable merge, naming the constraints that cannot hold together.
#[derive(Debug, Clone)]
pub struct MergeConflict {
    pub failure: MergeFailure,
    /// The incoming constraint plus every existing one it clashes with.
    pub culprits: Vec<Constraint>,
}

/// The constraints attached to one mod and their running intersection.
#[derive(Debug, Clone)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
    range: VersionRange,
    tags: CompatTags,
}

impl Default for ConstraintSet {
    fn default() -> Self {
        Self {
            constraints: Vec::new(),
            range: VersionRange::any(),
            tags: CompatTags::unrestricted(),
        }
    }
}

impl ConstraintSet {
    /// A set holding only the environment's tag restriction.
    pub fn for_environment(environment: &CompatTags) -> Self {
        let mut set = Self::default();
        if *environment != CompatTags::unrestricted() {
            set.constraints.push(
                Constraint::new(VersionRange::any(), Provenance::Environment)
                    .with_tags(environment.clone()),
            );
            set.tags = environment.clone();
        }
        set
    }

    pub fn range(&self) -> &VersionRange {
        &self.range
    }

    pub fn tags(&self) -> &CompatTags {
        &self.tags
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Whether a root selection constrains this mod.
    pub fn has_root(&self) -> bool {
        self.constraints.iter().any(|c| c.origin.is_root())
    }

    /// Intersect `incoming` into the set.
    ///
    /// Returns whether the merged range or tags narrowed. On failure the set
    /// is left unchanged.
    pub fn merge(&mut self, incoming: Constraint) -> Result<bool, MergeConflict> {
        let range = self.range.intersect(&incoming.range).ok_or_else(|| MergeConflict {
            failure: MergeFailure::EmptyRange,
            culprits: self.range_culprits(&incoming),
        })?;

        let tags = match &incoming.tags {
            Some(t) => self.tags.intersect(t),
            None => self.tags.clone(),
        };
        if let Some(kind) = tags.empty_dimension() {
            return Err(MergeConflict {
                failure: MergeFailure::EmptyTags(kind),
                culprits: self.tag_culprits(&incoming),
            });
        }

        let narrowed = range != self.range || tags != self.tags;
        self.range = range;
        self.tags = tags;
        self.constraints.push(incoming);
        Ok(narrowed)
    }

    /// Drop every constraint imposed by `parent`. Returns whether any were
    /// removed.
    pub fn retract_from(&mut self, parent: &ModIdentity) -> bool {
        let before = self.constraints.len();
        self.constraints.retain(|c| c.origin.parent() != Some(parent));
        if self.constraints.len() == before {
            return false;
        }
        self.recompute();
        true
    }

    /// Whether `candidate` satisfies every constraint.
    pub fn admits(&self, candidate: &VersionCandidate) -> bool {
        self.rejection(candidate).is_none()
    }

    /// Why `candidate` is ruled out, if it is.
    pub fn rejection(&self, candidate: &VersionCandidate) -> Option<String> {
        if !self.range.contains(&candidate.version) {
            let by = self
                .constraints
                .iter()
                .find(|c| !c.range.contains(&candidate.version))
                .map(|c| format!(" required by {}", c.origin))
                .unwrap_or_default();
            return Some(format!("outside {}{by}", self.range));
        }
        if let Some(kind) = self.tags.rejects(&candidate.loaders, &candidate.game_versions) {
            return Some(format!("no matching {kind} (needs {})", self.tags));
        }
        None
    }

    fn recompute(&mut self) {
        let mut range = VersionRange::any();
        let mut tags = CompatTags::unrestricted();
        for c in &self.constraints {
            // Removing constraints only widens, so the fold cannot empty out.
            if let Some(next) = range.intersect(&c.range) {
                range = next;
            }
            if let Some(t) = &c.tags {
                tags = tags.intersect(t);
            }
        }
        self.range = range;
        self.tags = tags;
    }

    fn range_culprits(&self, incoming: &Constraint) -> Vec<Constraint> {
        let mut culprits: Vec<Constraint> = self
            .constraints
            .iter()
            .filter(|c| c.range.intersect(&incoming.range).is_none())
            .cloned()
            .collect();
        if culprits.is_empty() {
            // No single constraint clashes; only their combination does.
            culprits = self
                .constraints
                .iter()
                .filter(|c| !c.range.is_any())
                .cloned()
                .collect();
        }
        culprits.push(incoming.clone());
        culprits
    }

    fn tag_culprits(&self, incoming: &Constraint) -> Vec<Constraint> {
        let Some(incoming_tags) = &incoming.tags else {
            return vec![incoming.clone()];
        };
        let mut culprits: Vec<Constraint> = self
            .constraints
            .iter()
            .filter(|c| {
                c.tags
                    .as_ref()
                    .is_some_and(|t| t.intersect(incoming_tags).empty_dimension().is_some())
            })
            .cloned()
            .collect();
        if culprits.is_empty() {
            culprits = self
                .constraints
                .iter()
                .filter(|c| c.tags.is_some())
                .cloned()
                .collect();
        }
        culprits.push(incoming.clone());
        culprits
    }
}

/// Merge `incoming` into a copy of `existing`.
pub fn merge_constraints(
    existing: &ConstraintSet,
    incoming: Constraint,
) -> Result<ConstraintSet, MergeConflict> {
    let mut merged = existing.clone();
    merged.merge(incoming)?;
    Ok(merged)
}
