//! Unsatisfiable-constraint reporting with full provenance.

use std::fmt;

use modforge_core::identity::ModIdentity;
use modforge_core::policy::Action;
use modforge_core::tags::TagKind;

use crate::constraint::Constraint;

/// Why resolution could not continue for a mod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// The version ranges placed on the mod do not intersect.
    EmptyRange,
    /// The loader or game-version restrictions do not intersect.
    EmptyTags(TagKind),
    /// No published version satisfies the merged constraints.
    NoCandidates,
    /// A policy rule rejected the decision point.
    Rejected { rule: String },
    /// Two required mods declare each other incompatible.
    Incompatible { other: ModIdentity, declared_by: String },
    /// Two assigned mods share no loader or game version.
    IncompatibleTags { other: ModIdentity, kind: TagKind },
    /// Required dependencies form a cycle.
    RequiredCycle { cycle: Vec<ModIdentity> },
    /// Two root selections claim the same capability slot.
    RootCollision { slot: String, other: ModIdentity },
    /// An `ask` action had nobody to answer it.
    DecisionRequired { rule: String },
    /// The mod was reopened more often than allowed.
    NotConverged { reopens: u32 },
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRange => f.write_str("version requirements cannot all be met"),
            Self::EmptyTags(kind) => write!(f, "{kind} requirements cannot all be met"),
            Self::NoCandidates => f.write_str("no published version satisfies every requirement"),
            Self::Rejected { rule } => write!(f, "rejected by {rule}"),
            Self::Incompatible { other, declared_by } => {
                write!(f, "incompatible with {other} (declared by {declared_by})")
            }
            Self::IncompatibleTags { other, kind } => {
                write!(f, "shares no {kind} with {other}")
            }
            Self::RequiredCycle { cycle } => {
                let names: Vec<String> = cycle.iter().map(|m| m.to_string()).collect();
                write!(f, "required dependency cycle {}", names.join(" -> "))
            }
            Self::RootCollision { slot, other } => {
                write!(f, "provides `{slot}` like the selected {other}")
            }
            Self::DecisionRequired { rule } => {
                write!(f, "{rule} asks for a decision but no prompt is available")
            }
            Self::NotConverged { reopens } => {
                write!(f, "constraints kept changing after {reopens} re-resolutions")
            }
        }
    }
}

/// A constraint in a conflict, with the dependency chain that produced it.
#[derive(Debug, Clone)]
pub struct ConstraintTrace {
    pub constraint: Constraint,
    /// Mods from a root selection down to the constraint's source, rendered
    /// as `slug@version`.
    pub chain: Vec<String>,
}

/// A version that was considered and ruled out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EliminatedCandidate {
    pub version: String,
    pub version_id: String,
    pub reason: String,
}

/// One decision taken during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionRecord {
    pub point: String,
    pub action: Action,
    /// The rule that decided, or `default policy`.
    pub rule: String,
    pub outcome: String,
}

impl fmt::Display for DecisionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} by {} => {}",
            self.point, self.action, self.rule, self.outcome
        )
    }
}

/// The unsatisfiable constraint set plus everything needed to explain it.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub subject: ModIdentity,
    pub reason: ConflictReason,
    pub constraints: Vec<ConstraintTrace>,
    pub eliminated: Vec<EliminatedCandidate>,
    /// Every decision taken before the failure, in order.
    pub trail: Vec<DecisionRecord>,
}

impl Conflict {
    pub fn new(subject: ModIdentity, reason: ConflictReason) -> Self {
        Self {
            subject,
            reason,
            constraints: Vec::new(),
            eliminated: Vec::new(),
            trail: Vec::new(),
        }
    }

    /// Whether the mod named by `reference` contributed to the conflict,
    /// either as a constraint source or somewhere on a provenance chain.
    pub fn cites(&self, reference: &str) -> bool {
        let prefix = format!("{reference}@");
        self.subject.matches(reference)
            || self.constraints.iter().any(|t| {
                t.constraint
                    .origin
                    .parent()
                    .is_some_and(|p| p.matches(reference))
                    || t.chain.iter().any(|c| c.starts_with(&prefix))
            })
            || match &self.reason {
                ConflictReason::Incompatible { other, .. }
                | ConflictReason::IncompatibleTags { other, .. }
                | ConflictReason::RootCollision { other, .. } => other.matches(reference),
                ConflictReason::RequiredCycle { cycle } => {
                    cycle.iter().any(|m| m.matches(reference))
                }
                _ => false,
            }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", self.subject, self.reason)?;
        if !self.constraints.is_empty() {
            writeln!(f, "  constraints:")?;
            for trace in &self.constraints {
                writeln!(f, "    {}", trace.constraint)?;
                if trace.chain.len() > 1 {
                    writeln!(f, "      via {}", trace.chain.join(" -> "))?;
                }
            }
        }
        if !self.eliminated.is_empty() {
            writeln!(f, "  eliminated versions:")?;
            for e in &self.eliminated {
                writeln!(f, "    {} ({}): {}", e.version, e.version_id, e.reason)?;
            }
        }
        if !self.trail.is_empty() {
            writeln!(f, "  decisions so far:")?;
            for d in &self.trail {
                writeln!(f, "    {d}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::Provenance;
    use modforge_core::candidate::{DependencyKind, DependencyRole};
    use modforge_core::version::VersionRange;

    fn trace(parent: &str, range: &str) -> ConstraintTrace {
        ConstraintTrace {
            constraint: Constraint::new(
                VersionRange::parse(range).unwrap(),
                Provenance::Dependency {
                    parent: ModIdentity::new(parent, parent),
                    parent_version: "1.0".into(),
                    kind: DependencyKind::Required,
                    role: DependencyRole::Direct,
                },
            ),
            chain: vec![format!("{parent}@1.0")],
        }
    }

    #[test]
    fn report_lists_constraints_and_trail() {
        let mut conflict = Conflict::new(ModIdentity::new("modc", "C"), ConflictReason::EmptyRange);
        conflict.constraints = vec![trace("moda", "1.0"), trace("modb", "2.0")];
        conflict.trail.push(DecisionRecord {
            point: "moda: choose among 1.2, 1.0".into(),
            action: Action::PreferHighestVersion,
            rule: "default policy".into(),
            outcome: "moda@1.2".into(),
        });

        let text = conflict.to_string();
        assert!(text.starts_with("modc: version requirements cannot all be met\n"));
        assert!(text.contains("=1.0 from dependency of moda@1.0"));
        assert!(text.contains("=2.0 from dependency of modb@1.0"));
        assert!(text.contains("prefer-highest-version by default policy => moda@1.2"));

        assert!(conflict.cites("moda"));
        assert!(conflict.cites("modb"));
        assert!(conflict.cites("modc"));
        assert!(!conflict.cites("modd"));
    }

    #[test]
    fn cycle_reason_cites_members() {
        let conflict = Conflict::new(
            ModIdentity::new("moda", "A"),
            ConflictReason::RequiredCycle {
                cycle: vec![
                    ModIdentity::new("moda", "A"),
                    ModIdentity::new("modb", "B"),
                    ModIdentity::new("moda", "A"),
                ],
            },
        );
        assert!(conflict.cites("modb"));
        assert_eq!(
            conflict.reason.to_string(),
            "required dependency cycle moda -> modb -> moda"
        );
    }
}
