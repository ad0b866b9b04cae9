//! Policy evaluator: maps a decision point to the action the rules prescribe.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};

use modforge_core::candidate::{DependencyRole, VersionCandidate};
use modforge_core::identity::ModIdentity;
use modforge_core::policy::{Action, MatchContext, PolicyRule, PolicySet, TriggerKind};

/// A version on offer at an ambiguity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSummary {
    pub version: String,
    pub version_id: String,
    pub published: DateTime<Utc>,
}

impl From<&VersionCandidate> for CandidateSummary {
    fn from(c: &VersionCandidate) -> Self {
        Self {
            version: c.version.to_string(),
            version_id: c.version_id.clone(),
            published: c.published,
        }
    }
}

/// A choice the constraints leave open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionPoint {
    /// Two or more versions of one mod satisfy its constraints.
    Ambiguity {
        subject: ModIdentity,
        candidates: Vec<CandidateSummary>,
    },
    /// Two distinct mods claim the same capability slot.
    CapabilityCollision {
        slot: String,
        incumbent: ModIdentity,
        challenger: ModIdentity,
    },
    /// An assigned candidate offers an optional dependency.
    OptionalDependencyOffered {
        parent: ModIdentity,
        target: ModIdentity,
        role: DependencyRole,
    },
}

impl DecisionPoint {
    pub fn trigger(&self) -> TriggerKind {
        match self {
            Self::Ambiguity { .. } => TriggerKind::Ambiguity,
            Self::CapabilityCollision { .. } => TriggerKind::CapabilityCollision,
            Self::OptionalDependencyOffered { .. } => TriggerKind::OptionalDependency,
        }
    }
}

impl fmt::Display for DecisionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ambiguity {
                subject,
                candidates,
            } => {
                let versions: Vec<&str> = candidates.iter().map(|c| c.version.as_str()).collect();
                write!(f, "{subject}: choose among {}", versions.join(", "))
            }
            Self::CapabilityCollision {
                slot,
                incumbent,
                challenger,
            } => write!(f, "{incumbent} and {challenger} both provide `{slot}`"),
            Self::OptionalDependencyOffered {
                parent,
                target,
                role,
            } => {
                if *role == DependencyRole::SubMod {
                    write!(f, "{parent} recommends sub-mod {target}")
                } else {
                    write!(f, "{parent} offers optional {target}")
                }
            }
        }
    }
}

/// The evaluator's answer, with the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub action: Action,
    /// `None` when no rule matched and the default applied.
    pub rule: Option<PolicyRule>,
}

impl Verdict {
    /// Short label naming the deciding rule, for trails and reports.
    pub fn rule_label(&self) -> String {
        match &self.rule {
            Some(rule) => rule.source.to_string(),
            None => "default policy".to_string(),
        }
    }
}

/// Pure first-match-wins evaluation over a loaded [`PolicySet`].
#[derive(Debug, Clone, Copy)]
pub struct PolicyEvaluator<'a> {
    policy: &'a PolicySet,
}

impl<'a> PolicyEvaluator<'a> {
    pub fn new(policy: &'a PolicySet) -> Self {
        Self { policy }
    }

    pub fn evaluate(&self, point: &DecisionPoint) -> Verdict {
        let trigger = point.trigger();
        let matched = match point {
            DecisionPoint::Ambiguity { subject, .. } => self.policy.first_match(&MatchContext {
                trigger,
                mods: &[subject],
                slot: None,
                parent: None,
                role: None,
            }),
            DecisionPoint::CapabilityCollision {
                slot,
                incumbent,
                challenger,
            } => self.policy.first_match(&MatchContext {
                trigger,
                mods: &[incumbent, challenger],
                slot: Some(slot.as_str()),
                parent: None,
                role: None,
            }),
            DecisionPoint::OptionalDependencyOffered {
                parent,
                target,
                role,
            } => self.policy.first_match(&MatchContext {
                trigger,
                mods: &[target],
                slot: None,
                parent: Some(parent),
                role: Some(*role),
            }),
        };
        match matched {
            Some(rule) => Verdict {
                action: rule.action.clone(),
                rule: Some(rule.clone()),
            },
            None => Verdict {
                action: trigger.default_action(),
                rule: None,
            },
        }
    }
}

/// A caller's answer to an `ask` action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// Take the n-th option: a candidate at an ambiguity, `0` for the
    /// incumbent and `1` for the challenger at a collision, `0` to include
    /// and anything else to skip an optional dependency.
    Take(usize),
    /// Apply this action instead. `ask` is not accepted again.
    Act(Action),
}

/// Answers `ask` decisions, typically by prompting a user.
pub trait DecisionPrompt: Send + Sync {
    /// `None` leaves the decision unanswered, which fails the run.
    fn answer(&self, point: &DecisionPoint) -> Option<Answer>;
}

/// Best-first order used by `prefer-highest-version`: higher version, then
/// newer publish time, then the lexically smaller version id.
pub fn compare_preference(a: &VersionCandidate, b: &VersionCandidate) -> Ordering {
    b.version
        .cmp(&a.version)
        .then_with(|| b.published.cmp(&a.published))
        .then_with(|| a.version_id.cmp(&b.version_id))
}

pub fn pick_highest<'c>(candidates: &[&'c VersionCandidate]) -> Option<&'c VersionCandidate> {
    candidates
        .iter()
        .copied()
        .min_by(|a, b| compare_preference(a, b))
}

/// The candidate matching a locked version id or version string.
pub fn pick_pinned<'c>(
    candidates: &[&'c VersionCandidate],
    pin: &str,
) -> Option<&'c VersionCandidate> {
    candidates
        .iter()
        .copied()
        .find(|c| c.version_id == pin)
        .or_else(|| candidates.iter().copied().find(|c| c.version.as_str() == pin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn candidate(version: &str, id: &str, day: u32) -> VersionCandidate {
        let when = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        VersionCandidate::new(ModIdentity::new("modb", "B"), id, version, when)
    }

    #[test]
    fn highest_version_then_newest_then_id() {
        let a = candidate("2.1", "a", 1);
        let b = candidate("2.5", "b", 1);
        let c = candidate("2.5.0", "c", 9);
        let d = candidate("2.5.0", "d", 9);
        assert_eq!(pick_highest(&[&a, &b]).unwrap().version_id, "b");
        assert_eq!(pick_highest(&[&a, &b, &c]).unwrap().version_id, "c");
        assert_eq!(pick_highest(&[&d, &c]).unwrap().version_id, "c");
        assert!(pick_highest(&[]).is_none());
    }

    #[test]
    fn pinned_by_id_or_version() {
        let a = candidate("2.1", "a", 1);
        let b = candidate("2.5", "b", 1);
        assert_eq!(pick_pinned(&[&a, &b], "a").unwrap().version, a.version);
        assert_eq!(pick_pinned(&[&a, &b], "2.5").unwrap().version_id, "b");
        assert!(pick_pinned(&[&a, &b], "3.0").is_none());
    }

    #[test]
    fn defaults_without_rules() {
        let policy = PolicySet::empty();
        let evaluator = PolicyEvaluator::new(&policy);
        let verdict = evaluator.evaluate(&DecisionPoint::OptionalDependencyOffered {
            parent: ModIdentity::new("moda", "A"),
            target: ModIdentity::new("modb", "B"),
            role: DependencyRole::Direct,
        });
        assert_eq!(verdict.action, Action::Skip);
        assert_eq!(verdict.rule_label(), "default policy");

        let verdict = evaluator.evaluate(&DecisionPoint::CapabilityCollision {
            slot: "worldgen".into(),
            incumbent: ModIdentity::new("mody", "Y"),
            challenger: ModIdentity::new("modz", "Z"),
        });
        assert_eq!(verdict.action, Action::PreferHighestVersion);
    }

    #[test]
    fn collision_rule_matches_either_side_and_slot() {
        let policy = PolicySet::new(
            vec![
                modforge_core::policy::PolicyRule::new(
                    TriggerKind::CapabilityCollision,
                    Action::Substitute("modx".into()),
                )
                .in_slot("worldgen"),
            ],
            BTreeMap::new(),
        )
        .unwrap();
        let evaluator = PolicyEvaluator::new(&policy);
        let point = DecisionPoint::CapabilityCollision {
            slot: "worldgen".into(),
            incumbent: ModIdentity::new("mody", "Y"),
            challenger: ModIdentity::new("modz", "Z"),
        };
        let verdict = evaluator.evaluate(&point);
        assert_eq!(verdict.action, Action::Substitute("modx".into()));
        assert_eq!(verdict.rule_label(), "rule #1");
        assert_eq!(evaluator.evaluate(&point), verdict);

        let other_slot = DecisionPoint::CapabilityCollision {
            slot: "minimap".into(),
            incumbent: ModIdentity::new("mody", "Y"),
            challenger: ModIdentity::new("modz", "Z"),
        };
        assert_eq!(
            evaluator.evaluate(&other_slot).action,
            Action::PreferHighestVersion
        );
    }
}
