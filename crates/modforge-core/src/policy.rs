//! The policy file, `modforge-policy.toml`, and its validation into an
//! ordered rule list.
//!
//! ```toml
//! [[rule]]
//! when = "capability-collision"
//! slot = "worldgen"
//! action = "substitute:terralith"
//!
//! [mods.sodium]
//! sub-mods = ["sodium-extra", "reeses-sodium-options"]
//! conflicts = ["optifabric"]
//! ```
//!
//! Rules are evaluated in file order and the first match wins. Each
//! `sub-mods` entry additionally becomes an `include` rule for that
//! optional edge, appended after every user rule.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use modforge_util::errors::ModforgeError;

use crate::candidate::DependencyRole;
use crate::identity::ModIdentity;

pub const POLICY_FILE: &str = "modforge-policy.toml";

/// The kind of decision point a rule listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TriggerKind {
    Ambiguity,
    CapabilityCollision,
    OptionalDependency,
}

impl TriggerKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ambiguity" => Some(Self::Ambiguity),
            "capability-collision" | "collision" => Some(Self::CapabilityCollision),
            "optional-dependency" | "optional" => Some(Self::OptionalDependency),
            _ => None,
        }
    }

    /// Action applied when no rule matches.
    pub fn default_action(self) -> Action {
        match self {
            Self::Ambiguity | Self::CapabilityCollision => Action::PreferHighestVersion,
            Self::OptionalDependency => Action::Skip,
        }
    }

    fn allows(self, action: &Action) -> bool {
        match self {
            Self::Ambiguity | Self::CapabilityCollision => matches!(
                action,
                Action::PreferHighestVersion
                    | Action::PreferPinned
                    | Action::Reject
                    | Action::Substitute(_)
                    | Action::Ask
            ),
            Self::OptionalDependency => matches!(
                action,
                Action::Include
                    | Action::Skip
                    | Action::Reject
                    | Action::Substitute(_)
                    | Action::Ask
            ),
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ambiguity => f.write_str("ambiguity"),
            Self::CapabilityCollision => f.write_str("capability-collision"),
            Self::OptionalDependency => f.write_str("optional-dependency"),
        }
    }
}

/// What to do at a decision point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    PreferHighestVersion,
    PreferPinned,
    Reject,
    /// Resolve the named mod in place of the one under decision.
    Substitute(String),
    Ask,
    Include,
    Skip,
}

impl Action {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if let Some(target) = s.strip_prefix("substitute:") {
            let target = target.trim();
            if target.is_empty() {
                return Err("`substitute:` needs a target mod".to_string());
            }
            return Ok(Self::Substitute(target.to_string()));
        }
        match s.to_lowercase().as_str() {
            "prefer-highest-version" | "prefer-highest" => Ok(Self::PreferHighestVersion),
            "prefer-pinned" => Ok(Self::PreferPinned),
            "reject" => Ok(Self::Reject),
            "ask" => Ok(Self::Ask),
            "include" => Ok(Self::Include),
            "skip" => Ok(Self::Skip),
            "substitute" => Err("`substitute` needs a target, e.g. `substitute:modx`".to_string()),
            other => Err(format!("unknown action `{other}`")),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreferHighestVersion => f.write_str("prefer-highest-version"),
            Self::PreferPinned => f.write_str("prefer-pinned"),
            Self::Reject => f.write_str("reject"),
            Self::Substitute(target) => write!(f, "substitute:{target}"),
            Self::Ask => f.write_str("ask"),
            Self::Include => f.write_str("include"),
            Self::Skip => f.write_str("skip"),
        }
    }
}

/// Where a rule came from, for provenance in reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSource {
    /// The n-th `[[rule]]` entry, counting from 1.
    User { index: usize },
    /// Generated from `[mods.<parent>] sub-mods`.
    SubMod { parent: String },
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { index } => write!(f, "rule #{index}"),
            Self::SubMod { parent } => write!(f, "sub-mods of {parent}"),
        }
    }
}

/// A validated policy rule: trigger filters plus the prescribed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub trigger: TriggerKind,
    /// Matches when any mod under decision has this slug or project id.
    pub subject: Option<String>,
    pub slot: Option<String>,
    pub parent: Option<String>,
    pub role: Option<DependencyRole>,
    pub action: Action,
    pub source: RuleSource,
}

/// The facts of a decision point that rule filters are tested against.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub trigger: TriggerKind,
    pub mods: &'a [&'a ModIdentity],
    pub slot: Option<&'a str>,
    pub parent: Option<&'a ModIdentity>,
    pub role: Option<DependencyRole>,
}

impl PolicyRule {
    pub fn new(trigger: TriggerKind, action: Action) -> Self {
        Self {
            trigger,
            subject: None,
            slot: None,
            parent: None,
            role: None,
            action,
            source: RuleSource::User { index: 0 },
        }
    }

    pub fn for_mod(mut self, slug: &str) -> Self {
        self.subject = Some(slug.to_string());
        self
    }

    pub fn in_slot(mut self, slot: &str) -> Self {
        self.slot = Some(slot.trim().to_lowercase());
        self
    }

    pub fn from_parent(mut self, slug: &str) -> Self {
        self.parent = Some(slug.to_string());
        self
    }

    pub fn with_role(mut self, role: DependencyRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        if self.trigger != ctx.trigger {
            return false;
        }
        if let Some(subject) = &self.subject {
            if !ctx.mods.iter().any(|m| m.matches(subject)) {
                return false;
            }
        }
        if let Some(slot) = &self.slot {
            if ctx.slot != Some(slot.as_str()) {
                return false;
            }
        }
        if let Some(parent) = &self.parent {
            if !ctx.parent.is_some_and(|p| p.matches(parent)) {
                return false;
            }
        }
        if let Some(role) = self.role {
            if ctx.role != Some(role) {
                return false;
            }
        }
        true
    }

    fn filters(&self) -> (TriggerKind, Option<&str>, Option<&str>, Option<&str>, Option<DependencyRole>) {
        (
            self.trigger,
            self.subject.as_deref(),
            self.slot.as_deref(),
            self.parent.as_deref(),
            self.role,
        )
    }

    fn validate(&self) -> Result<(), String> {
        if !self.trigger.allows(&self.action) {
            return Err(format!(
                "action `{}` is not allowed for `{}` rules",
                self.action, self.trigger
            ));
        }
        if self.slot.is_some() && self.trigger != TriggerKind::CapabilityCollision {
            return Err("`slot` only applies to capability-collision rules".to_string());
        }
        if (self.parent.is_some() || self.role.is_some())
            && self.trigger != TriggerKind::OptionalDependency
        {
            return Err("`parent` and `role` only apply to optional-dependency rules".to_string());
        }
        if let (Action::Substitute(target), Some(subject)) = (&self.action, &self.subject) {
            if target.eq_ignore_ascii_case(subject) {
                return Err(format!("`{subject}` cannot be substituted by itself"));
            }
        }
        Ok(())
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (when {}", self.source, self.trigger)?;
        if let Some(subject) = &self.subject {
            write!(f, ", mod {subject}")?;
        }
        if let Some(slot) = &self.slot {
            write!(f, ", slot {slot}")?;
        }
        if let Some(parent) = &self.parent {
            write!(f, ", parent {parent}")?;
        }
        if let Some(role) = &self.role {
            write!(f, ", role {role}")?;
        }
        write!(f, " -> {})", self.action)
    }
}

/// A rule set that failed validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("rule #{index}: {message}")]
    Rule { index: usize, message: String },

    #[error("mods.{slug}: {message}")]
    Mod { slug: String, message: String },

    #[error("failed to parse policy: {0}")]
    Parse(String),
}

impl From<PolicyError> for ModforgeError {
    fn from(err: PolicyError) -> Self {
        ModforgeError::Policy {
            message: err.to_string(),
        }
    }
}

/// Per-mod companions and exclusions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModPolicy {
    #[serde(default, rename = "sub-mods")]
    pub sub_mods: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyFile {
    #[serde(default, rename = "rule")]
    rules: Vec<RawRule>,
    #[serde(default)]
    mods: BTreeMap<String, ModPolicy>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    when: String,
    #[serde(default, rename = "mod")]
    subject: Option<String>,
    #[serde(default)]
    slot: Option<String>,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    role: Option<String>,
    action: String,
}

impl RawRule {
    fn into_rule(self, index: usize) -> Result<PolicyRule, PolicyError> {
        let err = |message: String| PolicyError::Rule { index, message };
        let trigger = TriggerKind::parse(&self.when)
            .ok_or_else(|| err(format!("unknown trigger `{}`", self.when)))?;
        let action = Action::parse(&self.action).map_err(err)?;
        let role = match self.role.as_deref() {
            Some(r) => Some(
                DependencyRole::parse(r).ok_or_else(|| err(format!("unknown role `{r}`")))?,
            ),
            None => None,
        };
        Ok(PolicyRule {
            trigger,
            subject: self.subject,
            slot: self.slot.map(|s| s.trim().to_lowercase()),
            parent: self.parent,
            role,
            action,
            source: RuleSource::User { index },
        })
    }
}

/// Validated, ordered policy loaded once per resolution run.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    rules: Vec<PolicyRule>,
    mods: BTreeMap<String, ModPolicy>,
}

/// What policy would change about a declared mod list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyDiff {
    /// Sub-mods policy would pull in.
    pub added: Vec<String>,
    /// Sub-mods that would have been pulled in but lose to a conflict.
    pub removed: Vec<String>,
    /// Declared mods that conflict with each other; resolution will fail.
    pub clashes: Vec<(String, String)>,
}

impl PolicyDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.clashes.is_empty()
    }
}

impl PolicySet {
    /// No rules; every decision takes its default action.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate `rules` (in priority order) and per-mod policy into a set.
    ///
    /// User rules are renumbered from 1 in the order given.
    pub fn new(
        rules: Vec<PolicyRule>,
        mods: BTreeMap<String, ModPolicy>,
    ) -> Result<Self, PolicyError> {
        let mut validated: Vec<PolicyRule> = Vec::with_capacity(rules.len());
        for (i, mut rule) in rules.into_iter().enumerate() {
            let index = i + 1;
            rule.source = RuleSource::User { index };
            rule.validate()
                .map_err(|message| PolicyError::Rule { index, message })?;
            if let Some(earlier) = validated.iter().find(|r| r.filters() == rule.filters()) {
                if earlier.action != rule.action {
                    return Err(PolicyError::Rule {
                        index,
                        message: format!(
                            "contradicts {}: same trigger, `{}` vs `{}`",
                            earlier.source, earlier.action, rule.action
                        ),
                    });
                }
                tracing::warn!("{} duplicates {}", rule.source, earlier.source);
            }
            validated.push(rule);
        }

        let mut normalized = BTreeMap::new();
        for (slug, policy) in mods {
            let subs: BTreeSet<&str> = policy.sub_mods.iter().map(String::as_str).collect();
            let conflicts: BTreeSet<&str> = policy.conflicts.iter().map(String::as_str).collect();
            if subs.contains(slug.as_str()) || conflicts.contains(slug.as_str()) {
                return Err(PolicyError::Mod {
                    slug,
                    message: "a mod cannot list itself".to_string(),
                });
            }
            if let Some(both) = subs.intersection(&conflicts).next() {
                return Err(PolicyError::Mod {
                    message: format!("`{both}` is both a sub-mod and a conflict"),
                    slug,
                });
            }
            let policy = ModPolicy {
                sub_mods: subs.into_iter().map(str::to_string).collect(),
                conflicts: conflicts.into_iter().map(str::to_string).collect(),
            };
            normalized.insert(slug, policy);
        }

        for (parent, policy) in &normalized {
            for sub in &policy.sub_mods {
                validated.push(PolicyRule {
                    trigger: TriggerKind::OptionalDependency,
                    subject: Some(sub.clone()),
                    slot: None,
                    parent: Some(parent.clone()),
                    role: Some(DependencyRole::SubMod),
                    action: Action::Include,
                    source: RuleSource::SubMod {
                        parent: parent.clone(),
                    },
                });
            }
        }

        Ok(Self {
            rules: validated,
            mods: normalized,
        })
    }

    /// Load and validate a policy file.
    pub fn from_path(path: &Path) -> miette::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ModforgeError::Policy {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;
        Ok(Self::parse_toml(&content).map_err(ModforgeError::from)?)
    }

    pub fn parse_toml(content: &str) -> Result<Self, PolicyError> {
        let file: PolicyFile =
            toml::from_str(content).map_err(|e| PolicyError::Parse(e.to_string()))?;
        let rules = file
            .rules
            .into_iter()
            .enumerate()
            .map(|(i, raw)| raw.into_rule(i + 1))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(rules, file.mods)
    }

    /// All rules in evaluation order, synthetic sub-mod rules last.
    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// The first rule matching `ctx`.
    pub fn first_match(&self, ctx: &MatchContext<'_>) -> Option<&PolicyRule> {
        self.rules.iter().find(|r| r.matches(ctx))
    }

    /// Sub-mods listed for `identity`, matched by slug or project id.
    pub fn sub_mods_of(&self, identity: &ModIdentity) -> &[String] {
        self.mods
            .iter()
            .find(|(slug, _)| identity.matches(slug))
            .map(|(_, p)| p.sub_mods.as_slice())
            .unwrap_or(&[])
    }

    /// Mods `identity` must not be installed alongside.
    pub fn conflicts_of(&self, identity: &ModIdentity) -> &[String] {
        self.mods
            .iter()
            .find(|(slug, _)| identity.matches(slug))
            .map(|(_, p)| p.conflicts.as_slice())
            .unwrap_or(&[])
    }

    /// Whether policy declares `a` and `b` as conflicting, in either direction.
    pub fn in_conflict(&self, a: &ModIdentity, b: &ModIdentity) -> bool {
        self.conflicts_of(a).iter().any(|c| b.matches(c))
            || self.conflicts_of(b).iter().any(|c| a.matches(c))
    }

    /// Preview the effect of sub-mods and conflicts on `declared` without
    /// consulting a registry. Declared mods always win over sub-mods.
    pub fn diff(&self, declared: &[String]) -> PolicyDiff {
        let explicit: BTreeSet<&str> = declared.iter().map(String::as_str).collect();
        let mut active: BTreeSet<&str> = explicit.clone();
        let mut implicit: BTreeSet<&str> = BTreeSet::new();

        let mut queue: Vec<&str> = explicit.iter().copied().collect();
        while let Some(current) = queue.pop() {
            let Some(policy) = self.mods.get(current) else {
                continue;
            };
            for sub in &policy.sub_mods {
                if active.insert(sub.as_str()) {
                    implicit.insert(sub.as_str());
                    queue.push(sub.as_str());
                }
            }
        }

        let mut removed = BTreeSet::new();
        let mut clashes = BTreeSet::new();
        for slug in &active {
            let Some(policy) = self.mods.get(*slug) else {
                continue;
            };
            for conflict in &policy.conflicts {
                let conflict = conflict.as_str();
                if !active.contains(conflict) {
                    continue;
                }
                if implicit.contains(conflict) {
                    removed.insert(conflict);
                } else if implicit.contains(slug) {
                    removed.insert(*slug);
                } else {
                    let pair = if *slug < conflict {
                        (slug.to_string(), conflict.to_string())
                    } else {
                        (conflict.to_string(), slug.to_string())
                    };
                    clashes.insert(pair);
                }
            }
        }

        PolicyDiff {
            added: implicit
                .difference(&removed)
                .map(|s| s.to_string())
                .collect(),
            removed: removed.into_iter().map(str::to_string).collect(),
            clashes: clashes.into_iter().collect(),
        }
    }
}
