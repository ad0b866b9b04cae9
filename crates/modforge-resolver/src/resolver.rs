//! Worklist resolver: seeds the graph from root selections, expands each
//! assignment through the registry and converges on one consistent version
//! per mod.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;
use std::time::Duration;

use petgraph::stable_graph::NodeIndex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use modforge_core::candidate::{DeclaredDependency, DependencyKind, DependencyRole, VersionCandidate};
use modforge_core::identity::ModIdentity;
use modforge_core::policy::{Action, PolicySet};
use modforge_core::tags::{CompatTags, TagKind};
use modforge_core::version::{RangeParseError, VersionRange};
use modforge_registry::{FetchFailure, RegistryQuery};

use crate::cache::CandidateStore;
use crate::conflict::{
    Conflict, ConflictReason, ConstraintTrace, DecisionRecord, EliminatedCandidate,
};
use crate::constraint::{Constraint, MergeConflict, MergeFailure, Provenance};
use crate::error::ResolveError;
use crate::graph::{DepEdge, ResolutionGraph};
use crate::manifest::{self, Manifest};
use crate::policy::{
    pick_highest, pick_pinned, Answer, CandidateSummary, DecisionPoint, DecisionPrompt,
    PolicyEvaluator,
};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;
/// How often one mod may be re-resolved or replaced before the run gives up.
const MAX_REOPENS_PER_NODE: u32 = 8;

/// A mod the user asked for, with the version requirement they gave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSelection {
    pub identity: ModIdentity,
    pub range: VersionRange,
    /// The requirement as written, kept for reports.
    pub requirement: String,
    pub tags: Option<CompatTags>,
}

impl RootSelection {
    pub fn new(identity: ModIdentity, requirement: &str) -> Result<Self, RangeParseError> {
        Ok(Self {
            identity,
            range: VersionRange::parse(requirement)?,
            requirement: requirement.trim().to_string(),
            tags: None,
        })
    }

    /// Restrict this selection to the given loaders.
    pub fn with_loaders<I, S>(mut self, loaders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = Some(CompatTags::unrestricted().with_loaders(loaders));
        self
    }

    fn constraint(&self) -> Constraint {
        let constraint = Constraint::new(
            self.range.clone(),
            Provenance::Root {
                requirement: self.requirement.clone(),
            },
        );
        match &self.tags {
            Some(tags) => constraint.with_tags(tags.clone()),
            None => constraint,
        }
    }
}

/// Cooperative cancellation flag, checked between worklist steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(atomic::Ordering::SeqCst)
    }
}

/// Per-run settings supplied by the caller.
#[derive(Clone)]
pub struct ResolveOptions {
    /// Loader and game version every candidate must fit.
    pub environment: CompatTags,
    /// Upper bound on each registry call.
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
    pub cancel: CancelToken,
    /// Answers `ask` actions. Without one, `ask` fails the run.
    pub prompt: Option<Arc<dyn DecisionPrompt>>,
    /// Version ids (or versions) recorded by a previous lockfile, by slug.
    pub pins: BTreeMap<String, String>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            environment: CompatTags::unrestricted(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            cancel: CancelToken::new(),
            prompt: None,
            pins: BTreeMap::new(),
        }
    }
}

impl ResolveOptions {
    pub fn new(environment: CompatTags) -> Self {
        Self {
            environment,
            ..Self::default()
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn DecisionPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_pins(mut self, pins: BTreeMap<String, String>) -> Self {
        self.pins = pins;
        self
    }
}

/// A successful run: the manifest plus the graph and decisions behind it.
#[derive(Debug)]
pub struct Resolution {
    pub manifest: Manifest,
    pub graph: ResolutionGraph,
    pub trail: Vec<DecisionRecord>,
}

/// Resolve `roots` against `registry` under `policy`.
///
/// Either every reachable mod ends up with exactly one version satisfying
/// all of its constraints, or the run fails without a manifest.
pub async fn resolve(
    registry: Arc<dyn RegistryQuery>,
    roots: &[RootSelection],
    policy: &PolicySet,
    options: &ResolveOptions,
) -> Result<Resolution, ResolveError> {
    let mut ctx = ResolutionContext::new(registry, policy, options);
    ctx.seed(roots)?;
    ctx.run().await?;
    ctx.converge()?;
    let manifest = manifest::build(&ctx.graph)?;
    tracing::info!(
        "resolved {} mods with {} decisions",
        manifest.len(),
        ctx.trail.len()
    );
    Ok(Resolution {
        manifest,
        graph: ctx.graph,
        trail: ctx.trail,
    })
}

enum Choice {
    Take(VersionCandidate),
    Substitute { target: String, rule: String },
}

/// State of one resolution run. Dropped when the run ends.
struct ResolutionContext<'a> {
    registry: Arc<dyn RegistryQuery>,
    policy: &'a PolicySet,
    evaluator: PolicyEvaluator<'a>,
    options: &'a ResolveOptions,
    store: CandidateStore,
    graph: ResolutionGraph,
    worklist: VecDeque<ModIdentity>,
    queued: BTreeSet<ModIdentity>,
    trail: Vec<DecisionRecord>,
    /// Replaced mod to its replacement and the rule that did it.
    substitutions: BTreeMap<ModIdentity, (ModIdentity, String)>,
    /// Substitutes placed into a slot by policy; they never collide there.
    sanctioned: BTreeSet<(String, ModIdentity)>,
    reopens: BTreeMap<ModIdentity, u32>,
    eliminated: BTreeMap<ModIdentity, Vec<EliminatedCandidate>>,
}

impl<'a> ResolutionContext<'a> {
    fn new(
        registry: Arc<dyn RegistryQuery>,
        policy: &'a PolicySet,
        options: &'a ResolveOptions,
    ) -> Self {
        Self {
            registry,
            policy,
            evaluator: PolicyEvaluator::new(policy),
            options,
            store: CandidateStore::new(),
            graph: ResolutionGraph::new(),
            worklist: VecDeque::new(),
            queued: BTreeSet::new(),
            trail: Vec::new(),
            substitutions: BTreeMap::new(),
            sanctioned: BTreeSet::new(),
            reopens: BTreeMap::new(),
            eliminated: BTreeMap::new(),
        }
    }

    fn seed(&mut self, roots: &[RootSelection]) -> Result<(), ResolveError> {
        let mut sorted: Vec<&RootSelection> = roots.iter().collect();
        sorted.sort_by(|a, b| {
            a.identity
                .cmp(&b.identity)
                .then_with(|| a.requirement.cmp(&b.requirement))
        });
        for root in sorted {
            let (idx, _) = self.graph.insert(&root.identity, &self.options.environment);
            self.constrain(idx, root.constraint())?;
            tracing::debug!("root {} `{}`", root.identity, root.requirement);
            self.enqueue(&root.identity);
        }
        Ok(())
    }

    async fn run(&mut self) -> Result<(), ResolveError> {
        loop {
            if self.options.cancel.is_cancelled() {
                tracing::info!("resolution cancelled");
                return Err(ResolveError::Cancelled);
            }
            self.prefetch().await?;

            let Some(identity) = self.pop() else {
                return Ok(());
            };
            let Some(idx) = self.graph.find(&identity) else {
                continue;
            };
            if self.graph.node(idx).is_settled() {
                continue;
            }
            if self.graph.node(idx).assigned.is_some() {
                self.reopen(idx)?;
            }
            self.visit(idx).await?;
        }
    }

    fn enqueue(&mut self, identity: &ModIdentity) {
        if self.queued.insert(identity.clone()) {
            self.worklist.push_back(identity.clone());
        }
    }

    fn pop(&mut self) -> Option<ModIdentity> {
        let identity = self.worklist.pop_front()?;
        self.queued.remove(&identity);
        Some(identity)
    }

    /// Fetch listings for every queued mod not seen yet, concurrently.
    /// Results are joined and stored in identity order before the graph is
    /// touched again.
    async fn prefetch(&mut self) -> Result<(), ResolveError> {
        let missing: BTreeSet<ModIdentity> = self
            .worklist
            .iter()
            .filter(|id| !self.store.contains(id) && self.graph.find(id).is_some())
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        tracing::debug!("fetching version listings for {} mods", missing.len());

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_fetches.max(1)));
        let mut join_set = JoinSet::new();
        for identity in missing {
            let registry = self.registry.clone();
            let sem = semaphore.clone();
            let filter = self.options.environment.clone();
            let timeout = self.options.fetch_timeout;
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await;
                let result = fetch_listing(registry.as_ref(), &identity, &filter, timeout).await;
                (identity, result)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            let (identity, result) = joined
                .map_err(|e| ResolveError::internal(format!("registry fetch task failed: {e}")))?;
            results.insert(identity, result);
        }
        for (identity, result) in results {
            let listing = result?;
            tracing::debug!("{} versions of {identity} fit the environment", listing.len());
            self.store.insert(identity, listing);
        }
        Ok(())
    }

    async fn visit(&mut self, idx: NodeIndex) -> Result<(), ResolveError> {
        let identity = self.graph.node(idx).identity.clone();
        let candidate = match self.choose(idx)? {
            Choice::Take(candidate) => candidate,
            Choice::Substitute { target, rule } => {
                let target = self.identify(&target).await?;
                self.replace(idx, &target, &rule)?;
                return Ok(());
            }
        };

        tracing::debug!("assigned {candidate}");
        self.graph.node_mut(idx).assigned = Some(candidate.clone());
        if !self.settle_collisions(&identity, &candidate).await? {
            return Ok(());
        }
        self.expand(idx, &candidate).await
    }

    /// Pick a version for the node among the candidates its constraints
    /// admit.
    fn choose(&mut self, idx: NodeIndex) -> Result<Choice, ResolveError> {
        let identity = self.graph.node(idx).identity.clone();
        let listing = self
            .store
            .get(&identity)
            .ok_or_else(|| ResolveError::internal(format!("no listing fetched for {identity}")))?;

        let node = self.graph.node(idx);
        let mut admitted = Vec::new();
        let mut eliminated = Vec::new();
        for candidate in listing.iter() {
            match node.constraints.rejection(candidate) {
                None => admitted.push(candidate),
                Some(reason) => eliminated.push(EliminatedCandidate {
                    version: candidate.version.to_string(),
                    version_id: candidate.version_id.clone(),
                    reason,
                }),
            }
        }
        self.eliminated.insert(identity.clone(), eliminated);

        match admitted.as_slice() {
            [] => Err(self.conflict(idx, ConflictReason::NoCandidates).into()),
            [only] => Ok(Choice::Take((*only).clone())),
            _ => self.decide_ambiguity(&identity, &admitted),
        }
    }

    fn decide_ambiguity(
        &mut self,
        identity: &ModIdentity,
        admitted: &[&VersionCandidate],
    ) -> Result<Choice, ResolveError> {
        let point = DecisionPoint::Ambiguity {
            subject: identity.clone(),
            candidates: admitted.iter().map(|c| CandidateSummary::from(*c)).collect(),
        };
        let verdict = self.evaluator.evaluate(&point);
        let mut rule = verdict.rule_label();
        let mut action = verdict.action;

        loop {
            let chosen = match action.clone() {
                Action::PreferHighestVersion => pick_highest(admitted),
                Action::PreferPinned => {
                    let pinned = self
                        .pin_for(identity)
                        .and_then(|pin| pick_pinned(admitted, pin));
                    if pinned.is_none() {
                        tracing::debug!("no usable pin for {identity}, taking the highest version");
                    }
                    pinned.or_else(|| pick_highest(admitted))
                }
                Action::Substitute(target) => {
                    self.record(&point, &action, &rule, format!("substitute {target}"));
                    return Ok(Choice::Substitute { target, rule });
                }
                Action::Reject => {
                    self.record(&point, &action, &rule, "rejected".to_string());
                    return Err(self
                        .conflict_for(identity, ConflictReason::Rejected { rule })
                        .into());
                }
                Action::Ask => match self.ask(&point, &rule)? {
                    Answer::Take(i) => match admitted.get(i) {
                        Some(c) => Some(*c),
                        None => return Err(self.unanswered(identity, &rule)),
                    },
                    Answer::Act(next) => {
                        rule = format!("{rule} (answered)");
                        action = next;
                        continue;
                    }
                },
                other @ (Action::Include | Action::Skip) => {
                    return Err(ResolveError::PolicyConfiguration {
                        message: format!("`{other}` cannot choose between versions of {identity}"),
                    });
                }
            };

            let chosen = chosen
                .ok_or_else(|| ResolveError::internal(format!("no candidate left for {identity}")))?;
            self.record(&point, &action, &rule, chosen.to_string());
            return Ok(Choice::Take(chosen.clone()));
        }
    }

    /// Put a question to the caller's prompt. `ask` answered with `ask`
    /// counts as unanswered.
    fn ask(&self, point: &DecisionPoint, rule: &str) -> Result<Answer, ResolveError> {
        let answer = self
            .options
            .prompt
            .as_ref()
            .and_then(|prompt| prompt.answer(point));
        match answer {
            Some(Answer::Act(Action::Ask)) | None => {
                let subject = match point {
                    DecisionPoint::Ambiguity { subject, .. } => subject,
                    DecisionPoint::CapabilityCollision { challenger, .. } => challenger,
                    DecisionPoint::OptionalDependencyOffered { parent, .. } => parent,
                };
                Err(self.unanswered(subject, rule))
            }
            Some(answer) => {
                tracing::debug!("{point}: answered {answer:?}");
                Ok(answer)
            }
        }
    }

    fn unanswered(&self, subject: &ModIdentity, rule: &str) -> ResolveError {
        self.conflict_for(
            subject,
            ConflictReason::DecisionRequired {
                rule: rule.to_string(),
            },
        )
        .into()
    }

    fn record(&mut self, point: &DecisionPoint, action: &Action, rule: &str, outcome: String) {
        tracing::debug!("{point}: {action} by {rule} => {outcome}");
        self.trail.push(DecisionRecord {
            point: point.to_string(),
            action: action.clone(),
            rule: rule.to_string(),
            outcome,
        });
    }

    fn pin_for(&self, identity: &ModIdentity) -> Option<&'a str> {
        let options: &'a ResolveOptions = self.options;
        options
            .pins
            .iter()
            .find(|(reference, _)| identity.matches(reference))
            .map(|(_, pin)| pin.as_str())
    }

    /// Pinned by an exact root requirement, or still at the version the
    /// previous lockfile recorded.
    fn is_pinned(&self, idx: NodeIndex) -> bool {
        let node = self.graph.node(idx);
        let exact_root = node.constraints.constraints().iter().any(|c| {
            matches!(c.origin, Provenance::Root { .. }) && c.range.exact_version().is_some()
        });
        exact_root
            || match (&node.assigned, self.pin_for(&node.identity)) {
                (Some(c), Some(pin)) => c.version_id == pin || c.version.as_str() == pin,
                _ => false,
            }
    }

    /// Whether `a` beats `b` under `prefer-highest-version`: higher version,
    /// then newer publish time, then the smaller identity.
    fn outranks(&self, a: NodeIndex, b: NodeIndex) -> bool {
        let (na, nb) = (self.graph.node(a), self.graph.node(b));
        match (&na.assigned, &nb.assigned) {
            (Some(x), Some(y)) => {
                x.version
                    .cmp(&y.version)
                    .then_with(|| x.published.cmp(&y.published))
                    .then_with(|| nb.identity.cmp(&na.identity))
                    == Ordering::Greater
            }
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => na.identity < nb.identity,
        }
    }

    /// Raise a collision for every other assigned mod that provides a slot
    /// the new assignment provides. Returns whether `identity` survived.
    async fn settle_collisions(
        &mut self,
        identity: &ModIdentity,
        candidate: &VersionCandidate,
    ) -> Result<bool, ResolveError> {
        for slot in &candidate.provides {
            let rivals: Vec<ModIdentity> = self
                .graph
                .nodes()
                .into_iter()
                .map(|i| self.graph.node(i))
                .filter(|n| {
                    n.identity != *identity
                        && n.assigned.as_ref().is_some_and(|c| c.provides.contains(slot))
                })
                .map(|n| n.identity.clone())
                .collect();

            for rival in rivals {
                if self.graph.find(identity).is_none() {
                    return Ok(false);
                }
                if self.graph.find(&rival).is_none()
                    || self.sanctioned.contains(&(slot.clone(), rival.clone()))
                    || self.sanctioned.contains(&(slot.clone(), identity.clone()))
                {
                    continue;
                }
                self.collide(slot, &rival, identity).await?;
            }
        }
        Ok(self.graph.find(identity).is_some())
    }

    async fn collide(
        &mut self,
        slot: &str,
        incumbent: &ModIdentity,
        challenger: &ModIdentity,
    ) -> Result<(), ResolveError> {
        let (Some(inc), Some(chal)) = (self.graph.find(incumbent), self.graph.find(challenger))
        else {
            return Ok(());
        };
        let point = DecisionPoint::CapabilityCollision {
            slot: slot.to_string(),
            incumbent: incumbent.clone(),
            challenger: challenger.clone(),
        };
        let verdict = self.evaluator.evaluate(&point);
        let mut rule = verdict.rule_label();
        let mut action = verdict.action;

        let inc_root = self.graph.node(inc).is_root();
        let chal_root = self.graph.node(chal).is_root();
        if inc_root && chal_root {
            // Neither root can be dropped, whatever the rule says.
            if action == Action::Reject {
                self.record(&point, &action, &rule, "rejected".to_string());
                return Err(self.conflict(chal, ConflictReason::Rejected { rule }).into());
            }
            self.record(&point, &action, &rule, "both are root selections".to_string());
            return Err(self
                .conflict(
                    chal,
                    ConflictReason::RootCollision {
                        slot: slot.to_string(),
                        other: incumbent.clone(),
                    },
                )
                .into());
        }

        let incumbent_wins = loop {
            match action.clone() {
                Action::PreferHighestVersion => break self.outranks(inc, chal),
                Action::PreferPinned => {
                    break match (self.is_pinned(inc), self.is_pinned(chal)) {
                        (true, false) => true,
                        (false, true) => false,
                        _ => self.outranks(inc, chal),
                    }
                }
                Action::Reject => {
                    self.record(&point, &action, &rule, "rejected".to_string());
                    return Err(self.conflict(chal, ConflictReason::Rejected { rule }).into());
                }
                Action::Substitute(target) => {
                    let target = self.identify(&target).await?;
                    self.sanctioned.insert((slot.to_string(), target.clone()));
                    let mut replaced = Vec::new();
                    for (side, is_root) in [(incumbent, inc_root), (challenger, chal_root)] {
                        if is_root || *side == target {
                            continue;
                        }
                        if let Some(idx) = self.graph.find(side) {
                            self.replace(idx, &target, &rule)?;
                            replaced.push(side.to_string());
                        }
                    }
                    let outcome = if replaced.is_empty() {
                        format!("kept both, {target} allowed in `{slot}`")
                    } else {
                        format!("{target} replaces {}", replaced.join(" and "))
                    };
                    self.record(&point, &action, &rule, outcome);
                    return Ok(());
                }
                Action::Ask => match self.ask(&point, &rule)? {
                    Answer::Take(i) => break i == 0,
                    Answer::Act(next) => {
                        rule = format!("{rule} (answered)");
                        action = next;
                    }
                },
                other @ (Action::Include | Action::Skip) => {
                    return Err(ResolveError::PolicyConfiguration {
                        message: format!("`{other}` cannot settle a collision in `{slot}`"),
                    });
                }
            }
        };

        // A root selection never loses its place.
        let (winner, loser) = match (incumbent_wins, inc_root, chal_root) {
            (_, true, false) => (inc, chal),
            (_, false, true) => (chal, inc),
            (true, _, _) => (inc, chal),
            (false, _, _) => (chal, inc),
        };
        let winner_id = self.graph.node(winner).identity.clone();
        let outcome = format!(
            "kept {}, dropped {}",
            self.graph.node(winner),
            self.graph.node(loser).identity
        );
        self.record(&point, &action, &rule, outcome);
        self.replace(loser, &winner_id, &rule)?;
        Ok(())
    }

    /// Expand the dependencies of a freshly assigned candidate, then the
    /// sub-mods policy lists for it.
    async fn expand(&mut self, idx: NodeIndex, candidate: &VersionCandidate) -> Result<(), ResolveError> {
        for dep in &candidate.dependencies {
            match (dep.kind, dep.role) {
                (_, DependencyRole::Embedded) => {
                    tracing::debug!("{candidate} embeds {}", dep.target);
                }
                // Checked once the graph has converged.
                (DependencyKind::Incompatible, _) => {}
                (DependencyKind::Required, _) => {
                    self.require(idx, dep, DependencyKind::Required)?;
                }
                (DependencyKind::Optional, _) => self.offer(idx, dep).await?,
            }
        }

        let policy = self.policy;
        for slug in policy.sub_mods_of(&candidate.identity) {
            let target = self.identify(slug).await?;
            let dep = DeclaredDependency {
                target,
                range: VersionRange::any(),
                kind: DependencyKind::Optional,
                role: DependencyRole::SubMod,
            };
            self.offer(idx, &dep).await?;
        }
        Ok(())
    }

    /// Place the dependency's constraint on its target and link the two.
    fn require(
        &mut self,
        parent: NodeIndex,
        dep: &DeclaredDependency,
        kind: DependencyKind,
    ) -> Result<(), ResolveError> {
        let parent_node = self.graph.node(parent);
        let parent_id = parent_node.identity.clone();
        let parent_version = parent_node
            .assigned
            .as_ref()
            .map(|c| c.version.to_string())
            .unwrap_or_default();

        let (target, constraint) = match self.redirect(&dep.target) {
            Some((replacement, rule)) => (
                replacement,
                Constraint::new(
                    VersionRange::any(),
                    Provenance::Substitution {
                        parent: Some(parent_id.clone()),
                        replaced: dep.target.clone(),
                        rule,
                    },
                ),
            ),
            None => (
                dep.target.clone(),
                Constraint::new(
                    dep.range.clone(),
                    Provenance::Dependency {
                        parent: parent_id.clone(),
                        parent_version,
                        kind,
                        role: dep.role,
                    },
                ),
            ),
        };
        if target == parent_id {
            tracing::debug!("{parent_id} depends on itself, ignored");
            return Ok(());
        }

        let (child, _) = self.graph.insert(&target, &self.options.environment);
        self.link(parent, child, DepEdge { kind, role: dep.role }, constraint)
    }

    /// Raise an optional-dependency decision and act on it.
    async fn offer(&mut self, parent: NodeIndex, dep: &DeclaredDependency) -> Result<(), ResolveError> {
        let parent_id = self.graph.node(parent).identity.clone();
        let target = self
            .redirect(&dep.target)
            .map(|(t, _)| t)
            .unwrap_or_else(|| dep.target.clone());
        let point = DecisionPoint::OptionalDependencyOffered {
            parent: parent_id.clone(),
            target: target.clone(),
            role: dep.role,
        };
        let verdict = self.evaluator.evaluate(&point);
        let mut rule = verdict.rule_label();
        let mut action = verdict.action;

        loop {
            match action.clone() {
                Action::Include => {
                    self.record(&point, &action, &rule, format!("included {target}"));
                    return self.require(parent, dep, DependencyKind::Optional);
                }
                Action::Skip => {
                    self.record(&point, &action, &rule, format!("skipped {target}"));
                    return Ok(());
                }
                Action::Reject => {
                    self.record(&point, &action, &rule, "rejected".to_string());
                    return Err(self
                        .conflict(parent, ConflictReason::Rejected { rule })
                        .into());
                }
                Action::Substitute(other) => {
                    let replacement = self.identify(&other).await?;
                    self.record(&point, &action, &rule, format!("included {replacement}"));
                    if replacement == parent_id {
                        return Ok(());
                    }
                    let constraint = Constraint::new(
                        VersionRange::any(),
                        Provenance::Substitution {
                            parent: Some(parent_id.clone()),
                            replaced: target.clone(),
                            rule,
                        },
                    );
                    let (child, _) = self.graph.insert(&replacement, &self.options.environment);
                    let edge = DepEdge {
                        kind: DependencyKind::Optional,
                        role: dep.role,
                    };
                    return self.link(parent, child, edge, constraint);
                }
                Action::Ask => {
                    action = match self.ask(&point, &rule)? {
                        Answer::Take(0) => Action::Include,
                        Answer::Take(_) => Action::Skip,
                        Answer::Act(next) => next,
                    };
                    rule = format!("{rule} (answered)");
                }
                other @ (Action::PreferHighestVersion | Action::PreferPinned) => {
                    return Err(ResolveError::PolicyConfiguration {
                        message: format!("`{other}` cannot decide whether to include {target}"),
                    });
                }
            }
        }
    }

    /// Merge `constraint` into `child` and add the edge, refusing to close a
    /// cycle of required edges.
    fn link(
        &mut self,
        parent: NodeIndex,
        child: NodeIndex,
        edge: DepEdge,
        constraint: Constraint,
    ) -> Result<(), ResolveError> {
        if edge.is_hard() {
            if let Some(path) = self.graph.hard_path(child, parent) {
                let cycle: Vec<ModIdentity> = std::iter::once(parent)
                    .chain(path)
                    .map(|i| self.graph.node(i).identity.clone())
                    .collect();
                return Err(self
                    .conflict(child, ConflictReason::RequiredCycle { cycle })
                    .into());
            }
        }
        self.constrain(child, constraint)?;
        self.graph.add_edge(parent, child, edge);
        if !self.graph.node(child).is_settled() {
            let identity = self.graph.node(child).identity.clone();
            self.enqueue(&identity);
        }
        Ok(())
    }

    fn constrain(&mut self, idx: NodeIndex, constraint: Constraint) -> Result<bool, ResolveError> {
        match self.graph.node_mut(idx).constraints.merge(constraint) {
            Ok(narrowed) => Ok(narrowed),
            Err(conflict) => Err(self.merge_conflict(idx, conflict)),
        }
    }

    /// The live replacement for a mod that policy substituted away.
    fn redirect(&self, identity: &ModIdentity) -> Option<(ModIdentity, String)> {
        let mut current = self.substitutions.get(identity)?.clone();
        for _ in 0..self.substitutions.len() {
            match self.substitutions.get(&current.0) {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
        Some(current)
    }

    /// Resolve a slug or project id named by policy to an identity.
    async fn identify(&mut self, reference: &str) -> Result<ModIdentity, ResolveError> {
        if let Some(idx) = self.graph.find_ref(reference) {
            return Ok(self.graph.node(idx).identity.clone());
        }
        if let Some(meta) = self.store.metadata(reference) {
            return Ok(meta.identity.clone());
        }

        let timeout = self.options.fetch_timeout;
        let fetched = match tokio::time::timeout(timeout, self.registry.get_metadata(reference)).await
        {
            Ok(result) => result,
            Err(_) => Err(FetchFailure::Timeout {
                reference: reference.to_string(),
                timeout,
            }),
        };
        match fetched {
            Ok(meta) => {
                let identity = meta.identity.clone();
                self.store.insert_metadata(reference, meta);
                Ok(identity)
            }
            Err(FetchFailure::NotFound { .. }) => Err(ResolveError::PolicyConfiguration {
                message: format!("policy names `{reference}`, which the registry does not know"),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Unassign a node whose constraints no longer admit its version, and
    /// withdraw everything its old version placed on the graph.
    fn reopen(&mut self, idx: NodeIndex) -> Result<(), ResolveError> {
        let identity = self.graph.node(idx).identity.clone();
        self.count_reopen(idx, &identity)?;
        tracing::info!(
            "re-resolving {} (now needs {})",
            self.graph.node(idx),
            self.graph.node(idx).constraints.range()
        );
        self.graph.node_mut(idx).assigned = None;
        self.release(idx);
        self.prune();
        Ok(())
    }

    fn count_reopen(&mut self, idx: NodeIndex, identity: &ModIdentity) -> Result<(), ResolveError> {
        let count = self.reopens.entry(identity.clone()).or_insert(0);
        *count += 1;
        if *count > MAX_REOPENS_PER_NODE {
            return Err(self
                .conflict(
                    idx,
                    ConflictReason::NotConverged {
                        reopens: MAX_REOPENS_PER_NODE,
                    },
                )
                .into());
        }
        Ok(())
    }

    /// Put `target` in place of the mod at `idx`. Its dependents now depend
    /// on `target`, and later references to it are redirected.
    fn replace(&mut self, idx: NodeIndex, target: &ModIdentity, rule: &str) -> Result<(), ResolveError> {
        let replaced = self.graph.node(idx).identity.clone();
        if replaced == *target {
            return Err(ResolveError::PolicyConfiguration {
                message: format!("{rule} substitutes {replaced} by itself"),
            });
        }
        self.count_reopen(idx, &replaced)?;
        tracing::info!("substituting {target} for {replaced} ({rule})");

        let root_tags: Vec<Option<CompatTags>> = self
            .graph
            .node(idx)
            .constraints
            .constraints()
            .iter()
            .filter(|c| c.origin.is_root())
            .map(|c| c.tags.clone())
            .collect();
        let dependents: Vec<(ModIdentity, DepEdge)> = self
            .graph
            .dependents_of(idx)
            .into_iter()
            .map(|(i, e)| (self.graph.node(i).identity.clone(), e.clone()))
            .collect();

        self.release(idx);
        self.graph.remove_node(idx);
        self.substitutions.remove(target);
        self.substitutions
            .insert(replaced.clone(), (target.clone(), rule.to_string()));

        let (t_idx, _) = self.graph.insert(target, &self.options.environment);
        for tags in root_tags {
            let constraint = Constraint::new(
                VersionRange::any(),
                Provenance::Substitution {
                    parent: None,
                    replaced: replaced.clone(),
                    rule: rule.to_string(),
                },
            );
            let constraint = match tags {
                Some(tags) => constraint.with_tags(tags),
                None => constraint,
            };
            self.constrain(t_idx, constraint)?;
        }
        for (parent_id, edge) in dependents {
            let Some(parent) = self.graph.find(&parent_id) else {
                continue;
            };
            if parent == t_idx {
                continue;
            }
            let constraint = Constraint::new(
                VersionRange::any(),
                Provenance::Substitution {
                    parent: Some(parent_id),
                    replaced: replaced.clone(),
                    rule: rule.to_string(),
                },
            );
            self.link(parent, t_idx, edge, constraint)?;
        }
        if !self.graph.node(t_idx).is_settled() {
            self.enqueue(target);
        }
        self.prune();
        Ok(())
    }

    /// Drop every edge and constraint the node placed on its dependencies.
    fn release(&mut self, idx: NodeIndex) {
        let identity = self.graph.node(idx).identity.clone();
        for child in self.graph.detach_dependencies(idx) {
            self.graph.node_mut(child).constraints.retract_from(&identity);
        }
    }

    /// Remove nodes no root reaches any more.
    fn prune(&mut self) {
        loop {
            let dead = self.graph.unreachable();
            if dead.is_empty() {
                return;
            }
            for idx in dead {
                if !self.graph.contains(idx) {
                    continue;
                }
                tracing::debug!("dropping {} (no longer needed)", self.graph.node(idx));
                self.release(idx);
                self.graph.remove_node(idx);
            }
        }
    }

    /// Post-fixpoint checks: incompatibilities, shared tags, and that every
    /// node holds a version satisfying its constraints whose required
    /// dependencies are all present.
    fn converge(&mut self) -> Result<(), ResolveError> {
        while let Some((a, b, declared_by)) = self.find_incompatibility() {
            self.settle_incompatibility(a, b, declared_by)?;
        }
        self.check_tags(TagKind::GameVersion)?;
        let single_loader = self
            .options
            .environment
            .loaders
            .as_ref()
            .map_or(true, |l| l.len() <= 1);
        if single_loader {
            self.check_tags(TagKind::Loader)?;
        }

        for idx in self.graph.nodes() {
            let node = self.graph.node(idx);
            if !node.is_settled() {
                return Err(ResolveError::internal(format!(
                    "{node} does not satisfy its constraints after convergence"
                )));
            }
            if let Some(missing) = self.missing_requirement(idx) {
                return Err(ResolveError::internal(format!(
                    "{node} requires {missing}, which is not in the graph"
                )));
            }
        }
        Ok(())
    }

    /// A required dependency of the node's assignment that has no node.
    fn missing_requirement(&self, idx: NodeIndex) -> Option<ModIdentity> {
        let node = self.graph.node(idx);
        let candidate = node.assigned.as_ref()?;
        candidate
            .dependencies
            .iter()
            .filter(|d| d.kind == DependencyKind::Required && d.role != DependencyRole::Embedded)
            .map(|d| {
                self.redirect(&d.target)
                    .map(|(target, _)| target)
                    .unwrap_or_else(|| d.target.clone())
            })
            .find(|target| *target != node.identity && self.graph.find(target).is_none())
    }

    /// The first pair of present mods that must not be installed together,
    /// from registry declarations or policy conflicts.
    fn find_incompatibility(&self) -> Option<(NodeIndex, NodeIndex, String)> {
        for a in self.graph.nodes() {
            let node = self.graph.node(a);
            let Some(candidate) = &node.assigned else {
                continue;
            };
            for dep in &candidate.dependencies {
                if dep.kind != DependencyKind::Incompatible {
                    continue;
                }
                let Some(b) = self.graph.find(&dep.target) else {
                    continue;
                };
                let clashes = self
                    .graph
                    .node(b)
                    .assigned
                    .as_ref()
                    .is_some_and(|c| dep.range.contains(&c.version));
                if clashes && a != b {
                    return Some((a, b, candidate.to_string()));
                }
            }
            for slug in self.policy.conflicts_of(&node.identity) {
                if let Some(b) = self.graph.find_ref(slug) {
                    if a != b {
                        return Some((a, b, format!("conflicts of {}", node.identity)));
                    }
                }
            }
        }
        None
    }

    /// Drop the side only optional edges hold; fail when both are required.
    fn settle_incompatibility(
        &mut self,
        a: NodeIndex,
        b: NodeIndex,
        declared_by: String,
    ) -> Result<(), ResolveError> {
        let a_id = self.graph.node(a).identity.clone();
        let b_id = self.graph.node(b).identity.clone();
        let drop = match (self.held(a), self.held(b)) {
            (true, true) => {
                return Err(self
                    .conflict(
                        a,
                        ConflictReason::Incompatible {
                            other: b_id,
                            declared_by,
                        },
                    )
                    .into());
            }
            (true, false) => b,
            (false, true) => a,
            (false, false) => {
                if a_id > b_id {
                    a
                } else {
                    b
                }
            }
        };

        // Mods that require the dropped one go with it. None of them is
        // held, or the dropped side would be held too.
        let branch = self.graph.hard_dependents(drop);
        let dropped = self.graph.node(drop).identity.clone();
        let mut outcome = format!("removed {dropped}");
        if !branch.is_empty() {
            let names: Vec<String> = branch
                .iter()
                .map(|&i| self.graph.node(i).identity.to_string())
                .collect();
            outcome.push_str(&format!(" and {}, which require it", names.join(", ")));
        }
        tracing::info!("{outcome}: {a_id} and {b_id} are incompatible ({declared_by})");
        self.trail.push(DecisionRecord {
            point: format!("{a_id} and {b_id} cannot be installed together"),
            action: Action::Skip,
            rule: declared_by,
            outcome,
        });
        for idx in std::iter::once(drop).chain(branch) {
            self.release(idx);
            self.graph.remove_node(idx);
        }
        self.prune();
        Ok(())
    }

    /// Whether required edges alone keep the node in the graph.
    fn held(&self, idx: NodeIndex) -> bool {
        self.graph.node(idx).is_root()
            || self
                .graph
                .roots()
                .into_iter()
                .any(|root| self.graph.hard_path(root, idx).is_some())
    }

    /// All assigned candidates must share at least one value of `kind`.
    /// Candidates that declare no values for it are not counted.
    fn check_tags(&self, kind: TagKind) -> Result<(), ResolveError> {
        let values = |c: &VersionCandidate| -> BTreeSet<String> {
            match kind {
                TagKind::Loader => c.loaders.clone(),
                TagKind::GameVersion => c.game_versions.clone(),
            }
        };
        let environment = &self.options.environment;
        let mut common: Option<BTreeSet<String>> = match kind {
            TagKind::Loader => environment.loaders.clone(),
            TagKind::GameVersion => environment.game_versions.clone(),
        };
        let mut seen: Vec<NodeIndex> = Vec::new();

        for idx in self.graph.nodes() {
            let Some(candidate) = &self.graph.node(idx).assigned else {
                continue;
            };
            let own = values(candidate);
            if own.is_empty() {
                continue;
            }
            let next: BTreeSet<String> = match &common {
                Some(set) => set.intersection(&own).cloned().collect(),
                None => own.clone(),
            };
            if next.is_empty() {
                let other = seen
                    .iter()
                    .copied()
                    .find(|&o| {
                        self.graph
                            .node(o)
                            .assigned
                            .as_ref()
                            .is_some_and(|oc| values(oc).is_disjoint(&own))
                    })
                    .or_else(|| seen.first().copied());
                let reason = match other {
                    Some(o) => ConflictReason::IncompatibleTags {
                        other: self.graph.node(o).identity.clone(),
                        kind,
                    },
                    None => ConflictReason::EmptyTags(kind),
                };
                return Err(self.conflict(idx, reason).into());
            }
            common = Some(next);
            seen.push(idx);
        }
        Ok(())
    }

    fn conflict(&self, idx: NodeIndex, reason: ConflictReason) -> Conflict {
        let node = self.graph.node(idx);
        let show_environment = matches!(
            reason,
            ConflictReason::EmptyTags(_) | ConflictReason::NoCandidates
        );
        let constraints = node
            .constraints
            .constraints()
            .iter()
            .filter(|c| show_environment || c.origin != Provenance::Environment)
            .cloned()
            .collect();
        self.report(node.identity.clone(), reason, constraints)
    }

    fn conflict_for(&self, identity: &ModIdentity, reason: ConflictReason) -> Conflict {
        match self.graph.find(identity) {
            Some(idx) => self.conflict(idx, reason),
            None => self.report(identity.clone(), reason, Vec::new()),
        }
    }

    fn merge_conflict(&self, idx: NodeIndex, conflict: MergeConflict) -> ResolveError {
        let reason = match conflict.failure {
            MergeFailure::EmptyRange => ConflictReason::EmptyRange,
            MergeFailure::EmptyTags(kind) => ConflictReason::EmptyTags(kind),
        };
        self.report(self.graph.node(idx).identity.clone(), reason, conflict.culprits)
            .into()
    }

    fn report(
        &self,
        subject: ModIdentity,
        reason: ConflictReason,
        constraints: Vec<Constraint>,
    ) -> Conflict {
        tracing::debug!("unsatisfiable at {subject}: {reason}");
        let mut conflict = Conflict::new(subject, reason);
        conflict.constraints = constraints.into_iter().map(|c| self.trace(c)).collect();
        conflict.eliminated = self
            .eliminated
            .get(&conflict.subject)
            .cloned()
            .unwrap_or_default();
        conflict.trail = self.trail.clone();
        conflict
    }

    fn trace(&self, constraint: Constraint) -> ConstraintTrace {
        let chain = constraint
            .origin
            .parent()
            .and_then(|p| self.graph.find(p))
            .map(|idx| {
                self.graph
                    .provenance_chain(idx)
                    .into_iter()
                    .map(|i| self.graph.node(i).to_string())
                    .collect()
            })
            .unwrap_or_default();
        ConstraintTrace { constraint, chain }
    }
}

async fn fetch_listing(
    registry: &dyn RegistryQuery,
    identity: &ModIdentity,
    filter: &CompatTags,
    timeout: Duration,
) -> Result<Vec<VersionCandidate>, FetchFailure> {
    match tokio::time::timeout(timeout, registry.list_versions(identity, filter)).await {
        Ok(result) => result,
        Err(_) => Err(FetchFailure::Timeout {
            reference: identity.to_string(),
            timeout,
        }),
    }
}
