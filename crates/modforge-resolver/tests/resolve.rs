use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use modforge_core::candidate::VersionCandidate;
use modforge_core::identity::{ModIdentity, ModMetadata};
use modforge_core::policy::{Action, PolicySet};
use modforge_core::tags::CompatTags;
use modforge_core::version::VersionRange;
use modforge_registry::{FetchFailure, RegistryQuery, SnapshotRegistry};
use modforge_resolver::conflict::ConflictReason;
use modforge_resolver::policy::{Answer, DecisionPoint, DecisionPrompt};
use modforge_resolver::{
    resolve, CancelToken, Resolution, ResolveError, ResolveOptions, RootSelection,
};

fn id(slug: &str) -> ModIdentity {
    ModIdentity::new(slug, slug.to_uppercase())
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

fn version(slug: &str, v: &str) -> VersionCandidate {
    VersionCandidate::new(id(slug), format!("{slug}-{v}"), v, day(1))
}

fn range(s: &str) -> VersionRange {
    VersionRange::parse(s).unwrap()
}

fn root(slug: &str, requirement: &str) -> RootSelection {
    RootSelection::new(id(slug), requirement).unwrap()
}

fn policy(toml: &str) -> PolicySet {
    PolicySet::parse_toml(toml).unwrap()
}

async fn run(
    registry: SnapshotRegistry,
    roots: &[RootSelection],
    policy: &PolicySet,
) -> Result<Resolution, ResolveError> {
    resolve(Arc::new(registry), roots, policy, &ResolveOptions::default()).await
}

fn chain_registry() -> SnapshotRegistry {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("moda", "1.2").requires(id("modb"), range(">=2.0, <3.0")))
        .add_version(version("moda", "2.0"))
        .add_version(version("modb", "2.1"))
        .add_version(version("modb", "2.5"))
        .add_version(version("modb", "3.0"));
    registry
}

#[tokio::test]
async fn picks_highest_admissible_versions() {
    let resolution = run(chain_registry(), &[root("moda", "1.x")], &PolicySet::empty())
        .await
        .unwrap();

    let manifest = &resolution.manifest;
    assert_eq!(manifest.slugs(), ["modb", "moda"]);
    assert_eq!(manifest.get("moda").unwrap().version, "1.2");
    assert_eq!(manifest.get("modb").unwrap().version, "2.5");
    assert_eq!(manifest.get("modb").unwrap().reason, "required by moda");

    let decision = resolution
        .trail
        .iter()
        .find(|d| d.point.starts_with("modb: choose among"))
        .unwrap();
    assert_eq!(decision.action, Action::PreferHighestVersion);
    assert_eq!(decision.rule, "default policy");
    assert_eq!(decision.outcome, "modb@2.5");
}

#[tokio::test]
async fn every_constraint_holds_and_dependencies_come_first() {
    let mut registry = chain_registry();
    registry
        .add_version(version("modc", "1.0").requires(id("modb"), range(">=2.1")))
        .add_version(version("modd", "0.3").requires(id("modc"), range("*")));
    let resolution = run(
        registry,
        &[root("moda", "1.x"), root("modd", "*")],
        &PolicySet::empty(),
    )
    .await
    .unwrap();

    let graph = &resolution.graph;
    for idx in graph.nodes() {
        assert!(graph.node(idx).is_settled(), "{}", graph.node(idx));
    }
    let manifest = &resolution.manifest;
    assert_eq!(manifest.len(), graph.len());
    for (i, entry) in manifest.entries.iter().enumerate() {
        for dep in &entry.dependencies {
            assert!(manifest.position(&dep.slug).unwrap() < i);
        }
    }
}

#[tokio::test]
async fn same_input_same_lockfile() {
    let mut outputs = Vec::new();
    for _ in 0..3 {
        let mut registry = chain_registry();
        registry
            .add_version(version("modc", "1.0").requires(id("modb"), range("*")))
            .add_version(version("mode", "1.0"));
        let resolution = run(
            registry,
            &[root("mode", "*"), root("modc", "*"), root("moda", "1.x")],
            &PolicySet::empty(),
        )
        .await
        .unwrap();
        let lock = resolution
            .manifest
            .to_lockfile(&CompatTags::unrestricted())
            .to_string_pretty()
            .unwrap();
        outputs.push(lock);
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[1], outputs[2]);
}

#[tokio::test]
async fn exact_requirements_that_disagree_fail_with_both_sources() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("moda", "1.0").requires(id("modc"), range("=1.0")))
        .add_version(version("modb", "1.0").requires(id("modc"), range("=2.0")))
        .add_version(version("modc", "1.0"))
        .add_version(version("modc", "2.0"));

    let err = run(registry, &[root("moda", "*"), root("modb", "*")], &PolicySet::empty())
        .await
        .unwrap_err();
    let conflict = err.conflict().unwrap();
    assert_eq!(conflict.subject.slug, "modc");
    assert_eq!(conflict.reason, ConflictReason::EmptyRange);
    assert!(conflict.cites("moda"));
    assert!(conflict.cites("modb"));
    assert!(err.to_string().contains("dependency of modb@1.0"));
}

#[tokio::test]
async fn disjoint_root_requirements_fail_before_fetching() {
    let err = run(
        SnapshotRegistry::new(),
        &[root("moda", "1.x"), root("moda", ">=2")],
        &PolicySet::empty(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.conflict().unwrap().reason, ConflictReason::EmptyRange);
}

#[tokio::test]
async fn no_candidate_lists_eliminated_versions() {
    let err = run(chain_registry(), &[root("moda", ">=5")], &PolicySet::empty())
        .await
        .unwrap_err();
    let conflict = err.conflict().unwrap();
    assert_eq!(conflict.reason, ConflictReason::NoCandidates);
    assert_eq!(conflict.eliminated.len(), 2);
    assert!(conflict.eliminated[0].reason.starts_with("outside"));
}

#[tokio::test]
async fn collision_substitute_replaces_the_dependency() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("modw", "1.0").requires(id("modz"), range("*")))
        .add_version(version("modz", "1.0").provides("worldgen"))
        .add_version(version("mody", "1.0").provides("worldgen"))
        .add_version(version("modx", "1.0").provides("worldgen"));
    let rules = policy(
        r#"
[[rule]]
when = "capability-collision"
slot = "worldgen"
action = "substitute:modx"
"#,
    );

    let resolution = run(registry, &[root("modw", "*"), root("mody", "*")], &rules)
        .await
        .unwrap();
    let manifest = &resolution.manifest;
    assert_eq!(manifest.slugs(), ["modx", "modw", "mody"]);
    assert_eq!(manifest.get("modx").unwrap().reason, "substitute for modz");
    assert!(manifest.get("modz").is_none());
    assert!(resolution
        .trail
        .iter()
        .any(|d| d.rule == "rule #1" && d.outcome == "modx replaces modz"));
}

#[tokio::test]
async fn collision_default_keeps_the_root() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("modw", "1.0").requires(id("modz"), range("*")))
        .add_version(version("modz", "9.0").provides("worldgen"))
        .add_version(version("mody", "1.0").provides("worldgen"));

    let resolution = run(
        registry,
        &[root("modw", "*"), root("mody", "*")],
        &PolicySet::empty(),
    )
    .await
    .unwrap();
    assert_eq!(resolution.manifest.slugs(), ["mody", "modw"]);
    assert_eq!(
        resolution.manifest.get("modw").unwrap().dependencies,
        [id("mody")]
    );
}

#[tokio::test]
async fn two_roots_in_one_slot_fail() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("mody", "1.0").provides("worldgen"))
        .add_version(version("modz", "1.0").provides("worldgen"));
    let err = run(
        registry,
        &[root("mody", "*"), root("modz", "*")],
        &PolicySet::empty(),
    )
    .await
    .unwrap_err();
    let conflict = err.conflict().unwrap();
    assert!(matches!(conflict.reason, ConflictReason::RootCollision { .. }));
    let decision = conflict.trail.last().unwrap();
    assert!(decision.point.contains("`worldgen`"));
    assert_eq!(decision.rule, "default policy");
    assert_eq!(decision.outcome, "both are root selections");
}

#[tokio::test]
async fn reject_rule_applies_to_root_collisions() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("mody", "1.0").provides("worldgen"))
        .add_version(version("modz", "1.0").provides("worldgen"));
    let rules = policy(
        r#"
[[rule]]
when = "capability-collision"
slot = "worldgen"
action = "reject"
"#,
    );
    let err = run(registry, &[root("mody", "*"), root("modz", "*")], &rules)
        .await
        .unwrap_err();
    let conflict = err.conflict().unwrap();
    assert!(matches!(conflict.reason, ConflictReason::Rejected { .. }));
    let decision = conflict.trail.last().unwrap();
    assert_eq!(decision.action, Action::Reject);
    assert!(decision.rule.starts_with("rule #1"));
    assert_eq!(decision.outcome, "rejected");
}

#[tokio::test]
async fn optional_dependencies_follow_policy() {
    let registry = || {
        let mut registry = SnapshotRegistry::new();
        registry
            .add_version(version("moda", "1.0").recommends(id("modb"), range("*")))
            .add_version(version("modb", "1.0"));
        registry
    };

    let skipped = run(registry(), &[root("moda", "*")], &PolicySet::empty())
        .await
        .unwrap();
    assert_eq!(skipped.manifest.slugs(), ["moda"]);
    assert_eq!(skipped.trail[0].outcome, "skipped modb");

    let rules = policy(
        r#"
[[rule]]
when = "optional-dependency"
mod = "modb"
action = "include"
"#,
    );
    let included = run(registry(), &[root("moda", "*")], &rules).await.unwrap();
    assert_eq!(included.manifest.slugs(), ["modb", "moda"]);
    assert_eq!(included.manifest.get("modb").unwrap().reason, "optional of moda");
}

#[tokio::test]
async fn sub_mods_are_pulled_in() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("moda", "1.0"))
        .add_version(version("modc", "1.0"));
    let rules = policy(
        r#"
[mods.moda]
sub-mods = ["modc"]
"#,
    );

    let resolution = run(registry, &[root("moda", "*")], &rules).await.unwrap();
    assert_eq!(resolution.manifest.slugs(), ["modc", "moda"]);
    assert_eq!(
        resolution.manifest.get("modc").unwrap().reason,
        "sub-mod of moda"
    );
    assert_eq!(resolution.trail[0].rule, "sub-mods of moda");
}

#[tokio::test]
async fn unknown_sub_mod_is_a_policy_error() {
    let mut registry = SnapshotRegistry::new();
    registry.add_version(version("moda", "1.0"));
    let rules = policy(
        r#"
[mods.moda]
sub-mods = ["ghost"]
"#,
    );
    let err = run(registry, &[root("moda", "*")], &rules).await.unwrap_err();
    assert!(matches!(err, ResolveError::PolicyConfiguration { .. }));
}

#[tokio::test]
async fn policy_conflict_drops_the_optional_side() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("moda", "1.0").recommends(id("modb"), range("*")))
        .add_version(version("modb", "1.0"));
    let rules = policy(
        r#"
[[rule]]
when = "optional-dependency"
action = "include"

[mods.moda]
conflicts = ["modb"]
"#,
    );

    let resolution = run(registry, &[root("moda", "*")], &rules).await.unwrap();
    assert_eq!(resolution.manifest.slugs(), ["moda"]);
    assert!(resolution
        .trail
        .iter()
        .any(|d| d.outcome == "removed modb"));
}

#[tokio::test]
async fn policy_conflict_removes_mods_requiring_the_dropped_side() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("moda", "1.0"))
        .add_version(version("modr", "1.0"))
        .add_version(version("mods", "1.0").requires(id("modd"), range("*")))
        .add_version(version("modd", "1.0"));
    let rules = policy(
        r#"
[mods.moda]
sub-mods = ["mods"]

[mods.modr]
conflicts = ["modd"]
"#,
    );

    let resolution = run(registry, &[root("moda", "*"), root("modr", "*")], &rules)
        .await
        .unwrap();
    let manifest = &resolution.manifest;
    assert_eq!(manifest.len(), 2);
    assert!(manifest.get("moda").is_some());
    assert!(manifest.get("modr").is_some());
    assert!(manifest.get("mods").is_none());
    assert!(manifest.get("modd").is_none());
    assert!(resolution
        .trail
        .iter()
        .any(|d| d.outcome == "removed modd and mods, which require it"));
}

#[tokio::test]
async fn declared_incompatibility_between_required_mods_fails() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("moda", "1.0").breaks(id("modb"), range("*")))
        .add_version(version("modb", "1.0"));
    let err = run(
        registry,
        &[root("moda", "*"), root("modb", "*")],
        &PolicySet::empty(),
    )
    .await
    .unwrap_err();
    let conflict = err.conflict().unwrap();
    assert!(matches!(conflict.reason, ConflictReason::Incompatible { .. }));
    assert!(conflict.cites("modb"));
}

#[tokio::test]
async fn required_cycle_is_reported() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("moda", "1.0").requires(id("modb"), range("*")))
        .add_version(version("modb", "1.0").requires(id("moda"), range("*")));
    let err = run(registry, &[root("moda", "*")], &PolicySet::empty())
        .await
        .unwrap_err();
    let conflict = err.conflict().unwrap();
    assert!(matches!(conflict.reason, ConflictReason::RequiredCycle { .. }));
    assert!(conflict.cites("moda"));
    assert!(conflict.cites("modb"));
}

#[tokio::test]
async fn optional_edge_may_close_a_cycle() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("moda", "1.0").requires(id("modb"), range("*")))
        .add_version(version("modb", "1.0").recommends(id("moda"), range("*")));
    let rules = policy(
        r#"
[[rule]]
when = "optional-dependency"
action = "include"
"#,
    );

    let resolution = run(registry, &[root("moda", "*")], &rules).await.unwrap();
    assert_eq!(resolution.manifest.slugs(), ["modb", "moda"]);
    assert!(resolution
        .trail
        .iter()
        .any(|d| d.outcome == "included moda"));
}

#[tokio::test]
async fn substitutions_that_never_settle_give_up() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("moda", "1.0"))
        .add_version(version("moda", "2.0"))
        .add_version(version("modb", "1.0"))
        .add_version(version("modb", "2.0"));
    let rules = policy(
        r#"
[[rule]]
when = "ambiguity"
mod = "moda"
action = "substitute:modb"

[[rule]]
when = "ambiguity"
mod = "modb"
action = "substitute:moda"
"#,
    );

    let err = run(registry, &[root("moda", "*")], &rules).await.unwrap_err();
    let conflict = err.conflict().unwrap();
    assert_eq!(conflict.subject.slug, "moda");
    assert!(matches!(conflict.reason, ConflictReason::NotConverged { reopens: 8 }));
    assert!(conflict.trail.iter().all(|d| d.outcome.starts_with("substitute ")));
}

#[tokio::test]
async fn later_constraint_reopens_an_assignment() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(version("moda", "1.0").requires(id("modb"), range("*")))
        .add_version(version("modz", "1.0").requires(id("modd"), range("*")))
        .add_version(version("modd", "1.0").requires(id("modb"), range("<2")))
        .add_version(version("modb", "1.0"))
        .add_version(version("modb", "2.0"));

    let resolution = run(
        registry,
        &[root("moda", "*"), root("modz", "*")],
        &PolicySet::empty(),
    )
    .await
    .unwrap();
    assert_eq!(resolution.manifest.get("modb").unwrap().version, "1.0");
    assert!(resolution.graph.node(resolution.graph.find(&id("modb")).unwrap()).is_settled());
}

#[tokio::test]
async fn prefer_pinned_keeps_the_locked_version() {
    let rules = policy(
        r#"
[[rule]]
when = "ambiguity"
action = "prefer-pinned"
"#,
    );
    let options = ResolveOptions::default().with_pins(BTreeMap::from([(
        "modb".to_string(),
        "modb-2.1".to_string(),
    )]));
    let resolution = resolve(
        Arc::new(chain_registry()),
        &[root("moda", "1.x")],
        &rules,
        &options,
    )
    .await
    .unwrap();
    assert_eq!(resolution.manifest.get("modb").unwrap().version, "2.1");
}

#[tokio::test]
async fn reject_rule_fails_with_its_source() {
    let rules = policy(
        r#"
[[rule]]
when = "ambiguity"
mod = "modb"
action = "reject"
"#,
    );
    let err = run(chain_registry(), &[root("moda", "1.x")], &rules)
        .await
        .unwrap_err();
    assert_eq!(
        err.conflict().unwrap().reason,
        ConflictReason::Rejected {
            rule: "rule #1".into()
        }
    );
}

const ASK_MODB: &str = r#"
[[rule]]
when = "ambiguity"
mod = "modb"
action = "ask"
"#;

#[tokio::test]
async fn ask_without_prompt_needs_a_decision() {
    let err = run(chain_registry(), &[root("moda", "1.x")], &policy(ASK_MODB))
        .await
        .unwrap_err();
    assert!(matches!(
        err.conflict().unwrap().reason,
        ConflictReason::DecisionRequired { .. }
    ));
}

struct TakeSecond;

impl DecisionPrompt for TakeSecond {
    fn answer(&self, point: &DecisionPoint) -> Option<Answer> {
        match point {
            DecisionPoint::Ambiguity { .. } => Some(Answer::Take(1)),
            _ => None,
        }
    }
}

#[tokio::test]
async fn ask_uses_the_prompt_answer() {
    let options = ResolveOptions::default().with_prompt(Arc::new(TakeSecond));
    let resolution = resolve(
        Arc::new(chain_registry()),
        &[root("moda", "1.x")],
        &policy(ASK_MODB),
        &options,
    )
    .await
    .unwrap();
    assert_eq!(resolution.manifest.get("modb").unwrap().version, "2.1");
    assert_eq!(resolution.trail[0].action, Action::Ask);
}

#[tokio::test]
async fn environment_filters_candidates() {
    let mut registry = SnapshotRegistry::new();
    registry
        .add_version(
            version("moda", "1.0")
                .for_loaders(["fabric"])
                .for_game_versions(["1.21.1"])
                .requires(id("modb"), range("*")),
        )
        .add_version(
            version("modb", "1.0")
                .for_loaders(["quilt"])
                .for_game_versions(["1.21.1"]),
        );
    let options = ResolveOptions::new(CompatTags::environment(["fabric"], "1.21.1"));
    let err = resolve(Arc::new(registry), &[root("moda", "*")], &PolicySet::empty(), &options)
        .await
        .unwrap_err();
    let conflict = err.conflict().unwrap();
    assert_eq!(conflict.subject.slug, "modb");
    assert_eq!(conflict.reason, ConflictReason::NoCandidates);
}

#[tokio::test]
async fn cancelled_before_start() {
    let options = ResolveOptions::default();
    options.cancel.cancel();
    let err = resolve(
        Arc::new(chain_registry()),
        &[root("moda", "1.x")],
        &PolicySet::empty(),
        &options,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ResolveError::Cancelled));
    assert!(!CancelToken::new().is_cancelled());
}

/// Snapshot registry that cancels the run once a listing has been served.
struct CancellingRegistry {
    inner: SnapshotRegistry,
    cancel: CancelToken,
    calls: AtomicUsize,
}

#[async_trait]
impl RegistryQuery for CancellingRegistry {
    async fn list_versions(
        &self,
        identity: &ModIdentity,
        filter: &CompatTags,
    ) -> Result<Vec<VersionCandidate>, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let listing = self.inner.list_versions(identity, filter).await;
        self.cancel.cancel();
        listing
    }

    async fn get_metadata(&self, reference: &str) -> Result<ModMetadata, FetchFailure> {
        self.inner.get_metadata(reference).await
    }
}

#[tokio::test]
async fn cancelled_between_worklist_steps() {
    let options = ResolveOptions::default();
    let registry = Arc::new(CancellingRegistry {
        inner: chain_registry(),
        cancel: options.cancel.clone(),
        calls: AtomicUsize::new(0),
    });
    let err = resolve(
        registry.clone(),
        &[root("moda", "1.x")],
        &PolicySet::empty(),
        &options,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ResolveError::Cancelled));
    // moda was listed and expanded; modb was queued but never fetched.
    assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
}

/// Registry that never answers in time and counts calls.
struct StalledRegistry {
    calls: AtomicUsize,
}

#[async_trait]
impl RegistryQuery for StalledRegistry {
    async fn list_versions(
        &self,
        _identity: &ModIdentity,
        _filter: &CompatTags,
    ) -> Result<Vec<VersionCandidate>, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }

    async fn get_metadata(&self, reference: &str) -> Result<ModMetadata, FetchFailure> {
        Ok(ModMetadata::new(id(reference)))
    }
}

#[tokio::test]
async fn slow_registry_times_out() {
    let registry = Arc::new(StalledRegistry {
        calls: AtomicUsize::new(0),
    });
    let options = ResolveOptions {
        fetch_timeout: Duration::from_millis(50),
        ..ResolveOptions::default()
    };
    let err = resolve(
        registry.clone(),
        &[root("moda", "*"), root("modb", "*")],
        &PolicySet::empty(),
        &options,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Fetch(FetchFailure::Timeout { .. })
    ));
    assert_eq!(registry.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_dependency_is_a_fetch_failure() {
    let mut registry = SnapshotRegistry::new();
    registry.add_version(version("moda", "1.0").requires(id("ghost"), range("*")));
    let err = run(registry, &[root("moda", "*")], &PolicySet::empty())
        .await
        .unwrap_err();
    assert!(err.conflict().is_none());
    assert!(matches!(
        err,
        ResolveError::Fetch(FetchFailure::NotFound { .. })
    ));
}
