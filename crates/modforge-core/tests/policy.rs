use std::collections::BTreeMap;

use modforge_core::candidate::DependencyRole;
use modforge_core::identity::ModIdentity;
use modforge_core::policy::{
    Action, MatchContext, ModPolicy, PolicyError, PolicyRule, PolicySet, RuleSource, TriggerKind,
};

#[test]
fn parses_rules_in_order() {
    let policy = PolicySet::parse_toml(
        r#"
[[rule]]
when = "capability-collision"
slot = "Worldgen"
action = "substitute:modx"

[[rule]]
when = "ambiguity"
mod = "sodium"
action = "prefer-pinned"
"#,
    )
    .unwrap();
    let rules = policy.rules();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].slot.as_deref(), Some("worldgen"));
    assert_eq!(rules[0].action, Action::Substitute("modx".into()));
    assert_eq!(rules[1].source, RuleSource::User { index: 2 });
}

#[test]
fn first_match_wins() {
    let policy = PolicySet::new(
        vec![
            PolicyRule::new(TriggerKind::Ambiguity, Action::PreferPinned).for_mod("modb"),
            PolicyRule::new(TriggerKind::Ambiguity, Action::Reject),
        ],
        BTreeMap::new(),
    )
    .unwrap();
    let b = ModIdentity::new("modb", "B");
    let c = ModIdentity::new("modc", "C");
    let only_b = [&b];
    let only_c = [&c];
    let ctx = MatchContext {
        trigger: TriggerKind::Ambiguity,
        mods: &only_b,
        slot: None,
        parent: None,
        role: None,
    };
    assert_eq!(policy.first_match(&ctx).unwrap().action, Action::PreferPinned);
    let ctx = MatchContext {
        mods: &only_c,
        ..ctx
    };
    assert_eq!(policy.first_match(&ctx).unwrap().action, Action::Reject);
}

#[test]
fn illegal_action_for_trigger() {
    let err = PolicySet::parse_toml(
        r#"
[[rule]]
when = "optional-dependency"
action = "prefer-highest-version"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, PolicyError::Rule { index: 1, .. }));
}

#[test]
fn slot_on_ambiguity_rule_is_rejected() {
    let err = PolicySet::new(
        vec![PolicyRule::new(TriggerKind::Ambiguity, Action::Reject).in_slot("worldgen")],
        BTreeMap::new(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("slot"));
}

#[test]
fn substitute_onto_itself_is_rejected() {
    let err = PolicySet::parse_toml(
        r#"
[[rule]]
when = "ambiguity"
mod = "moda"
action = "substitute:moda"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("itself"));
}

#[test]
fn substitute_without_target_is_rejected() {
    assert!(PolicySet::parse_toml(
        r#"
[[rule]]
when = "capability-collision"
action = "substitute"
"#,
    )
    .is_err());
}

#[test]
fn contradictory_duplicates_are_rejected() {
    let err = PolicySet::new(
        vec![
            PolicyRule::new(TriggerKind::Ambiguity, Action::Reject).for_mod("moda"),
            PolicyRule::new(TriggerKind::Ambiguity, Action::PreferPinned).for_mod("moda"),
        ],
        BTreeMap::new(),
    )
    .unwrap_err();
    assert_eq!(
        err,
        PolicyError::Rule {
            index: 2,
            message: "contradicts rule #1: same trigger, `reject` vs `prefer-pinned`".into()
        }
    );
}

#[test]
fn unknown_trigger_and_field() {
    assert!(PolicySet::parse_toml("[[rule]]\nwhen = \"sometimes\"\naction = \"skip\"\n").is_err());
    assert!(PolicySet::parse_toml(
        "[[rule]]\nwhen = \"ambiguity\"\naction = \"reject\"\ncolour = \"red\"\n"
    )
    .is_err());
}

#[test]
fn sub_mods_become_trailing_include_rules() {
    let policy = PolicySet::parse_toml(
        r#"
[[rule]]
when = "optional-dependency"
mod = "sodium-extra"
action = "skip"

[mods.sodium]
sub-mods = ["sodium-extra", "reeses-sodium-options"]
conflicts = ["optifabric"]
"#,
    )
    .unwrap();
    let rules = policy.rules();
    assert_eq!(rules.len(), 3);
    assert_eq!(rules[0].action, Action::Skip);
    assert!(rules[1..].iter().all(|r| r.action == Action::Include
        && r.role == Some(DependencyRole::SubMod)
        && r.source
            == RuleSource::SubMod {
                parent: "sodium".into()
            }));

    let sodium = ModIdentity::new("sodium", "AANobbMI");
    assert_eq!(
        policy.sub_mods_of(&sodium),
        ["reeses-sodium-options", "sodium-extra"]
    );
    assert!(policy.in_conflict(&ModIdentity::new("optifabric", "O"), &sodium));
}

#[test]
fn mod_listed_as_sub_mod_and_conflict_is_rejected() {
    let mut mods = BTreeMap::new();
    mods.insert(
        "sodium".to_string(),
        ModPolicy {
            sub_mods: vec!["iris".into()],
            conflicts: vec!["iris".into()],
        },
    );
    let err = PolicySet::new(vec![], mods).unwrap_err();
    assert!(matches!(err, PolicyError::Mod { ref slug, .. } if slug == "sodium"));
}

#[test]
fn diff_adds_sub_mods_and_drops_conflicting_ones() {
    let policy = PolicySet::parse_toml(
        r#"
[mods.sodium]
sub-mods = ["sodium-extra", "indium"]

[mods.indium]
sub-mods = ["fabric-rendering"]

[mods.optifabric]
conflicts = ["sodium-extra"]

[mods.iris]
conflicts = ["oculus"]
"#,
    )
    .unwrap();

    let declared = vec!["sodium".to_string(), "optifabric".to_string()];
    let diff = policy.diff(&declared);
    assert_eq!(diff.added, ["fabric-rendering", "indium"]);
    assert_eq!(diff.removed, ["sodium-extra"]);
    assert!(diff.clashes.is_empty());

    let declared = vec!["iris".to_string(), "oculus".to_string()];
    let diff = policy.diff(&declared);
    assert_eq!(diff.clashes, [("iris".to_string(), "oculus".to_string())]);
    assert!(diff.added.is_empty());
}

#[test]
fn empty_diff_without_policy() {
    assert!(PolicySet::empty().diff(&["sodium".to_string()]).is_empty());
}
