//! Operation: preview what policy adds to or removes from the declared mods.

use std::path::Path;

use modforge_core::pack::{Pack, PACK_FILE};
use modforge_core::policy::{PolicyDiff, PolicySet, POLICY_FILE};
use modforge_util::errors::ModforgeError;
use modforge_util::progress;

/// Compute and print the policy diff for the pack in `project_root`.
///
/// Works from the pack and policy files alone; the registry is not
/// contacted, so transitive dependencies are not part of the picture.
pub fn diff(project_root: &Path, json: bool) -> miette::Result<PolicyDiff> {
    let pack = Pack::from_path(&project_root.join(PACK_FILE))?;
    let policy_path = project_root.join(POLICY_FILE);
    if !policy_path.is_file() {
        progress::status_info("Diff", &format!("no {POLICY_FILE}, nothing changes"));
        return Ok(PolicyDiff::default());
    }
    let policy = PolicySet::from_path(&policy_path)?;
    let diff = policy.diff(&pack.mod_slugs());
    tracing::debug!(
        "policy diff: {} added, {} removed, {} clashes",
        diff.added.len(),
        diff.removed.len(),
        diff.clashes.len()
    );

    if json {
        let text = serde_json::to_string_pretty(&diff).map_err(|e| ModforgeError::Generic {
            message: format!("Failed to serialize diff: {e}"),
        })?;
        println!("{text}");
    } else {
        print!("{}", render(&diff));
    }
    if !diff.clashes.is_empty() {
        progress::status_warn(
            "Conflicts",
            &format!("{} declared pairs cannot be resolved together", diff.clashes.len()),
        );
    }
    Ok(diff)
}

/// Plain-text form: `+` for added, `-` for removed, `!` for clashes.
pub fn render(diff: &PolicyDiff) -> String {
    if diff.is_empty() {
        return "Policy does not change the declared mods.\n".to_string();
    }
    let mut out = String::new();
    for slug in &diff.added {
        out.push_str(&format!("+ {slug} (sub-mod)\n"));
    }
    for slug in &diff.removed {
        out.push_str(&format!("- {slug} (conflict)\n"));
    }
    for (a, b) in &diff.clashes {
        out.push_str(&format!("! {a} conflicts with {b}\n"));
    }
    out
}
