//! Operation: display the resolved dependency tree, or why a mod is in it.

use std::path::Path;

use modforge_resolver::graph::ResolutionGraph;

use crate::ops_resolve::{self, PackInputs, ResolveOpts};

/// Options for `modforge tree`.
#[derive(Debug, Clone, Default)]
pub struct TreeOptions {
    /// Maximum tree depth to display.
    pub depth: Option<usize>,
    /// Show the path from a root to this mod instead of the whole tree.
    pub why: Option<String>,
    /// With `why`, list every mod depending on it instead of one path.
    pub inverted: bool,
}

/// Resolve the pack without writing the lockfile and print its graph.
pub async fn tree(
    project_root: &Path,
    resolve_opts: &ResolveOpts,
    opts: &TreeOptions,
) -> miette::Result<()> {
    let inputs = PackInputs::load(project_root)?;
    let resolution = ops_resolve::resolve_inputs(&inputs, resolve_opts).await?;
    print!("{}", render(&resolution.graph, opts));
    Ok(())
}

/// The text `tree` prints for a resolved graph.
pub fn render(graph: &ResolutionGraph, opts: &TreeOptions) -> String {
    let Some(target) = &opts.why else {
        let tree = graph.print_tree(opts.depth);
        return if tree.is_empty() {
            "No mods.\n".to_string()
        } else {
            tree
        };
    };

    if opts.inverted {
        let inverted = graph.print_inverted_tree(target);
        if inverted.is_empty() {
            return format!("Mod '{target}' is not in the resolved pack.\n");
        }
        return inverted;
    }

    match graph.find_path(target) {
        Some(path) => {
            let mut out = format!("Path to {target}:\n");
            for (i, node) in path.iter().enumerate() {
                out.push_str(&format!("{}{node}\n", "  ".repeat(i)));
            }
            out
        }
        None => format!("Mod '{target}' is not in the resolved pack.\n"),
    }
}
