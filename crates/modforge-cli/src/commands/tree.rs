//! Handler for `modforge tree`.

use miette::Result;

use modforge_ops::ops_tree::{self, TreeOptions};

use crate::cli::RegistryArgs;

pub async fn exec(
    registry: &RegistryArgs,
    depth: Option<usize>,
    why: Option<String>,
    inverted: bool,
) -> Result<()> {
    let project_root = super::pack_root()?;

    let opts = TreeOptions {
        depth,
        why,
        inverted,
    };

    ops_tree::tree(&project_root, &super::resolve_opts(registry), &opts).await
}
