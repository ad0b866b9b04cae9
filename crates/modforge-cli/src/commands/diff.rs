//! Handler for `modforge diff`.

use miette::Result;

use modforge_ops::ops_diff;

pub fn exec(json: bool) -> Result<()> {
    let project_root = super::pack_root()?;
    ops_diff::diff(&project_root, json)?;
    Ok(())
}
