//! Handler for `modforge resolve`.

use std::sync::Arc;

use miette::Result;

use modforge_ops::ops_resolve;
use modforge_util::progress;

use crate::cli::RegistryArgs;
use crate::prompt::TerminalPrompt;

pub async fn exec(registry: &RegistryArgs, interactive: bool, json: bool, dry_run: bool) -> Result<()> {
    let project_root = super::pack_root()?;

    let mut opts = super::resolve_opts(registry);
    opts.json = json;
    opts.dry_run = dry_run;
    if interactive {
        if console::user_attended() {
            opts.prompt = Some(Arc::new(TerminalPrompt::new()));
        } else {
            progress::status_warn("Ignoring", "--interactive without a terminal");
        }
    }

    ops_resolve::resolve(&project_root, &opts).await?;
    Ok(())
}
