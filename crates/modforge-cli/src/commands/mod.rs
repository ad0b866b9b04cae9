//! Command dispatch and handler modules.

mod diff;
mod resolve;
mod tree;

use std::path::PathBuf;
use std::time::Duration;

use miette::Result;

use modforge_ops::ops_resolve::ResolveOpts;
use modforge_ops::RegistrySource;
use modforge_util::errors::ModforgeError;

use crate::cli::{Cli, Command, RegistryArgs};

/// Route a parsed CLI invocation to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Resolve {
            registry,
            interactive,
            json,
            dry_run,
        } => resolve::exec(&registry, interactive, json, dry_run).await,
        Command::Tree {
            registry,
            depth,
            why,
            inverted,
        } => tree::exec(&registry, depth, why, inverted).await,
        Command::Diff { json } => diff::exec(json),
    }
}

/// The pack directory enclosing the current working directory.
fn pack_root() -> Result<PathBuf> {
    let cwd = std::env::current_dir().map_err(ModforgeError::Io)?;
    modforge_ops::find_pack_root(&cwd)
}

/// Resolve options shared by every command that runs the resolver.
fn resolve_opts(args: &RegistryArgs) -> ResolveOpts {
    ResolveOpts {
        registry: match &args.snapshot {
            Some(path) => RegistrySource::Snapshot(path.clone()),
            None => RegistrySource::Remote,
        },
        timeout: args.timeout.map(Duration::from_secs),
        jobs: args.jobs,
        ..ResolveOpts::default()
    }
}
