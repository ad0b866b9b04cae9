//! CLI argument definitions for Modforge.
//!
//! Uses `clap` derive macros to define the command surface. Each command
//! corresponds to a handler in the [`super::commands`] module.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "modforge",
    version,
    about = "A deterministic dependency resolver for Minecraft modpacks",
    long_about = "Modforge resolves the mods declared in modforge.toml against a \
                  Modrinth-compatible registry, applies the rules in \
                  modforge-policy.toml and writes an ordered modforge.lock."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Where the registry data comes from.
#[derive(Args, Debug, Clone, Default)]
pub struct RegistryArgs {
    /// Resolve against a JSON registry snapshot instead of the network
    #[arg(long, env = "MODFORGE_SNAPSHOT", value_name = "PATH")]
    pub snapshot: Option<PathBuf>,

    /// Per-request registry timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Maximum number of concurrent registry requests
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve the pack and write modforge.lock
    Resolve {
        #[command(flatten)]
        registry: RegistryArgs,
        /// Prompt for decisions governed by `ask` rules
        #[arg(short, long)]
        interactive: bool,
        /// Print the resolved mods as JSON
        #[arg(long)]
        json: bool,
        /// Resolve without writing modforge.lock
        #[arg(long)]
        dry_run: bool,
    },

    /// Display the resolved dependency tree
    Tree {
        #[command(flatten)]
        registry: RegistryArgs,
        /// Maximum depth to display
        #[arg(short, long)]
        depth: Option<usize>,
        /// Show why a mod is in the pack
        #[arg(long, value_name = "MOD")]
        why: Option<String>,
        /// With --why, list every mod that depends on it
        #[arg(short, long, requires = "why")]
        inverted: bool,
    },

    /// Show which mods the policy file adds or removes
    Diff {
        /// Print the diff as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}
