//! Operations behind the `modforge` commands.
//!
//! Each `ops_*` module loads the pack files it needs, talks to the registry
//! and resolver, and prints its results. The CLI only parses arguments and
//! calls in here.

pub mod ops_diff;
pub mod ops_resolve;
pub mod ops_tree;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use modforge_core::config::RegistryConfig;
use modforge_core::pack::PACK_FILE;
use modforge_registry::{ModrinthRegistry, RegistryQuery, SnapshotRegistry};
use modforge_util::errors::ModforgeError;

/// Where version listings come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RegistrySource {
    /// The configured Modrinth-compatible server.
    #[default]
    Remote,
    /// A JSON snapshot on disk.
    Snapshot(PathBuf),
}

/// Open the registry described by `source`.
pub fn open_registry(
    source: &RegistrySource,
    config: &RegistryConfig,
) -> miette::Result<Arc<dyn RegistryQuery>> {
    match source {
        RegistrySource::Remote => {
            tracing::debug!("using registry at {}", config.url);
            Ok(Arc::new(ModrinthRegistry::new(config)?))
        }
        RegistrySource::Snapshot(path) => {
            tracing::debug!("using registry snapshot {}", path.display());
            Ok(Arc::new(SnapshotRegistry::from_path(path)?))
        }
    }
}

/// The pack directory containing `start`, or an error naming the file.
pub fn find_pack_root(start: &Path) -> miette::Result<PathBuf> {
    modforge_util::fs::find_ancestor_with(start, PACK_FILE).ok_or_else(|| {
        ModforgeError::Pack {
            message: format!("No {PACK_FILE} found in {} or any parent", start.display()),
        }
        .into()
    })
}
