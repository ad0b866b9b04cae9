//! Registry access for Modforge.
//!
//! The resolver only ever talks to a [`RegistryQuery`]. Two implementations
//! live here: [`SnapshotRegistry`], an in-memory listing loaded from JSON
//! or built in code, and [`ModrinthRegistry`], which speaks the Modrinth v2
//! HTTP API with its own retry policy.

pub mod error;
pub mod modrinth;
pub mod snapshot;

use async_trait::async_trait;

use modforge_core::candidate::VersionCandidate;
use modforge_core::identity::{ModIdentity, ModMetadata};
use modforge_core::tags::CompatTags;

pub use error::FetchFailure;
pub use modrinth::ModrinthRegistry;
pub use snapshot::SnapshotRegistry;

/// Source of mod metadata and version listings.
///
/// Published versions are immutable, so implementations may be queried
/// concurrently and speculatively for independent mods.
#[async_trait]
pub trait RegistryQuery: Send + Sync {
    /// All published versions of `identity` compatible with `filter`.
    ///
    /// The listing is finite and complete for the call; order is not
    /// significant. An unknown mod is [`FetchFailure::NotFound`].
    async fn list_versions(
        &self,
        identity: &ModIdentity,
        filter: &CompatTags,
    ) -> Result<Vec<VersionCandidate>, FetchFailure>;

    /// Descriptive fields for a mod named by slug or project id.
    async fn get_metadata(&self, reference: &str) -> Result<ModMetadata, FetchFailure>;
}
