//! In-memory registry backed by a fixed listing.
//!
//! Snapshot files are JSON with the same project and version shapes the
//! Modrinth API returns:
//!
//! ```json
//! {
//!   "projects": [{ "id": "AANobbMI", "slug": "sodium" }],
//!   "versions": [{ "id": "v1", "project_id": "AANobbMI", "version_number": "0.5.11",
//!                  "date_published": "2024-07-05T10:00:00Z", "loaders": ["fabric"],
//!                  "game_versions": ["1.21.1"], "dependencies": [] }]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use modforge_core::candidate::VersionCandidate;
use modforge_core::identity::{ModIdentity, ModMetadata};
use modforge_core::metadata::{self, RawProject, RawVersion};
use modforge_core::tags::CompatTags;
use modforge_util::errors::ModforgeError;

use crate::{FetchFailure, RegistryQuery};

#[derive(Debug, Default, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    projects: Vec<RawProject>,
    #[serde(default)]
    versions: Vec<RawVersion>,
}

/// Deterministic registry whose contents never change after loading.
#[derive(Debug, Clone, Default)]
pub struct SnapshotRegistry {
    projects: BTreeMap<String, ModMetadata>,
    versions: BTreeMap<String, Vec<VersionCandidate>>,
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project with no versions yet.
    pub fn add_project(&mut self, metadata: ModMetadata) -> &mut Self {
        let id = metadata.identity.project_id.clone();
        self.versions.entry(id.clone()).or_default();
        self.projects.insert(id, metadata);
        self
    }

    /// Register a version, creating its project if needed.
    pub fn add_version(&mut self, candidate: VersionCandidate) -> &mut Self {
        let id = candidate.identity.project_id.clone();
        if !self.projects.contains_key(&id) {
            self.projects
                .insert(id.clone(), ModMetadata::new(candidate.identity.clone()));
        }
        self.versions.entry(id).or_default().push(candidate);
        self
    }

    /// Build from snapshot JSON text.
    pub fn from_json(content: &str) -> miette::Result<Self> {
        let file: SnapshotFile =
            serde_json::from_str(content).map_err(|e| ModforgeError::Generic {
                message: format!("Failed to parse registry snapshot: {e}"),
            })?;

        let mut registry = Self::new();
        for project in &file.projects {
            registry.add_project(project.metadata());
        }
        let identities: BTreeMap<String, ModIdentity> = registry
            .projects
            .iter()
            .map(|(id, meta)| (id.clone(), meta.identity.clone()))
            .collect();

        for raw in &file.versions {
            let identity = identities.get(&raw.project_id).cloned().ok_or_else(|| {
                ModforgeError::Generic {
                    message: format!(
                        "snapshot version {} belongs to unknown project {}",
                        raw.id, raw.project_id
                    ),
                }
            })?;
            let candidate = metadata::normalize(raw, &identity, |id| identities.get(id).cloned())
                .map_err(|e| ModforgeError::Generic {
                    message: format!("Invalid snapshot version: {e}"),
                })?;
            registry.add_version(candidate);
        }

        tracing::debug!(
            "loaded registry snapshot with {} projects and {} versions",
            registry.projects.len(),
            file.versions.len()
        );
        Ok(registry)
    }

    /// Load a snapshot JSON file.
    pub fn from_path(path: &Path) -> miette::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ModforgeError::Generic {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;
        Self::from_json(&content)
    }

    fn find(&self, reference: &str) -> Option<&ModMetadata> {
        self.projects
            .get(reference)
            .or_else(|| self.projects.values().find(|m| m.identity.matches(reference)))
    }
}

#[async_trait]
impl RegistryQuery for SnapshotRegistry {
    async fn list_versions(
        &self,
        identity: &ModIdentity,
        filter: &CompatTags,
    ) -> Result<Vec<VersionCandidate>, FetchFailure> {
        let meta = self.find(&identity.project_id).ok_or_else(|| FetchFailure::NotFound {
            reference: identity.to_string(),
        })?;
        let listed = self
            .versions
            .get(&meta.identity.project_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        Ok(listed.iter().filter(|c| c.fits(filter)).cloned().collect())
    }

    async fn get_metadata(&self, reference: &str) -> Result<ModMetadata, FetchFailure> {
        self.find(reference)
            .cloned()
            .ok_or_else(|| FetchFailure::NotFound {
                reference: reference.to_string(),
            })
    }
}
