//! Raw registry metadata shapes and their normalization into
//! [`VersionCandidate`]s.
//!
//! The shapes follow the Modrinth v2 version and project objects, extended
//! with two optional fields the public API does not carry: a
//! `version_range` on dependencies and a `provides` list of capability
//! slots on versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::candidate::{ArtifactFile, DependencyKind, DependencyRole, VersionCandidate};
use crate::identity::{ModIdentity, ModMetadata};
use crate::version::{ModVersion, RangeParseError, VersionRange};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProject {
    pub id: String,
    pub slug: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl RawProject {
    pub fn identity(&self) -> ModIdentity {
        ModIdentity::new(&self.slug, &self.id)
    }

    pub fn metadata(&self) -> ModMetadata {
        ModMetadata {
            identity: self.identity(),
            title: self.title.clone(),
            description: self.description.clone(),
            categories: self.categories.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawVersion {
    pub id: String,
    pub project_id: String,
    pub version_number: String,
    pub date_published: DateTime<Utc>,
    #[serde(default)]
    pub loaders: Vec<String>,
    #[serde(default)]
    pub game_versions: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<RawDependency>,
    #[serde(default)]
    pub files: Vec<RawFile>,
    #[serde(default)]
    pub provides: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDependency {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub version_range: Option<String>,
    pub dependency_type: RawDependencyType,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawDependencyType {
    Required,
    Optional,
    Incompatible,
    Embedded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFile {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub hashes: RawHashes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawHashes {
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub sha512: Option<String>,
}

/// Registry metadata that cannot be turned into a candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("version {version_id} has an empty version number")]
    EmptyVersion { version_id: String },

    #[error("version {version_id} declares a bad range for {target}: {source}")]
    Range {
        version_id: String,
        target: String,
        #[source]
        source: RangeParseError,
    },

    #[error("version {version_id} declares unknown dependency role `{role}`")]
    Role { version_id: String, role: String },
}

/// Normalize one raw version into a [`VersionCandidate`].
///
/// `lookup` maps a dependency's project id to its identity. Ids the lookup
/// does not know fall back to an identity whose slug is the id itself.
/// Dependencies without a project id cannot be followed and are skipped.
/// A dependency pinned only by `version_id` is treated as unranged.
pub fn normalize<F>(
    raw: &RawVersion,
    identity: &ModIdentity,
    lookup: F,
) -> Result<VersionCandidate, NormalizeError>
where
    F: Fn(&str) -> Option<ModIdentity>,
{
    let version = ModVersion::parse(&raw.version_number);
    if version.is_empty() {
        return Err(NormalizeError::EmptyVersion {
            version_id: raw.id.clone(),
        });
    }

    let mut candidate = VersionCandidate::new(
        identity.clone(),
        &raw.id,
        &raw.version_number,
        raw.date_published,
    )
    .for_loaders(&raw.loaders)
    .for_game_versions(&raw.game_versions);

    for slot in &raw.provides {
        candidate = candidate.provides(slot);
    }

    for dep in &raw.dependencies {
        let Some(project_id) = dep.project_id.as_deref() else {
            tracing::debug!(
                "skipping dependency of {} {} without project id",
                identity,
                raw.version_number
            );
            continue;
        };
        let target = lookup(project_id)
            .unwrap_or_else(|| ModIdentity::new(project_id, project_id));

        let range = match dep.version_range.as_deref() {
            Some(spec) => VersionRange::parse(spec).map_err(|source| NormalizeError::Range {
                version_id: raw.id.clone(),
                target: target.to_string(),
                source,
            })?,
            None => VersionRange::any(),
        };

        let (kind, mut role) = match dep.dependency_type {
            RawDependencyType::Required => (DependencyKind::Required, DependencyRole::Direct),
            RawDependencyType::Optional => (DependencyKind::Optional, DependencyRole::Direct),
            RawDependencyType::Incompatible => {
                (DependencyKind::Incompatible, DependencyRole::Direct)
            }
            RawDependencyType::Embedded => (DependencyKind::Required, DependencyRole::Embedded),
        };
        if let Some(r) = dep.role.as_deref() {
            role = DependencyRole::parse(r).ok_or_else(|| NormalizeError::Role {
                version_id: raw.id.clone(),
                role: r.to_string(),
            })?;
        }

        candidate = candidate.with_dependency(target, range, kind, role);
    }

    let primary = raw
        .files
        .iter()
        .find(|f| f.primary)
        .or_else(|| raw.files.first());
    if let Some(file) = primary {
        candidate = candidate.with_file(ArtifactFile {
            url: file.url.clone(),
            filename: file.filename.clone(),
            sha1: file.hashes.sha1.clone(),
            sha512: file.hashes.sha512.clone(),
        });
    }

    Ok(candidate)
}
