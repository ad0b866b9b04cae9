//! Published mod versions and the dependencies they declare.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::ModIdentity;
use crate::tags::{self, CompatTags};
use crate::version::{ModVersion, VersionRange};

/// Whether a dependency edge forces inclusion of its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Required,
    Optional,
    /// The target must not be installed alongside the declaring mod.
    Incompatible,
}

/// What part a dependency plays for the mod declaring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyRole {
    Direct,
    /// Shipped inside the declaring mod's jar; never installed separately.
    Embedded,
    /// One of several mods that can fill the same need.
    Alternative,
    /// Recommended companion injected by policy rather than declared.
    SubMod,
}

impl DependencyRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Some(Self::Direct),
            "embedded" => Some(Self::Embedded),
            "alternative" => Some(Self::Alternative),
            "sub-mod" | "submod" | "sub_mod" => Some(Self::SubMod),
            _ => None,
        }
    }
}

impl fmt::Display for DependencyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Direct => "direct",
            Self::Embedded => "embedded",
            Self::Alternative => "alternative",
            Self::SubMod => "sub-mod",
        };
        f.write_str(s)
    }
}

/// A dependency as declared by one published version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredDependency {
    pub target: ModIdentity,
    pub range: VersionRange,
    pub kind: DependencyKind,
    pub role: DependencyRole,
}

/// Downloadable file backing a version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub sha512: Option<String>,
}

/// One published version of a mod.
#[derive(Debug, Clone)]
pub struct VersionCandidate {
    pub identity: ModIdentity,
    /// Registry id of this specific version.
    pub version_id: String,
    pub version: ModVersion,
    pub dependencies: Vec<DeclaredDependency>,
    pub loaders: BTreeSet<String>,
    pub game_versions: BTreeSet<String>,
    /// Capability slots this version claims to fill, e.g. `worldgen`.
    pub provides: BTreeSet<String>,
    pub published: DateTime<Utc>,
    pub file: Option<ArtifactFile>,
}

impl VersionCandidate {
    pub fn new(
        identity: ModIdentity,
        version_id: impl Into<String>,
        version: &str,
        published: DateTime<Utc>,
    ) -> Self {
        Self {
            identity,
            version_id: version_id.into(),
            version: ModVersion::parse(version),
            dependencies: Vec::new(),
            loaders: BTreeSet::new(),
            game_versions: BTreeSet::new(),
            provides: BTreeSet::new(),
            published,
            file: None,
        }
    }

    pub fn for_loaders<I, S>(mut self, loaders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.loaders = tags::normalize(loaders);
        self
    }

    pub fn for_game_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.game_versions = versions
            .into_iter()
            .map(|v| v.as_ref().trim().to_string())
            .collect();
        self
    }

    pub fn with_dependency(
        mut self,
        target: ModIdentity,
        range: VersionRange,
        kind: DependencyKind,
        role: DependencyRole,
    ) -> Self {
        self.dependencies.push(DeclaredDependency {
            target,
            range,
            kind,
            role,
        });
        self
    }

    pub fn requires(self, target: ModIdentity, range: VersionRange) -> Self {
        self.with_dependency(target, range, DependencyKind::Required, DependencyRole::Direct)
    }

    pub fn recommends(self, target: ModIdentity, range: VersionRange) -> Self {
        self.with_dependency(target, range, DependencyKind::Optional, DependencyRole::Direct)
    }

    pub fn breaks(self, target: ModIdentity, range: VersionRange) -> Self {
        self.with_dependency(
            target,
            range,
            DependencyKind::Incompatible,
            DependencyRole::Direct,
        )
    }

    pub fn provides(mut self, slot: &str) -> Self {
        self.provides.insert(slot.trim().to_lowercase());
        self
    }

    pub fn with_file(mut self, file: ArtifactFile) -> Self {
        self.file = Some(file);
        self
    }

    /// Whether the candidate fits the given loader/game-version restriction.
    pub fn fits(&self, tags: &CompatTags) -> bool {
        tags.admits(&self.loaders, &self.game_versions)
    }
}

impl fmt::Display for VersionCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identity, self.version)
    }
}
