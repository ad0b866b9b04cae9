//! Compatibility tags: loader and game-version set membership.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Loader and game-version restrictions.
///
/// `None` leaves a dimension unrestricted. Merging is set intersection; an
/// empty set means nothing can satisfy the restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatTags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaders: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_versions: Option<BTreeSet<String>>,
}

/// Which tag dimension a restriction applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Loader,
    GameVersion,
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loader => f.write_str("loader"),
            Self::GameVersion => f.write_str("game version"),
        }
    }
}

impl CompatTags {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Tags for a single loader and game version, the usual pack environment.
    pub fn environment<I, S>(loaders: I, game_version: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            loaders: Some(normalize(loaders)),
            game_versions: Some(BTreeSet::from([game_version.trim().to_string()])),
        }
    }

    pub fn with_loaders<I, S>(mut self, loaders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.loaders = Some(normalize(loaders));
        self
    }

    /// Set intersection on every restricted dimension.
    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            loaders: intersect_dim(self.loaders.as_ref(), other.loaders.as_ref()),
            game_versions: intersect_dim(self.game_versions.as_ref(), other.game_versions.as_ref()),
        }
    }

    /// The first dimension whose intersection became empty, if any.
    pub fn empty_dimension(&self) -> Option<TagKind> {
        if self.loaders.as_ref().is_some_and(|s| s.is_empty()) {
            return Some(TagKind::Loader);
        }
        if self.game_versions.as_ref().is_some_and(|s| s.is_empty()) {
            return Some(TagKind::GameVersion);
        }
        None
    }

    /// Whether a candidate published for `loaders` and `game_versions`
    /// shares at least one value with every restricted dimension.
    pub fn admits(&self, loaders: &BTreeSet<String>, game_versions: &BTreeSet<String>) -> bool {
        self.rejects(loaders, game_versions).is_none()
    }

    /// The dimension that rules a candidate out, if any.
    pub fn rejects(
        &self,
        loaders: &BTreeSet<String>,
        game_versions: &BTreeSet<String>,
    ) -> Option<TagKind> {
        if let Some(allowed) = &self.loaders {
            if allowed.is_disjoint(loaders) {
                return Some(TagKind::Loader);
            }
        }
        if let Some(allowed) = &self.game_versions {
            if allowed.is_disjoint(game_versions) {
                return Some(TagKind::GameVersion);
            }
        }
        None
    }
}

impl fmt::Display for CompatTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |set: &Option<BTreeSet<String>>| match set {
            Some(s) => s.iter().cloned().collect::<Vec<_>>().join("|"),
            None => "*".to_string(),
        };
        write!(
            f,
            "loader {} / minecraft {}",
            render(&self.loaders),
            render(&self.game_versions)
        )
    }
}

fn intersect_dim(
    a: Option<&BTreeSet<String>>,
    b: Option<&BTreeSet<String>>,
) -> Option<BTreeSet<String>> {
    match (a, b) {
        (None, x) | (x, None) => x.cloned(),
        (Some(a), Some(b)) => Some(a.intersection(b).cloned().collect()),
    }
}

/// Lowercase and trim loader names so `Fabric` and `fabric` compare equal.
pub fn normalize<I, S>(values: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| v.as_ref().trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn environment_admits_matching_candidate() {
        let env = CompatTags::environment(["Fabric"], "1.21.1");
        assert!(env.admits(&set(&["fabric", "quilt"]), &set(&["1.21", "1.21.1"])));
        assert_eq!(
            env.rejects(&set(&["forge"]), &set(&["1.21.1"])),
            Some(TagKind::Loader)
        );
        assert_eq!(
            env.rejects(&set(&["fabric"]), &set(&["1.20.1"])),
            Some(TagKind::GameVersion)
        );
    }

    #[test]
    fn intersection_can_become_empty() {
        let a = CompatTags::unrestricted().with_loaders(["fabric"]);
        let b = CompatTags::unrestricted().with_loaders(["forge"]);
        let merged = a.intersect(&b);
        assert_eq!(merged.empty_dimension(), Some(TagKind::Loader));
    }

    #[test]
    fn unrestricted_is_identity_for_intersection() {
        let env = CompatTags::environment(["fabric"], "1.21.1");
        assert_eq!(CompatTags::unrestricted().intersect(&env), env);
        assert_eq!(env.empty_dimension(), None);
    }
}
