use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a logical mod: the human slug plus the registry's
/// opaque project id.
///
/// Ordering is lexical by slug first, which is the tie-break order used
/// wherever the resolver has to pick between otherwise equal mods.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModIdentity {
    pub slug: String,
    pub project_id: String,
}

impl ModIdentity {
    pub fn new(slug: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            project_id: project_id.into(),
        }
    }

    /// Whether `reference` names this mod, either by slug or by project id.
    pub fn matches(&self, reference: &str) -> bool {
        self.slug.eq_ignore_ascii_case(reference) || self.project_id == reference
    }
}

impl fmt::Display for ModIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slug)
    }
}

/// Descriptive fields the registry holds about a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModMetadata {
    pub identity: ModIdentity,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl ModMetadata {
    pub fn new(identity: ModIdentity) -> Self {
        Self {
            identity,
            title: None,
            description: None,
            categories: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_slug() {
        let a = ModIdentity::new("fabric-api", "P7dR8mSH");
        let b = ModIdentity::new("sodium", "AANobbMI");
        assert!(a < b);
    }

    #[test]
    fn matches_slug_or_id() {
        let id = ModIdentity::new("sodium", "AANobbMI");
        assert!(id.matches("sodium"));
        assert!(id.matches("Sodium"));
        assert!(id.matches("AANobbMI"));
        assert!(!id.matches("lithium"));
        assert_eq!(id.to_string(), "sodium");
    }
}
