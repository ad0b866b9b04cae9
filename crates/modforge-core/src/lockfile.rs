use serde::{Deserialize, Serialize};
use std::path::Path;

use modforge_util::errors::ModforgeError;

pub const LOCK_FILE: &str = "modforge.lock";

/// Deterministic lockfile recording the resolved manifest in install order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    #[serde(default)]
    pub environment: LockedEnvironment,
    #[serde(default, rename = "mod")]
    pub mods: Vec<LockedMod>,
}

/// The loader and game version a lockfile was resolved for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedEnvironment {
    #[serde(default)]
    pub minecraft: String,
    #[serde(default)]
    pub loaders: Vec<String>,
}

/// A single locked mod with its resolved version and download source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedMod {
    pub slug: String,
    #[serde(rename = "project-id")]
    pub project_id: String,
    pub version: String,
    #[serde(rename = "version-id")]
    pub version_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    /// Why the mod is in the pack: `root`, `required by x`, `sub-mod of y`...
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Lockfile {
    /// Load and parse a `modforge.lock` file from the given path.
    pub fn from_path(path: &Path) -> miette::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ModforgeError::Generic {
            message: format!("Failed to read lockfile: {e}"),
        })?;
        toml::from_str(&content).map_err(|e| {
            ModforgeError::Generic {
                message: format!("Failed to parse lockfile: {e}"),
            }
            .into()
        })
    }

    /// Like [`Lockfile::from_path`], but a missing file is `None`.
    pub fn load_optional(path: &Path) -> miette::Result<Option<Self>> {
        if path.is_file() {
            Self::from_path(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Serialize the lockfile to a pretty-printed TOML string.
    pub fn to_string_pretty(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Write the lockfile atomically.
    pub fn write_to(&self, path: &Path) -> miette::Result<()> {
        let content = self.to_string_pretty().map_err(|e| ModforgeError::Generic {
            message: format!("Failed to serialize lockfile: {e}"),
        })?;
        modforge_util::fs::write_atomic(path, content.as_bytes()).map_err(ModforgeError::from)?;
        Ok(())
    }

    /// The entry locked for a mod, matched by slug or project id.
    pub fn locked_version(&self, reference: &str) -> Option<&LockedMod> {
        self.mods
            .iter()
            .find(|m| m.slug.eq_ignore_ascii_case(reference) || m.project_id == reference)
    }
}
