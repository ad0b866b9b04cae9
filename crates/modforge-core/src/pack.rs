//! The pack definition file, `modforge.toml`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use modforge_util::errors::ModforgeError;

use crate::tags::{self, CompatTags};
use crate::version::VersionRange;

pub const PACK_FILE: &str = "modforge.toml";

/// A parsed `modforge.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pack {
    pub pack: PackInfo,

    #[serde(default)]
    pub mods: BTreeMap<String, ModRequirement>,

    #[serde(default)]
    pub resourcepacks: Vec<String>,

    #[serde(default)]
    pub shaderpacks: Vec<String>,
}

/// The `[pack]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackInfo {
    pub name: String,
    pub minecraft: String,
    pub loader: String,
    /// Extra loaders whose builds also run on `loader` (e.g. fabric on quilt).
    #[serde(default)]
    pub loaders: Vec<String>,
}

/// A mod entry, either `sodium = "0.5.x"` or a detailed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModRequirement {
    Short(String),
    Detailed(DetailedRequirement),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedRequirement {
    #[serde(default = "any_version")]
    pub version: String,
    #[serde(default)]
    pub loaders: Vec<String>,
}

fn any_version() -> String {
    "*".to_string()
}

/// A root selection as declared in the pack, before the registry has been
/// asked for the mod's project id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackRequirement {
    pub slug: String,
    pub range: VersionRange,
    /// Narrower loader set for this mod alone.
    pub loaders: Option<BTreeSet<String>>,
    /// The requirement text as written.
    pub requirement: String,
}

impl ModRequirement {
    pub fn version(&self) -> &str {
        match self {
            Self::Short(v) => v,
            Self::Detailed(d) => &d.version,
        }
    }
}

impl Pack {
    /// Load and parse a `modforge.toml` file from the given path.
    pub fn from_path(path: &Path) -> miette::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ModforgeError::Pack {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;
        Self::from_str(&content)
    }

    /// Parse a `modforge.toml` from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> miette::Result<Self> {
        let pack: Self = toml::from_str(content).map_err(|e| ModforgeError::Pack {
            message: format!("Failed to parse modforge.toml: {e}"),
        })?;
        if pack.pack.minecraft.trim().is_empty() {
            return Err(ModforgeError::Pack {
                message: "[pack] minecraft must not be empty".to_string(),
            }
            .into());
        }
        if pack.pack.loader.trim().is_empty() {
            return Err(ModforgeError::Pack {
                message: "[pack] loader must not be empty".to_string(),
            }
            .into());
        }
        Ok(pack)
    }

    /// Loader and game-version tags every mod in the pack must satisfy.
    pub fn environment(&self) -> CompatTags {
        let loaders = std::iter::once(self.pack.loader.as_str())
            .chain(self.pack.loaders.iter().map(String::as_str));
        CompatTags::environment(loaders, &self.pack.minecraft)
    }

    /// Root selections in slug order.
    pub fn requirements(&self) -> miette::Result<Vec<PackRequirement>> {
        self.mods
            .iter()
            .map(|(slug, req)| {
                let range = VersionRange::parse(req.version()).map_err(|e| ModforgeError::Pack {
                    message: format!("mod `{slug}`: {e}"),
                })?;
                let loaders = match req {
                    ModRequirement::Detailed(d) if !d.loaders.is_empty() => {
                        Some(tags::normalize(&d.loaders))
                    }
                    _ => None,
                };
                Ok(PackRequirement {
                    slug: slug.clone(),
                    range,
                    loaders,
                    requirement: req.version().to_string(),
                })
            })
            .collect()
    }

    /// Declared mod slugs, sorted.
    pub fn mod_slugs(&self) -> Vec<String> {
        self.mods.keys().cloned().collect()
    }
}
