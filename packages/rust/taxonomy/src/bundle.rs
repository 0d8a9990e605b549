//! Serde shapes for the reference taxonomy bundle file.
//!
//! The bundle is a single JSON document of technique entries, group entries,
//! and group-to-technique relationships. It is treated as read-only input:
//! parsing problems are always fatal for the run.

use std::path::Path;

use serde::Deserialize;

use actorlens_shared::{ActorLensError, Result};

/// Top-level bundle document.
#[derive(Debug, Clone, Deserialize)]
pub struct TaxonomyBundle {
    /// Taxonomy version string, if the bundle carries one.
    #[serde(default)]
    pub version: Option<String>,
    /// Technique and sub-technique entries.
    #[serde(default)]
    pub techniques: Vec<BundleTechnique>,
    /// Group entries with their associated technique identifiers.
    #[serde(default)]
    pub groups: Vec<BundleGroup>,
}

/// One technique or sub-technique entry in the bundle.
#[derive(Debug, Clone, Deserialize)]
pub struct BundleTechnique {
    /// Stable identifier, e.g. `T1566` or `T1566.001`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Parent technique id for sub-techniques. Inferred from the id when
    /// absent.
    #[serde(default)]
    pub parent: Option<String>,
    /// Associated tactic categories.
    #[serde(default)]
    pub tactics: Vec<String>,
}

/// One group entry in the bundle.
#[derive(Debug, Clone, Deserialize)]
pub struct BundleGroup {
    /// Stable group identifier, e.g. `G0007`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Alternate names for the group.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Technique identifiers associated with the group.
    #[serde(default)]
    pub techniques: Vec<String>,
}

/// Read and parse a bundle file. Any failure here is fatal.
pub fn load_bundle(path: &Path) -> Result<TaxonomyBundle> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ActorLensError::taxonomy(format!("cannot read bundle {}: {e}", path.display()))
    })?;

    serde_json::from_str(&content).map_err(|e| {
        ActorLensError::taxonomy(format!("invalid bundle {}: {e}", path.display()))
    })
}
