//! Reference taxonomy loading and in-memory indexing.
//!
//! The [`TaxonomyIndex`] is built once per run from a JSON bundle and passed
//! by reference into the mapping stages. It supports O(1) lookup by technique
//! identifier, by group identifier, by group display name, and by group alias.
//! A missing, malformed, or empty bundle aborts the run: no enrichment
//! decision can be made without the taxonomy.

mod bundle;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use actorlens_shared::{ActorLensError, Result, canonicalize_name};

pub use bundle::{BundleGroup, BundleTechnique, TaxonomyBundle, load_bundle};

/// Shape of a valid technique identifier (`T1566` or `T1566.001`).
static TECHNIQUE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^T\d{4}(\.\d{3})?$").expect("valid regex"));

// ---------------------------------------------------------------------------
// Index entries
// ---------------------------------------------------------------------------

/// One technique or sub-technique from the reference framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyEntry {
    /// Stable identifier, e.g. `T1566.001`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Parent technique id for sub-techniques.
    pub parent: Option<String>,
    /// Associated tactic categories.
    pub tactics: Vec<String>,
}

/// One named group with its associated technique set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyGroup {
    /// Stable group identifier, e.g. `G0007`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Alternate names.
    pub aliases: Vec<String>,
    /// Validated technique identifiers associated with the group.
    pub technique_ids: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// TaxonomyIndex
// ---------------------------------------------------------------------------

/// In-memory lookup structure built from the taxonomy bundle.
///
/// Read-only within a run. Every group's `technique_ids` is guaranteed to
/// reference techniques present in the index (dangling references are
/// dropped at load time).
#[derive(Debug, Clone)]
pub struct TaxonomyIndex {
    version: Option<String>,
    techniques: HashMap<String, TaxonomyEntry>,
    groups: Vec<TaxonomyGroup>,
    by_group_id: HashMap<String, usize>,
    by_group_name: HashMap<String, usize>,
    by_group_alias: HashMap<String, usize>,
}

impl TaxonomyIndex {
    /// Load and index a bundle file. Any failure is fatal.
    pub fn load_file(path: &Path) -> Result<Self> {
        let bundle = load_bundle(path)?;
        let index = Self::from_bundle(bundle)?;
        info!(
            path = %path.display(),
            version = index.version.as_deref().unwrap_or("unversioned"),
            techniques = index.technique_count(),
            groups = index.group_count(),
            "taxonomy loaded"
        );
        Ok(index)
    }

    /// Build the index from an already-parsed bundle.
    pub fn from_bundle(bundle: TaxonomyBundle) -> Result<Self> {
        let mut techniques: HashMap<String, TaxonomyEntry> = HashMap::new();

        for t in bundle.techniques {
            let id = t.id.trim().to_string();
            if !TECHNIQUE_ID.is_match(&id) {
                warn!(id = %t.id, "skipping technique with malformed identifier");
                continue;
            }
            // Sub-technique ids carry their parent id as a prefix.
            let parent = t.parent.or_else(|| {
                id.split_once('.').map(|(prefix, _)| prefix.to_string())
            });
            techniques.insert(
                id.clone(),
                TaxonomyEntry {
                    id,
                    name: t.name,
                    parent,
                    tactics: t.tactics,
                },
            );
        }

        if techniques.is_empty() {
            return Err(ActorLensError::taxonomy(
                "bundle contains no usable technique entries",
            ));
        }

        let mut groups: Vec<TaxonomyGroup> = Vec::new();
        let mut by_group_id = HashMap::new();
        let mut by_group_name = HashMap::new();
        let mut by_group_alias = HashMap::new();

        for g in bundle.groups {
            let mut technique_ids = BTreeSet::new();
            for tid in &g.techniques {
                let tid = tid.trim();
                if techniques.contains_key(tid) {
                    technique_ids.insert(tid.to_string());
                } else {
                    warn!(group = %g.id, technique = %tid, "dropping unknown technique reference");
                }
            }

            let idx = groups.len();
            let name_key = canonicalize_name(&g.name).to_lowercase();

            if by_group_id.contains_key(&g.id) {
                warn!(group = %g.id, "duplicate group id in bundle, keeping first entry");
                continue;
            }
            by_group_id.insert(g.id.clone(), idx);
            by_group_name.insert(name_key, idx);
            for alias in &g.aliases {
                let alias_key = canonicalize_name(alias).to_lowercase();
                if alias_key.is_empty() {
                    continue;
                }
                by_group_alias.entry(alias_key).or_insert(idx);
            }

            groups.push(TaxonomyGroup {
                id: g.id,
                name: g.name,
                aliases: g.aliases,
                technique_ids,
            });
        }

        debug!(
            techniques = techniques.len(),
            groups = groups.len(),
            "taxonomy index built"
        );

        Ok(Self {
            version: bundle.version,
            techniques,
            groups,
            by_group_id,
            by_group_name,
            by_group_alias,
        })
    }

    /// Taxonomy version string, if the bundle carried one.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Look up a technique entry by identifier.
    pub fn technique(&self, id: &str) -> Option<&TaxonomyEntry> {
        self.techniques.get(id.trim())
    }

    /// Whether `id` names a known technique.
    pub fn contains_technique(&self, id: &str) -> bool {
        self.techniques.contains_key(id.trim())
    }

    /// Look up a group by stable identifier.
    pub fn group_by_id(&self, id: &str) -> Option<&TaxonomyGroup> {
        self.by_group_id.get(id.trim()).map(|&i| &self.groups[i])
    }

    /// Look up a group by display name, case-insensitively.
    pub fn group_by_name(&self, name: &str) -> Option<&TaxonomyGroup> {
        let key = canonicalize_name(name).to_lowercase();
        self.by_group_name.get(&key).map(|&i| &self.groups[i])
    }

    /// Look up a group by alias, case-insensitively.
    pub fn group_by_alias(&self, alias: &str) -> Option<&TaxonomyGroup> {
        let key = canonicalize_name(alias).to_lowercase();
        self.by_group_alias.get(&key).map(|&i| &self.groups[i])
    }

    /// Look up a group by display name or alias.
    pub fn group_by_any_name(&self, name: &str) -> Option<&TaxonomyGroup> {
        self.group_by_name(name).or_else(|| self.group_by_alias(name))
    }

    /// Number of indexed techniques.
    pub fn technique_count(&self) -> usize {
        self.techniques.len()
    }

    /// Number of indexed groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bundle() -> TaxonomyBundle {
        serde_json::from_str(
            r#"{
            "version": "15.1",
            "techniques": [
                {"id": "T1566", "name": "Phishing", "tactics": ["initial-access"]},
                {"id": "T1566.001", "name": "Spearphishing Attachment"},
                {"id": "T1059.001", "name": "PowerShell", "parent": "T1059"},
                {"id": "T1486", "name": "Data Encrypted for Impact", "tactics": ["impact"]},
                {"id": "bogus", "name": "Not a technique"}
            ],
            "groups": [
                {
                    "id": "G0007",
                    "name": "APT28",
                    "aliases": ["Fancy Bear", "Sofacy"],
                    "techniques": ["T1566.001", "T1059.001", "T9999"]
                },
                {
                    "id": "G0032",
                    "name": "Lazarus Group",
                    "aliases": ["HIDDEN COBRA"],
                    "techniques": ["T1486"]
                }
            ]
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn index_builds_from_bundle() {
        let index = TaxonomyIndex::from_bundle(sample_bundle()).unwrap();
        assert_eq!(index.version(), Some("15.1"));
        // "bogus" id is dropped at load time.
        assert_eq!(index.technique_count(), 4);
        assert_eq!(index.group_count(), 2);
    }

    #[test]
    fn technique_lookup() {
        let index = TaxonomyIndex::from_bundle(sample_bundle()).unwrap();
        assert!(index.contains_technique("T1566.001"));
        assert!(!index.contains_technique("T9999"));
        assert_eq!(index.technique("T1566").unwrap().name, "Phishing");
    }

    #[test]
    fn sub_technique_parent_inferred_from_id() {
        let index = TaxonomyIndex::from_bundle(sample_bundle()).unwrap();
        let sub = index.technique("T1566.001").unwrap();
        assert_eq!(sub.parent.as_deref(), Some("T1566"));
        // Explicit parent is preserved.
        let ps = index.technique("T1059.001").unwrap();
        assert_eq!(ps.parent.as_deref(), Some("T1059"));
    }

    #[test]
    fn group_lookup_by_id_name_alias() {
        let index = TaxonomyIndex::from_bundle(sample_bundle()).unwrap();
        assert_eq!(index.group_by_id("G0007").unwrap().name, "APT28");
        assert_eq!(index.group_by_name("apt28").unwrap().id, "G0007");
        assert_eq!(index.group_by_alias("FANCY BEAR").unwrap().id, "G0007");
        assert_eq!(index.group_by_any_name("hidden cobra").unwrap().id, "G0032");
        assert!(index.group_by_any_name("Unknown Group").is_none());
    }

    #[test]
    fn dangling_technique_references_are_dropped() {
        let index = TaxonomyIndex::from_bundle(sample_bundle()).unwrap();
        let apt28 = index.group_by_id("G0007").unwrap();
        assert!(apt28.technique_ids.contains("T1566.001"));
        assert!(!apt28.technique_ids.contains("T9999"));
        assert_eq!(apt28.technique_ids.len(), 2);
    }

    #[test]
    fn empty_bundle_is_fatal() {
        let bundle: TaxonomyBundle = serde_json::from_str(r#"{"techniques": [], "groups": []}"#).unwrap();
        let err = TaxonomyIndex::from_bundle(bundle).unwrap_err();
        assert!(err.to_string().contains("no usable technique"));
    }

    #[test]
    fn duplicate_group_id_keeps_first() {
        let bundle: TaxonomyBundle = serde_json::from_str(
            r#"{
            "techniques": [{"id": "T1005", "name": "Data from Local System"}],
            "groups": [
                {"id": "G0001", "name": "First", "techniques": ["T1005"]},
                {"id": "G0001", "name": "Second", "techniques": []}
            ]
        }"#,
        )
        .unwrap();
        let index = TaxonomyIndex::from_bundle(bundle).unwrap();
        assert_eq!(index.group_count(), 1);
        assert_eq!(index.group_by_id("G0001").unwrap().name, "First");
    }
}
