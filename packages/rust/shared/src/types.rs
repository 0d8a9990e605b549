//! Core domain types for the actorlens catalog and enrichment store.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// ActorRecord
// ---------------------------------------------------------------------------

/// An external reference attached to an actor profile.
///
/// Order matters: references are kept in the order the source catalog
/// reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorReference {
    /// Reference title.
    pub title: String,
    /// Reference URL.
    pub url: String,
    /// Publication date, if the source provides one (free-form string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// Normalized representation of one threat actor from the source catalog.
///
/// The canonical `name` is the unique key for the actor across the whole
/// pipeline: actor rows, enrichment records, and run reports are all keyed
/// by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRecord {
    /// Canonical actor name (trimmed, internal whitespace collapsed).
    pub name: String,
    /// Deduplicated alternate names.
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    /// Free-text profile description.
    #[serde(default)]
    pub description: String,
    /// Related malware/tool family identifiers.
    #[serde(default)]
    pub malware_families: BTreeSet<String>,
    /// External references, in source order.
    #[serde(default)]
    pub references: Vec<ActorReference>,
    /// Taxonomy-recognized group identifiers (e.g. `G0007`), used for
    /// direct matching.
    #[serde(default)]
    pub group_ids: BTreeSet<String>,
    /// SHA-256 hex digest over the canonical fingerprint of the mutable
    /// attributes. See [`ActorRecord::fingerprint`].
    pub content_hash: String,
    /// When the actor was first synced.
    pub first_seen: DateTime<Utc>,
    /// When the actor's attributes last changed.
    pub last_updated: DateTime<Utc>,
}

impl ActorRecord {
    /// Canonical fingerprint of the mutable attributes.
    ///
    /// The serialization is stable: set-valued fields are sorted, every
    /// string is whitespace-normalized, and field order is fixed. Two
    /// logically identical records therefore fingerprint identically no
    /// matter how the source ordered or spaced its fields.
    pub fn fingerprint(&self) -> String {
        let mut fp = String::new();

        let _ = write!(fp, "aliases=[{}];", join_normalized(&self.aliases));
        let _ = write!(fp, "description={};", normalize_ws(&self.description));
        let _ = write!(fp, "groups=[{}];", join_normalized(&self.group_ids));
        let _ = write!(fp, "malware=[{}];", join_normalized(&self.malware_families));
        for r in &self.references {
            let _ = write!(
                fp,
                "ref=({}|{}|{});",
                normalize_ws(&r.title),
                r.url.trim(),
                r.date.as_deref().map(str::trim).unwrap_or("")
            );
        }

        fp
    }

    /// SHA-256 hex digest of [`ActorRecord::fingerprint`].
    pub fn compute_content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.fingerprint().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Canonicalize an actor or group name: trim and collapse internal whitespace.
pub fn canonicalize_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse all whitespace runs in `s` to single spaces.
fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize each set element, then re-sort and join with `|`.
fn join_normalized(set: &BTreeSet<String>) -> String {
    let mut items: Vec<String> = set.iter().map(|s| normalize_ws(s)).collect();
    items.sort();
    items.join("|")
}

// ---------------------------------------------------------------------------
// Enrichment records
// ---------------------------------------------------------------------------

/// Confidence level attached to an inferred technique set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Parse a reasoning-service confidence string, case-insensitively.
    /// Anything unrecognized is `None` (treated as a malformed response).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Stable lowercase label, used as a storage column and group key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an actor's technique set was determined.
///
/// Modeled as a tagged union so that a direct match can never carry
/// confidence or rationale fields, and "no techniques determined" is a
/// distinct terminal state rather than an empty set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EnrichmentOutcome {
    /// Resolved by exact/alias/identifier match against the taxonomy.
    Direct {
        /// Validated technique identifiers. Never empty.
        techniques: BTreeSet<String>,
    },
    /// Resolved by the reasoning-service fallback.
    Inferred {
        /// Validated technique identifiers. Never empty.
        techniques: BTreeSet<String>,
        /// Self-reported confidence of the inference.
        confidence: Confidence,
        /// Short free-text rationale from the reasoning service.
        rationale: String,
        /// Reasoning-service provider used.
        provider: String,
        /// Model identifier used.
        model: String,
    },
    /// Terminal state: inference exhausted its retries or failed validation.
    NoTechniques,
}

impl EnrichmentOutcome {
    /// Stable tag used as the storage `source` column and group key.
    pub fn source_tag(&self) -> &'static str {
        match self {
            Self::Direct { .. } => "direct",
            Self::Inferred { .. } => "inferred",
            Self::NoTechniques => "no_techniques",
        }
    }

    /// Technique set, if this outcome carries one.
    pub fn techniques(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Direct { techniques } | Self::Inferred { techniques, .. } => Some(techniques),
            Self::NoTechniques => None,
        }
    }
}

/// The persisted, authoritative enrichment result for one actor.
///
/// Keyed 1:1 by actor canonical name. An upsert fully replaces any prior
/// record; the pipeline never implicitly deletes one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    /// Actor canonical name.
    pub actor: String,
    /// How (and whether) the technique set was determined.
    #[serde(flatten)]
    pub outcome: EnrichmentOutcome,
    /// Content hash of the actor record this enrichment was computed from.
    /// Lets an interrupted run resume without re-enriching finished actors.
    pub source_hash: String,
    /// When the enrichment was written.
    pub enriched_at: DateTime<Utc>,
}
