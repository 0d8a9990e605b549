//! Raw source record → canonical [`ActorRecord`] normalization.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::Deserialize;

use actorlens_shared::{
    ActorLensError, ActorRecord, ActorReference, Result, canonicalize_name,
};

/// One raw actor item as returned by the catalog listing endpoint.
///
/// Every field except `name` is optional in practice; missing collections
/// default to empty so a sparse record still normalizes.
#[derive(Debug, Clone, Deserialize)]
pub struct RawActor {
    /// Actor name as reported by the source.
    #[serde(default)]
    pub name: String,
    /// Alternate names, possibly with duplicates and stray whitespace.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Free-text profile description.
    #[serde(default)]
    pub description: String,
    /// Related malware/tool family identifiers.
    #[serde(default)]
    pub malware_families: Vec<String>,
    /// External references.
    #[serde(default)]
    pub references: Vec<RawReference>,
    /// Taxonomy-recognized group identifiers.
    #[serde(default)]
    pub group_ids: Vec<String>,
}

/// One raw reference item.
#[derive(Debug, Clone, Deserialize)]
pub struct RawReference {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub date: Option<String>,
}

/// Normalize a raw record into a canonical [`ActorRecord`].
///
/// Canonicalizes the name (trim, collapse whitespace), deduplicates aliases
/// case-insensitively (first spelling wins, self-referential aliases
/// dropped), and computes the content hash. A record with a blank name is a
/// validation error: the caller skips it and continues with the rest of the
/// page.
pub fn normalize(raw: RawActor) -> Result<ActorRecord> {
    let name = canonicalize_name(&raw.name);
    if name.is_empty() {
        return Err(ActorLensError::validation("actor record has no name"));
    }

    let name_key = name.to_lowercase();
    let mut seen = BTreeSet::new();
    let mut aliases = BTreeSet::new();
    for alias in raw.aliases {
        let alias = canonicalize_name(&alias);
        let key = alias.to_lowercase();
        if alias.is_empty() || key == name_key {
            continue;
        }
        if seen.insert(key) {
            aliases.insert(alias);
        }
    }

    let malware_families: BTreeSet<String> = raw
        .malware_families
        .into_iter()
        .map(|f| canonicalize_name(&f))
        .filter(|f| !f.is_empty())
        .collect();

    let references: Vec<ActorReference> = raw
        .references
        .into_iter()
        .filter(|r| !r.url.trim().is_empty())
        .map(|r| ActorReference {
            title: canonicalize_name(&r.title),
            url: r.url.trim().to_string(),
            date: r.date.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
        })
        .collect();

    let group_ids: BTreeSet<String> = raw
        .group_ids
        .into_iter()
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect();

    let now = Utc::now();
    let mut record = ActorRecord {
        name,
        aliases,
        description: raw.description.trim().to_string(),
        malware_families,
        references,
        group_ids,
        content_hash: String::new(),
        first_seen: now,
        last_updated: now,
    };
    record.content_hash = record.compute_content_hash();

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str) -> RawActor {
        RawActor {
            name: name.into(),
            aliases: vec![],
            description: String::new(),
            malware_families: vec![],
            references: vec![],
            group_ids: vec![],
        }
    }

    #[test]
    fn normalizes_name_whitespace() {
        let record = normalize(raw("  DOPPEL   SPIDER ")).unwrap();
        assert_eq!(record.name, "DOPPEL SPIDER");
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = normalize(raw("   ")).unwrap_err();
        assert!(err.to_string().contains("no name"));
    }

    #[test]
    fn aliases_deduplicated_case_insensitively() {
        let mut r = raw("APT28");
        r.aliases = vec![
            "Fancy Bear".into(),
            "FANCY BEAR".into(),
            " fancy  bear ".into(),
            "Sofacy".into(),
            "apt28".into(), // self-referential, dropped
            "".into(),
        ];
        let record = normalize(r).unwrap();
        assert_eq!(record.aliases.len(), 2);
        assert!(record.aliases.contains("Fancy Bear"));
        assert!(record.aliases.contains("Sofacy"));
    }

    #[test]
    fn references_without_url_are_dropped() {
        let mut r = raw("APT28");
        r.references = vec![
            RawReference {
                title: "Report".into(),
                url: "https://example.com/report".into(),
                date: Some("2019-05-01".into()),
            },
            RawReference {
                title: "No link".into(),
                url: "  ".into(),
                date: None,
            },
        ];
        let record = normalize(r).unwrap();
        assert_eq!(record.references.len(), 1);
        assert_eq!(record.references[0].url, "https://example.com/report");
    }

    #[test]
    fn content_hash_is_populated() {
        let record = normalize(raw("APT28")).unwrap();
        assert_eq!(record.content_hash.len(), 64);
        assert_eq!(record.content_hash, record.compute_content_hash());
    }

    #[test]
    fn equivalent_records_normalize_to_same_hash() {
        let mut a = raw("APT28");
        a.aliases = vec!["Sofacy".into(), "Fancy Bear".into()];
        a.description = "Operates  since\n2004.".into();

        let mut b = raw(" APT28");
        b.aliases = vec!["Fancy Bear".into(), "Sofacy".into(), "sofacy".into()];
        b.description = "Operates since 2004.".into();

        let ra = normalize(a).unwrap();
        let rb = normalize(b).unwrap();
        assert_eq!(ra.content_hash, rb.content_hash);
    }
}
