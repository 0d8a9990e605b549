//! Change detection for incoming actor records.
//!
//! Each fetched record carries a content hash over its canonical fingerprint
//! (sorted keys, normalized whitespace — see
//! [`ActorRecord::fingerprint`]). Classification compares that hash against
//! the last stored one; only `New` and `Updated` actors are forwarded to the
//! mapping stages, which is what makes incremental runs fast.

use actorlens_shared::ActorRecord;

/// How an incoming record relates to what is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// No previous record exists.
    New,
    /// A previous record exists and the content hash differs.
    Updated,
    /// The content hash matches the stored one.
    Unchanged,
}

/// Classify an incoming record against the previously stored content hash.
pub fn classify(record: &ActorRecord, previous_hash: Option<&str>) -> ChangeKind {
    match previous_hash {
        None => ChangeKind::New,
        Some(prev) if prev == record.content_hash => ChangeKind::Unchanged,
        Some(_) => ChangeKind::Updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn record(description: &str, aliases: &[&str]) -> ActorRecord {
        let mut r = ActorRecord {
            name: "APT28".into(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            description: description.into(),
            malware_families: BTreeSet::new(),
            references: vec![],
            group_ids: BTreeSet::new(),
            content_hash: String::new(),
            first_seen: Utc::now(),
            last_updated: Utc::now(),
        };
        r.content_hash = r.compute_content_hash();
        r
    }

    #[test]
    fn no_previous_record_is_new() {
        let r = record("desc", &[]);
        assert_eq!(classify(&r, None), ChangeKind::New);
    }

    #[test]
    fn matching_hash_is_unchanged() {
        let r = record("desc", &["Fancy Bear"]);
        let stored = r.content_hash.clone();
        assert_eq!(classify(&r, Some(&stored)), ChangeKind::Unchanged);
    }

    #[test]
    fn differing_hash_is_updated() {
        let old = record("old description", &[]);
        let new = record("new description", &[]);
        assert_eq!(classify(&new, Some(&old.content_hash)), ChangeKind::Updated);
    }

    #[test]
    fn logically_identical_records_are_unchanged() {
        // Same field values, different whitespace and alias ordering in the
        // source, must classify as Unchanged.
        let stored = record("Operates since 2004.", &["Sofacy", "Fancy Bear"]);
        let refetched = record("Operates  since\n2004.", &["Fancy Bear", "Sofacy"]);
        assert_eq!(
            classify(&refetched, Some(&stored.content_hash)),
            ChangeKind::Unchanged
        );
    }
}
