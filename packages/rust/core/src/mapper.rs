//! Direct taxonomy mapping.
//!
//! Pure function of the actor record and the taxonomy index: no I/O, no
//! retries, deterministic. Match order is canonical name, then aliases,
//! then taxonomy-recognized group identifiers; the first group that carries
//! a non-empty technique set wins. A group with no associated techniques
//! falls through, so the actor can still reach the inference fallback.

use std::collections::BTreeSet;

use actorlens_shared::ActorRecord;
use actorlens_taxonomy::TaxonomyIndex;

/// Resolve an actor's technique set by exact/alias/identifier match.
pub fn direct_match(actor: &ActorRecord, index: &TaxonomyIndex) -> Option<BTreeSet<String>> {
    if let Some(group) = index.group_by_any_name(&actor.name) {
        if !group.technique_ids.is_empty() {
            return Some(group.technique_ids.clone());
        }
    }

    for alias in &actor.aliases {
        if let Some(group) = index.group_by_any_name(alias) {
            if !group.technique_ids.is_empty() {
                return Some(group.technique_ids.clone());
            }
        }
    }

    for id in &actor.group_ids {
        if let Some(group) = index.group_by_id(id) {
            if !group.technique_ids.is_empty() {
                return Some(group.technique_ids.clone());
            }
        }
    }

    None
}
