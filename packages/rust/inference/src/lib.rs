//! Technique inference via an external reasoning service.
//!
//! Invoked only for actors the direct mapper could not resolve. The engine
//! builds a bounded textual context from the actor profile, issues exactly
//! one request per attempt to an OpenAI-compatible chat endpoint, and
//! validates every returned technique identifier against the taxonomy index.
//! Unrecognized identifiers are dropped, never passed through. After the
//! bounded retry budget is spent, the outcome is the terminal
//! [`InferenceOutcome::NoTechniquesFound`] — an actor is never left in limbo.

mod client;

use std::collections::BTreeSet;
use std::fmt::Write as _;

use async_trait::async_trait;

use actorlens_shared::{ActorRecord, Confidence, Result};

pub use client::ReasoningClient;

// ---------------------------------------------------------------------------
// Actor context
// ---------------------------------------------------------------------------

/// The bounded textual context sent to the reasoning service for one actor.
#[derive(Debug, Clone)]
pub struct ActorContext {
    /// Actor canonical name.
    pub name: String,
    /// Profile description.
    pub description: String,
    /// Alternate names.
    pub aliases: Vec<String>,
    /// Related malware/tool families.
    pub malware_families: Vec<String>,
}

impl ActorContext {
    /// Build a context from a normalized actor record.
    pub fn from_record(record: &ActorRecord) -> Self {
        Self {
            name: record.name.clone(),
            description: record.description.clone(),
            aliases: record.aliases.iter().cloned().collect(),
            malware_families: record.malware_families.iter().cloned().collect(),
        }
    }

    /// Render the context as prompt text, truncated to `max_chars`.
    pub fn render(&self, max_chars: usize) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "Actor: {}", self.name);
        if !self.aliases.is_empty() {
            let _ = writeln!(text, "Aliases: {}", self.aliases.join(", "));
        }
        if !self.malware_families.is_empty() {
            let _ = writeln!(text, "Known malware families: {}", self.malware_families.join(", "));
        }
        let _ = writeln!(text, "Profile:\n{}", self.description);

        truncate_context(&text, max_chars)
    }
}

/// Truncate context text to approximately `max_chars` characters.
pub fn truncate_context(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    // Cut on a char boundary at or below the budget.
    let mut cut = max_chars;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[... profile truncated ...]", &text[..cut])
}

// ---------------------------------------------------------------------------
// Inference outcome & trait
// ---------------------------------------------------------------------------

/// Result of one complete inference attempt cycle for an actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceOutcome {
    /// The service returned a technique set that survived validation.
    Resolved {
        /// Validated technique identifiers, within the configured bounds.
        techniques: BTreeSet<String>,
        /// Self-reported confidence.
        confidence: Confidence,
        /// Short free-text rationale.
        rationale: String,
    },
    /// Terminal: retries exhausted or validation failed on every attempt.
    NoTechniquesFound,
}

/// Seam for the technique-inference stage.
///
/// The production implementation is [`ReasoningClient`]; orchestrator tests
/// substitute a stub to assert cascade behavior (a direct-matched actor must
/// never reach this trait).
#[async_trait]
pub trait TechniqueInferrer: Send + Sync {
    /// Run the bounded infer-validate-retry cycle for one actor.
    ///
    /// `Err` is reserved for non-retryable conditions (e.g. rejected
    /// credentials) where writing a terminal no-techniques record would be
    /// wrong; the caller reports the failure and leaves the actor
    /// unprocessed for the next run.
    async fn infer(&self, ctx: &ActorContext) -> Result<InferenceOutcome>;

    /// Provenance: provider label for inferred records.
    fn provider(&self) -> &str;

    /// Provenance: model identifier for inferred records.
    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sample_record() -> ActorRecord {
        use chrono::Utc;
        let mut record = ActorRecord {
            name: "DOPPEL SPIDER".into(),
            aliases: ["Doppelganger".to_string()].into_iter().collect(),
            description: "Operates the DoppelPaymer ransomware.".into(),
            malware_families: ["DoppelPaymer".to_string()].into_iter().collect(),
            references: vec![],
            group_ids: BTreeSet::new(),
            content_hash: String::new(),
            first_seen: Utc::now(),
            last_updated: Utc::now(),
        };
        record.content_hash = record.compute_content_hash();
        record
    }

    #[test]
    fn context_includes_profile_fields() {
        let ctx = ActorContext::from_record(&sample_record());
        let text = ctx.render(10_000);
        assert!(text.contains("Actor: DOPPEL SPIDER"));
        assert!(text.contains("Aliases: Doppelganger"));
        assert!(text.contains("DoppelPaymer"));
        assert!(text.contains("ransomware"));
    }

    #[test]
    fn context_respects_char_budget() {
        let mut record = sample_record();
        record.description = "x".repeat(50_000);
        let ctx = ActorContext::from_record(&record);
        let text = ctx.render(1_000);
        assert!(text.len() < 1_100);
        assert!(text.contains("truncated"));
    }

    #[test]
    fn truncate_is_noop_for_short_text() {
        assert_eq!(truncate_context("short", 100), "short");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        // Multi-byte chars must not be split.
        let text = "é".repeat(100);
        let out = truncate_context(&text, 51);
        assert!(out.contains("truncated"));
    }
}
