//! Per-actor enrichment state machine.
//!
//! `Unsynced → Synced → {EnrichedDirect | EnrichedInferred | NoTechniques}`.
//! Terminal states are stable until the actor's source content changes,
//! which re-enters the cascade via `SourceChanged`. All valid transitions
//! are enumerated here; anything else is `None`.

use actorlens_shared::EnrichmentOutcome;

/// Where an actor sits in the enrichment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// Not yet seen by a sync run.
    Unsynced,
    /// Actor record synced; enrichment pending.
    Synced,
    /// Terminal: resolved by the direct mapper.
    EnrichedDirect,
    /// Terminal: resolved by the inference fallback.
    EnrichedInferred,
    /// Terminal: inference could not determine techniques.
    NoTechniques,
}

/// Events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorEvent {
    /// Fetch + change detection accepted the actor (NEW or UPDATED).
    Synced,
    /// The direct mapper resolved a technique set.
    DirectMatched,
    /// The inference fallback resolved a technique set.
    Inferred,
    /// Inference exhausted its retries or failed validation.
    InferenceExhausted,
    /// The actor's source content hash changed.
    SourceChanged,
}

impl ActorState {
    /// Apply an event, returning the next state or `None` for an invalid
    /// transition.
    pub fn apply(self, event: ActorEvent) -> Option<ActorState> {
        match (self, event) {
            (Self::Unsynced, ActorEvent::Synced) => Some(Self::Synced),
            (Self::Synced, ActorEvent::DirectMatched) => Some(Self::EnrichedDirect),
            (Self::Synced, ActorEvent::Inferred) => Some(Self::EnrichedInferred),
            (Self::Synced, ActorEvent::InferenceExhausted) => Some(Self::NoTechniques),
            (
                Self::EnrichedDirect | Self::EnrichedInferred | Self::NoTechniques,
                ActorEvent::SourceChanged,
            ) => Some(Self::Synced),
            _ => None,
        }
    }

    /// Whether this is a terminal enrichment state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::EnrichedDirect | Self::EnrichedInferred | Self::NoTechniques
        )
    }

    /// The terminal state a stored enrichment outcome corresponds to.
    pub fn from_outcome(outcome: &EnrichmentOutcome) -> ActorState {
        match outcome {
            EnrichmentOutcome::Direct { .. } => Self::EnrichedDirect,
            EnrichmentOutcome::Inferred { .. } => Self::EnrichedInferred,
            EnrichmentOutcome::NoTechniques => Self::NoTechniques,
        }
    }
}
