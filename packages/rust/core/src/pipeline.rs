//! End-to-end sync pipeline: fetch → detect → map → infer → store.
//!
//! The orchestrator is a single logical writer over the enrichment store.
//! Every write (actor upsert, enrichment upsert) commits independently, so
//! an aborted run leaves the store valid and resumable: the next run
//! re-selects exactly the actors that never reached a terminal state,
//! because their stored enrichment is missing or was computed from an older
//! content hash. Actors classified `Unchanged` with a current enrichment
//! are skipped with zero writes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use actorlens_fetcher::SourceClient;
use actorlens_inference::{ActorContext, InferenceOutcome, TechniqueInferrer};
use actorlens_shared::{ActorRecord, EnrichmentOutcome, EnrichmentRecord, Result};
use actorlens_storage::Storage;
use actorlens_taxonomy::TaxonomyIndex;

use crate::detector::{ChangeKind, classify};
use crate::mapper::direct_match;
use crate::state::{ActorEvent, ActorState};

// ---------------------------------------------------------------------------
// Options, report, progress
// ---------------------------------------------------------------------------

/// Options for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Re-run the cascade even for actors whose content hash matches.
    /// This is also the documented lever for reprocessing after a taxonomy
    /// version change.
    pub force: bool,
    /// Concurrent in-flight inference requests.
    pub inference_concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force: false,
            inference_concurrency: 4,
        }
    }
}

/// Summary of a completed sync run.
#[derive(Debug)]
pub struct SyncReport {
    /// Sync run identifier.
    pub run_id: String,
    /// Actors fetched from the catalog.
    pub total_fetched: usize,
    /// Raw records skipped during fetch because they failed validation.
    pub skipped_invalid: usize,
    /// Change detection counts.
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Terminal outcome counts for this run.
    pub direct: usize,
    pub inferred: usize,
    pub no_techniques: usize,
    /// Per-actor failures: `(actor, error)`. These never abort the run.
    pub failures: Vec<(String, String)>,
    /// Total elapsed time.
    pub elapsed: Duration,
}

impl SyncReport {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            total_fetched: 0,
            skipped_invalid: 0,
            new: 0,
            updated: 0,
            unchanged: 0,
            direct: 0,
            inferred: 0,
            no_techniques: 0,
            failures: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Count a terminal per-actor state reached during this run.
    fn record_terminal(&mut self, state: ActorState) {
        match state {
            ActorState::EnrichedDirect => self.direct += 1,
            ActorState::EnrichedInferred => self.inferred += 1,
            ActorState::NoTechniques => self.no_techniques += 1,
            _ => {}
        }
    }

    /// Stats payload persisted on the sync-run row.
    pub fn stats_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": if self.failures.is_empty() { "completed" } else { "completed_with_errors" },
            "total_fetched": self.total_fetched,
            "skipped_invalid": self.skipped_invalid,
            "new": self.new,
            "updated": self.updated,
            "unchanged": self.unchanged,
            "direct": self.direct,
            "inferred": self.inferred,
            "no_techniques": self.no_techniques,
            "failures": self.failures.len(),
            "elapsed_ms": self.elapsed.as_millis() as u64,
        })
    }
}

/// Progress callback for reporting pipeline status.
pub trait SyncProgress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when an actor reaches a terminal state in this run.
    fn actor_done(&self, name: &str, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, report: &SyncReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl SyncProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn actor_done(&self, _name: &str, _current: usize, _total: usize) {}
    fn done(&self, _report: &SyncReport) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// An actor selected for enrichment work in this run.
struct PendingActor {
    record: ActorRecord,
    /// Whether the actor row itself needs writing. False for the resume
    /// case: content unchanged but enrichment missing or stale.
    write_actor: bool,
}

/// Run the full sync pipeline.
///
/// The caller loads the taxonomy index first; a load failure aborts before
/// any fetch. Per-actor failures are isolated into the report and never
/// abort the remaining actor set.
#[instrument(skip_all, fields(force = options.force))]
pub async fn run_sync(
    options: &SyncOptions,
    storage: &Storage,
    taxonomy: &TaxonomyIndex,
    source: &SourceClient,
    inferrer: Arc<dyn TechniqueInferrer>,
    progress: &dyn SyncProgress,
) -> Result<SyncReport> {
    let start = Instant::now();
    let run_id = storage.insert_sync_run().await?;
    let mut report = SyncReport::new(run_id.clone());

    info!(%run_id, "starting sync run");

    // --- Phase 1: Fetch ---
    progress.phase("Fetching actor catalog");
    let fetch = source.fetch_all().await?;
    report.total_fetched = fetch.actors.len();
    report.skipped_invalid = fetch.skipped_invalid;

    // --- Phase 2: Change detection ---
    progress.phase("Detecting changes");
    let mut pending: Vec<PendingActor> = Vec::new();

    for record in fetch.actors {
        let previous = storage.get_actor(&record.name).await?;
        let mut kind = classify(&record, previous.as_ref().map(|p| p.content_hash.as_str()));
        if options.force && kind == ChangeKind::Unchanged {
            kind = ChangeKind::Updated;
        }

        match kind {
            ChangeKind::New => {
                report.new += 1;
                pending.push(PendingActor {
                    record,
                    write_actor: true,
                });
            }
            ChangeKind::Updated => {
                report.updated += 1;
                pending.push(PendingActor {
                    record,
                    write_actor: true,
                });
            }
            ChangeKind::Unchanged => {
                report.unchanged += 1;
                // A prior run may have synced the actor and then been
                // aborted before its enrichment committed. Such actors are
                // still pending; fully enriched ones are skipped with zero
                // writes.
                let enriched = storage
                    .get_enrichment(&record.name)
                    .await?
                    .is_some_and(|e| e.source_hash == record.content_hash);
                if !enriched {
                    pending.push(PendingActor {
                        record,
                        write_actor: false,
                    });
                }
            }
        }
    }

    info!(
        new = report.new,
        updated = report.updated,
        unchanged = report.unchanged,
        pending = pending.len(),
        "change detection complete"
    );

    // --- Phase 3: Direct mapping ---
    progress.phase("Resolving direct matches");
    let total_pending = pending.len();
    let mut completed = 0usize;
    let mut need_inference: Vec<ActorRecord> = Vec::new();

    for PendingActor { record, write_actor } in pending {
        let state = ActorState::Unsynced.apply(ActorEvent::Synced);
        if write_actor {
            storage.upsert_actor(&record).await?;
        }

        match direct_match(&record, taxonomy) {
            Some(techniques) => {
                let enrichment = EnrichmentRecord {
                    actor: record.name.clone(),
                    outcome: EnrichmentOutcome::Direct { techniques },
                    source_hash: record.content_hash.clone(),
                    enriched_at: Utc::now(),
                };
                storage.upsert_enrichment(&enrichment).await?;

                if let Some(terminal) =
                    state.and_then(|s| s.apply(ActorEvent::DirectMatched))
                {
                    report.record_terminal(terminal);
                }
                completed += 1;
                progress.actor_done(&record.name, completed, total_pending);
            }
            None => need_inference.push(record),
        }
    }

    // --- Phase 4: Inference fallback ---
    progress.phase("Inferring techniques");
    let semaphore = Arc::new(Semaphore::new(options.inference_concurrency.max(1)));
    let mut handles = Vec::new();

    for record in need_inference {
        let sem = semaphore.clone();
        let inferrer = inferrer.clone();
        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.expect("semaphore closed");
            let ctx = ActorContext::from_record(&record);
            let outcome = inferrer.infer(&ctx).await;
            (record, outcome)
        }));
    }

    for handle in handles {
        match handle.await {
            Ok((record, Ok(outcome))) => {
                let (event, stored) = match outcome {
                    InferenceOutcome::Resolved {
                        techniques,
                        confidence,
                        rationale,
                    } => (
                        ActorEvent::Inferred,
                        EnrichmentOutcome::Inferred {
                            techniques,
                            confidence,
                            rationale,
                            provider: inferrer.provider().to_string(),
                            model: inferrer.model().to_string(),
                        },
                    ),
                    InferenceOutcome::NoTechniquesFound => {
                        (ActorEvent::InferenceExhausted, EnrichmentOutcome::NoTechniques)
                    }
                };

                let enrichment = EnrichmentRecord {
                    actor: record.name.clone(),
                    outcome: stored,
                    source_hash: record.content_hash.clone(),
                    enriched_at: Utc::now(),
                };
                storage.upsert_enrichment(&enrichment).await?;

                if let Some(terminal) = ActorState::Synced.apply(event) {
                    report.record_terminal(terminal);
                }
                completed += 1;
                progress.actor_done(&record.name, completed, total_pending);
            }
            Ok((record, Err(e))) => {
                // The actor stays short of a terminal state and is
                // re-selected by the next run.
                warn!(actor = %record.name, error = %e, "inference failed for actor");
                report.failures.push((record.name, e.to_string()));
            }
            Err(e) => {
                warn!(error = %e, "inference task panicked");
                report.failures.push(("<task>".into(), e.to_string()));
            }
        }
    }

    // --- Finish ---
    report.elapsed = start.elapsed();
    let _ = storage
        .finish_sync_run(&run_id, &report.stats_json().to_string())
        .await;

    progress.done(&report);

    info!(
        new = report.new,
        updated = report.updated,
        unchanged = report.unchanged,
        direct = report.direct,
        inferred = report.inferred,
        no_techniques = report.no_techniques,
        failures = report.failures.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "sync run complete"
    );

    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
