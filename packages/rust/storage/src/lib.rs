//! libSQL storage layer for the actor catalog and enrichment cache.
//!
//! The [`Storage`] struct wraps a local libSQL database holding the raw
//! actor records, the enrichment store, and sync-run history. The two
//! stores are decoupled: an actor row can exist without an enrichment row
//! (not yet processed), and enrichment rows are only ever written through
//! [`Storage::upsert_enrichment`], which fully replaces any prior record.
//!
//! **Access rules:**
//! - Pipeline: read-write (sole writer) via [`Storage::open`]
//! - Presentation/API layers: read-only via [`Storage::open_readonly`]

mod migrations;

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use uuid::Uuid;

use actorlens_shared::{
    ActorLensError, ActorRecord, Confidence, EnrichmentOutcome, EnrichmentRecord, Result,
};

/// Grouping key for aggregate enrichment counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountBy {
    /// Group by outcome source tag (`direct` / `inferred` / `no_techniques`).
    Source,
    /// Group by confidence level (inferred records only).
    Confidence,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ActorLensError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ActorLensError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ActorLensError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (for presentation layers).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ActorLensError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ActorLensError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ActorLensError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ActorLensError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Actor operations
    // -----------------------------------------------------------------------

    /// Upsert an actor record (insert or update on conflict by name).
    ///
    /// On update, every mutable attribute is replaced in place but the
    /// stored `first_seen` is preserved.
    pub async fn upsert_actor(&self, actor: &ActorRecord) -> Result<()> {
        self.check_writable()?;

        let aliases = to_json(&actor.aliases)?;
        let malware = to_json(&actor.malware_families)?;
        let references = to_json(&actor.references)?;
        let group_ids = to_json(&actor.group_ids)?;

        self.conn
            .execute(
                "INSERT INTO actors (name, aliases_json, description, malware_json, references_json, group_ids_json, content_hash, first_seen, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(name) DO UPDATE SET
                   aliases_json = excluded.aliases_json,
                   description = excluded.description,
                   malware_json = excluded.malware_json,
                   references_json = excluded.references_json,
                   group_ids_json = excluded.group_ids_json,
                   content_hash = excluded.content_hash,
                   last_updated = excluded.last_updated",
                params![
                    actor.name.as_str(),
                    aliases.as_str(),
                    actor.description.as_str(),
                    malware.as_str(),
                    references.as_str(),
                    group_ids.as_str(),
                    actor.content_hash.as_str(),
                    actor.first_seen.to_rfc3339(),
                    actor.last_updated.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| ActorLensError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get an actor by canonical name.
    pub async fn get_actor(&self, name: &str) -> Result<Option<ActorRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, aliases_json, description, malware_json, references_json, group_ids_json, content_hash, first_seen, last_updated
                 FROM actors WHERE name = ?1",
                params![name],
            )
            .await
            .map_err(|e| ActorLensError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_actor(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(ActorLensError::Storage(e.to_string())),
        }
    }

    /// List all actors, ordered by name.
    pub async fn list_actors(&self) -> Result<Vec<ActorRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, aliases_json, description, malware_json, references_json, group_ids_json, content_hash, first_seen, last_updated
                 FROM actors ORDER BY name",
                params![],
            )
            .await
            .map_err(|e| ActorLensError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_actor(&row)?);
        }
        Ok(results)
    }

    /// Count stored actors.
    pub async fn count_actors(&self) -> Result<u64> {
        self.count_rows("SELECT COUNT(*) FROM actors").await
    }

    // -----------------------------------------------------------------------
    // Enrichment operations
    // -----------------------------------------------------------------------

    /// Upsert an enrichment record, keyed by actor canonical name.
    ///
    /// Fully replaces any existing record for the actor — never a merge.
    pub async fn upsert_enrichment(&self, record: &EnrichmentRecord) -> Result<()> {
        self.check_writable()?;

        let (techniques, confidence, rationale, provider, model) = match &record.outcome {
            EnrichmentOutcome::Direct { techniques } => {
                (Some(to_json(techniques)?), None, None, None, None)
            }
            EnrichmentOutcome::Inferred {
                techniques,
                confidence,
                rationale,
                provider,
                model,
            } => (
                Some(to_json(techniques)?),
                Some(confidence.as_str().to_string()),
                Some(rationale.clone()),
                Some(provider.clone()),
                Some(model.clone()),
            ),
            EnrichmentOutcome::NoTechniques => (None, None, None, None, None),
        };

        self.conn
            .execute(
                "INSERT INTO enrichments (actor_name, source, techniques_json, confidence, rationale, provider, model, source_hash, enriched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(actor_name) DO UPDATE SET
                   source = excluded.source,
                   techniques_json = excluded.techniques_json,
                   confidence = excluded.confidence,
                   rationale = excluded.rationale,
                   provider = excluded.provider,
                   model = excluded.model,
                   source_hash = excluded.source_hash,
                   enriched_at = excluded.enriched_at",
                params![
                    record.actor.as_str(),
                    record.outcome.source_tag(),
                    techniques.as_deref(),
                    confidence.as_deref(),
                    rationale.as_deref(),
                    provider.as_deref(),
                    model.as_deref(),
                    record.source_hash.as_str(),
                    record.enriched_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| ActorLensError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get the enrichment record for an actor.
    pub async fn get_enrichment(&self, actor: &str) -> Result<Option<EnrichmentRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT actor_name, source, techniques_json, confidence, rationale, provider, model, source_hash, enriched_at
                 FROM enrichments WHERE actor_name = ?1",
                params![actor],
            )
            .await
            .map_err(|e| ActorLensError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_enrichment(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(ActorLensError::Storage(e.to_string())),
        }
    }

    /// Count stored enrichment records.
    pub async fn count_enrichments(&self) -> Result<u64> {
        self.count_rows("SELECT COUNT(*) FROM enrichments").await
    }

    /// Aggregate enrichment counts grouped by source or confidence.
    ///
    /// This is the read API consumed by presentation layers.
    pub async fn count_enrichments_by(&self, group: CountBy) -> Result<HashMap<String, u64>> {
        let sql = match group {
            CountBy::Source => {
                "SELECT source, COUNT(*) FROM enrichments GROUP BY source"
            }
            CountBy::Confidence => {
                "SELECT confidence, COUNT(*) FROM enrichments
                 WHERE confidence IS NOT NULL GROUP BY confidence"
            }
        };

        let mut rows = self
            .conn
            .query(sql, params![])
            .await
            .map_err(|e| ActorLensError::Storage(e.to_string()))?;

        let mut results = HashMap::new();
        while let Ok(Some(row)) = rows.next().await {
            let key: String = row
                .get(0)
                .map_err(|e| ActorLensError::Storage(e.to_string()))?;
            let count: u64 = row
                .get::<i64>(1)
                .map_err(|e| ActorLensError::Storage(e.to_string()))? as u64;
            results.insert(key, count);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Sync run operations
    // -----------------------------------------------------------------------

    /// Insert a new sync run. Returns the generated run ID.
    pub async fn insert_sync_run(&self) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO sync_runs (id, started_at) VALUES (?1, ?2)",
                params![id.as_str(), now.as_str()],
            )
            .await
            .map_err(|e| ActorLensError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Mark a sync run finished with its stats.
    pub async fn finish_sync_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE sync_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(|e| ActorLensError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    async fn count_rows(&self, sql: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(sql, params![])
            .await
            .map_err(|e| ActorLensError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row
                .get::<i64>(0)
                .map_err(|e| ActorLensError::Storage(e.to_string()))? as u64),
            _ => Ok(0),
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ActorLensError::Storage(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| ActorLensError::Storage(e.to_string()))
}

fn parse_timestamp(s: &str) -> Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ActorLensError::Storage(format!("invalid timestamp: {e}")))
}

/// Convert a database row to an [`ActorRecord`].
fn row_to_actor(row: &libsql::Row) -> Result<ActorRecord> {
    let get_text = |i: i32| -> Result<String> {
        row.get::<String>(i)
            .map_err(|e| ActorLensError::Storage(e.to_string()))
    };

    Ok(ActorRecord {
        name: get_text(0)?,
        aliases: from_json(&get_text(1)?)?,
        description: get_text(2)?,
        malware_families: from_json(&get_text(3)?)?,
        references: from_json(&get_text(4)?)?,
        group_ids: from_json(&get_text(5)?)?,
        content_hash: get_text(6)?,
        first_seen: parse_timestamp(&get_text(7)?)?,
        last_updated: parse_timestamp(&get_text(8)?)?,
    })
}

/// Convert a database row to an [`EnrichmentRecord`].
fn row_to_enrichment(row: &libsql::Row) -> Result<EnrichmentRecord> {
    let actor: String = row
        .get(0)
        .map_err(|e| ActorLensError::Storage(e.to_string()))?;
    let source: String = row
        .get(1)
        .map_err(|e| ActorLensError::Storage(e.to_string()))?;
    let techniques_json: Option<String> = row.get(2).ok();
    let confidence: Option<String> = row.get(3).ok();
    let rationale: Option<String> = row.get(4).ok();
    let provider: Option<String> = row.get(5).ok();
    let model: Option<String> = row.get(6).ok();
    let source_hash: String = row
        .get(7)
        .map_err(|e| ActorLensError::Storage(e.to_string()))?;
    let enriched_at: String = row
        .get(8)
        .map_err(|e| ActorLensError::Storage(e.to_string()))?;

    let outcome = match source.as_str() {
        "direct" => EnrichmentOutcome::Direct {
            techniques: from_json(
                techniques_json
                    .as_deref()
                    .ok_or_else(|| ActorLensError::Storage("direct row has no techniques".into()))?,
            )?,
        },
        "inferred" => EnrichmentOutcome::Inferred {
            techniques: from_json(
                techniques_json
                    .as_deref()
                    .ok_or_else(|| ActorLensError::Storage("inferred row has no techniques".into()))?,
            )?,
            confidence: confidence
                .as_deref()
                .and_then(Confidence::parse)
                .ok_or_else(|| ActorLensError::Storage("inferred row has no confidence".into()))?,
            rationale: rationale.unwrap_or_default(),
            provider: provider.unwrap_or_default(),
            model: model.unwrap_or_default(),
        },
        "no_techniques" => EnrichmentOutcome::NoTechniques,
        other => {
            return Err(ActorLensError::Storage(format!(
                "unknown enrichment source tag: {other}"
            )));
        }
    };

    Ok(EnrichmentRecord {
        actor,
        outcome,
        source_hash,
        enriched_at: parse_timestamp(&enriched_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("al_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn make_actor(name: &str, hash: &str) -> ActorRecord {
        ActorRecord {
            name: name.into(),
            aliases: ["Alias One".to_string()].into_iter().collect(),
            description: "A test actor.".into(),
            malware_families: BTreeSet::new(),
            references: vec![],
            group_ids: ["G0007".to_string()].into_iter().collect(),
            content_hash: hash.into(),
            first_seen: Utc::now(),
            last_updated: Utc::now(),
        }
    }

    fn direct_record(actor: &str, hash: &str) -> EnrichmentRecord {
        EnrichmentRecord {
            actor: actor.into(),
            outcome: EnrichmentOutcome::Direct {
                techniques: ["T1566.001".to_string(), "T1059.001".to_string()]
                    .into_iter()
                    .collect(),
            },
            source_hash: hash.into(),
            enriched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("al_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn actor_upsert_and_query() {
        let storage = test_storage().await;

        let actor = make_actor("APT28", "hash-v1");
        storage.upsert_actor(&actor).await.expect("upsert actor");

        let found = storage.get_actor("APT28").await.expect("get actor");
        assert!(found.is_some());
        let found = found.unwrap();
        assert_eq!(found.content_hash, "hash-v1");
        assert!(found.aliases.contains("Alias One"));
        assert!(found.group_ids.contains("G0007"));

        assert_eq!(storage.count_actors().await.unwrap(), 1);
        assert!(storage.get_actor("UNKNOWN").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn actor_update_preserves_first_seen() {
        let storage = test_storage().await;

        let actor = make_actor("APT28", "hash-v1");
        storage.upsert_actor(&actor).await.unwrap();
        let original = storage.get_actor("APT28").await.unwrap().unwrap();

        let mut updated = make_actor("APT28", "hash-v2");
        updated.description = "Updated profile.".into();
        storage.upsert_actor(&updated).await.unwrap();

        let found = storage.get_actor("APT28").await.unwrap().unwrap();
        assert_eq!(found.content_hash, "hash-v2");
        assert_eq!(found.description, "Updated profile.");
        // first_seen survives the overwrite
        assert_eq!(found.first_seen, original.first_seen);
    }

    #[tokio::test]
    async fn list_actors_ordered() {
        let storage = test_storage().await;
        storage.upsert_actor(&make_actor("Lazarus Group", "h2")).await.unwrap();
        storage.upsert_actor(&make_actor("APT28", "h1")).await.unwrap();

        let actors = storage.list_actors().await.unwrap();
        assert_eq!(actors.len(), 2);
        assert_eq!(actors[0].name, "APT28");
        assert_eq!(actors[1].name, "Lazarus Group");
    }

    #[tokio::test]
    async fn direct_enrichment_roundtrip() {
        let storage = test_storage().await;
        storage.upsert_actor(&make_actor("APT28", "h1")).await.unwrap();

        let record = direct_record("APT28", "h1");
        storage.upsert_enrichment(&record).await.expect("upsert enrichment");

        let found = storage.get_enrichment("APT28").await.unwrap().unwrap();
        match &found.outcome {
            EnrichmentOutcome::Direct { techniques } => {
                assert_eq!(techniques.len(), 2);
                assert!(techniques.contains("T1566.001"));
            }
            other => panic!("expected Direct, got {other:?}"),
        }
        assert_eq!(found.source_hash, "h1");
    }

    #[tokio::test]
    async fn enrichment_upsert_fully_replaces() {
        let storage = test_storage().await;
        storage.upsert_actor(&make_actor("APT28", "h1")).await.unwrap();
        storage.upsert_enrichment(&direct_record("APT28", "h1")).await.unwrap();

        // Overwrite with an inferred record — nothing from the direct
        // record may survive.
        let inferred = EnrichmentRecord {
            actor: "APT28".into(),
            outcome: EnrichmentOutcome::Inferred {
                techniques: ["T1486".to_string()].into_iter().collect(),
                confidence: Confidence::Low,
                rationale: "Weak signal.".into(),
                provider: "openrouter.ai".into(),
                model: "test-model".into(),
            },
            source_hash: "h2".into(),
            enriched_at: Utc::now(),
        };
        storage.upsert_enrichment(&inferred).await.unwrap();

        let found = storage.get_enrichment("APT28").await.unwrap().unwrap();
        match &found.outcome {
            EnrichmentOutcome::Inferred {
                techniques,
                confidence,
                ..
            } => {
                assert_eq!(techniques.len(), 1);
                assert!(techniques.contains("T1486"));
                assert!(!techniques.contains("T1566.001"));
                assert_eq!(*confidence, Confidence::Low);
            }
            other => panic!("expected Inferred, got {other:?}"),
        }
        assert_eq!(found.source_hash, "h2");
        assert_eq!(storage.count_enrichments().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn no_techniques_roundtrip() {
        let storage = test_storage().await;
        storage.upsert_actor(&make_actor("GHOST", "h1")).await.unwrap();

        let record = EnrichmentRecord {
            actor: "GHOST".into(),
            outcome: EnrichmentOutcome::NoTechniques,
            source_hash: "h1".into(),
            enriched_at: Utc::now(),
        };
        storage.upsert_enrichment(&record).await.unwrap();

        let found = storage.get_enrichment("GHOST").await.unwrap().unwrap();
        assert_eq!(found.outcome, EnrichmentOutcome::NoTechniques);
    }

    #[tokio::test]
    async fn counts_grouped_by_source_and_confidence() {
        let storage = test_storage().await;

        for (name, hash) in [("A", "h1"), ("B", "h2"), ("C", "h3"), ("D", "h4")] {
            storage.upsert_actor(&make_actor(name, hash)).await.unwrap();
        }

        storage.upsert_enrichment(&direct_record("A", "h1")).await.unwrap();
        storage.upsert_enrichment(&direct_record("B", "h2")).await.unwrap();
        storage
            .upsert_enrichment(&EnrichmentRecord {
                actor: "C".into(),
                outcome: EnrichmentOutcome::Inferred {
                    techniques: ["T1486".to_string()].into_iter().collect(),
                    confidence: Confidence::High,
                    rationale: "Clear evidence.".into(),
                    provider: "openrouter.ai".into(),
                    model: "test-model".into(),
                },
                source_hash: "h3".into(),
                enriched_at: Utc::now(),
            })
            .await
            .unwrap();
        storage
            .upsert_enrichment(&EnrichmentRecord {
                actor: "D".into(),
                outcome: EnrichmentOutcome::NoTechniques,
                source_hash: "h4".into(),
                enriched_at: Utc::now(),
            })
            .await
            .unwrap();

        let by_source = storage.count_enrichments_by(CountBy::Source).await.unwrap();
        assert_eq!(by_source.get("direct"), Some(&2));
        assert_eq!(by_source.get("inferred"), Some(&1));
        assert_eq!(by_source.get("no_techniques"), Some(&1));

        let by_confidence = storage.count_enrichments_by(CountBy::Confidence).await.unwrap();
        assert_eq!(by_confidence.get("high"), Some(&1));
        assert_eq!(by_confidence.len(), 1);
    }

    #[tokio::test]
    async fn sync_run_lifecycle() {
        let storage = test_storage().await;

        let run_id = storage.insert_sync_run().await.expect("insert sync run");
        assert!(!run_id.is_empty());

        storage
            .finish_sync_run(&run_id, r#"{"new": 5, "updated": 2}"#)
            .await
            .expect("finish sync run");
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("al_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.upsert_actor(&make_actor("APT28", "h1")).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro.upsert_actor(&make_actor("FIN7", "h2")).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));

        // Reads still work.
        assert!(ro.get_actor("APT28").await.unwrap().is_some());
    }
}
