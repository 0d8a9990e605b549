//! SQL migration definitions for the actorlens database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: actors, enrichments, sync_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Raw actor catalog, keyed by canonical name
CREATE TABLE IF NOT EXISTS actors (
    name            TEXT PRIMARY KEY,
    aliases_json    TEXT NOT NULL,
    description     TEXT NOT NULL,
    malware_json    TEXT NOT NULL,
    references_json TEXT NOT NULL,
    group_ids_json  TEXT NOT NULL,
    content_hash    TEXT NOT NULL,
    first_seen      TEXT NOT NULL,
    last_updated    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_actors_content_hash ON actors(content_hash);

-- Enrichment store, decoupled from the raw catalog; one row per actor
CREATE TABLE IF NOT EXISTS enrichments (
    actor_name      TEXT PRIMARY KEY REFERENCES actors(name) ON DELETE CASCADE,
    source          TEXT NOT NULL,
    techniques_json TEXT,
    confidence      TEXT,
    rationale       TEXT,
    provider        TEXT,
    model           TEXT,
    source_hash     TEXT NOT NULL,
    enriched_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_enrichments_source ON enrichments(source);

-- Sync run history
CREATE TABLE IF NOT EXISTS sync_runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
