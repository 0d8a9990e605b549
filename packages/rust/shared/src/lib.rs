//! Shared types, error model, and configuration for actorlens.
//!
//! This crate is the foundation depended on by all other actorlens crates.
//! It provides:
//! - [`ActorLensError`] — the unified error type
//! - Domain types ([`ActorRecord`], [`EnrichmentRecord`], [`EnrichmentOutcome`])
//! - Configuration ([`AppConfig`], [`SourceConfig`], [`InferenceConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, InferenceConfig, ReasoningSection, SourceConfig, SourceSection,
    config_dir, config_file_path, expand_home, init_config, load_config, load_config_from,
    validate_api_key,
};
pub use error::{ActorLensError, Result};
pub use types::{
    ActorRecord, ActorReference, Confidence, EnrichmentOutcome, EnrichmentRecord,
    canonicalize_name,
};
