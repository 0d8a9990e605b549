//! Core pipeline orchestration and domain logic for actorlens.
//!
//! This crate ties together catalog fetching, change detection, direct
//! taxonomy mapping, and the inference fallback into the end-to-end sync
//! workflow ([`pipeline::run_sync`]).

pub mod detector;
pub mod mapper;
pub mod pipeline;
pub mod state;

pub use detector::{ChangeKind, classify};
pub use mapper::direct_match;
pub use pipeline::{SilentProgress, SyncOptions, SyncProgress, SyncReport, run_sync};
pub use state::{ActorEvent, ActorState};
