//! Core build orchestration.
//!
//! This module contains:
//! - FingerprintCache: content-addressed, write-once image cache
//! - BuildSerializer: process-wide single-flight gate
//! - StoreSync: import/export against external stores
//! - BuildJournal: append-only build history
//! - Orchestrator: the staged build pipeline

pub mod cache;
pub mod error;
pub mod journal;
pub mod orchestrator;
pub mod serializer;
pub mod sync;

// Re-export commonly used types
pub use cache::{
    compute_fingerprint, CacheError, FingerprintCache, StagedArtifact, ARTIFACT_EXTENSION,
};
pub use error::BuildError;
pub use journal::BuildJournal;
pub use orchestrator::Orchestrator;
pub use serializer::{BuildPermit, BuildSerializer};
pub use sync::StoreSync;
