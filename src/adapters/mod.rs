//! Adapter interfaces for the external build engine.
//!
//! The pipeline only talks to the engine through [`BuildEngine`], so tests
//! can substitute a fake without spawning processes.

pub mod nix;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{CopyDirection, StoreLocation, StorePath};

// Re-export the Nix adapter
pub use nix::NixEngine;

/// The external build engine: four synchronous verbs plus a health check
///
/// Targets are engine-specific attribute names (flake outputs for Nix).
#[async_trait]
pub trait BuildEngine: Send + Sync {
    /// Human-readable engine name
    fn name(&self) -> &str;

    /// Build a target and return its output path
    async fn realize(&self, target: &str) -> Result<StorePath>;

    /// Evaluate a target to its output path without building
    async fn resolve(&self, target: &str) -> Result<StorePath>;

    /// Transitive runtime closure of a path, in the engine's order
    async fn closure(&self, path: &StorePath) -> Result<Vec<StorePath>>;

    /// Copy paths between the local store and an external location
    ///
    /// For [`CopyDirection::From`] an empty `paths` slice means everything
    /// present at the location.
    async fn copy(
        &self,
        paths: &[StorePath],
        direction: CopyDirection,
        location: &StoreLocation,
    ) -> Result<()>;

    /// Check that the engine is installed and callable
    async fn health_check(&self) -> Result<()>;
}
