//! Store synchronization with external, directory-backed stores.
//!
//! Transfers are whole-batch with no progress tracking. Re-running after a
//! partial failure is safe because the store deduplicates by content.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::adapters::BuildEngine;
use crate::domain::{CopyDirection, StoreLocation, StorePath};

/// Imports and exports artifact sets through the build engine
#[derive(Clone)]
pub struct StoreSync {
    engine: Arc<dyn BuildEngine>,
}

impl StoreSync {
    pub fn new(engine: Arc<dyn BuildEngine>) -> Self {
        Self { engine }
    }

    /// Pull everything present at `source` into the local store
    ///
    /// Signatures are not checked: the source is one of our own stores.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn import_all(&self, source: &StoreLocation) -> Result<()> {
        let started = Instant::now();
        info!("Syncing from store");

        self.engine
            .copy(&[], CopyDirection::From, source)
            .await
            .with_context(|| format!("Failed to sync from store {}", source))?;

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            "Imported store"
        );
        Ok(())
    }

    /// Push `paths` (already closed under dependencies) to `destination`
    #[instrument(skip(self, paths), fields(destination = %destination, paths = paths.len()))]
    pub async fn export_paths(
        &self,
        paths: &[StorePath],
        destination: &StoreLocation,
    ) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        info!("Syncing runtime paths to store");

        self.engine
            .copy(paths, CopyDirection::To, destination)
            .await
            .with_context(|| format!("Failed to sync to store {}", destination))?;

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            "Exported paths"
        );
        Ok(())
    }
}
