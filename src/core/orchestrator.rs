//! Main orchestrator for image builds.
//!
//! Checks the fingerprint cache, serializes pipeline runs, and sequences the
//! build stages:
//!
//! 1. persist the configuration to the scratch file
//! 2. import from the source store (optional, best effort)
//! 3. evaluate the system toplevel
//! 4. resolve its runtime closure
//! 5. export the closure plus emulation packages (optional)
//! 6. build the disk image
//! 7. extract the image file into a staging file
//! 8. publish it under the fingerprint name

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument, warn, Instrument, Span};
use uuid::Uuid;

use crate::adapters::{BuildEngine, NixEngine};
use crate::config::ServerConfig;
use crate::domain::{
    BuildEvent, BuildEventType, BuildOutcome, BuildRequest, PipelineStage, PipelineState,
    StorePath,
};

use super::cache::FingerprintCache;
use super::error::BuildError;
use super::journal::BuildJournal;
use super::serializer::BuildSerializer;
use super::sync::StoreSync;

/// Main build orchestrator
pub struct Orchestrator {
    config: Arc<ServerConfig>,
    engine: Arc<dyn BuildEngine>,
    cache: FingerprintCache,
    serializer: BuildSerializer,
    sync: StoreSync,
    journal: Option<BuildJournal>,
}

impl Orchestrator {
    /// Create an orchestrator backed by the `nix` CLI
    pub async fn from_config(config: Arc<ServerConfig>) -> Result<Self> {
        let engine = NixEngine::new(config.flake.clone()).with_impure(config.impure);
        Self::new(config, Arc::new(engine)).await
    }

    /// Create an orchestrator with an explicit engine
    ///
    /// Creates the output directory (and journal) if needed.
    pub async fn new(config: Arc<ServerConfig>, engine: Arc<dyn BuildEngine>) -> Result<Self> {
        let cache = FingerprintCache::open(&config.output_dir)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create output directory {}: {}",
                    config.output_dir.display(),
                    e
                )
            })?;

        let journal = if config.journal_enabled {
            Some(BuildJournal::open(&config.output_dir).await?)
        } else {
            None
        };

        Ok(Self {
            sync: StoreSync::new(engine.clone()),
            config,
            engine,
            cache,
            serializer: BuildSerializer::new(),
            journal,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn engine(&self) -> &dyn BuildEngine {
        self.engine.as_ref()
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    pub fn serializer(&self) -> &BuildSerializer {
        &self.serializer
    }

    pub fn journal(&self) -> Option<&BuildJournal> {
        self.journal.as_ref()
    }

    /// Serve a request from the cache, or build it
    ///
    /// A cache hit never waits on the build gate. On a miss the pipeline
    /// runs on its own task, so dropping the returned future does not
    /// abandon a build half way; the task finishes and releases the gate.
    #[instrument(skip(self, request), fields(fingerprint = %request.fingerprint().short()))]
    pub async fn submit(self: &Arc<Self>, request: BuildRequest) -> Result<BuildOutcome, BuildError> {
        let started = Instant::now();
        let fingerprint = request.fingerprint().clone();

        if let Some(path) = self.cache.lookup(&fingerprint).await {
            self.record(BuildEvent::new(
                Uuid::new_v4(),
                fingerprint.clone(),
                BuildEventType::CacheHit,
            ))
            .await;
            info!(
                "Done after {:.2} seconds (cache hit)",
                started.elapsed().as_secs_f64()
            );
            return Ok(BuildOutcome::CacheHit { fingerprint, path });
        }

        let this = Arc::clone(self);
        let task = tokio::spawn(
            async move { this.run_pipeline(request).await }.instrument(Span::current()),
        );

        let result = task
            .await
            .map_err(|e| BuildError::Aborted(e.to_string()))?;

        if result.is_ok() {
            info!(
                "Done after {:.2} seconds (build success)",
                started.elapsed().as_secs_f64()
            );
        }
        result
    }

    /// Run every stage under the build gate
    async fn run_pipeline(&self, request: BuildRequest) -> Result<BuildOutcome, BuildError> {
        let permit = self.serializer.acquire().await;
        let build_id = Uuid::new_v4();
        let fingerprint = request.fingerprint().clone();
        let queued_ms = (Utc::now() - request.received_at()).num_milliseconds().max(0);

        info!(
            %build_id,
            queued_ms,
            waited_ms = permit.waited().as_millis() as u64,
            "Starting build"
        );
        self.record(BuildEvent::new(
            build_id,
            fingerprint.clone(),
            BuildEventType::BuildStarted,
        ))
        .await;

        let mut state = PipelineState::new(fingerprint.clone());

        match self.run_stages(build_id, &request, &mut state).await {
            Ok(path) => {
                info!(
                    %build_id,
                    duration_ms = state.elapsed().as_millis() as u64,
                    "Build completed"
                );
                self.record(
                    BuildEvent::new(build_id, fingerprint.clone(), BuildEventType::BuildCompleted)
                        .with_duration(state.elapsed().as_millis() as u64),
                )
                .await;
                Ok(BuildOutcome::Built { fingerprint, path })
            }
            Err(e) => {
                state.fail(e.reason());
                error!(%build_id, after = %state.current(), error = %e, "Build failed");

                let mut event = BuildEvent::new(build_id, fingerprint, BuildEventType::BuildFailed)
                    .with_duration(state.elapsed().as_millis() as u64)
                    .with_error(e.to_string());
                if let Some(stage) = e.stage() {
                    event = event.with_stage(stage);
                }
                self.record(event).await;
                Err(e)
            }
        }
        // permit dropped here, releasing the gate
    }

    async fn run_stages(
        &self,
        build_id: Uuid,
        request: &BuildRequest,
        state: &mut PipelineState,
    ) -> Result<PathBuf, BuildError> {
        let targets = &self.config.targets;

        // 1. Persist config
        self.persist_config(request.config())
            .await
            .map_err(BuildError::PersistConfig)?;
        self.complete(build_id, state, PipelineStage::ConfigPersisted)
            .await?;

        // 2. Import (best effort)
        match &self.config.sync_from {
            Some(source) => match self.sync.import_all(source).await {
                Ok(()) => {
                    self.complete(build_id, state, PipelineStage::Imported)
                        .await?
                }
                Err(e) => {
                    let reason = format!("{:#}", e);
                    warn!(error = %reason, "Failed to sync from store, continuing");
                    self.record(
                        BuildEvent::new(
                            build_id,
                            state.fingerprint().clone(),
                            BuildEventType::ImportFailed,
                        )
                        .with_stage(PipelineStage::Imported)
                        .with_error(reason),
                    )
                    .await;
                }
            },
            None => self.skip(build_id, state, PipelineStage::Imported).await,
        }

        // 3. Evaluate
        info!(attr = %targets.toplevel, "Evaluating system toplevel");
        let toplevel = self.evaluate().await.map_err(BuildError::Evaluate)?;
        self.complete(build_id, state, PipelineStage::Evaluated).await?;

        // 4. Resolve closure
        let mut closure = self
            .engine
            .closure(&toplevel)
            .await
            .map_err(BuildError::Closure)?;
        debug!(paths = closure.len(), "Resolved runtime closure");
        self.complete(build_id, state, PipelineStage::ClosureResolved)
            .await?;

        // 5. Export (optional, fatal)
        match &self.config.sync_to {
            Some(destination) => {
                let emulation = self
                    .engine
                    .realize(&targets.emulation)
                    .await
                    .map_err(BuildError::EmulationPackages)?;
                closure.push(emulation);

                self.sync
                    .export_paths(&closure, destination)
                    .await
                    .map_err(BuildError::Export)?;
                self.complete(build_id, state, PipelineStage::Exported)
                    .await?;
            }
            None => self.skip(build_id, state, PipelineStage::Exported).await,
        }

        // 6. Build
        info!(attr = %targets.image, fingerprint = %state.fingerprint(), "Building image");
        let image_output = self
            .engine
            .realize(&targets.image)
            .await
            .map_err(BuildError::Build)?;
        self.complete(build_id, state, PipelineStage::Built).await?;

        // 7. Extract
        let source = image_output.as_path().join(&targets.image_file);
        let staged = self
            .cache
            .stage(&source)
            .await
            .map_err(BuildError::Extract)?;
        debug!(size_bytes = staged.size_bytes(), source = %source.display(), "Staged image");
        self.complete(build_id, state, PipelineStage::Extracted)
            .await?;

        // 8. Publish
        let path = self
            .cache
            .publish(state.fingerprint(), staged)
            .await
            .map_err(BuildError::Publish)?;
        self.complete(build_id, state, PipelineStage::Published)
            .await?;

        state.advance(PipelineStage::Done)?;
        Ok(path)
    }

    /// Overwrite the scratch file with the request bytes
    async fn persist_config(&self, config: &[u8]) -> std::io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&self.config.scratch_config).await?;
        file.write_all(config).await?;
        file.flush().await
    }

    /// Realize the toplevel, then resolve it to its output path
    async fn evaluate(&self) -> Result<StorePath> {
        let target = &self.config.targets.toplevel;
        let realized = self.engine.realize(target).await?;
        let resolved = self.engine.resolve(target).await?;

        if realized != resolved {
            debug!(%realized, %resolved, "Realized and evaluated toplevel paths differ");
        }
        Ok(resolved)
    }

    async fn complete(
        &self,
        build_id: Uuid,
        state: &mut PipelineState,
        stage: PipelineStage,
    ) -> Result<(), BuildError> {
        let spent = state.advance(stage)?;
        debug!(%stage, duration_ms = spent.as_millis() as u64, "Stage completed");

        self.record(
            BuildEvent::new(
                build_id,
                state.fingerprint().clone(),
                BuildEventType::StageCompleted,
            )
            .with_stage(stage)
            .with_duration(spent.as_millis() as u64),
        )
        .await;
        Ok(())
    }

    async fn skip(&self, build_id: Uuid, state: &PipelineState, stage: PipelineStage) {
        debug!(%stage, "Stage not configured, skipping");
        self.record(
            BuildEvent::new(
                build_id,
                state.fingerprint().clone(),
                BuildEventType::StageSkipped,
            )
            .with_stage(stage),
        )
        .await;
    }

    async fn record(&self, event: BuildEvent) {
        if let Some(journal) = &self.journal {
            journal.record(event).await;
        }
    }
}
