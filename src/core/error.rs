//! Fatal pipeline errors.
//!
//! Every variant aborts the pipeline and leaves no cache entry. Import
//! failures are not represented here: they are logged and the pipeline
//! continues.

use thiserror::Error;

use super::cache::CacheError;
use crate::domain::{PipelineStage, TransitionError};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Failed to write scratch config: {0}")]
    PersistConfig(#[source] std::io::Error),

    #[error("Evaluation failed: {0:#}")]
    Evaluate(anyhow::Error),

    #[error("Failed to query runtime closure: {0:#}")]
    Closure(anyhow::Error),

    #[error("Failed to build emulation packages: {0:#}")]
    EmulationPackages(anyhow::Error),

    #[error("Failed to export closure: {0:#}")]
    Export(anyhow::Error),

    #[error("Image build failed: {0:#}")]
    Build(anyhow::Error),

    #[error("Failed to extract image: {0}")]
    Extract(#[source] CacheError),

    #[error("Failed to publish image: {0}")]
    Publish(#[source] CacheError),

    #[error(transparent)]
    State(#[from] TransitionError),

    #[error("Build task aborted: {0}")]
    Aborted(String),
}

impl BuildError {
    /// Short reason safe to return to clients
    pub fn reason(&self) -> &'static str {
        match self {
            Self::PersistConfig(_) | Self::State(_) | Self::Aborted(_) => "Server error",
            Self::Evaluate(_) => "Evaluation failed",
            Self::Closure(_) => "Path-info failed",
            Self::EmulationPackages(_) => "Build emulationPackages failed",
            Self::Export(_) => "Copy to store failed",
            Self::Build(_) => "Build failed",
            Self::Extract(_) | Self::Publish(_) => "Failed to copy output",
        }
    }

    /// Stage that was being attempted when the pipeline aborted
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::PersistConfig(_) => Some(PipelineStage::ConfigPersisted),
            Self::Evaluate(_) => Some(PipelineStage::Evaluated),
            Self::Closure(_) => Some(PipelineStage::ClosureResolved),
            Self::EmulationPackages(_) | Self::Export(_) => Some(PipelineStage::Exported),
            Self::Build(_) => Some(PipelineStage::Built),
            Self::Extract(_) => Some(PipelineStage::Extracted),
            Self::Publish(_) => Some(PipelineStage::Published),
            Self::State(_) | Self::Aborted(_) => None,
        }
    }
}
