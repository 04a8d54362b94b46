//! Pipeline progression for a single in-flight build.
//!
//! A build moves forward through a fixed sequence of stages. Import and
//! Export are optional and may be skipped; every other stage is mandatory.
//! Once failed, a pipeline cannot advance again.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::request::Fingerprint;

/// Stages of the build pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    ConfigPersisted,
    Imported,
    Evaluated,
    ClosureResolved,
    Exported,
    Built,
    Extracted,
    Published,
    Done,
}

impl PipelineStage {
    /// All stages in execution order
    pub const ALL: [PipelineStage; 10] = [
        Self::Received,
        Self::ConfigPersisted,
        Self::Imported,
        Self::Evaluated,
        Self::ClosureResolved,
        Self::Exported,
        Self::Built,
        Self::Extracted,
        Self::Published,
        Self::Done,
    ];

    /// Stages that only run when a sync store is configured
    pub fn is_optional(self) -> bool {
        matches!(self, Self::Imported | Self::Exported)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::ConfigPersisted => "config_persisted",
            Self::Imported => "imported",
            Self::Evaluated => "evaluated",
            Self::ClosureResolved => "closure_resolved",
            Self::Exported => "exported",
            Self::Built => "built",
            Self::Extracted => "extracted",
            Self::Published => "published",
            Self::Done => "done",
        }
    }

    /// Whether `next` may directly follow `self`
    ///
    /// Moving forward is allowed as long as every skipped stage is optional.
    pub fn can_advance_to(self, next: PipelineStage) -> bool {
        if next <= self {
            return false;
        }
        Self::ALL
            .iter()
            .filter(|stage| **stage > self && **stage < next)
            .all(|stage| stage.is_optional())
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Errors from illegal pipeline transitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Invalid pipeline transition: {from} → {to}")]
    Invalid {
        from: PipelineStage,
        to: PipelineStage,
    },

    #[error("Pipeline already failed after stage {stage}")]
    AlreadyFailed { stage: PipelineStage },
}

/// Ephemeral state of one pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineState {
    fingerprint: Fingerprint,
    current: PipelineStage,
    failure: Option<String>,
    started_at: Instant,
    stage_started_at: Instant,
}

impl PipelineState {
    /// Start tracking a freshly received request
    pub fn new(fingerprint: Fingerprint) -> Self {
        let now = Instant::now();
        Self {
            fingerprint,
            current: PipelineStage::Received,
            failure: None,
            started_at: now,
            stage_started_at: now,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Last stage reached
    pub fn current(&self) -> PipelineStage {
        self.current
    }

    /// Failure reason, if the pipeline aborted
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.current == PipelineStage::Done
    }

    /// Time since the request was received
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Move to `next`, returning the time spent since the previous stage
    pub fn advance(&mut self, next: PipelineStage) -> Result<Duration, TransitionError> {
        if self.failure.is_some() {
            return Err(TransitionError::AlreadyFailed {
                stage: self.current,
            });
        }
        if !self.current.can_advance_to(next) {
            return Err(TransitionError::Invalid {
                from: self.current,
                to: next,
            });
        }

        let spent = self.stage_started_at.elapsed();
        self.current = next;
        self.stage_started_at = Instant::now();
        Ok(spent)
    }

    /// Abort the pipeline after the current stage
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(reason.into());
        }
    }
}
