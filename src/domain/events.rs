//! Event types for the build journal.
//!
//! Every submission and pipeline stage is recorded as an immutable event in
//! an append-only log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::Fingerprint;
use super::stage::PipelineStage;

/// A single event in the append-only build journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The submission this event belongs to
    pub build_id: Uuid,

    /// Fingerprint of the submitted configuration
    pub fingerprint: Fingerprint,

    /// Type of event
    pub event_type: BuildEventType,

    /// Stage the event refers to (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<PipelineStage>,

    /// Time taken in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildEvent {
    /// Create a new event with the current timestamp
    pub fn new(build_id: Uuid, fingerprint: Fingerprint, event_type: BuildEventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            build_id,
            fingerprint,
            event_type,
            stage: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_stage(mut self, stage: PipelineStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Types of events recorded in the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildEventType {
    /// The image was already cached; no pipeline ran
    CacheHit,

    /// The build gate was acquired and the pipeline started
    BuildStarted,

    /// A stage finished successfully
    StageCompleted,

    /// An optional stage was not configured
    StageSkipped,

    /// Importing from the source store failed (non-fatal)
    ImportFailed,

    /// The image was published
    BuildCompleted,

    /// The pipeline aborted
    BuildFailed,
}
