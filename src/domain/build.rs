//! Build history reconstructed from journal events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{BuildEvent, BuildEventType};
use super::request::Fingerprint;
use super::stage::PipelineStage;

/// Summary of one submission, derived by replaying its events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSummary {
    pub build_id: Uuid,
    pub fingerprint: Fingerprint,
    pub status: BuildStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Last stage that completed
    pub last_stage: PipelineStage,

    /// Whether the best-effort import failed along the way
    pub import_failed: bool,
}

impl BuildSummary {
    /// Reconstruct a summary from events of a single build
    pub fn from_events(events: &[BuildEvent]) -> Option<Self> {
        let first = events.first()?;

        let mut summary = Self {
            build_id: first.build_id,
            fingerprint: first.fingerprint.clone(),
            status: BuildStatus::Running,
            started_at: first.timestamp,
            completed_at: None,
            last_stage: PipelineStage::Received,
            import_failed: false,
        };

        let build_id = summary.build_id;
        for event in events.iter().filter(|e| e.build_id == build_id) {
            summary.apply_event(event);
        }

        Some(summary)
    }

    /// Apply a single event to update the summary
    pub fn apply_event(&mut self, event: &BuildEvent) {
        match event.event_type {
            BuildEventType::CacheHit => {
                self.status = BuildStatus::CacheHit;
                self.completed_at = Some(event.timestamp);
            }
            BuildEventType::BuildStarted => {
                self.status = BuildStatus::Running;
                self.started_at = event.timestamp;
            }
            BuildEventType::StageCompleted => {
                if let Some(stage) = event.stage {
                    self.last_stage = self.last_stage.max(stage);
                }
            }
            BuildEventType::StageSkipped => {}
            BuildEventType::ImportFailed => {
                self.import_failed = true;
            }
            BuildEventType::BuildCompleted => {
                self.status = BuildStatus::Completed;
                self.last_stage = PipelineStage::Done;
                self.completed_at = Some(event.timestamp);
            }
            BuildEventType::BuildFailed => {
                self.status = BuildStatus::Failed {
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, BuildStatus::Running)
    }

    /// Wall time between start and completion
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

/// Final (or current) status of a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BuildStatus {
    Running,
    CacheHit,
    Completed,
    Failed { error: String },
}
