//! Append-only build journal with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) so the history can be
//! inspected with standard tools.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{BuildEvent, BuildSummary};

/// Directory (inside the output directory) holding nixbake state
pub const STATE_DIR: &str = ".nixbake";

/// Journal file name
pub const JOURNAL_FILE: &str = "builds.jsonl";

/// File-based build journal using JSONL format
#[derive(Debug, Clone)]
pub struct BuildJournal {
    /// Path to the builds.jsonl file
    path: PathBuf,
}

impl BuildJournal {
    /// Open the journal stored under `output_dir`
    pub async fn open(output_dir: &Path) -> Result<Self> {
        Self::at(output_dir.join(STATE_DIR).join(JOURNAL_FILE)).await
    }

    /// Open the journal under `output_dir` only if it has been written
    ///
    /// Never creates anything, for read-only callers.
    pub fn existing(output_dir: &Path) -> Option<Self> {
        let path = output_dir.join(STATE_DIR).join(JOURNAL_FILE);
        path.is_file().then_some(Self { path })
    }

    /// Open a journal at an explicit file path
    pub async fn at(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create journal directory: {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event to the log
    pub async fn append(&self, event: &BuildEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize build event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write build event")?;
        file.flush().await.context("Failed to flush build event")?;

        Ok(())
    }

    /// Append an event, logging instead of failing
    ///
    /// The journal never decides the outcome of a build.
    pub async fn record(&self, event: BuildEvent) {
        if let Err(e) = self.append(&event).await {
            warn!(error = %e, event_type = ?event.event_type, "Failed to record build event");
        }
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<BuildEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: BuildEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse build event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Most recent builds first, at most `limit`
    pub async fn summaries(&self, limit: usize) -> Result<Vec<BuildSummary>> {
        let events = self.replay().await?;

        let mut order: Vec<Uuid> = Vec::new();
        let mut grouped: HashMap<Uuid, Vec<BuildEvent>> = HashMap::new();
        for event in events {
            if !grouped.contains_key(&event.build_id) {
                order.push(event.build_id);
            }
            grouped.entry(event.build_id).or_default().push(event);
        }

        // Ties keep journal order, newest first
        let mut summaries: Vec<BuildSummary> = order
            .iter()
            .rev()
            .filter_map(|id| grouped.get(id))
            .filter_map(|events| BuildSummary::from_events(events))
            .collect();

        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries.truncate(limit);

        Ok(summaries)
    }
}
