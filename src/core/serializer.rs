//! Process-wide build gate.
//!
//! The engine and its scratch configuration file are shared by every build,
//! so only one pipeline may run at a time. The gate is a single-permit
//! semaphore; the permit is released when the [`BuildPermit`] is dropped,
//! on success, error and unwind alike.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Single-slot mutual exclusion around the build pipeline
#[derive(Debug, Clone)]
pub struct BuildSerializer {
    semaphore: Arc<Semaphore>,
}

impl Default for BuildSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildSerializer {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait until no other pipeline is running and take the gate
    pub async fn acquire(&self) -> BuildPermit {
        let requested_at = Instant::now();
        // The semaphore is never closed, so acquisition cannot fail
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("build semaphore closed"),
        };

        let waited = requested_at.elapsed();
        debug!(waited_ms = waited.as_millis() as u64, "Build gate acquired");

        BuildPermit {
            _permit: permit,
            waited,
            acquired_at: Instant::now(),
        }
    }

    /// Whether a pipeline currently holds the gate
    pub fn is_busy(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

/// Scoped ownership of the build gate
#[derive(Debug)]
pub struct BuildPermit {
    _permit: OwnedSemaphorePermit,
    waited: Duration,
    acquired_at: Instant,
}

impl BuildPermit {
    /// How long the holder queued behind other builds
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// How long the gate has been held
    pub fn held(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for BuildPermit {
    fn drop(&mut self) {
        debug!(held_ms = self.held().as_millis() as u64, "Build gate released");
    }
}
