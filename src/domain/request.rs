//! Inbound build requests and their outcomes.
//!
//! A request is identified by the fingerprint of its raw configuration bytes;
//! identical bytes always map to the same cached image.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content fingerprint of a machine configuration (lowercase SHA-256 hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of raw configuration bytes
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }

    /// Canonical artifact file name: `<fingerprint>.<extension>`
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.0, extension)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A machine configuration submitted for building
///
/// Immutable once received.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    config: Vec<u8>,
    fingerprint: Fingerprint,
    received_at: DateTime<Utc>,
}

impl BuildRequest {
    /// Create a request from raw configuration bytes
    pub fn new(config: impl Into<Vec<u8>>) -> Self {
        let config = config.into();
        let fingerprint = Fingerprint::of(&config);
        Self {
            config,
            fingerprint,
            received_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &[u8] {
        &self.config
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Size of the configuration in bytes
    pub fn len(&self) -> usize {
        self.config.len()
    }

    pub fn is_empty(&self) -> bool {
        self.config.is_empty()
    }
}

/// Result of a successful submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The image already existed; no pipeline ran
    CacheHit { fingerprint: Fingerprint, path: PathBuf },

    /// The pipeline ran and published a new image
    Built { fingerprint: Fingerprint, path: PathBuf },
}

impl BuildOutcome {
    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            Self::CacheHit { fingerprint, .. } | Self::Built { fingerprint, .. } => fingerprint,
        }
    }

    /// Path of the canonical artifact
    pub fn path(&self) -> &Path {
        match self {
            Self::CacheHit { path, .. } | Self::Built { path, .. } => path,
        }
    }

    /// File name reported to clients
    pub fn file_name(&self) -> String {
        self.path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn is_cache_hit(&self) -> bool {
        matches!(self, Self::CacheHit { .. })
    }
}
