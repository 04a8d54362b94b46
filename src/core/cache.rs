//! Content-addressed image cache.
//!
//! Layout: `<dir>/<fingerprint>.qcow2`. Entries are only ever created by an
//! atomic rename from a staging file in the same directory, so a reader that
//! sees the canonical name always sees a complete file.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::domain::Fingerprint;

/// Extension of published images
pub const ARTIFACT_EXTENSION: &str = "qcow2";

/// Mode of published images: readable by file servers running as other users
#[cfg(unix)]
pub const ARTIFACT_MODE: u32 = 0o644;

/// Errors from staging or publishing an artifact
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Artifact not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Failed to stage {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to publish {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cache task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Compute the fingerprint of raw configuration bytes (SHA-256, lowercase hex)
pub fn compute_fingerprint(bytes: &[u8]) -> Fingerprint {
    Fingerprint::of(bytes)
}

/// An artifact copied into the cache directory but not yet visible
///
/// Dropping it without publishing removes the staging file.
#[derive(Debug)]
pub struct StagedArtifact {
    file: NamedTempFile,
    size_bytes: u64,
}

impl StagedArtifact {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// Existence-based, write-once image cache
#[derive(Debug, Clone)]
pub struct FingerprintCache {
    dir: PathBuf,
    extension: String,
}

impl FingerprintCache {
    /// Open the cache rooted at `dir`, creating it if needed
    pub async fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            extension: ARTIFACT_EXTENSION.to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Canonical location of the artifact for `fingerprint`
    pub fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(fingerprint.file_name(&self.extension))
    }

    /// Return the canonical artifact if it exists
    ///
    /// Filesystem errors count as a miss so the caller falls through to a
    /// rebuild.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Option<PathBuf> {
        let path = self.entry_path(fingerprint);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            Ok(_) => {
                debug!(path = %path.display(), "Cache entry is not a regular file");
                None
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Copy `source` into a hidden staging file inside the cache directory
    pub async fn stage(&self, source: &Path) -> Result<StagedArtifact, CacheError> {
        let dir = self.dir.clone();
        let source = source.to_path_buf();

        tokio::task::spawn_blocking(move || stage_blocking(&dir, &source)).await?
    }

    /// Atomically move a staged artifact onto its canonical name
    pub async fn publish(
        &self,
        fingerprint: &Fingerprint,
        staged: StagedArtifact,
    ) -> Result<PathBuf, CacheError> {
        let path = self.entry_path(fingerprint);
        let target = path.clone();

        tokio::task::spawn_blocking(move || {
            staged
                .file
                .persist(&target)
                .map(|_| ())
                .map_err(|e| CacheError::Publish {
                    path: target.clone(),
                    source: e.error,
                })
        })
        .await??;

        debug!(path = %path.display(), "Published cache entry");
        Ok(path)
    }
}

fn stage_blocking(dir: &Path, source: &Path) -> Result<StagedArtifact, CacheError> {
    let mut input = match File::open(source) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CacheError::SourceMissing(source.to_path_buf()))
        }
        Err(e) => {
            return Err(CacheError::Stage {
                path: source.to_path_buf(),
                source: e,
            })
        }
    };

    let stage_err = |source: io::Error| CacheError::Stage {
        path: dir.to_path_buf(),
        source,
    };

    let mut file = Builder::new()
        .prefix(".")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(stage_err)?;

    let size_bytes = io::copy(&mut input, file.as_file_mut()).map_err(stage_err)?;

    // Staging files are created 0600; the mode survives the rename
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(ARTIFACT_MODE))
            .map_err(stage_err)?;
    }

    file.as_file().sync_all().map_err(stage_err)?;

    Ok(StagedArtifact { file, size_bytes })
}
