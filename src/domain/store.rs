//! Store identifiers shared by the engine and the sync adapter.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Opaque identifier of an artifact inside the build engine's store
/// (e.g. `/nix/store/<hash>-nixos-system`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorePath(String);

impl StorePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem view of the store path
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A directory-backed external artifact store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreLocation(PathBuf);

impl StoreLocation {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self(dir.into())
    }

    pub fn dir(&self) -> &Path {
        &self.0
    }

    /// Store URL understood by the engine (`file://<dir>`)
    pub fn url(&self) -> String {
        format!("file://{}", self.0.display())
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Direction of a store-to-store copy, relative to the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyDirection {
    /// External location into the local store
    From,

    /// Local store out to the external location
    To,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_location_url() {
        let location = StoreLocation::new("/mnt/cache");
        assert_eq!(location.url(), "file:///mnt/cache");
        assert_eq!(location.to_string(), "/mnt/cache");
    }

    #[test]
    fn test_store_path_views() {
        let path = StorePath::new("/nix/store/abc-image");
        assert_eq!(path.as_path(), Path::new("/nix/store/abc-image"));
        assert_eq!(path.to_string(), "/nix/store/abc-image");
    }
}
