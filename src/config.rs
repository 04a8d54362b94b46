//! Server configuration.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags and environment variables (NIXBAKE_*)
//! 2. Config file (`--config <file>` or a discovered .nixbake/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches the current directory and parents for .nixbake/config.yaml
//! - Relative paths in the file are resolved against the project root (the
//!   directory containing .nixbake/), or the file's own directory otherwise
//!
//! The result is one immutable [`ServerConfig`], built once at startup and
//! passed explicitly to everything that needs it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::StoreLocation;

/// Default listen address
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

/// Default scratch file the flake reads the machine configuration from
pub const DEFAULT_SCRATCH: &str = "/tmp/machine-config.nix";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub nix: NixConfig,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Image output directory (relative to the project root)
    pub output: Option<String>,
    /// Scratch configuration file
    pub scratch: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NixConfig {
    pub flake: Option<String>,
    pub impure: Option<bool>,
    #[serde(default)]
    pub targets: TargetsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetsConfig {
    pub toplevel: Option<String>,
    pub emulation: Option<String>,
    pub image: Option<String>,
    pub image_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSection {
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JournalConfig {
    pub enabled: Option<bool>,
}

/// Values supplied on the command line (or through NIXBAKE_* variables)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub sync_from: Option<PathBuf>,
    pub sync_to: Option<PathBuf>,
    pub listen: Option<SocketAddr>,
    pub flake: Option<String>,
    pub scratch: Option<PathBuf>,
}

/// Engine targets the pipeline builds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildTargets {
    /// The system top-level derivation
    pub toplevel: String,
    /// Emulation support packages exported alongside the system closure
    pub emulation: String,
    /// The disk image derivation
    pub image: String,
    /// Image file inside the disk image output
    pub image_file: String,
}

impl Default for BuildTargets {
    fn default() -> Self {
        Self {
            toplevel: "nixosConfigurations.default.config.system.build.toplevel".to_string(),
            emulation: "emulationPackages".to_string(),
            image: "vmImage".to_string(),
            image_file: "nixos.qcow2".to_string(),
        }
    }
}

/// Resolved, immutable server configuration
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    /// Image cache directory
    pub output_dir: PathBuf,
    /// Scratch file overwritten with each configuration
    pub scratch_config: PathBuf,
    /// Import source (enables the import stage)
    pub sync_from: Option<StoreLocation>,
    /// Export destination (enables the export stage)
    pub sync_to: Option<StoreLocation>,
    pub listen: SocketAddr,
    /// Flake reference targets are resolved against
    pub flake: String,
    pub impure: bool,
    pub targets: BuildTargets,
    pub journal_enabled: bool,
    /// Path to config file (if one was used)
    pub config_file: Option<PathBuf>,
}

impl ServerConfig {
    /// Minimal configuration writing images to `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            scratch_config: PathBuf::from(DEFAULT_SCRATCH),
            sync_from: None,
            sync_to: None,
            listen: default_listen(),
            flake: ".".to_string(),
            impure: true,
            targets: BuildTargets::default(),
            journal_enabled: true,
            config_file: None,
        }
    }

    pub fn with_scratch_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch_config = path.into();
        self
    }

    pub fn with_sync_from(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sync_from = Some(StoreLocation::new(dir));
        self
    }

    pub fn with_sync_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sync_to = Some(StoreLocation::new(dir));
        self
    }

    pub fn with_journal(mut self, enabled: bool) -> Self {
        self.journal_enabled = enabled;
        self
    }

    /// Load configuration from all sources
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        let config_path = match overrides.config_file.clone() {
            Some(path) => Some(path),
            None => find_config_file(),
        };

        let file = match config_path {
            Some(ref path) => Some((path.clone(), load_config_file(path)?)),
            None => None,
        };

        Self::resolve(overrides, file)
    }

    /// Merge overrides over an (optional) parsed config file
    pub fn resolve(overrides: ConfigOverrides, file: Option<(PathBuf, ConfigFile)>) -> Result<Self> {
        let (config_file, raw) = match file {
            Some((path, raw)) => (Some(path), raw),
            None => (None, ConfigFile::default()),
        };
        let base = config_file
            .as_deref()
            .map(base_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        let output_dir = overrides
            .output
            .or_else(|| raw.paths.output.as_deref().map(|p| resolve_path(&base, p)))
            .context("Missing required --output argument")?;

        let scratch_config = overrides
            .scratch
            .or_else(|| raw.paths.scratch.as_deref().map(|p| resolve_path(&base, p)))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRATCH));

        let sync_from = overrides
            .sync_from
            .or_else(|| raw.sync.from.as_deref().map(|p| resolve_path(&base, p)))
            .map(StoreLocation::new);

        let sync_to = overrides
            .sync_to
            .or_else(|| raw.sync.to.as_deref().map(|p| resolve_path(&base, p)))
            .map(StoreLocation::new);

        let listen = match (overrides.listen, raw.server.listen) {
            (Some(addr), _) => addr,
            (None, Some(addr)) => addr
                .parse()
                .with_context(|| format!("Invalid listen address in config file: {}", addr))?,
            (None, None) => default_listen(),
        };

        let defaults = BuildTargets::default();
        let targets = BuildTargets {
            toplevel: raw.nix.targets.toplevel.unwrap_or(defaults.toplevel),
            emulation: raw.nix.targets.emulation.unwrap_or(defaults.emulation),
            image: raw.nix.targets.image.unwrap_or(defaults.image),
            image_file: raw.nix.targets.image_file.unwrap_or(defaults.image_file),
        };

        Ok(Self {
            output_dir,
            scratch_config,
            sync_from,
            sync_to,
            listen,
            flake: overrides
                .flake
                .or(raw.nix.flake)
                .unwrap_or_else(|| ".".to_string()),
            impure: raw.nix.impure.unwrap_or(true),
            targets,
            journal_enabled: raw.journal.enabled.unwrap_or(true),
            config_file,
        })
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".nixbake").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Directory relative paths in a config file are resolved against
fn base_dir(config_path: &Path) -> PathBuf {
    let parent = config_path.parent().unwrap_or(Path::new("."));
    if parent.file_name().is_some_and(|name| name == ".nixbake") {
        parent.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_output_is_required() {
        let err = ServerConfig::resolve(ConfigOverrides::default(), None).unwrap_err();
        assert!(err.to_string().contains("--output"));
    }

    #[test]
    fn test_defaults_with_output_only() {
        let overrides = ConfigOverrides {
            output: Some(PathBuf::from("/srv/images")),
            ..Default::default()
        };
        let config = ServerConfig::resolve(overrides, None).unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/srv/images"));
        assert_eq!(config.scratch_config, PathBuf::from(DEFAULT_SCRATCH));
        assert_eq!(config.listen.to_string(), DEFAULT_LISTEN);
        assert_eq!(config.flake, ".");
        assert!(config.impure);
        assert!(config.sync_from.is_none());
        assert!(config.sync_to.is_none());
        assert!(config.journal_enabled);
        assert_eq!(config.targets, BuildTargets::default());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let nixbake_dir = temp.path().join(".nixbake");
        std::fs::create_dir_all(&nixbake_dir).unwrap();

        let config_path = nixbake_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  output: ./images
sync:
  from: /mnt/store-in
  to: relative-out
nix:
  flake: github:example/machines
  impure: false
  targets:
    image: qemuImage
server:
  listen: 127.0.0.1:9000
journal:
  enabled: false
"#
        )
        .unwrap();

        let raw = load_config_file(&config_path).unwrap();
        assert_eq!(raw.version.as_deref(), Some("1.0"));

        let config =
            ServerConfig::resolve(ConfigOverrides::default(), Some((config_path.clone(), raw)))
                .unwrap();

        assert_eq!(config.output_dir, temp.path().join("./images"));
        assert_eq!(config.sync_from, Some(StoreLocation::new("/mnt/store-in")));
        assert_eq!(
            config.sync_to,
            Some(StoreLocation::new(temp.path().join("relative-out")))
        );
        assert_eq!(config.flake, "github:example/machines");
        assert!(!config.impure);
        assert_eq!(config.targets.image, "qemuImage");
        assert_eq!(config.targets.toplevel, BuildTargets::default().toplevel);
        assert_eq!(config.listen.to_string(), "127.0.0.1:9000");
        assert!(!config.journal_enabled);
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let raw: ConfigFile = serde_yaml::from_str(
            r#"
paths:
  output: /from/file
server:
  listen: 127.0.0.1:9000
"#,
        )
        .unwrap();

        let overrides = ConfigOverrides {
            output: Some(PathBuf::from("/from/cli")),
            listen: Some("127.0.0.1:7000".parse().unwrap()),
            ..Default::default()
        };
        let config =
            ServerConfig::resolve(overrides, Some((PathBuf::from("/etc/nixbake.yaml"), raw)))
                .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/from/cli"));
        assert_eq!(config.listen.port(), 7000);
    }

    #[test]
    fn test_invalid_listen_address() {
        let raw: ConfigFile = serde_yaml::from_str("server:\n  listen: not-an-address\n").unwrap();
        let overrides = ConfigOverrides {
            output: Some(PathBuf::from("/srv/images")),
            ..Default::default()
        };

        let result = ServerConfig::resolve(overrides, Some((PathBuf::from("/etc/n.yaml"), raw)));
        assert!(result.is_err());
    }

    #[test]
    fn test_base_dir() {
        assert_eq!(
            base_dir(Path::new("/home/user/project/.nixbake/config.yaml")),
            PathBuf::from("/home/user/project")
        );
        assert_eq!(
            base_dir(Path::new("/etc/nixbake/server.yaml")),
            PathBuf::from("/etc/nixbake")
        );
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
