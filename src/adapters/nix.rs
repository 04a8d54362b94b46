//! Nix adapter driving the `nix` CLI.
//!
//! Each verb spawns one `nix` subprocess. stdout carries the result, stderr
//! is captured and folded into the error on failure.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::BuildEngine;
use crate::domain::{CopyDirection, StoreLocation, StorePath};

/// Maximum number of stderr characters kept in an error message
const STDERR_TAIL: usize = 2048;

/// Nix engine using subprocess mode
#[derive(Debug, Clone)]
pub struct NixEngine {
    /// Path to the nix binary (default: "nix")
    binary_path: String,

    /// Flake reference the targets are resolved against (default: ".")
    flake: String,

    /// Pass `--impure` to build and eval (needed to read the scratch config)
    impure: bool,
}

impl Default for NixEngine {
    fn default() -> Self {
        Self::new(".")
    }
}

impl NixEngine {
    /// Create a Nix engine for the given flake reference
    pub fn new(flake: impl Into<String>) -> Self {
        Self {
            binary_path: "nix".to_string(),
            flake: flake.into(),
            impure: true,
        }
    }

    /// Use a custom nix binary
    pub fn with_binary_path(mut self, binary_path: impl Into<String>) -> Self {
        self.binary_path = binary_path.into();
        self
    }

    pub fn with_impure(mut self, impure: bool) -> Self {
        self.impure = impure;
        self
    }

    /// Flake installable for an attribute: `<flake>#<attr>`
    fn installable(&self, target: &str) -> String {
        format!("{}#{}", self.flake, target)
    }

    fn realize_args(&self, target: &str) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--no-link".to_string(),
            "--print-out-paths".to_string(),
        ];
        if self.impure {
            args.push("--impure".to_string());
        }
        args.push(self.installable(target));
        args
    }

    fn resolve_args(&self, target: &str) -> Vec<String> {
        let mut args = vec!["eval".to_string(), "--raw".to_string()];
        if self.impure {
            args.push("--impure".to_string());
        }
        args.push(self.installable(target));
        args
    }

    fn copy_args(
        paths: &[StorePath],
        direction: CopyDirection,
        location: &StoreLocation,
    ) -> Vec<String> {
        let mut args = vec!["copy".to_string()];
        match direction {
            CopyDirection::From => {
                if paths.is_empty() {
                    args.push("--all".to_string());
                }
                // Trusted transfer between our own stores
                args.push("--no-check-sigs".to_string());
                args.push("--from".to_string());
            }
            CopyDirection::To => args.push("--to".to_string()),
        }
        args.push(location.url());
        args.extend(paths.iter().map(|p| p.as_str().to_string()));
        args
    }

    /// Run nix with `args` and return its stdout
    async fn run(&self, args: &[String]) -> Result<String> {
        let verb = args.first().map(String::as_str).unwrap_or_default();
        debug!(binary = %self.binary_path, ?args, "Running nix");

        let output = Command::new(&self.binary_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to spawn `{} {}`", self.binary_path, verb))?;

        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "`nix {}` failed with exit code {}: {}",
                verb,
                exit_code,
                tail(stderr.trim(), STDERR_TAIL)
            );
        }

        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            debug!(target: "nix", "{}", line);
        }

        String::from_utf8(output.stdout)
            .with_context(|| format!("`nix {}` output is not valid UTF-8", verb))
    }
}

/// Parse newline separated store paths, dropping blank lines
pub fn parse_paths(stdout: &str) -> Vec<StorePath> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(StorePath::new)
        .collect()
}

/// Last `max` characters of `s`, on a char boundary
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[async_trait]
impl BuildEngine for NixEngine {
    fn name(&self) -> &str {
        "nix"
    }

    async fn realize(&self, target: &str) -> Result<StorePath> {
        let stdout = self.run(&self.realize_args(target)).await?;
        parse_paths(&stdout)
            .into_iter()
            .next()
            .with_context(|| format!("`nix build` printed no output path for {}", target))
    }

    async fn resolve(&self, target: &str) -> Result<StorePath> {
        let stdout = self.run(&self.resolve_args(target)).await?;
        let path = stdout.trim();
        if path.is_empty() {
            anyhow::bail!("`nix eval` returned an empty path for {}", target);
        }
        Ok(StorePath::new(path))
    }

    async fn closure(&self, path: &StorePath) -> Result<Vec<StorePath>> {
        let args = vec![
            "path-info".to_string(),
            "-r".to_string(),
            path.as_str().to_string(),
        ];
        let stdout = self.run(&args).await?;
        Ok(parse_paths(&stdout))
    }

    async fn copy(
        &self,
        paths: &[StorePath],
        direction: CopyDirection,
        location: &StoreLocation,
    ) -> Result<()> {
        self.run(&Self::copy_args(paths, direction, location))
            .await
            .map(|_| ())
    }

    async fn health_check(&self) -> Result<()> {
        let version = self
            .run(&["--version".to_string()])
            .await
            .context("Nix health check failed")?;
        debug!(version = %version.trim(), "Nix available");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nix_engine_creation() {
        let engine = NixEngine::default();
        assert_eq!(engine.name(), "nix");
        assert_eq!(engine.binary_path, "nix");
        assert_eq!(engine.installable("vmImage"), ".#vmImage");
    }

    #[test]
    fn test_realize_args() {
        let engine = NixEngine::new("/srv/flake");
        assert_eq!(
            engine.realize_args("vmImage"),
            vec![
                "build",
                "--no-link",
                "--print-out-paths",
                "--impure",
                "/srv/flake#vmImage"
            ]
        );

        let pure = NixEngine::new(".").with_impure(false);
        assert!(!pure.realize_args("vmImage").contains(&"--impure".to_string()));
    }

    #[test]
    fn test_resolve_args() {
        let engine = NixEngine::default();
        assert_eq!(
            engine.resolve_args("toplevel"),
            vec!["eval", "--raw", "--impure", ".#toplevel"]
        );
    }

    #[test]
    fn test_copy_args_import_everything() {
        let location = StoreLocation::new("/mnt/in");
        assert_eq!(
            NixEngine::copy_args(&[], CopyDirection::From, &location),
            vec!["copy", "--all", "--no-check-sigs", "--from", "file:///mnt/in"]
        );
    }

    #[test]
    fn test_copy_args_export_paths() {
        let location = StoreLocation::new("/mnt/out");
        let paths = vec![StorePath::new("/nix/store/a"), StorePath::new("/nix/store/b")];
        assert_eq!(
            NixEngine::copy_args(&paths, CopyDirection::To, &location),
            vec!["copy", "--to", "file:///mnt/out", "/nix/store/a", "/nix/store/b"]
        );
    }

    #[test]
    fn test_parse_paths_drops_blank_lines() {
        let paths = parse_paths("/nix/store/a\n\n  /nix/store/b  \n");
        assert_eq!(
            paths,
            vec![StorePath::new("/nix/store/a"), StorePath::new("/nix/store/b")]
        );
    }

    #[test]
    fn test_tail_keeps_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("aé", 1), "");
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let engine = NixEngine::default().with_binary_path("/nonexistent/nix");
        assert!(engine.health_check().await.is_err());
    }
}
