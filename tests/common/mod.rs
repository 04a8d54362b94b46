//! Shared fixtures: a scripted build engine and an orchestrator wired to it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use nixbake::adapters::BuildEngine;
use nixbake::config::ServerConfig;
use nixbake::domain::{CopyDirection, StoreLocation, StorePath};
use nixbake::Orchestrator;

/// One engine invocation as observed by the fake
#[derive(Debug, Clone)]
pub struct Call {
    pub verb: &'static str,
    pub target: String,
    pub paths: Vec<String>,
    /// Contents of the scratch file when the call started
    pub scratch: String,
    pub entered: Instant,
    pub exited: Instant,
}

/// In-process engine that records calls and fails on request
///
/// Failure keys are either a verb (`"realize"`, `"resolve"`, `"closure"`,
/// `"copy_from"`, `"copy_to"`) or `"realize:<target>"`.
pub struct FakeEngine {
    store: PathBuf,
    scratch: PathBuf,
    image_file: String,
    image_target: String,
    write_image: bool,
    delay: Duration,
    failures: Mutex<Vec<String>>,
    calls: Mutex<Vec<Call>>,
    counter: AtomicUsize,
}

impl FakeEngine {
    pub fn new(store: &Path, scratch: &Path) -> Self {
        Self {
            store: store.to_path_buf(),
            scratch: scratch.to_path_buf(),
            image_file: "nixos.qcow2".to_string(),
            image_target: "vmImage".to_string(),
            write_image: true,
            delay: Duration::ZERO,
            failures: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Realizing the image target succeeds but produces no image file
    pub fn without_image_file(mut self) -> Self {
        self.write_image = false;
        self
    }

    pub fn fail_on(&self, key: &str) {
        self.failures.lock().unwrap().push(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn verbs(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| {
                if c.target.is_empty() {
                    c.verb.to_string()
                } else {
                    format!("{}:{}", c.verb, c.target)
                }
            })
            .collect()
    }

    fn fails(&self, verb: &str, target: &str) -> bool {
        let failures = self.failures.lock().unwrap();
        failures
            .iter()
            .any(|f| f == verb || *f == format!("{}:{}", verb, target))
    }

    async fn enter(&self) -> (Instant, String) {
        let entered = Instant::now();
        let scratch = std::fs::read_to_string(&self.scratch).unwrap_or_default();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (entered, scratch)
    }

    fn exit(
        &self,
        verb: &'static str,
        target: &str,
        paths: Vec<String>,
        entered: Instant,
        scratch: String,
    ) {
        self.calls.lock().unwrap().push(Call {
            verb,
            target: target.to_string(),
            paths,
            scratch,
            entered,
            exited: Instant::now(),
        });
    }

    fn output_dir(&self, target: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.store.join(format!("{:04}-{}", n, target))
    }
}

#[async_trait]
impl BuildEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn realize(&self, target: &str) -> Result<StorePath> {
        let (entered, scratch) = self.enter().await;
        let outcome = if self.fails("realize", target) {
            Err(anyhow::anyhow!("error: builder for '{}' failed", target))
        } else {
            let out = self.output_dir(target);
            std::fs::create_dir_all(&out)?;
            if target == self.image_target && self.write_image {
                // The image carries the configuration it was built from
                std::fs::write(out.join(&self.image_file), &scratch)?;
            }
            Ok(StorePath::new(out.to_string_lossy()))
        };
        self.exit("realize", target, Vec::new(), entered, scratch);
        outcome
    }

    async fn resolve(&self, target: &str) -> Result<StorePath> {
        let (entered, scratch) = self.enter().await;
        self.exit("resolve", target, Vec::new(), entered, scratch);
        if self.fails("resolve", target) {
            bail!("error: attribute '{}' missing", target);
        }
        Ok(StorePath::new(format!("/nix/store/fake-{}", target)))
    }

    async fn closure(&self, path: &StorePath) -> Result<Vec<StorePath>> {
        let (entered, scratch) = self.enter().await;
        self.exit("closure", "", vec![path.to_string()], entered, scratch);
        if self.fails("closure", "") {
            bail!("error: path '{}' is not valid", path);
        }
        Ok(vec![
            path.clone(),
            StorePath::new("/nix/store/fake-glibc"),
        ])
    }

    async fn copy(
        &self,
        paths: &[StorePath],
        direction: CopyDirection,
        location: &StoreLocation,
    ) -> Result<()> {
        let verb = match direction {
            CopyDirection::From => "copy_from",
            CopyDirection::To => "copy_to",
        };
        let (entered, scratch) = self.enter().await;
        let paths = paths.iter().map(|p| p.to_string()).collect();
        self.exit(verb, "", paths, entered, scratch);
        if self.fails(verb, "") {
            bail!("error: cannot open store '{}'", location.url());
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// A temp output directory, a fake engine and an orchestrator using both
pub struct Harness {
    pub temp: TempDir,
    pub engine: Arc<FakeEngine>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(|config| config, |engine| engine).await
    }

    pub async fn build(
        configure: impl FnOnce(ServerConfig) -> ServerConfig,
        engine: impl FnOnce(FakeEngine) -> FakeEngine,
    ) -> Self {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("images");
        let scratch = temp.path().join("machine-config.nix");
        let store = temp.path().join("store");

        let config = configure(ServerConfig::new(&output).with_scratch_config(&scratch));
        let engine = Arc::new(engine(FakeEngine::new(&store, &scratch)));
        let orchestrator = Orchestrator::new(Arc::new(config), engine.clone())
            .await
            .unwrap();

        Self {
            temp,
            engine,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.temp.path().join("images")
    }

    /// Regular files in the output directory (ignores the journal dir)
    pub fn published(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.output_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
