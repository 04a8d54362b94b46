//! Command-line interface for nixbake.
//!
//! Provides commands for running the image server, building a single
//! configuration locally, inspecting fingerprints and build history, and
//! showing the resolved configuration.

use std::io::{self, IsTerminal, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use crate::config::{ConfigOverrides, ServerConfig};
use crate::core::{compute_fingerprint, BuildJournal, FingerprintCache, Orchestrator};
use crate::domain::{BuildRequest, BuildStatus};
use crate::server::{self, ImageResponse};

/// nixbake - NixOS VM image build server
#[derive(Parser, Debug)]
#[command(name = "nixbake")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP image server
    Serve {
        #[command(flatten)]
        config: ConfigArgs,

        /// Address to listen on
        #[arg(short, long, env = "NIXBAKE_LISTEN")]
        listen: Option<SocketAddr>,
    },

    /// Build one configuration locally (same cache and pipeline as the server)
    Build {
        #[command(flatten)]
        config: ConfigArgs,

        /// Configuration file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Print the fingerprint of a configuration and whether it is cached
    Fingerprint {
        #[command(flatten)]
        config: ConfigArgs,

        /// Configuration file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// List recent builds from the journal
    History {
        #[command(flatten)]
        config: ConfigArgs,

        /// Maximum number of builds to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

/// Options shared by every command that needs the server configuration
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Config file (default: search for .nixbake/config.yaml)
    #[arg(short, long = "config", env = "NIXBAKE_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Output directory to store built images
    #[arg(short, long, env = "NIXBAKE_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Import the Nix store from this directory before each build
    #[arg(long, env = "NIXBAKE_SYNC_FROM")]
    pub sync_from: Option<PathBuf>,

    /// Export runtime closures to this directory after evaluation
    #[arg(long, env = "NIXBAKE_SYNC_TO")]
    pub sync_to: Option<PathBuf>,

    /// Flake reference holding the machine definitions
    #[arg(long, env = "NIXBAKE_FLAKE")]
    pub flake: Option<String>,

    /// Scratch file the flake reads the machine configuration from
    #[arg(long, env = "NIXBAKE_SCRATCH")]
    pub scratch: Option<PathBuf>,
}

impl ConfigArgs {
    fn overrides(&self, listen: Option<SocketAddr>) -> ConfigOverrides {
        ConfigOverrides {
            config_file: self.config_file.clone(),
            output: self.output.clone(),
            sync_from: self.sync_from.clone(),
            sync_to: self.sync_to.clone(),
            listen,
            flake: self.flake.clone(),
            scratch: self.scratch.clone(),
        }
    }

    fn load(&self, listen: Option<SocketAddr>) -> Result<Arc<ServerConfig>> {
        ServerConfig::load(self.overrides(listen)).map(Arc::new)
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve { config, listen } => serve(config.load(listen)?).await,
            Commands::Build { config, input } => build(config.load(None)?, input).await,
            Commands::Fingerprint { config, input } => fingerprint(&config, input).await,
            Commands::History { config, limit } => history(config.load(None)?, limit).await,
            Commands::Config { config } => show_config(config.load(None)?),
        }
    }
}

/// Run the HTTP server until interrupted
async fn serve(config: Arc<ServerConfig>) -> Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_config(config.clone()).await?);

    if let Err(e) = orchestrator.engine().health_check().await {
        let reason = format!("{:#}", e);
        warn!(error = %reason, "Build engine is not available; builds will fail");
    }

    server::run(config.listen, orchestrator).await
}

/// Build one configuration and print the server's response body
async fn build(config: Arc<ServerConfig>, input: Option<PathBuf>) -> Result<()> {
    let bytes = read_input(input)?;
    let orchestrator = Arc::new(Orchestrator::from_config(config).await?);

    match orchestrator.submit(BuildRequest::new(bytes)).await {
        Ok(outcome) => {
            let body = ImageResponse {
                filename: outcome.file_name(),
            };
            println!("{}", serde_json::to_string(&body)?);

            let how = if outcome.is_cache_hit() {
                "cache hit"
            } else {
                "built"
            };
            eprintln!("\n[Image {} ({})]", outcome.path().display(), how);
            Ok(())
        }
        Err(e) => {
            eprintln!("\n[Build failed: {}]", e);
            std::process::exit(1);
        }
    }
}

/// Print the fingerprint and cache status of a configuration
async fn fingerprint(args: &ConfigArgs, input: Option<PathBuf>) -> Result<()> {
    let bytes = read_input(input)?;
    let fingerprint = compute_fingerprint(&bytes);
    println!("{}", fingerprint);

    // Cache status is best effort: no output directory just means unknown
    if let Ok(config) = args.load(None) {
        if config.output_dir.is_dir() {
            let cache = FingerprintCache::open(&config.output_dir).await?;
            match cache.lookup(&fingerprint).await {
                Some(path) => eprintln!("cached: {}", path.display()),
                None => eprintln!("not cached"),
            }
        }
    }

    Ok(())
}

/// List recent builds
///
/// Read only: a missing journal is reported, never created.
async fn history(config: Arc<ServerConfig>, limit: usize) -> Result<()> {
    if !config.journal_enabled {
        println!("Build journal is disabled.");
        return Ok(());
    }

    let summaries = match BuildJournal::existing(&config.output_dir) {
        Some(journal) => journal.summaries(limit).await?,
        None => Vec::new(),
    };

    if summaries.is_empty() {
        println!("No builds found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<12}  {:<10}  {:<17}  {:<19}  {}",
        "BUILD ID", "FINGERPRINT", "STATUS", "LAST STAGE", "STARTED", "DURATION"
    );
    for summary in summaries {
        let status = match &summary.status {
            BuildStatus::Running => "running",
            BuildStatus::CacheHit => "cache hit",
            BuildStatus::Completed => "completed",
            BuildStatus::Failed { .. } => "failed",
        };
        let duration = match summary.duration() {
            Some(d) => format!("{:.2}s", d.num_milliseconds() as f64 / 1000.0),
            None if summary.is_running() => "-".to_string(),
            None => "?".to_string(),
        };
        println!(
            "{:<36}  {:<12}  {:<10}  {:<17}  {:<19}  {}",
            summary.build_id,
            summary.fingerprint.short(),
            status,
            summary.last_stage,
            summary.started_at.format("%Y-%m-%d %H:%M:%S"),
            duration
        );
        if let BuildStatus::Failed { error } = &summary.status {
            println!("    error: {}", error);
        }
    }

    Ok(())
}

/// Print the resolved configuration
fn show_config(config: Arc<ServerConfig>) -> Result<()> {
    let yaml = serde_yaml::to_string(config.as_ref()).context("Failed to render configuration")?;
    print!("{}", yaml);
    Ok(())
}

/// Read configuration bytes from a file or piped stdin
fn read_input(input: Option<PathBuf>) -> Result<Vec<u8>> {
    let bytes = if let Some(path) = input {
        std::fs::read(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    } else if !io::stdin().is_terminal() {
        let mut buffer = Vec::new();
        io::stdin()
            .read_to_end(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        anyhow::bail!("No input provided. Use --input <file> or pipe to stdin");
    };

    if bytes.is_empty() {
        anyhow::bail!("Input is empty");
    }

    Ok(bytes)
}
