//! nixbake - NixOS VM image build server
//!
//! Accepts a machine configuration over HTTP, builds a bootable disk image
//! for it with Nix, and caches the result under the SHA-256 fingerprint of
//! the configuration bytes.
//!
//! # Architecture
//!
//! - Identical configurations are served from the cache without building
//! - At most one build pipeline runs at a time, process-wide
//! - Images are published atomically, so readers never see a partial file
//! - Build history is appended to a JSONL journal in the output directory
//!
//! # Modules
//!
//! - `adapters`: External build engine integration (Nix)
//! - `core`: Orchestration logic (Cache, Serializer, StoreSync, Journal)
//! - `domain`: Data structures (Fingerprint, PipelineStage, BuildEvent)
//! - `server`: HTTP front end
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the server
//! nixbake serve --output /srv/images --sync-to /srv/store
//!
//! # Request an image
//! curl --data-binary @machine.nix http://localhost:8080/
//!
//! # Build locally without the server
//! nixbake build --output /srv/images --input machine.nix
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod server;

// Re-export main types at crate root for convenience
pub use crate::config::ServerConfig;
pub use crate::core::{BuildError, Orchestrator};
pub use domain::{BuildOutcome, BuildRequest, Fingerprint, PipelineStage};
