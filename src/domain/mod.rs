//! Domain types for the nixbake build server.
//!
//! This module contains the core data structures:
//! - Request: configuration bytes, fingerprint and outcome
//! - Store: engine store paths and external store locations
//! - Stage: pipeline progression for one build
//! - Events / Build: journal records and the summaries replayed from them

pub mod build;
pub mod events;
pub mod request;
pub mod stage;
pub mod store;

// Re-export commonly used types
pub use build::{BuildStatus, BuildSummary};
pub use events::{BuildEvent, BuildEventType};
pub use request::{BuildOutcome, BuildRequest, Fingerprint};
pub use stage::{PipelineStage, PipelineState, TransitionError};
pub use store::{CopyDirection, StoreLocation, StorePath};
