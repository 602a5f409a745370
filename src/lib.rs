//! tmerge library crate.
//!
//! The primary interface is the `tmerge` binary. This lib.rs exposes the
//! merge engine and its components so integration tests (and other tools)
//! can drive merges directly without going through the CLI.

pub mod atomic;
pub mod backup;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod failpoints;
pub mod fingerprint;
pub mod integrity;
pub mod lock;
pub mod merge_state;
pub mod telemetry;

pub use config::MergeConfig;
pub use document::{Document, MARKER};
pub use engine::{MergeOptions, MergeOutcome, MergeReport, Merger};
pub use error::{MergeError, RestoreStatus};
