//! schema-cli library: file-level schema commands.
//!
//! This is a thin library layer over the `schema-sync` binary, allowing
//! integration tests to drive the commands directly.

pub mod commands;
pub mod config;
pub mod output;
pub mod snapshot;

// Re-export key types for convenience
pub use commands::{
    CommandError, CypherScript, LiveDiffReport, SampleQuery, SampleReport, ValidationSummary,
    WrittenFile,
};
pub use config::{Config, ConfigError};
pub use output::{render, Format};
pub use snapshot::{Snapshot, SnapshotError};
