//! Error type for the ingestion pipeline.
//!
//! Only startup failures surface through [`IngestError`]. Conditions that the
//! pipeline absorbs by polling again (no record yet, torn fragments, cleanup
//! failures) never become errors; see [`crate::reader::ReadOutcome`].

use std::path::PathBuf;
use std::process::ExitStatus;

/// Fatal pipeline error.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Elevation for the sampler could not be obtained. Not retried.
    #[error("could not obtain elevated privileges for the sampler: {0}")]
    Privilege(String),

    /// The sampler binary (or its wrapper) could not be launched.
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The sampler exited before it produced a single record.
    #[error("sampler exited before producing output ({status})")]
    SamplerExited { status: ExitStatus },

    /// Invalid or unreadable configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Pipeline result alias.
pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// Whether the error means the user needs to grant elevation.
    pub fn is_privilege(&self) -> bool {
        matches!(self, Self::Privilege(_))
    }
}
