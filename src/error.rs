//! Error taxonomy for the pipeline.
//!
//! Upstream failures are classified once, at the HTTP boundary, into
//! [UpstreamError::Transient] (retried, then subdivided, then skipped) and
//! [UpstreamError::Permanent] (surfaced to the stage, which contains it).
//! Only [PipelineError] aborts a run.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("transient upstream failure{}: {message}", status_suffix(.status))]
    Transient { status: Option<u16>, message: String },
    #[error("permanent upstream failure{}: {message}", status_suffix(.status))]
    Permanent { status: Option<u16>, message: String },
}

impl UpstreamError {
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transient {
            status,
            message: message.into(),
        }
    }

    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Permanent {
            status,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// A single artifact that could not be written. Logged and collected; never fatal.
#[derive(Debug, Error)]
#[error("failed to write artifact '{}': {source}", .path.display())]
pub struct ArtifactWriteError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Precondition failures that abort a whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration '{}': {message}", .path.display())]
    Config { path: PathBuf, message: String },
    #[error("unable to load catalog universe '{}': {message}", .path.display())]
    Universe { path: PathBuf, message: String },
    #[error("unable to prepare output directory '{}': {source}", .path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("unable to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("edge proxy on {addr} failed: {source}")]
    Server {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
