//! Error types for the shot pipeline
//!
//! Per-shot errors (capture, comparison) are recorded on the shot's result
//! and never abort sibling shots. Source, build, config and platform errors
//! end the run.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use shotcheck_common::ConfigError;

/// Story source failures. An empty catalog is not an error.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Timed out fetching stories from {url} after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shot item construction failures
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Duplicate shot name '{shot_name}' (from id '{id}')")]
    DuplicateShot { shot_name: String, id: String },

    #[error("Cannot derive an id for {0}")]
    MissingId(String),

    #[error("Shot '{0}' has no url")]
    MissingUrl(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Capture failures; all of them are retryable
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Timeout during {stage} after {after:?}")]
    Timeout { stage: String, after: Duration },

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("{0}")]
    Other(String),
}

impl CaptureError {
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::Timeout { .. } => "timeout",
            CaptureError::Navigation(_) => "navigation",
            CaptureError::Other(_) => "unknown",
        }
    }
}

/// Comparison failures; terminal for the shot
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComparisonError {
    #[error("Image dimensions differ: baseline {baseline:?} vs current {current:?}")]
    DimensionMismatch {
        baseline: (u32, u32),
        current: (u32, u32),
    },

    #[error("Cannot decode {which} image: {reason}")]
    Decode { which: &'static str, reason: String },

    #[error("Cannot encode difference image: {0}")]
    Encode(String),

    #[error("Cannot read {path}: {reason}")]
    Read { path: PathBuf, reason: String },
}

/// Platform API failures; fatal to the run
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Request [{action}] failed: {source}")]
    Request {
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request [{action}] returned {status}: {body}")]
    Status {
        action: &'static str,
        status: u16,
        body: String,
    },

    #[error("Cannot read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload protocol out of order: cannot {action} while {phase}")]
    OutOfOrder { action: &'static str, phase: String },

    #[error("Invalid platform configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Errors that end a run
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
