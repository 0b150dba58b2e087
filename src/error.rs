//! Error taxonomy shared by the pipeline stages.
//!
//! Per-resource failures (`ResolutionUnavailable`, `FetchError`, `ParseError`)
//! never fail a job on their own; they are turned into [`JobWarning`]s.
//! Only [`JobError`] values end a job in `Failure`.
//!
//! [`JobWarning`]: crate::model::JobWarning

use crate::model::{OutputFormat, ResourceRequest};
use std::fmt;
use thiserror::Error;

/// A `DocumentRequest` that violates its invariants. Rejected before a job exists.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidRequest {
    #[error("at least one resource request is required")]
    NoResources,
    #[error("at most two distinct languages are supported, got {count}")]
    TooManyLanguages { count: usize },
    #[error("resource request #{index} has an empty {field}")]
    BlankField { index: usize, field: &'static str },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transient fetch failure for {location}: {message}")]
    Transient { location: String, message: String },
    #[error("fetch timed out after {seconds}s for {location}")]
    Timeout { location: String, seconds: u64 },
    #[error("fetch failed for {location}: {message}")]
    Terminal { location: String, message: String },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. } | FetchError::Timeout { .. })
    }
}

/// Where inside a source a parse problem was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Line { file: String, line: usize },
    Verse { chapter: u32, verse: String },
    File(String),
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Line { file, line } => write!(f, "{}:{}", file, line),
            SourceLocation::Verse { chapter, verse } => write!(f, "{}:{}", chapter, verse),
            SourceLocation::File(file) => write!(f, "{}", file),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("{resource}: malformed {format} at {location}: {message}")]
    Malformed {
        resource: ResourceRequest,
        format: &'static str,
        location: SourceLocation,
        message: String,
    },
    #[error("{resource}: no parser handles format '{format}'")]
    UnsupportedFormat {
        resource: ResourceRequest,
        format: String,
    },
    #[error("{resource}: failed to read {path}: {message}")]
    Io {
        resource: ResourceRequest,
        path: String,
        message: String,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("{format} converter '{program}' could not be started: {message}")]
    Spawn {
        format: OutputFormat,
        program: String,
        message: String,
    },
    #[error("{format} converter exited with {status}: {diagnostics}")]
    Failed {
        format: OutputFormat,
        status: String,
        diagnostics: String,
    },
    #[error("{format} converter timed out after {seconds}s")]
    Timeout { format: OutputFormat, seconds: u64 },
    #[error("{format} converter produced no output at {path}")]
    MissingOutput { format: OutputFormat, path: String },
}

/// Faults that end a job in `Failure`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("assembly failed: {0}")]
    AssemblyFailure(String),
    #[error("every requested conversion failed: {}", .0.join("; "))]
    ConversionFailure(Vec<String>),
    #[error("infrastructure fault: {}", format!("{:#}", .0))]
    Infrastructure(#[from] anyhow::Error),
}
