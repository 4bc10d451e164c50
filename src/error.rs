//! Error types for the moex-xml2html library.
//!
//! Two layers of errors reflect two distinct failure modes:
//!
//! * [`ConversionError`] — **Fatal**: the conversion cannot produce HTML at
//!   all (source XML unreadable, every stylesheet candidate failed, bad
//!   configuration). Returned as `Err(ConversionError)` from the top-level
//!   `convert*` functions.
//!
//! * [`CandidateError`] — **Non-fatal**: a single stylesheet candidate failed
//!   to fetch, parse, compile or apply. Recorded in
//!   [`crate::output::CandidateAttempt`] and logged; the pipeline moves on to
//!   the next candidate and only the last cause surfaces if all of them fail.
//!
//! Decoding never fails (it degrades to lossy UTF-8) and schema validation
//! never fails outward (see [`crate::validate::ValidationReport`]), so
//! neither has an error type of its own.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the moex-xml2html library.
#[derive(Debug, Error)]
pub enum ConversionError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The uploaded XML could not be parsed by either parse strategy.
    #[error("Source XML could not be parsed: {0}")]
    SourceParse(#[source] ParseError),

    /// The upload was refused before conversion (extension, size, name).
    #[error("Upload rejected: {reason}")]
    UploadRejected { reason: String },

    // ── Stylesheet errors ─────────────────────────────────────────────────
    /// The candidate list was empty; nothing was attempted.
    #[error("No usable XSLT stylesheet found for this document")]
    NoUsableStylesheet,

    /// Every candidate stylesheet failed.
    #[error("None of the {attempts} XSLT stylesheet(s) could be applied. Last error: {last_error}")]
    AllCandidatesFailed {
        attempts: usize,
        #[source]
        last_error: CandidateError,
    },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Could not write, read or remove a file in the temp store or output path.
    #[error("File operation failed on '{path}': {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why one stylesheet candidate could not be used.
#[derive(Debug, Clone, Error)]
pub enum CandidateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("stylesheet '{url}' is not well-formed XML: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Network failures while retrieving a stylesheet or schema.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The candidate is not an absolute http(s) URL.
    #[error("invalid stylesheet URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request did not complete within the configured timeout.
    #[error("request to '{url}' timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    /// The server answered with a non-2xx status.
    #[error("request to '{url}' failed with HTTP {status}")]
    Status { url: String, status: u16 },

    /// Connection, TLS or protocol failure.
    #[error("request to '{url}' failed: {reason}")]
    Transport { url: String, reason: String },

    /// The response headers arrived but reading the body failed.
    #[error("reading the response body from '{url}' failed: {reason}")]
    Body { url: String, reason: String },
}

/// Malformed XML.
#[derive(Debug, Clone, Error)]
#[error("{message} (at byte {position})")]
pub struct ParseError {
    pub message: String,
    pub position: u64,
}

impl ParseError {
    pub fn new(message: impl Into<String>, position: u64) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// Failures inside the XSLT processor.
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// The stylesheet parsed as XML but is not a valid XSLT program.
    #[error("stylesheet '{url}' could not be compiled: {detail}")]
    Compile { url: String, detail: String },

    /// The compiled stylesheet raised while being applied.
    #[error("applying stylesheet '{url}' failed: {detail}")]
    Apply { url: String, detail: String },
}

impl TransformError {
    /// Attach the candidate URL to an engine error that was raised without one.
    pub(crate) fn with_url(self, url: &str) -> Self {
        match self {
            TransformError::Compile { detail, .. } => TransformError::Compile {
                url: url.to_string(),
                detail,
            },
            TransformError::Apply { detail, .. } => TransformError::Apply {
                url: url.to_string(),
                detail,
            },
        }
    }
}
