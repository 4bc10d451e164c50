//! Result types returned by a conversion.

use serde::{Deserialize, Serialize};

/// What a caller hands to the pipeline: the uploaded bytes and an optional
/// stylesheet URL that takes priority over anything the report names.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub xml: Vec<u8>,
    pub stylesheet_override: Option<String>,
}

impl ConversionRequest {
    pub fn new(xml: impl Into<Vec<u8>>) -> Self {
        Self {
            xml: xml.into(),
            stylesheet_override: None,
        }
    }

    pub fn with_stylesheet(mut self, url: impl Into<String>) -> Self {
        self.stylesheet_override = Some(url.into());
        self
    }
}

/// The converted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Repaired HTML produced by the winning stylesheet.
    pub html: String,
    /// URL of the stylesheet that produced `html`.
    pub stylesheet_url: String,
    /// Encoding the source report was decoded with.
    pub source_encoding: String,
    /// Every candidate tried, in order; the last one is the winner.
    pub attempts: Vec<CandidateAttempt>,
    pub stats: ConversionStats,
}

/// One stylesheet candidate and how it fared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAttempt {
    pub url: String,
    /// `None` on success, otherwise the human-readable failure.
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Timing for a conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    pub candidates: usize,
    pub attempted: usize,
    pub html_bytes: usize,
    pub total_duration_ms: u64,
}
