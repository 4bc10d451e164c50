//! Progress-callback trait for per-candidate conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConverterConfigBuilder::progress_callback`] to receive
//! events as the pipeline walks its stylesheet candidates.
//!
//! # Example
//!
//! ```rust
//! use moex_xml2html::{ConversionProgressCallback, ConverterConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FailureCounter {
//!     failed: Arc<AtomicUsize>,
//! }
//!
//! impl ConversionProgressCallback for FailureCounter {
//!     fn on_candidate_failed(&self, index: usize, total: usize, url: &str, error: &str) {
//!         self.failed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("candidate {}/{} ({}) failed: {}", index, total, url, error);
//!     }
//! }
//!
//! let counter = Arc::new(FailureCounter {
//!     failed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ConverterConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline as it tries each stylesheet candidate.
///
/// Implementations must be `Send + Sync` because a [`crate::Converter`] may
/// be shared between tasks. All methods have default no-op implementations
/// so callers only override what they care about.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after candidates are resolved, before any fetch.
    fn on_conversion_start(&self, candidates: usize) {
        let _ = candidates;
    }

    /// Called before a candidate is fetched.
    ///
    /// # Arguments
    /// * `index` — 1-indexed position in the candidate list
    /// * `total` — number of candidates
    /// * `url`   — the candidate stylesheet URL
    fn on_candidate_start(&self, index: usize, total: usize, url: &str) {
        let _ = (index, total, url);
    }

    /// Called when a candidate fails at any stage.
    fn on_candidate_failed(&self, index: usize, total: usize, url: &str, error: &str) {
        let _ = (index, total, url, error);
    }

    /// Called once at the end. `stylesheet_url` is the winner, or `None`
    /// when every candidate failed.
    fn on_conversion_complete(&self, stylesheet_url: Option<&str>) {
        let _ = stylesheet_url;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConverterConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
