//! # moex-xml2html
//!
//! Convert Moscow Exchange (MOEX) XML reports to HTML by applying the XSLT
//! stylesheets the exchange publishes.
//!
//! ## Why this crate?
//!
//! MOEX reports arrive in legacy Cyrillic encodings and name their
//! stylesheets with `<?xml-stylesheet?>` instructions that point at paths on
//! the exchange's own Windows machines (`C:\MICEX\XSLT\...`). Opening one in
//! a browser does not work. This crate finds a stylesheet that does, fetches
//! it from the exchange's public FTP-over-HTTPS mirror, applies it, and
//! repairs the mojibake that mixed encodings leave in the output.
//!
//! ## Pipeline Overview
//!
//! ```text
//! XML bytes
//!  │
//!  ├─ 1. Decode     sniff the declared encoding; windows-1251/UTF-8 fallbacks
//!  ├─ 2. Parse      two-step parse; collect processing instructions
//!  ├─ 3. Resolve    override → xml-stylesheet PIs → configured default
//!  ├─ 4. Fetch      HTTP GET with timeout, one candidate at a time
//!  ├─ 5. Transform  XSLT via xrust; first candidate that succeeds wins
//!  └─ 6. Repair     typographic and Cyrillic mojibake in the HTML
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use moex_xml2html::{convert, ConverterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConverterConfig::default();
//!     let xml = std::fs::read("CCX99_report.xml")?;
//!     let output = convert(&xml, None, &config).await?;
//!     println!("{}", output.html);
//!     eprintln!("stylesheet: {}", output.stylesheet_url);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `moex2html` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! moex-xml2html = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod intake;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod store;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConverterConfig, ConverterConfigBuilder};
pub use convert::{convert, convert_sync, convert_to_file, convert_to_store, Converter};
pub use error::{CandidateError, ConversionError, FetchError, ParseError, TransformError};
pub use output::{CandidateAttempt, ConversionOutput, ConversionRequest, ConversionStats};
pub use pipeline::fetch::{FetchedResource, HttpFetcher, StylesheetFetcher};
pub use pipeline::repair::fix_mojibake;
pub use pipeline::transform::{XrustEngine, XsltEngine};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{StoredFile, TempStore};
pub use validate::{ValidationKind, ValidationReport};
