//! Conversion entry points.
//!
//! [`Converter`] owns an immutable configuration, a stylesheet fetcher and an
//! XSLT engine, and walks the candidate list for each request. The free
//! functions at the bottom are the convenience API most callers want.

use crate::config::ConverterConfig;
use crate::error::{CandidateError, ConversionError};
use crate::output::{CandidateAttempt, ConversionOutput, ConversionRequest, ConversionStats};
use crate::pipeline::decode;
use crate::pipeline::document::{self, XmlDocument};
use crate::pipeline::fetch::{HttpFetcher, StylesheetFetcher};
use crate::pipeline::repair;
use crate::pipeline::resolve;
use crate::pipeline::transform::{self, XrustEngine, XsltEngine};
use crate::store::{StoredFile, TempStore};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// An XML-to-HTML converter.
///
/// Cheap to share: all per-request state lives on the stack of
/// [`convert`](Self::convert), so one `Converter` behind an `Arc` can serve
/// concurrent requests.
pub struct Converter<F = HttpFetcher, E = XrustEngine> {
    pub(crate) config: ConverterConfig,
    pub(crate) fetcher: F,
    pub(crate) engine: E,
}

impl Converter {
    /// A converter that fetches over HTTP and transforms with `xrust`.
    pub fn new(config: ConverterConfig) -> Result<Self, ConversionError> {
        let fetcher = HttpFetcher::new(config.fetch_timeout)
            .map_err(|e| ConversionError::Internal(e.to_string()))?;
        Ok(Self::with_parts(config, fetcher, XrustEngine::new()))
    }
}

impl<F: StylesheetFetcher, E: XsltEngine> Converter<F, E> {
    /// Assemble a converter from its parts.
    pub fn with_parts(config: ConverterConfig, fetcher: F, engine: E) -> Self {
        Self {
            config,
            fetcher,
            engine,
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Convert one report.
    ///
    /// Candidates are tried strictly in order and the first one that fetches,
    /// parses, compiles and applies wins. Its output is passed through
    /// mojibake repair before being returned.
    ///
    /// # Errors
    /// * [`ConversionError::SourceParse`] — the report is not well-formed
    ///   under either parse strategy; no stylesheet is fetched.
    /// * [`ConversionError::AllCandidatesFailed`] — every candidate failed;
    ///   carries the last cause.
    pub async fn convert(
        &self,
        request: &ConversionRequest,
    ) -> Result<ConversionOutput, ConversionError> {
        let total_start = Instant::now();
        info!("Starting conversion: {} bytes", request.xml.len());

        // ── Step 1: Decode and parse the report ──────────────────────────────
        let decoded = decode::decode_source(&request.xml);
        let source = document::parse_source(&request.xml, &decoded)
            .map_err(ConversionError::SourceParse)?;
        debug!(
            "Parsed source as {} ({:?}), root <{}>",
            source.encoding, source.strategy, source.root.name
        );

        // ── Step 2: Resolve candidates ───────────────────────────────────────
        let candidates = resolve::stylesheet_candidates(
            &source,
            request.stylesheet_override.as_deref(),
            &self.config,
        );
        if candidates.is_empty() {
            return Err(ConversionError::NoUsableStylesheet);
        }
        let total = candidates.len();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_conversion_start(total);
        }

        // ── Step 3: Try each candidate in order ──────────────────────────────
        let mut attempts = Vec::with_capacity(total);
        let mut last_error: Option<CandidateError> = None;

        for (i, url) in candidates.iter().enumerate() {
            let index = i + 1;
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_candidate_start(index, total, url);
            }

            let attempt_start = Instant::now();
            let result = self.try_candidate(url, &source).await;
            let duration_ms = attempt_start.elapsed().as_millis() as u64;

            match result {
                Ok(raw_html) => {
                    // ── Step 4: Repair ────────────────────────────────────────
                    let html = repair::fix_mojibake(&raw_html);
                    attempts.push(CandidateAttempt {
                        url: url.clone(),
                        error: None,
                        duration_ms,
                    });

                    let stats = ConversionStats {
                        candidates: total,
                        attempted: index,
                        html_bytes: html.len(),
                        total_duration_ms: total_start.elapsed().as_millis() as u64,
                    };
                    info!(
                        "Conversion complete with {} (candidate {}/{}), {}ms total",
                        url, index, total, stats.total_duration_ms
                    );
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_conversion_complete(Some(url));
                    }

                    return Ok(ConversionOutput {
                        html,
                        stylesheet_url: url.clone(),
                        source_encoding: decoded.encoding,
                        attempts,
                        stats,
                    });
                }
                Err(e) => {
                    warn!("Stylesheet candidate {}/{} failed: {}", index, total, e);
                    let message = e.to_string();
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_candidate_failed(index, total, url, &message);
                    }
                    attempts.push(CandidateAttempt {
                        url: url.clone(),
                        error: Some(message),
                        duration_ms,
                    });
                    last_error = Some(e);
                }
            }
        }

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_conversion_complete(None);
        }
        match last_error {
            Some(last_error) => Err(ConversionError::AllCandidatesFailed {
                attempts: attempts.len(),
                last_error,
            }),
            None => Err(ConversionError::NoUsableStylesheet),
        }
    }

    /// Fetch one candidate and apply it. The compiled stylesheet is created
    /// and dropped inside the synchronous `apply_candidate` call.
    async fn try_candidate(&self, url: &str, source: &XmlDocument) -> Result<String, CandidateError> {
        let stylesheet = self.fetcher.fetch(url).await?;
        debug!(
            "Fetched {} ({} bytes, declared {})",
            url,
            stylesheet.bytes.len(),
            stylesheet.encoding
        );
        transform::apply_candidate(&self.engine, &stylesheet, source)
    }
}

/// Convert XML bytes to HTML with a one-off [`Converter`].
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `xml` — the raw report bytes, in whatever encoding they declare
/// * `stylesheet_override` — an absolute stylesheet URL to try first
/// * `config` — conversion configuration
pub async fn convert(
    xml: &[u8],
    stylesheet_override: Option<&str>,
    config: &ConverterConfig,
) -> Result<ConversionOutput, ConversionError> {
    let converter = Converter::new(config.clone())?;
    let mut request = ConversionRequest::new(xml);
    if let Some(url) = stylesheet_override {
        request = request.with_stylesheet(url);
    }
    converter.convert(&request).await
}

/// Convert and write the HTML directly to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    xml: &[u8],
    stylesheet_override: Option<&str>,
    output_path: impl AsRef<Path>,
    config: &ConverterConfig,
) -> Result<ConversionOutput, ConversionError> {
    let output = convert(xml, stylesheet_override, config).await?;
    let path = output_path.as_ref();
    let write_err = |e: std::io::Error| ConversionError::Store {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("html.tmp");
    tokio::fs::write(&tmp_path, &output.html)
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    Ok(output)
}

/// Convert and keep the HTML in a [`TempStore`] for later retrieval by id.
pub async fn convert_to_store(
    xml: &[u8],
    stylesheet_override: Option<&str>,
    store: &TempStore,
    config: &ConverterConfig,
) -> Result<(ConversionOutput, StoredFile), ConversionError> {
    let output = convert(xml, stylesheet_override, config).await?;
    let stored = store.create(&output.html, ".html")?;
    info!("Stored result as {}", stored.filename);
    Ok((output, stored))
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    xml: &[u8],
    stylesheet_override: Option<&str>,
    config: &ConverterConfig,
) -> Result<ConversionOutput, ConversionError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ConversionError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(xml, stylesheet_override, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, TransformError};
    use crate::pipeline::fetch::FetchedResource;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned stylesheets and records every URL it was asked for.
    #[derive(Default)]
    struct MapFetcher {
        responses: HashMap<String, Vec<u8>>,
        requested: Mutex<Vec<String>>,
    }

    impl MapFetcher {
        fn with(mut self, url: &str, body: &str) -> Self {
            self.responses.insert(url.to_string(), body.as_bytes().to_vec());
            self
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl StylesheetFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            match self.responses.get(url) {
                Some(body) => Ok(FetchedResource::from_bytes(url, body.clone())),
                None => Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    /// Echoes the stylesheet's root element name so tests can tell which
    /// candidate won.
    struct EchoEngine;

    impl XsltEngine for EchoEngine {
        type Compiled = String;

        fn compile(&self, stylesheet: &XmlDocument) -> Result<String, TransformError> {
            if stylesheet.root.local_name() == "broken" {
                return Err(TransformError::Compile {
                    url: String::new(),
                    detail: "not XSLT".into(),
                });
            }
            Ok(stylesheet.root.local_name().to_string())
        }

        fn apply(&self, compiled: &String, _source: &XmlDocument) -> Result<String, TransformError> {
            Ok(format!("<html>{}</html>", compiled))
        }
    }

    fn test_config() -> ConverterConfig {
        ConverterConfig::builder()
            .xslt_base_url("https://xslt.example")
            .default_stylesheet("default.xsl")
            .build()
            .unwrap()
    }

    fn converter(fetcher: MapFetcher) -> Converter<MapFetcher, EchoEngine> {
        Converter::with_parts(test_config(), fetcher, EchoEngine)
    }

    const WITH_PI: &str = r#"<?xml version="1.0"?>
<?xml-stylesheet type="text/xsl" href="https://a.example/one.xsl"?>
<?xml-stylesheet type="text/xsl" href="https://b.example/two.xsl"?>
<report/>"#;

    #[tokio::test]
    async fn first_working_candidate_wins() {
        let fetcher = MapFetcher::default()
            .with("https://a.example/one.xsl", "<first/>")
            .with("https://b.example/two.xsl", "<second/>");
        let conv = converter(fetcher);

        let out = conv.convert(&ConversionRequest::new(WITH_PI)).await.unwrap();
        assert_eq!(out.stylesheet_url, "https://a.example/one.xsl");
        assert_eq!(out.html, "<html>first</html>");
        assert_eq!(out.stats.attempted, 1);
        assert_eq!(conv.fetcher.requested(), vec!["https://a.example/one.xsl"]);
    }

    #[tokio::test]
    async fn falls_through_to_next_candidate() {
        let fetcher = MapFetcher::default().with("https://b.example/two.xsl", "<second/>");
        let conv = converter(fetcher);

        let out = conv.convert(&ConversionRequest::new(WITH_PI)).await.unwrap();
        assert_eq!(out.stylesheet_url, "https://b.example/two.xsl");
        assert_eq!(out.attempts.len(), 2);
        assert!(out.attempts[0].error.as_deref().unwrap().contains("404"));
        assert!(out.attempts[1].error.is_none());
        assert_eq!(
            conv.fetcher.requested(),
            vec!["https://a.example/one.xsl", "https://b.example/two.xsl"]
        );
    }

    #[tokio::test]
    async fn compile_failure_moves_on() {
        let fetcher = MapFetcher::default()
            .with("https://a.example/one.xsl", "<broken/>")
            .with("https://b.example/two.xsl", "<second/>");
        let out = converter(fetcher)
            .convert(&ConversionRequest::new(WITH_PI))
            .await
            .unwrap();
        assert_eq!(out.html, "<html>second</html>");
        assert!(out.attempts[0].error.as_deref().unwrap().contains("not XSLT"));
    }

    #[tokio::test]
    async fn override_is_tried_first() {
        let fetcher = MapFetcher::default()
            .with("https://o.example/mine.xsl", "<mine/>")
            .with("https://a.example/one.xsl", "<first/>");
        let conv = converter(fetcher);
        let req = ConversionRequest::new(WITH_PI).with_stylesheet("https://o.example/mine.xsl");

        let out = conv.convert(&req).await.unwrap();
        assert_eq!(out.stylesheet_url, "https://o.example/mine.xsl");
        assert_eq!(out.stats.candidates, 3);
    }

    #[tokio::test]
    async fn default_stylesheet_without_instructions() {
        let fetcher = MapFetcher::default().with("https://xslt.example/default.xsl", "<fallback/>");
        let out = converter(fetcher)
            .convert(&ConversionRequest::new("<report/>"))
            .await
            .unwrap();
        assert_eq!(out.stylesheet_url, "https://xslt.example/default.xsl");
    }

    #[tokio::test]
    async fn all_failed_reports_count_and_last_cause() {
        let conv = converter(MapFetcher::default());
        let err = conv.convert(&ConversionRequest::new(WITH_PI)).await.unwrap_err();
        match &err {
            ConversionError::AllCandidatesFailed { attempts, last_error } => {
                assert_eq!(*attempts, 2);
                assert!(last_error.to_string().contains("two.xsl"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("None of the 2 XSLT stylesheet(s)"));
    }

    #[tokio::test]
    async fn malformed_source_fetches_nothing() {
        let conv = converter(MapFetcher::default());
        let err = conv
            .convert(&ConversionRequest::new("<report><unclosed></report>"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::SourceParse(_)));
        assert!(conv.fetcher.requested().is_empty());
    }

    #[tokio::test]
    async fn deeply_nested_source_is_rejected_before_fetching() {
        let conv = converter(MapFetcher::default());
        let xml = "<a>".repeat(20_000) + &"</a>".repeat(20_000);
        let err = conv.convert(&ConversionRequest::new(xml)).await.unwrap_err();
        assert!(matches!(err, ConversionError::SourceParse(_)));
        assert!(err.to_string().contains("nested too deeply"), "got: {err}");
        assert!(conv.fetcher.requested().is_empty());
    }

    #[tokio::test]
    async fn output_is_repaired() {
        struct MojibakeEngine;
        impl XsltEngine for MojibakeEngine {
            type Compiled = ();
            fn compile(&self, _: &XmlDocument) -> Result<(), TransformError> {
                Ok(())
            }
            fn apply(&self, _: &(), _: &XmlDocument) -> Result<String, TransformError> {
                Ok("<p>a â€” b</p>".to_string())
            }
        }

        let fetcher = MapFetcher::default().with("https://xslt.example/default.xsl", "<x/>");
        let conv = Converter::with_parts(test_config(), fetcher, MojibakeEngine);
        let out = conv.convert(&ConversionRequest::new("<report/>")).await.unwrap();
        assert_eq!(out.html, "<p>a — b</p>");
    }

    #[test]
    fn convert_sync_reports_source_errors() {
        let config = ConverterConfig::default();
        let err = convert_sync(b"not xml at all", None, &config).unwrap_err();
        assert!(matches!(err, ConversionError::SourceParse(_)));
    }
}
