//! Configuration types for XML-to-HTML conversion.
//!
//! All conversion behaviour is controlled through [`ConverterConfig`], built
//! via its [`ConverterConfigBuilder`]. The config is immutable once built;
//! a [`crate::Converter`] owns one and shares it read-only across calls.

use crate::error::ConversionError;
use crate::progress::ProgressCallback;
use reqwest::Url;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Remote directory holding the exchange's published XSLT stylesheets.
pub const DEFAULT_XSLT_BASE: &str = "https://ftp.moex.com/pub/Reports/Currency/XSLT";

/// Remote directory holding the exchange's published XSD schemas.
pub const DEFAULT_XSD_BASE: &str = "https://ftp.moex.com/pub/Reports/Currency/XSD";

/// Stylesheet used when a report names none.
pub const DEFAULT_STYLESHEET: &str = "CCX99_RU_23062025.xsl";

/// Configuration for an XML-to-HTML conversion.
///
/// Built via [`ConverterConfig::builder()`] or using
/// [`ConverterConfig::default()`].
///
/// # Example
/// ```rust
/// use moex_xml2html::ConverterConfig;
/// use std::time::Duration;
///
/// let config = ConverterConfig::builder()
///     .xslt_base_url("https://mirror.example.com/XSLT")
///     .fetch_timeout(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConverterConfig {
    /// Base URL that legacy `C:\MICEX\XSLT\` references and the default
    /// stylesheet are joined against.
    pub xslt_base_url: String,

    /// Base URL for legacy `C:\MICEX\XSD\` references. When `None`, such
    /// references pass through unchanged.
    pub xsd_base_url: Option<String>,

    /// Upper bound for each stylesheet or schema fetch. Default: 30 s.
    pub fetch_timeout: Duration,

    /// File name joined to `xslt_base_url` when a document references no
    /// stylesheet and the caller supplies none.
    pub default_stylesheet: String,

    /// Lower-case extensions (with leading dot) accepted for uploads.
    pub allowed_extensions: Vec<String>,

    /// Largest accepted upload in bytes. Default: 16 MiB.
    pub max_upload_bytes: usize,

    /// Directory used by [`crate::store::TempStore`].
    pub temp_dir: PathBuf,

    /// File-name prefix for stored conversion results.
    pub temp_prefix: String,

    /// Age after which stored results are removed by cleanup. Default: 1 h.
    pub temp_file_lifetime: Duration,

    /// Receives per-candidate events; `None` disables reporting.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            xslt_base_url: DEFAULT_XSLT_BASE.to_string(),
            xsd_base_url: Some(DEFAULT_XSD_BASE.to_string()),
            fetch_timeout: Duration::from_secs(30),
            default_stylesheet: DEFAULT_STYLESHEET.to_string(),
            allowed_extensions: vec![".xml".to_string()],
            max_upload_bytes: 16 * 1024 * 1024,
            temp_dir: std::env::temp_dir().join("moex_xml2html"),
            temp_prefix: "moex_".to_string(),
            temp_file_lifetime: Duration::from_secs(3600),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConverterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterConfig")
            .field("xslt_base_url", &self.xslt_base_url)
            .field("xsd_base_url", &self.xsd_base_url)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("default_stylesheet", &self.default_stylesheet)
            .field("allowed_extensions", &self.allowed_extensions)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("temp_dir", &self.temp_dir)
            .field("temp_prefix", &self.temp_prefix)
            .field("temp_file_lifetime", &self.temp_file_lifetime)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConverterConfig {
    /// Create a new builder for `ConverterConfig`.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn xslt_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.xslt_base_url = url.into();
        self
    }

    pub fn xsd_base_url(mut self, url: Option<String>) -> Self {
        self.config.xsd_base_url = url;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout = Duration::from_secs(secs);
        self
    }

    pub fn default_stylesheet(mut self, name: impl Into<String>) -> Self {
        self.config.default_stylesheet = name.into();
        self
    }

    /// Replace the accepted upload extensions. Entries are normalised to
    /// lower case with a leading dot, so `"XML"` and `".xml"` are equivalent.
    pub fn allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = extensions
            .into_iter()
            .map(|e| {
                let e = e.as_ref().trim().to_lowercase();
                if e.starts_with('.') { e } else { format!(".{e}") }
            })
            .collect();
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = dir.into();
        self
    }

    pub fn temp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.temp_prefix = prefix.into();
        self
    }

    pub fn temp_file_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.temp_file_lifetime = lifetime;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, ConversionError> {
        let c = &self.config;
        check_base_url("XSLT base URL", &c.xslt_base_url)?;
        if let Some(ref xsd) = c.xsd_base_url {
            check_base_url("XSD base URL", xsd)?;
        }
        if c.fetch_timeout.is_zero() {
            return Err(ConversionError::InvalidConfig(
                "Fetch timeout must be greater than zero".into(),
            ));
        }
        if c.default_stylesheet.trim().is_empty() {
            return Err(ConversionError::InvalidConfig(
                "Default stylesheet name must not be empty".into(),
            ));
        }
        if c.allowed_extensions.is_empty() {
            return Err(ConversionError::InvalidConfig(
                "At least one upload extension must be allowed".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(ConversionError::InvalidConfig(
                "Maximum upload size must be ≥ 1 byte".into(),
            ));
        }
        Ok(self.config)
    }
}

fn check_base_url(what: &str, value: &str) -> Result<(), ConversionError> {
    let url = Url::parse(value)
        .map_err(|e| ConversionError::InvalidConfig(format!("{what} '{value}' is not a URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConversionError::InvalidConfig(format!(
            "{what} '{value}' must use http or https, not '{other}'"
        ))),
    }
}

/// Join a bare file name onto a base directory URL.
///
/// The base is treated as a directory whether or not it ends with `/`, so
/// `https://host/XSLT` + `a.xsl` gives `https://host/XSLT/a.xsl`.
pub fn join_base(base: &str, file_name: &str) -> String {
    let dir = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };
    match Url::parse(&dir).and_then(|u| u.join(file_name)) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{dir}{file_name}"),
    }
}
