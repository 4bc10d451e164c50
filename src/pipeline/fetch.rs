//! Stylesheet and schema retrieval over HTTP.
//!
//! Fetching only returns bytes and the encoding the resource declares;
//! decoding is left to the parser, which needs the raw bytes to attempt a
//! strict decode with that hint before falling back.

use super::decode::sniff_declared_encoding;
use crate::error::FetchError;
use reqwest::Url;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Bytes of a stylesheet inspected for an `encoding="..."` declaration.
pub const STYLESHEET_SNIFF_WINDOW: usize = 200;

/// A fetched resource: raw bytes and the encoding it declares (UTF-8 if
/// it declares none).
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub url: String,
    pub bytes: Vec<u8>,
    pub encoding: String,
}

impl FetchedResource {
    /// Wrap bytes obtained elsewhere, sniffing their declared encoding.
    pub fn from_bytes(url: impl Into<String>, bytes: Vec<u8>) -> Self {
        let encoding = sniff_declared_encoding(&bytes, STYLESHEET_SNIFF_WINDOW)
            .unwrap_or_else(|| "utf-8".to_string());
        Self {
            url: url.into(),
            bytes,
            encoding,
        }
    }
}

/// Source of stylesheet and schema bytes.
///
/// The pipeline calls [`fetch`](Self::fetch) once per candidate, strictly
/// sequentially.
pub trait StylesheetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedResource, FetchError>> + Send;
}

/// [`StylesheetFetcher`] backed by a `reqwest` client with a per-request
/// timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Build a fetcher with its own client.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                reason: format!("could not build HTTP client: {e}"),
            })?;
        Ok(Self { client, timeout })
    }

    /// Use a caller-configured client (proxies, TLS roots, ...). `timeout` is
    /// applied to every request on top of the client's own settings.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn get(&self, url: &str) -> Result<FetchedResource, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        info!("Fetching stylesheet: {}", url);
        let response = self
            .client
            .get(parsed)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                self.classify(url, e)
            } else {
                FetchError::Body {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let resource = FetchedResource::from_bytes(url, bytes.to_vec());
        debug!(
            "Fetched {} bytes from {} (declared encoding {})",
            resource.bytes.len(),
            url,
            resource.encoding
        );
        Ok(resource)
    }

    fn classify(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

impl StylesheetFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedResource, FetchError>> + Send {
        self.get(url)
    }
}
