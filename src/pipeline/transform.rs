//! XSLT application.
//!
//! The processor sits behind [`XsltEngine`] so the pipeline's candidate
//! loop does not depend on a particular implementation. The default
//! [`XrustEngine`] is a pure-Rust XSLT processor.
//!
//! Compiled stylesheets may hold reference-counted trees that are not
//! `Send`; [`apply_candidate`] is synchronous so they never live across an
//! `.await` in the async pipeline.

use super::document::{parse_fetched, XmlDocument};
use super::fetch::FetchedResource;
use crate::error::{CandidateError, TransformError};
use tracing::debug;
use xrust::item::Item;
use xrust::parser::xml::parse;
use xrust::transform::context::{Context, StaticContextBuilder};
use xrust::trees::smite::RNode;
use xrust::xdmerror::{Error as XrustError, ErrorKind};
use xrust::xslt::from_document;
use xrust::Node;
use xrust::SequenceTrait;

/// An XSLT processor.
///
/// Errors returned by an engine may leave the `url` field empty; the
/// pipeline fills it in with the candidate being tried.
pub trait XsltEngine: Send + Sync {
    /// A stylesheet ready to be applied.
    type Compiled;

    /// Compile a parsed stylesheet document.
    fn compile(&self, stylesheet: &XmlDocument) -> Result<Self::Compiled, TransformError>;

    /// Apply a compiled stylesheet to a source document and serialise the
    /// result.
    fn apply(&self, compiled: &Self::Compiled, source: &XmlDocument) -> Result<String, TransformError>;
}

/// Parse, compile and apply one fetched stylesheet to `source`.
pub fn apply_candidate<E: XsltEngine>(
    engine: &E,
    stylesheet: &FetchedResource,
    source: &XmlDocument,
) -> Result<String, CandidateError> {
    let parsed = parse_fetched(&stylesheet.bytes, &stylesheet.encoding).map_err(|source| {
        CandidateError::Parse {
            url: stylesheet.url.clone(),
            source,
        }
    })?;
    debug!(
        "Parsed stylesheet {} ({:?}, {})",
        stylesheet.url, parsed.strategy, parsed.encoding
    );

    let compiled = engine
        .compile(&parsed)
        .map_err(|e| e.with_url(&stylesheet.url))?;
    let html = engine
        .apply(&compiled, source)
        .map_err(|e| e.with_url(&stylesheet.url))?;
    Ok(html)
}

/// [`XsltEngine`] backed by the `xrust` processor.
///
/// `document()` calls and `xsl:include`/`xsl:import` of remote resources
/// are not resolved.
#[derive(Debug, Clone, Copy, Default)]
pub struct XrustEngine;

impl XrustEngine {
    pub fn new() -> Self {
        XrustEngine
    }

    fn parse_xml(s: &str) -> Result<RNode, XrustError> {
        let doc = RNode::new_document();
        parse(doc.clone(), s, None)?;
        Ok(doc)
    }
}

impl XsltEngine for XrustEngine {
    type Compiled = Context<RNode>;

    fn compile(&self, stylesheet: &XmlDocument) -> Result<Self::Compiled, TransformError> {
        let compile_err = |e: XrustError| TransformError::Compile {
            url: String::new(),
            detail: e.to_string(),
        };

        let style_doc = Self::parse_xml(&stylesheet.text).map_err(compile_err)?;
        from_document(
            style_doc,
            None,
            |s| Self::parse_xml(s),
            |_| Ok(String::new()),
        )
        .map_err(compile_err)
    }

    fn apply(&self, compiled: &Self::Compiled, source: &XmlDocument) -> Result<String, TransformError> {
        let apply_err = |e: XrustError| TransformError::Apply {
            url: String::new(),
            detail: e.to_string(),
        };

        let src_doc = Self::parse_xml(&source.text).map_err(apply_err)?;

        let mut ctx = compiled.clone();
        ctx.context(vec![Item::Node(src_doc)], 0);
        ctx.result_document(RNode::new_document());

        let mut static_context = StaticContextBuilder::new()
            .message(|_| Ok(()))
            .fetcher(|_| {
                Err(XrustError::new(
                    ErrorKind::NotImplemented,
                    "document() is not supported",
                ))
            })
            .parser(|_| {
                Err(XrustError::new(
                    ErrorKind::NotImplemented,
                    "external documents are not supported",
                ))
            })
            .build();

        let result = ctx.evaluate(&mut static_context).map_err(apply_err)?;
        Ok(result.to_xml())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::document::ParseStrategy;

    const STYLESHEET: &str = r#"<?xml version="1.0" encoding="windows-1251"?>
<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="/">
    <html><body><h1><xsl:value-of select="report/title"/></h1></body></html>
  </xsl:template>
</xsl:stylesheet>"#;

    struct FailingEngine;

    impl XsltEngine for FailingEngine {
        type Compiled = ();

        fn compile(&self, _stylesheet: &XmlDocument) -> Result<(), TransformError> {
            Err(TransformError::Compile {
                url: String::new(),
                detail: "unsupported instruction".into(),
            })
        }

        fn apply(&self, _compiled: &(), _source: &XmlDocument) -> Result<String, TransformError> {
            unreachable!()
        }
    }

    fn source() -> XmlDocument {
        XmlDocument::parse(
            "<report><title>Сводный отчёт</title></report>",
            "utf-8",
            ParseStrategy::Fallback,
        )
        .unwrap()
    }

    #[test]
    fn xrust_applies_simple_stylesheet() {
        let (bytes, _, _) = encoding_rs::WINDOWS_1251.encode(STYLESHEET);
        let resource = FetchedResource::from_bytes("https://example.com/r.xsl", bytes.into_owned());
        let html = apply_candidate(&XrustEngine::new(), &resource, &source()).unwrap();
        assert!(html.contains("Сводный отчёт"), "got: {html}");
        assert!(html.contains("h1"), "got: {html}");
    }

    #[test]
    fn malformed_stylesheet_is_a_parse_failure() {
        let resource = FetchedResource::from_bytes("https://example.com/bad.xsl", b"<xsl:stylesheet".to_vec());
        let err = apply_candidate(&XrustEngine::new(), &resource, &source()).unwrap_err();
        assert!(matches!(err, CandidateError::Parse { .. }), "got: {err:?}");
        assert!(err.to_string().contains("bad.xsl"));
    }

    #[test]
    fn engine_errors_carry_candidate_url() {
        let resource = FetchedResource::from_bytes("https://example.com/c.xsl", STYLESHEET.as_bytes().to_vec());
        let err = apply_candidate(&FailingEngine, &resource, &source()).unwrap_err();
        assert!(err.to_string().contains("https://example.com/c.xsl"), "got: {err}");
        assert!(err.to_string().contains("unsupported instruction"));
    }
}
