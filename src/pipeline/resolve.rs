//! Stylesheet discovery: build the ordered candidate list for a document.
//!
//! Reports reference their stylesheet through an `xml-stylesheet`
//! processing instruction. Older exchange clients wrote absolute paths into
//! a local install (`C:\MICEX\XSLT\...`), which are meaningless anywhere
//! else, so those are rewritten onto the exchange's published directory.

use super::document::XmlDocument;
use crate::config::{join_base, ConverterConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Processing-instruction target that associates a stylesheet.
pub const STYLESHEET_PI_TARGET: &str = "xml-stylesheet";

/// Local directory where legacy clients installed stylesheets.
pub const LEGACY_XSLT_PREFIX: &str = r"C:\MICEX\XSLT\";

/// Local directory where legacy clients installed schemas.
pub const LEGACY_XSD_PREFIX: &str = r"C:\MICEX\XSD\";

// Legacy producers emit attribute syntax a strict PI-attribute parser
// rejects, so the href is pattern-matched.
static RE_HREF: Lazy<Regex> = Lazy::new(|| Regex::new(r#"href=['"]([^'"]+)['"]"#).unwrap());

/// Rewrite one stylesheet reference into a fetchable URL.
///
/// Legacy `C:\MICEX\XSLT\` paths map onto the XSLT base URL and
/// `C:\MICEX\XSD\` paths onto the XSD base URL (when one is configured).
/// Anything else passes through unchanged.
pub fn resolve_href(href: &str, config: &ConverterConfig) -> String {
    if starts_with_ignore_case(href, LEGACY_XSLT_PREFIX) {
        return join_base(&config.xslt_base_url, bare_file_name(href));
    }
    if starts_with_ignore_case(href, LEGACY_XSD_PREFIX) {
        if let Some(ref xsd_base) = config.xsd_base_url {
            return join_base(xsd_base, bare_file_name(href));
        }
    }
    href.to_string()
}

/// Resolved hrefs of every `xml-stylesheet` instruction, in document order.
pub fn discover_stylesheets(doc: &XmlDocument, config: &ConverterConfig) -> Vec<String> {
    doc.processing_instructions
        .iter()
        .filter(|pi| pi.target == STYLESHEET_PI_TARGET)
        .filter_map(|pi| RE_HREF.captures(&pi.content))
        .map(|caps| resolve_href(&caps[1], config))
        .collect()
}

/// The full candidate list for a conversion.
///
/// An explicit override always comes first. When neither an override nor
/// any instruction is present, the configured default stylesheet is the
/// single candidate.
pub fn stylesheet_candidates(
    doc: &XmlDocument,
    explicit: Option<&str>,
    config: &ConverterConfig,
) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(url) = explicit {
        candidates.push(url.to_string());
    }
    candidates.extend(discover_stylesheets(doc, config));

    if candidates.is_empty() {
        candidates.push(join_base(&config.xslt_base_url, &config.default_stylesheet));
    }
    debug!("Stylesheet candidates: {:?}", candidates);
    candidates
}

// The exchange's own converter matches the legacy prefix case-sensitively;
// Windows paths are not, so `c:\micex\xslt\` is rebased here too.
fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn bare_file_name(path: &str) -> &str {
    path.rsplit('\\').next().unwrap_or(path)
}
