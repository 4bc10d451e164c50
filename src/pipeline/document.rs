//! XML parsing into a lightweight document tree.
//!
//! The tree keeps only what the pipeline needs: every processing
//! instruction (for stylesheet discovery), and the element hierarchy with
//! resolved namespaces (for the schema check). The full text is kept
//! alongside so the XSLT engine can build its own tree from it.
//!
//! Parsing is a two-step attempt. The first step decodes the raw bytes
//! strictly with the encoding hint; the second parses text that is known
//! to be decodable (the decoder's output for sources, a BOM-sniffed or
//! lossy UTF-8 read for stylesheets). Only when both fail is the input
//! reported as malformed.

use super::decode::{decode_strict, DecodedText};
use crate::error::ParseError;
use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use tracing::debug;

/// Deepest element nesting accepted, matching libxml2's default limit.
pub const MAX_DEPTH: usize = 256;

static RE_DECL_ENCODING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\s*<\?xml[^>]*?encoding\s*=\s*)(?:"[^"]*"|'[^']*')"#).unwrap()
});

/// Which of the two parse steps produced a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// Raw bytes decoded strictly with the encoding hint.
    EncodingHint,
    /// Already-decoded or encoding-agnostic text.
    Fallback,
}

/// A `<?target content?>` processing instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingInstruction {
    pub target: String,
    pub content: String,
}

/// An element and its element children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as written, e.g. `xsl:stylesheet`.
    pub name: String,
    /// Namespace URI bound to the element's prefix (or the default
    /// namespace), if any.
    pub namespace: Option<String>,
    /// Attributes as written (qualified name, raw value), excluding
    /// namespace declarations.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
}

impl Element {
    /// Value of the attribute with this qualified name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The name without its prefix.
    pub fn local_name(&self) -> &str {
        self.name
            .rsplit_once(':')
            .map(|(_, local)| local)
            .unwrap_or(&self.name)
    }
}

/// A parsed XML document.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    /// Unicode text of the document. Its XML declaration, if any, says
    /// `encoding="UTF-8"` so downstream parsers read it as the string it is.
    pub text: String,
    /// Label of the encoding the text was decoded from.
    pub encoding: String,
    pub strategy: ParseStrategy,
    /// All processing instructions, in document order.
    pub processing_instructions: Vec<ProcessingInstruction>,
    pub root: Element,
}

impl XmlDocument {
    /// Parse Unicode text into a document.
    pub fn parse(
        text: &str,
        encoding: impl Into<String>,
        strategy: ParseStrategy,
    ) -> Result<Self, ParseError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let (processing_instructions, root) = parse_tree(text)?;
        Ok(Self {
            text: normalise_declaration(text),
            encoding: encoding.into(),
            strategy,
            processing_instructions,
            root,
        })
    }
}

/// Parse an uploaded report.
///
/// Step one strictly decodes `bytes` with the encoding the decoder settled
/// on; step two parses the decoder's own text.
pub fn parse_source(bytes: &[u8], decoded: &DecodedText) -> Result<XmlDocument, ParseError> {
    if let Some(text) = decode_strict(bytes, &decoded.encoding) {
        match XmlDocument::parse(&text, decoded.encoding.as_str(), ParseStrategy::EncodingHint) {
            Ok(doc) => return Ok(doc),
            Err(e) => debug!("Encoding-hinted parse failed ({}), retrying with decoded text", e),
        }
    }
    XmlDocument::parse(&decoded.text, decoded.encoding.as_str(), ParseStrategy::Fallback)
}

/// Parse fetched stylesheet or schema bytes.
///
/// Step one strictly decodes with `encoding_hint`; step two ignores the
/// hint, honouring a byte-order mark if present and otherwise reading the
/// bytes as UTF-8 with replacement.
pub fn parse_fetched(bytes: &[u8], encoding_hint: &str) -> Result<XmlDocument, ParseError> {
    if let Some(text) = decode_strict(bytes, encoding_hint) {
        match XmlDocument::parse(&text, encoding_hint, ParseStrategy::EncodingHint) {
            Ok(doc) => return Ok(doc),
            Err(e) => debug!("Stylesheet parse with {} failed ({}), retrying without hint", encoding_hint, e),
        }
    }

    let (text, label) = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => {
            let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
            (text.into_owned(), encoding.name().to_lowercase())
        }
        None => (String::from_utf8_lossy(bytes).into_owned(), "utf-8".to_string()),
    };
    XmlDocument::parse(&text, label, ParseStrategy::Fallback)
}

/// Rewrite the encoding pseudo-attribute of a leading XML declaration to
/// UTF-8. Text without a declaration is returned unchanged.
pub fn normalise_declaration(text: &str) -> String {
    RE_DECL_ENCODING
        .replace(text, r#"${1}"UTF-8""#)
        .into_owned()
}

/// Namespace bindings introduced by one element: (prefix, uri), with an
/// empty prefix for the default namespace.
type Scope = Vec<(String, String)>;

fn parse_tree(text: &str) -> Result<(Vec<ProcessingInstruction>, Element), ParseError> {
    let mut reader = Reader::from_str(text);
    let mut pis = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut scopes: Vec<Scope> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let position = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if root.is_some() && stack.is_empty() {
                    return Err(ParseError::new("more than one root element", position));
                }
                check_depth(&stack, position)?;
                let element = open_element(&e, &mut scopes, position)?;
                stack.push(element);
            }
            Ok(Event::Empty(e)) => {
                if root.is_some() && stack.is_empty() {
                    return Err(ParseError::new("more than one root element", position));
                }
                check_depth(&stack, position)?;
                let element = open_element(&e, &mut scopes, position)?;
                scopes.pop();
                attach(element, &mut stack, &mut root);
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ParseError::new("closing tag without an open element", position))?;
                scopes.pop();
                attach(element, &mut stack, &mut root);
            }
            Ok(Event::Text(e)) => {
                if stack.is_empty() && !e.as_ref().iter().all(u8::is_ascii_whitespace) {
                    return Err(ParseError::new("character data outside the root element", position));
                }
            }
            Ok(Event::PI(e)) => {
                pis.push(ProcessingInstruction {
                    target: String::from_utf8_lossy(e.target()).into_owned(),
                    content: String::from_utf8_lossy(e.content()).trim().to_string(),
                });
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::new(e.to_string(), reader.error_position())),
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::new(
            format!("element <{}> is never closed", open.name),
            reader.buffer_position(),
        ));
    }
    let root = root.ok_or_else(|| ParseError::new("document has no root element", 0))?;
    Ok((pis, root))
}

fn check_depth(stack: &[Element], position: u64) -> Result<(), ParseError> {
    if stack.len() >= MAX_DEPTH {
        return Err(ParseError::new("document nested too deeply", position));
    }
    Ok(())
}

fn open_element(
    start: &BytesStart<'_>,
    scopes: &mut Vec<Scope>,
    position: u64,
) -> Result<Element, ParseError> {
    let mut scope = Scope::new();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ParseError::new(e.to_string(), position))?;
        let key = attr.key.as_ref();
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        if key == b"xmlns" {
            scope.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
            scope.push((String::from_utf8_lossy(prefix).into_owned(), value));
        } else {
            attributes.push((String::from_utf8_lossy(key).into_owned(), value));
        }
    }
    scopes.push(scope);

    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let prefix = name.rsplit_once(':').map(|(p, _)| p).unwrap_or("");
    let namespace = scopes
        .iter()
        .rev()
        .flat_map(|s| s.iter())
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.clone())
        .filter(|uri| !uri.is_empty());

    Ok(Element {
        name,
        namespace,
        attributes,
        children: Vec::new(),
    })
}

fn attach(element: Element, stack: &mut [Element], root: &mut Option<Element>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<XmlDocument, ParseError> {
        XmlDocument::parse(text, "utf-8", ParseStrategy::Fallback)
    }

    #[test]
    fn collects_processing_instructions_in_order() {
        let doc = parse(
            r#"<?xml version="1.0"?>
<?xml-stylesheet type="text/xsl" href="a.xsl"?>
<?other data?>
<report><?xml-stylesheet href="b.xsl"?></report>"#,
        )
        .unwrap();
        let targets: Vec<&str> = doc
            .processing_instructions
            .iter()
            .map(|pi| pi.target.as_str())
            .collect();
        assert_eq!(targets, vec!["xml-stylesheet", "other", "xml-stylesheet"]);
        assert_eq!(doc.processing_instructions[0].content, r#"type="text/xsl" href="a.xsl""#);
    }

    #[test]
    fn resolves_default_and_prefixed_namespaces() {
        let doc = parse(
            r#"<r:report xmlns:r="urn:r" xmlns="urn:d"><item/><r:total/></r:report>"#,
        )
        .unwrap();
        assert_eq!(doc.root.local_name(), "report");
        assert_eq!(doc.root.namespace.as_deref(), Some("urn:r"));
        assert_eq!(doc.root.children[0].namespace.as_deref(), Some("urn:d"));
        assert_eq!(doc.root.children[1].namespace.as_deref(), Some("urn:r"));
    }

    #[test]
    fn keeps_attributes_but_not_namespace_declarations() {
        let doc = parse(r#"<xs:element xmlns:xs="urn:x" name="report" type="xs:string"/>"#).unwrap();
        assert_eq!(doc.root.attr("name"), Some("report"));
        assert_eq!(doc.root.attr("type"), Some("xs:string"));
        assert_eq!(doc.root.attr("xmlns:xs"), None);
    }

    #[test]
    fn rejects_mismatched_tags() {
        assert!(parse("<a><b></a></b>").is_err());
    }

    #[test]
    fn rejects_unclosed_root() {
        assert!(parse("<a><b/>").is_err());
    }

    #[test]
    fn rejects_empty_and_multi_root_documents() {
        assert!(parse("").is_err());
        assert!(parse("<a/><b/>").is_err());
        assert!(parse("<a/>trailing").is_err());
    }

    fn nested(depth: usize) -> String {
        "<a>".repeat(depth) + &"</a>".repeat(depth)
    }

    #[test]
    fn accepts_nesting_up_to_the_limit() {
        assert!(parse(&nested(MAX_DEPTH)).is_ok());
        let leaf = "<a>".repeat(MAX_DEPTH - 1) + "<b/>" + &"</a>".repeat(MAX_DEPTH - 1);
        assert!(parse(&leaf).is_ok());
    }

    #[test]
    fn rejects_nesting_past_the_limit() {
        let err = parse(&nested(MAX_DEPTH + 1)).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"), "got: {err}");
        let leaf = "<a>".repeat(MAX_DEPTH) + "<b/>" + &"</a>".repeat(MAX_DEPTH);
        assert!(parse(&leaf).is_err());
    }

    #[test]
    fn deeply_nested_source_is_a_parse_error() {
        let bytes = nested(20_000).into_bytes();
        let decoded = DecodedText {
            text: nested(20_000),
            encoding: "utf-8".into(),
        };
        let err = parse_source(&bytes, &decoded).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"), "got: {err}");
    }

    #[test]
    fn declaration_is_rewritten_to_utf8() {
        let doc = parse(r#"<?xml version="1.0" encoding="windows-1251"?><r/>"#).unwrap();
        assert_eq!(doc.text, r#"<?xml version="1.0" encoding="UTF-8"?><r/>"#);
        assert_eq!(normalise_declaration("<r/>"), "<r/>");
    }

    #[test]
    fn source_prefers_encoding_hint() {
        let (bytes, _, _) = encoding_rs::WINDOWS_1251.encode("<r>Счёт</r>");
        let decoded = DecodedText {
            text: "<r>Счёт</r>".into(),
            encoding: "windows-1251".into(),
        };
        let doc = parse_source(&bytes, &decoded).unwrap();
        assert_eq!(doc.strategy, ParseStrategy::EncodingHint);
        assert!(doc.text.contains("Счёт"));
    }

    #[test]
    fn source_falls_back_to_decoded_text() {
        // The hint cannot decode these bytes, but the decoder's text parses.
        let decoded = DecodedText {
            text: "<r>ok</r>".into(),
            encoding: "utf-8".into(),
        };
        let doc = parse_source(b"<r>\xff</r>", &decoded).unwrap();
        assert_eq!(doc.strategy, ParseStrategy::Fallback);
    }

    #[test]
    fn stylesheet_with_lying_declaration_still_parses() {
        // Declares utf-8 but is windows-1251; the fallback reads it lossily.
        let mut bytes = br#"<?xml version="1.0" encoding="utf-8"?><xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0"><xsl:template match="/">"#.to_vec();
        bytes.extend_from_slice(b"\xce\xf2\xf7\xe5\xf2");
        bytes.extend_from_slice(b"</xsl:template></xsl:stylesheet>");
        let doc = parse_fetched(&bytes, "utf-8").unwrap();
        assert_eq!(doc.strategy, ParseStrategy::Fallback);
        assert_eq!(doc.root.local_name(), "stylesheet");
    }

    #[test]
    fn stylesheet_garbage_is_an_error() {
        assert!(parse_fetched(b"<not closed", "utf-8").is_err());
    }
}
