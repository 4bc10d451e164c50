//! XML validation against an optional XSD.
//!
//! Validation never fails outward: every outcome, including an unreachable
//! schema, is a [`ValidationReport`] whose [`ValidationKind`] says which
//! class of problem was found.
//!
//! The schema check is structural. It compiles the schema's element
//! declarations (top-level, inline and named complex types, `ref`s) and
//! verifies that the document's root is declared in the right namespace and
//! that every element below a declared element is one of its declared
//! children. Occurrence counts, attribute declarations and simple-type
//! facets are not checked; a content model containing `xs:any`, a derived
//! type or an unknown type accepts anything.

use crate::convert::Converter;
use crate::pipeline::decode;
use crate::pipeline::document::{parse_fetched, Element, ParseStrategy, XmlDocument};
use crate::pipeline::fetch::StylesheetFetcher;
use crate::pipeline::resolve;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Namespace of XML Schema documents.
pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// Which class of outcome a validation produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Valid,
    /// The document is not well-formed XML.
    Syntax,
    /// Well-formed, but does not conform to the schema.
    Schema,
    /// The schema could not be fetched or is not a usable XSD.
    SchemaUnavailable,
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationKind::Valid => "valid",
            ValidationKind::Syntax => "syntax error",
            ValidationKind::Schema => "schema violation",
            ValidationKind::SchemaUnavailable => "schema unavailable",
        };
        f.write_str(s)
    }
}

/// Outcome of [`Converter::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub kind: ValidationKind,
    /// Human-readable summary.
    pub message: String,
}

impl ValidationReport {
    fn valid() -> Self {
        Self {
            valid: true,
            kind: ValidationKind::Valid,
            message: "XML is valid".to_string(),
        }
    }

    fn invalid(kind: ValidationKind, message: String) -> Self {
        Self {
            valid: false,
            kind,
            message,
        }
    }
}

impl<F: StylesheetFetcher, E> Converter<F, E> {
    /// Check that `xml` is well-formed and, when `schema_url` is given, that
    /// it conforms to that schema.
    ///
    /// `schema_url` may be an absolute URL or a legacy
    /// `C:\MICEX\XSD\...` path, which is rebased onto the configured XSD
    /// base URL.
    pub async fn validate(&self, xml: &[u8], schema_url: Option<&str>) -> ValidationReport {
        let decoded = decode::decode_source(xml);
        let doc = match XmlDocument::parse(&decoded.text, decoded.encoding.as_str(), ParseStrategy::Fallback) {
            Ok(doc) => doc,
            Err(e) => {
                debug!("Validation: syntax error: {}", e);
                return ValidationReport::invalid(ValidationKind::Syntax, format!("XML syntax error: {e}"));
            }
        };

        let Some(schema_url) = schema_url else {
            return ValidationReport::valid();
        };
        let schema_url = resolve::resolve_href(schema_url, &self.config);
        info!("Validating against schema {}", schema_url);

        let resource = match self.fetcher.fetch(&schema_url).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Schema unavailable: {}", e);
                return ValidationReport::invalid(
                    ValidationKind::SchemaUnavailable,
                    format!("Schema could not be loaded: {e}"),
                );
            }
        };
        let schema = match parse_fetched(&resource.bytes, &resource.encoding)
            .map_err(|e| format!("schema '{schema_url}' is not well-formed: {e}"))
            .and_then(|schema_doc| Schema::compile(&schema_doc.root))
        {
            Ok(schema) => schema,
            Err(reason) => {
                warn!("Schema unavailable: {}", reason);
                return ValidationReport::invalid(
                    ValidationKind::SchemaUnavailable,
                    format!("Schema could not be loaded: {reason}"),
                );
            }
        };

        match schema.check(&doc.root) {
            Ok(()) => ValidationReport::valid(),
            Err(violation) => ValidationReport::invalid(
                ValidationKind::Schema,
                format!("XML does not conform to the schema: {violation}"),
            ),
        }
    }
}

/// What may appear inside an element.
#[derive(Debug, Clone)]
enum Content {
    /// Anything; children are not inspected.
    Any,
    /// Text only.
    Simple,
    /// Only the listed child elements, by local name.
    Children(HashMap<String, Decl>),
    /// A named complex type, resolved when checking.
    Named(String),
}

/// A child declaration: inline, or a reference to a top-level element.
#[derive(Debug, Clone)]
enum Decl {
    Inline(Content),
    Ref(String),
}

/// Compiled element declarations of one XSD.
#[derive(Debug)]
struct Schema {
    target_namespace: Option<String>,
    elements: HashMap<String, Content>,
    types: HashMap<String, Content>,
}

impl Schema {
    fn compile(root: &Element) -> Result<Self, String> {
        if root.local_name() != "schema" || root.namespace.as_deref() != Some(XSD_NAMESPACE) {
            return Err(format!("<{}> is not an XML Schema document", root.name));
        }

        let mut schema = Schema {
            target_namespace: root.attr("targetNamespace").map(str::to_string),
            elements: HashMap::new(),
            types: HashMap::new(),
        };
        for child in xsd_children(root) {
            match (child.local_name(), child.attr("name")) {
                ("element", Some(name)) => {
                    schema.elements.insert(name.to_string(), element_content(child));
                }
                ("complexType", Some(name)) => {
                    schema.types.insert(name.to_string(), complex_content(child));
                }
                ("simpleType", Some(name)) => {
                    schema.types.insert(name.to_string(), Content::Simple);
                }
                _ => {}
            }
        }
        if schema.elements.is_empty() {
            return Err("schema declares no top-level elements".to_string());
        }
        debug!(
            "Compiled schema: {} element(s), {} named type(s)",
            schema.elements.len(),
            schema.types.len()
        );
        Ok(schema)
    }

    fn check(&self, root: &Element) -> Result<(), String> {
        let Some(content) = self.elements.get(root.local_name()) else {
            return Err(format!("root element <{}> is not declared", root.name));
        };
        if root.namespace != self.target_namespace {
            return Err(format!(
                "root element <{}> is in namespace '{}', expected '{}'",
                root.name,
                root.namespace.as_deref().unwrap_or(""),
                self.target_namespace.as_deref().unwrap_or("")
            ));
        }
        self.check_content(root, content)
    }

    fn check_content(&self, element: &Element, content: &Content) -> Result<(), String> {
        match content {
            Content::Any => Ok(()),
            Content::Simple => match element.children.first() {
                Some(child) => Err(format!(
                    "<{}> must not contain child elements, found <{}>",
                    element.name, child.name
                )),
                None => Ok(()),
            },
            Content::Named(name) => match self.types.get(name) {
                Some(resolved) => self.check_content(element, resolved),
                None => Ok(()),
            },
            Content::Children(allowed) => {
                for child in &element.children {
                    let decl = allowed.get(child.local_name()).ok_or_else(|| {
                        format!("element <{}> is not allowed inside <{}>", child.name, element.name)
                    })?;
                    let content = match decl {
                        Decl::Inline(content) => Some(content),
                        Decl::Ref(name) => self.elements.get(name),
                    };
                    if let Some(content) = content {
                        self.check_content(child, content)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Children of `el` that are in the XSD namespace.
fn xsd_children(el: &Element) -> impl Iterator<Item = &Element> {
    el.children
        .iter()
        .filter(|c| c.namespace.as_deref() == Some(XSD_NAMESPACE))
}

/// Content of an `xs:element` declaration.
fn element_content(el: &Element) -> Content {
    if let Some(type_name) = el.attr("type") {
        return match type_name.split_once(':') {
            // Built-in types are all simple, except anyType.
            Some((_, "anyType")) => Content::Any,
            Some((prefix, _)) if is_xsd_prefix(el, prefix) => Content::Simple,
            Some((_, local)) => Content::Named(local.to_string()),
            None => Content::Named(type_name.to_string()),
        };
    }
    for child in xsd_children(el) {
        match child.local_name() {
            "complexType" => return complex_content(child),
            "simpleType" => return Content::Simple,
            _ => {}
        }
    }
    Content::Any
}

/// Content of an `xs:complexType`.
fn complex_content(ct: &Element) -> Content {
    let mut allowed = HashMap::new();
    for child in xsd_children(ct) {
        match child.local_name() {
            "sequence" | "choice" | "all" => {
                if !collect_particles(child, &mut allowed) {
                    return Content::Any;
                }
            }
            "simpleContent" => return Content::Simple,
            // Extensions and restrictions inherit from a base we do not
            // follow.
            "complexContent" => return Content::Any,
            _ => {}
        }
    }
    if ct.attr("mixed") == Some("true") && allowed.is_empty() {
        return Content::Any;
    }
    Content::Children(allowed)
}

/// Gather element declarations from a model group into `allowed`. Returns
/// `false` when the group contains a wildcard.
fn collect_particles(group: &Element, allowed: &mut HashMap<String, Decl>) -> bool {
    for particle in xsd_children(group) {
        match particle.local_name() {
            "element" => {
                if let Some(name) = particle.attr("name") {
                    allowed.insert(name.to_string(), Decl::Inline(element_content(particle)));
                } else if let Some(reference) = particle.attr("ref") {
                    let local = reference.rsplit_once(':').map_or(reference, |(_, l)| l);
                    allowed.insert(local.to_string(), Decl::Ref(local.to_string()));
                }
            }
            "sequence" | "choice" | "all" => {
                if !collect_particles(particle, allowed) {
                    return false;
                }
            }
            "any" => return false,
            // Group references point at definitions we do not collect.
            "group" => return false,
            _ => {}
        }
    }
    true
}

/// Whether `prefix` is the prefix `el` uses for the XSD namespace. The
/// element itself is always in that namespace, so its own prefix is the
/// usual answer.
fn is_xsd_prefix(el: &Element, prefix: &str) -> bool {
    el.name
        .split_once(':')
        .is_some_and(|(own, _)| own == prefix)
}
