//! Minimal owned XML element tree built on `quick-xml`.
//!
//! Capability documents, result pages and GML fragments are all small enough
//! to hold in memory, and the geometry grammar needs to look at children and
//! ancestors, which a pull parser alone cannot give us. Element and attribute
//! names are stored without their namespace prefix: the protocols we harvest
//! use several prefix conventions for the same namespaces.
//!
//! Parsed elements remember where they came from, so a harvested record can be
//! kept verbatim with [`XmlElement::source_text`].

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};

use crate::error::AppError;

/// Location of a parsed element in its document.
#[derive(Clone)]
struct SourceSpan {
    document: Arc<str>,
    range: Range<usize>,
    /// `xmlns` declarations in scope from ancestors and not redeclared here.
    inherited_namespaces: Vec<(String, String)>,
}

impl fmt::Debug for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSpan")
            .field("range", &self.range)
            .field("inherited_namespaces", &self.inherited_namespaces)
            .finish()
    }
}

/// An XML element with its local name, attributes, text and child elements.
///
/// Equality is structural: where an element was parsed from is ignored.
#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    /// Local name (prefix stripped).
    pub name: String,
    /// Attributes as `(local name, unescaped value)` pairs, `xmlns` bindings excluded.
    pub attributes: Vec<(String, String)>,
    /// Concatenated text content directly inside this element.
    pub text: String,
    /// Child elements in document order.
    pub children: Vec<XmlElement>,
    source: Option<SourceSpan>,
}

impl PartialEq for XmlElement {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.attributes == other.attributes
            && self.text == other.text
            && self.children == other.children
    }
}

impl XmlElement {
    /// Creates an empty element with the given local name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder helper adding an attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Builder helper adding a child element.
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    /// Builder helper setting the text content.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Returns the value of the attribute with the given local name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the first direct child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Iterates over the direct children with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Depth-first search for the first descendant (or self) with the given name.
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Collects all descendants (excluding self) with the given name.
    pub fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            }
            child.find_all(name, out);
        }
    }

    /// Trimmed text of the first direct child with the given name, if non-empty.
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name)
            .map(|c| c.text.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Trimmed texts of all direct children with the given name, empty ones dropped.
    pub fn children_text(&self, name: &str) -> Vec<String> {
        self.children_named(name)
            .map(|c| c.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// The element's markup exactly as it appeared in the parsed document.
    ///
    /// Namespace declarations inherited from ancestors are added to the start
    /// tag so the fragment stands on its own. `None` for built elements.
    pub fn source_text(&self) -> Option<String> {
        let span = self.source.as_ref()?;
        let raw = span.document.get(span.range.clone())?;
        if span.inherited_namespaces.is_empty() {
            return Some(raw.to_string());
        }

        let name_end = raw
            .char_indices()
            .skip(1)
            .find(|(_, c)| c.is_whitespace() || *c == '/' || *c == '>')
            .map(|(i, _)| i)?;
        let mut out = String::with_capacity(raw.len() + 64);
        out.push_str(&raw[..name_end]);
        for (key, uri) in &span.inherited_namespaces {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(uri.as_str()));
            out.push('"');
        }
        out.push_str(&raw[name_end..]);
        Some(out)
    }

    /// Verbatim source markup when available, re-serialized markup otherwise.
    pub fn original_xml(&self) -> String {
        self.source_text().unwrap_or_else(|| self.to_xml())
    }

    /// Serializes the element back to markup, using local names.
    ///
    /// Text is written before the children, so mixed content loses its
    /// interleaving. Used for the provenance copy of harvested records.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.text.is_empty() && self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        out.push_str(&escape(self.text.as_str()));
        for child in &self.children {
            child.write_xml(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

/// Parses a complete document and returns its root element.
///
/// # Errors
///
/// Returns `AppError::XmlError` for malformed markup, unbalanced tags, or a
/// document without a root element.
pub fn parse_document(xml: &str) -> Result<XmlElement, AppError> {
    let document: Arc<str> = Arc::from(xml);
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<OpenElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let before = position(&reader);
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let open = OpenElement::from_start(&e, tag_start(xml, before), &stack)?;
                stack.push(open);
            }
            Ok(Event::Empty(e)) => {
                let open = OpenElement::from_start(&e, tag_start(xml, before), &stack)?;
                let element = open.close(&document, position(&reader));
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let open = stack
                    .pop()
                    .ok_or_else(|| AppError::XmlError("unexpected closing tag".to_string()))?;
                let element = open.close(&document, position(&reader));
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(t)) => {
                if let Some(current) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| AppError::XmlError(e.to_string()))?;
                    current.element.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .element
                        .text
                        .push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AppError::XmlError(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(AppError::XmlError(format!(
            "unclosed element <{}>",
            open.element.name
        )));
    }

    root.ok_or_else(|| AppError::XmlError("document has no root element".to_string()))
}

fn position(reader: &Reader<&[u8]>) -> usize {
    usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX)
}

/// Offset of the `<` opening the tag read from `from`; skipped whitespace
/// may precede it.
fn tag_start(xml: &str, from: usize) -> usize {
    xml.get(from..)
        .and_then(|rest| rest.find('<'))
        .map_or(from, |offset| from + offset)
}

/// An element whose end tag has not been read yet.
struct OpenElement {
    element: XmlElement,
    start: usize,
    /// `xmlns` declarations made on this element's own start tag.
    declared: Vec<(String, String)>,
    inherited: Vec<(String, String)>,
}

impl OpenElement {
    fn from_start(
        start: &BytesStart<'_>,
        offset: usize,
        ancestors: &[OpenElement],
    ) -> Result<Self, AppError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut element = XmlElement::new(name);
        let mut declared = Vec::new();

        for attr in start.attributes() {
            let attr = attr.map_err(|e| AppError::XmlError(e.to_string()))?;
            let value = attr
                .unescape_value()
                .map_err(|e| AppError::XmlError(e.to_string()))?
                .into_owned();
            if attr.key.as_ref().starts_with(b"xmlns") {
                declared.push((String::from_utf8_lossy(attr.key.as_ref()).into_owned(), value));
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            element.attributes.push((key, value));
        }

        // Innermost declaration of each prefix wins.
        let mut inherited: Vec<(String, String)> = Vec::new();
        for (key, uri) in ancestors.iter().rev().flat_map(|a| a.declared.iter()) {
            let shadowed = declared.iter().chain(inherited.iter()).any(|(k, _)| k == key);
            if !shadowed {
                inherited.push((key.clone(), uri.clone()));
            }
        }
        inherited.sort();

        Ok(Self {
            element,
            start: offset,
            declared,
            inherited,
        })
    }

    fn close(self, document: &Arc<str>, end: usize) -> XmlElement {
        let mut element = self.element;
        element.source = Some(SourceSpan {
            document: Arc::clone(document),
            range: self.start..end,
            inherited_namespaces: self.inherited,
        });
        element
    }
}

fn attach(
    stack: &mut [OpenElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), AppError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.element.children.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(AppError::XmlError(
            "document has more than one root element".to_string(),
        )),
    }
}
