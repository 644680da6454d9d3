//! Load protocol schema documents into an owned element tree using quick-xml.
//!
//! The tree is the only view of the input the semantic model builder ever
//! sees: element names, attributes in declaration order, child elements,
//! trimmed text content and the source location of every element.

use std::fmt;
use std::sync::Arc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("{location}: xml: {message}")]
    Syntax { location: Location, message: String },
    #[error("{location}: document has no root element")]
    Empty { location: Location },
    #[error("{location}: element <{name}> is not closed")]
    Unclosed { location: Location, name: String },
    #[error("{location}: unexpected content after the root element")]
    TrailingContent { location: Location },
}

impl XmlError {
    /// Source position the error refers to.
    pub fn location(&self) -> &Location {
        match self {
            XmlError::Syntax { location, .. }
            | XmlError::Empty { location }
            | XmlError::Unclosed { location, .. }
            | XmlError::TrailingContent { location } => location,
        }
    }
}

/// Position of an element inside a schema document (1-based line and column).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Location {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file: impl Into<Arc<str>>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// Location used for diagnostics that are not tied to a document.
    pub fn unknown() -> Self {
        Self::new("<unknown>", 0, 0)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A single element of a parsed document.
///
/// Nodes are immutable once the reader hands them out; the builder methods
/// exist for alternative tree readers and for constructing trees in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlNode {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
    text: String,
    location: Location,
}

impl XmlNode {
    pub fn new(name: impl Into<String>, location: Location) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            text: String::new(),
            location,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: XmlNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Element name as written in the document.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Attributes in declaration order.
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Value of the attribute `name`, if present.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    /// Child elements called `name`, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Concatenated, trimmed character data directly inside this element.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Parse a complete document and return its root element.
///
/// `file` is only used to label locations.
pub fn parse_document(xml: &str, file: &str) -> Result<XmlNode, XmlError> {
    let file: Arc<str> = Arc::from(file);
    let lines = LineIndex::new(xml);
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let before = reader.buffer_position();
        let event = reader.read_event_into(&mut buf);
        match event {
            Ok(Event::Start(e)) => {
                let location = lines.locate(&file, tag_start(xml, before));
                let node = start_node(&e, location)?;
                if root.is_some() && stack.is_empty() {
                    return Err(XmlError::TrailingContent {
                        location: node.location,
                    });
                }
                stack.push(node);
            }
            Ok(Event::Empty(e)) => {
                let location = lines.locate(&file, tag_start(xml, before));
                let node = start_node(&e, location)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                } else if root.is_some() {
                    return Err(XmlError::TrailingContent {
                        location: node.location,
                    });
                } else {
                    root = Some(node);
                }
            }
            Ok(Event::End(_)) => {
                let Some(node) = stack.pop() else {
                    return Err(XmlError::Syntax {
                        location: lines.locate(&file, before),
                        message: "closing tag without a matching opening tag".into(),
                    });
                };
                trace!(element = %node.name, children = node.children.len(), "closed element");
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                } else {
                    root = Some(node);
                }
            }
            Ok(Event::Text(e)) => {
                let value = e.unescape().map_err(|err| XmlError::Syntax {
                    location: lines.locate(&file, before),
                    message: err.to_string(),
                })?;
                append_text(&mut stack, &value);
            }
            Ok(Event::CData(e)) => {
                let raw = e.into_inner();
                let value = String::from_utf8_lossy(&raw);
                append_text(&mut stack, value.trim());
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(XmlError::Syntax {
                    location: lines.locate(&file, reader.buffer_position()),
                    message: err.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.pop() {
        return Err(XmlError::Unclosed {
            location: open.location,
            name: open.name,
        });
    }
    let root = root.ok_or_else(|| XmlError::Empty {
        location: Location::new(file.clone(), 1, 1),
    })?;
    debug!(file = %file, root = %root.name, "loaded document");
    Ok(root)
}

fn start_node(event: &BytesStart<'_>, location: Location) -> Result<XmlNode, XmlError> {
    let name = String::from_utf8_lossy(event.name().as_ref()).to_string();
    let mut node = XmlNode::new(name, location);
    for attr in event.attributes() {
        let attr = attr.map_err(|err| XmlError::Syntax {
            location: node.location.clone(),
            message: err.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value().map_err(|err| XmlError::Syntax {
            location: node.location.clone(),
            message: err.to_string(),
        })?;
        node.attributes.push((key, value.trim().to_string()));
    }
    Ok(node)
}

fn append_text(stack: &mut [XmlNode], value: &str) {
    let Some(current) = stack.last_mut() else {
        return;
    };
    let value = value.trim();
    if value.is_empty() {
        return;
    }
    if !current.text.is_empty() {
        current.text.push(' ');
    }
    current.text.push_str(value);
}

// Trimmed whitespace is consumed before the tag itself, so the reader offset
// taken before an event can point at indentation rather than at `<`.
fn tag_start(xml: &str, offset: usize) -> usize {
    xml.get(offset..)
        .and_then(|rest| rest.find('<'))
        .map(|delta| offset + delta)
        .unwrap_or(offset)
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(idx, _)| idx + 1),
        );
        Self { starts }
    }

    fn locate(&self, file: &Arc<str>, offset: usize) -> Location {
        let line = match self.starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.saturating_sub(1),
        };
        let column = offset - self.starts[line];
        Location::new(file.clone(), (line + 1) as u32, (column + 1) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tree_with_locations() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<schema name="demo" endian="big">
    <fields>
        <int name="len" type="uint16" />
        <string name="label">
            <description>Free &amp; text</description>
        </string>
    </fields>
</schema>
"#;
        let root = parse_document(xml, "demo.xml").expect("parse xml");
        assert_eq!(root.name(), "schema");
        assert_eq!(root.attribute("name"), Some("demo"));
        assert_eq!(root.location().line, 2);
        let fields = root.children_named("fields").next().expect("fields");
        assert_eq!(fields.children().len(), 2);
        let len = &fields.children()[0];
        assert_eq!(len.attribute("type"), Some("uint16"));
        assert_eq!(len.location().line, 4);
        assert_eq!(len.location().column, 9);
        let desc = fields.children()[1]
            .children_named("description")
            .next()
            .expect("description");
        assert_eq!(desc.text(), "Free & text");
        assert_eq!(len.location().to_string(), "demo.xml:4:9");
    }

    #[test]
    fn attributes_keep_declaration_order() {
        let root = parse_document(r#"<a z="1" b=" 2 " m="3"/>"#, "a.xml").expect("parse");
        let names: Vec<_> = root.attributes().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, ["z", "b", "m"]);
        assert_eq!(root.attribute("b"), Some("2"));
    }

    #[test]
    fn mismatched_close_is_syntax_error() {
        let err = parse_document("<schema><fields></schema>", "bad.xml").unwrap_err();
        assert!(matches!(err, XmlError::Syntax { .. }), "{err}");
    }

    #[test]
    fn unclosed_root_is_reported() {
        let err = parse_document("<schema>\n<fields/>", "open.xml").unwrap_err();
        match err {
            XmlError::Unclosed { name, location } => {
                assert_eq!(name, "schema");
                assert_eq!(location.line, 1);
            }
            // Newer readers flag the missing end tag themselves.
            XmlError::Syntax { .. } => {}
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_document_is_rejected() {
        let err = parse_document("   ", "empty.xml").unwrap_err();
        assert!(matches!(err, XmlError::Empty { .. }));
    }

    #[test]
    fn cdata_becomes_text() {
        let root = parse_document("<d><![CDATA[ a < b ]]></d>", "c.xml").expect("parse");
        assert_eq!(root.text(), "a < b");
    }
}
