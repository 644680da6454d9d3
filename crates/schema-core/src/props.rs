//! Property lookup on schema elements.
//!
//! A property may be written as an attribute or as a text-only child element
//! of the same name. Anything else is either handed back to the caller as a
//! structural child (`elements`) or retained as an extra attribute.

use schema_xml::{Location, XmlNode};

use crate::error::{ErrorKind, SchemaError};

struct Prop<'a> {
    name: &'a str,
    value: &'a str,
    location: &'a Location,
}

pub(crate) struct Props<'a> {
    node: &'a XmlNode,
    values: Vec<Prop<'a>>,
    extra: Vec<(String, String)>,
    elements: Vec<&'a XmlNode>,
}

impl<'a> Props<'a> {
    /// Split `node` into known properties, extra attributes and child elements.
    ///
    /// With `strict` set an attribute outside `known` is a structural error.
    pub(crate) fn new(node: &'a XmlNode, known: &[&[&str]], strict: bool) -> Result<Self, SchemaError> {
        let is_known = |name: &str| known.iter().any(|set| set.contains(&name));
        let mut values = Vec::new();
        let mut extra = Vec::new();
        for (key, value) in node.attributes() {
            if is_known(key) {
                values.push(Prop {
                    name: key.as_str(),
                    value: value.as_str(),
                    location: node.location(),
                });
            } else if key == "xmlns" || key.contains(':') {
                continue;
            } else if strict {
                return Err(SchemaError::new(
                    node.location().clone(),
                    ErrorKind::UnknownAttribute {
                        element: node.name().to_string(),
                        attribute: key.clone(),
                    },
                ));
            } else {
                extra.push((key.clone(), value.clone()));
            }
        }

        let mut elements = Vec::new();
        for child in node.children() {
            let text_only = child.attributes().is_empty() && child.children().is_empty();
            if text_only && is_known(child.name()) {
                if node.attribute(child.name()).is_some() {
                    return Err(SchemaError::new(
                        child.location().clone(),
                        ErrorKind::DuplicateProperty {
                            property: child.name().to_string(),
                        },
                    ));
                }
                values.push(Prop {
                    name: child.name(),
                    value: child.text(),
                    location: child.location(),
                });
            } else {
                elements.push(child);
            }
        }

        Ok(Self {
            node,
            values,
            extra,
            elements,
        })
    }

    pub(crate) fn node(&self) -> &'a XmlNode {
        self.node
    }

    pub(crate) fn location(&self) -> &'a Location {
        self.node.location()
    }

    /// Child elements that are not plain properties.
    pub(crate) fn elements(&self) -> &[&'a XmlNode] {
        &self.elements
    }

    pub(crate) fn extra_attributes(&self) -> Vec<(String, String)> {
        self.extra.clone()
    }

    pub(crate) fn has(&self, name: &str) -> bool {
        self.values.iter().any(|prop| prop.name == name)
    }

    /// Single-valued property; repeating it is a structural error.
    pub(crate) fn get(&self, name: &str) -> Result<Option<&'a str>, SchemaError> {
        let mut found = self.values.iter().filter(|prop| prop.name == name);
        let first = found.next();
        if let Some(second) = found.next() {
            return Err(SchemaError::new(
                second.location.clone(),
                ErrorKind::DuplicateProperty {
                    property: name.to_string(),
                },
            ));
        }
        Ok(first.map(|prop| prop.value))
    }

    pub(crate) fn require(&self, name: &str) -> Result<&'a str, SchemaError> {
        self.get(name)?
            .ok_or_else(|| SchemaError::missing(self.location(), self.node.name(), name))
    }

    /// Every occurrence of a repeatable property, in document order.
    pub(crate) fn all(&self, name: &'a str) -> impl Iterator<Item = (&'a str, &'a Location)> + '_ {
        self.values
            .iter()
            .filter(move |prop| prop.name == name)
            .map(|prop| (prop.value, prop.location))
    }

    pub(crate) fn string(&self, name: &str) -> Result<Option<String>, SchemaError> {
        Ok(self.get(name)?.map(str::to_string))
    }

    pub(crate) fn bool(&self, name: &str, default: bool) -> Result<bool, SchemaError> {
        match self.get(name)? {
            None => Ok(default),
            Some(text) => parse_bool(text)
                .ok_or_else(|| self.bad_value(name, text, "expected true, false, 1 or 0")),
        }
    }

    pub(crate) fn number(&self, name: &str) -> Result<Option<i128>, SchemaError> {
        match self.get(name)? {
            None => Ok(None),
            Some(text) => parse_number(text)
                .map(Some)
                .ok_or_else(|| self.bad_value(name, text, "expected a number")),
        }
    }

    /// Non-negative number converted into `T`.
    pub(crate) fn unsigned<T: TryFrom<i128>>(&self, name: &str) -> Result<Option<T>, SchemaError> {
        let Some(text) = self.get(name)? else {
            return Ok(None);
        };
        parse_number(text)
            .filter(|value| *value >= 0)
            .and_then(|value| T::try_from(value).ok())
            .map(Some)
            .ok_or_else(|| self.bad_value(name, text, "expected a non-negative number"))
    }

    /// Identifier-valued property.
    pub(crate) fn identifier(&self, name: &str) -> Result<Option<&'a str>, SchemaError> {
        match self.get(name)? {
            Some(text) if !is_identifier(text) => Err(self.bad_value(
                name,
                text,
                "names must match [A-Za-z_][A-Za-z0-9_]*",
            )),
            other => Ok(other),
        }
    }

    pub(crate) fn bad_value(&self, name: &str, value: &str, reason: &str) -> SchemaError {
        let location = self
            .values
            .iter()
            .find(|prop| prop.name == name)
            .map_or(self.location(), |prop| prop.location);
        SchemaError::bad_value(location, name, value, reason)
    }
}

/// Decimal, `0x` hexadecimal, optionally negative.
pub(crate) fn parse_number(text: &str) -> Option<i128> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.parse::<i128>().ok()?
        }
        None => return None,
    };
    Some(if negative { -magnitude } else { magnitude })
}

pub(crate) fn parse_bool(text: &str) -> Option<bool> {
    match text.trim() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

pub fn is_identifier(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(xml: &str) -> XmlNode {
        schema_xml::parse_document(xml, "props.xml").expect("parse xml")
    }

    #[test]
    fn attribute_and_child_properties() {
        let node = node(
            r#"<int name="len" type="uint8"><description>Length</description><special name="S" val="1"/></int>"#,
        );
        let props = Props::new(&node, &[&["name", "type", "description"]], false).expect("props");
        assert_eq!(props.get("name").expect("name"), Some("len"));
        assert_eq!(props.get("description").expect("description"), Some("Length"));
        assert_eq!(props.elements().len(), 1);
        assert_eq!(props.elements()[0].name(), "special");
    }

    #[test]
    fn attribute_and_child_together_is_rejected() {
        let node = node(r#"<int name="a"><name>b</name></int>"#);
        let err = Props::new(&node, &[&["name"]], false).err().expect("duplicate");
        assert!(matches!(err.kind(), ErrorKind::DuplicateProperty { .. }));
    }

    #[test]
    fn unknown_attributes_follow_strictness() {
        let node = node(r#"<alias name="a" color="red"/>"#);
        let props = Props::new(&node, &[&["name"]], false).expect("lenient");
        assert_eq!(props.extra_attributes(), vec![("color".to_string(), "red".to_string())]);
        let err = Props::new(&node, &[&["name"]], true).err().expect("strict");
        assert!(matches!(err.kind(), ErrorKind::UnknownAttribute { .. }));
    }

    #[test]
    fn repeated_child_property() {
        let node = node("<int><validValue>1</validValue><validValue>5</validValue></int>");
        let props = Props::new(&node, &[&["validValue"]], true).expect("props");
        assert_eq!(props.all("validValue").count(), 2);
        assert!(props.get("validValue").is_err());
    }

    #[test]
    fn numbers_and_booleans() {
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("-0x10"), Some(-16));
        assert_eq!(parse_number("0XfF"), Some(255));
        assert_eq!(parse_number("1.5"), None);
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("_seq2"));
        assert!(!is_identifier("2seq"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier(""));
    }
}
