use schema_xml::{Location, XmlError};
use thiserror::Error;

use crate::cond::CondError;
use crate::diagnostics::Severity;

/// Error produced while building or validating a schema entity.
///
/// Every error is tied to the element it was found on; the message itself
/// never repeats the location.
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct SchemaError {
    location: Location,
    kind: ErrorKind,
}

impl SchemaError {
    pub fn new(location: Location, kind: ErrorKind) -> Self {
        Self { location, kind }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Severity the error is reported with.
    pub fn severity(&self) -> Severity {
        if self.kind.is_structural() {
            Severity::Fatal
        } else {
            Severity::Error
        }
    }

    pub(crate) fn invalid(location: &Location, entity: &str, message: impl Into<String>) -> Self {
        Self::new(
            location.clone(),
            ErrorKind::Invalid {
                entity: entity.to_string(),
                message: message.into(),
            },
        )
    }

    pub(crate) fn duplicate(location: &Location, what: &'static str, name: &str) -> Self {
        Self::new(
            location.clone(),
            ErrorKind::Duplicate {
                what,
                name: name.to_string(),
            },
        )
    }

    pub(crate) fn dangling(location: &Location, what: &'static str, reference: &str) -> Self {
        Self::new(
            location.clone(),
            ErrorKind::Dangling {
                what,
                reference: reference.to_string(),
            },
        )
    }

    pub(crate) fn bad_value(
        location: &Location,
        property: &str,
        value: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            location.clone(),
            ErrorKind::InvalidValue {
                property: property.to_string(),
                value: value.to_string(),
                reason: reason.into(),
            },
        )
    }

    pub(crate) fn missing(location: &Location, element: &str, property: &str) -> Self {
        Self::new(
            location.clone(),
            ErrorKind::MissingProperty {
                element: element.to_string(),
                property: property.to_string(),
            },
        )
    }

    pub(crate) fn version(location: &Location, entity: &str, message: impl Into<String>) -> Self {
        Self::new(
            location.clone(),
            ErrorKind::VersionRange {
                entity: entity.to_string(),
                message: message.into(),
            },
        )
    }

    pub(crate) fn condition(location: &Location, context: &str, source: CondError) -> Self {
        Self::new(
            location.clone(),
            ErrorKind::Condition {
                context: context.to_string(),
                source,
            },
        )
    }

    /// Marker for a container whose members already produced diagnostics.
    pub(crate) fn already_reported(location: &Location) -> Self {
        Self::new(location.clone(), ErrorKind::AlreadyReported)
    }
}

impl From<XmlError> for SchemaError {
    fn from(err: XmlError) -> Self {
        let location = err.location().clone();
        let message = match err {
            XmlError::Syntax { message, .. } => message,
            XmlError::Empty { .. } => "document has no root element".to_string(),
            XmlError::Unclosed { name, .. } => format!("element <{name}> is not closed"),
            XmlError::TrailingContent { .. } => {
                "unexpected content after the root element".to_string()
            }
        };
        SchemaError::new(location, ErrorKind::Xml(message))
    }
}

#[derive(Debug, Clone, Error)]
pub enum ErrorKind {
    /// The document is not well-formed XML.
    #[error("malformed document: {0}")]
    Xml(String),
    #[error("unexpected element <{element}> inside <{parent}>")]
    UnexpectedElement { element: String, parent: String },
    #[error("unknown attribute '{attribute}' on <{element}>")]
    UnknownAttribute { element: String, attribute: String },
    #[error("<{element}> is missing required property '{property}'")]
    MissingProperty { element: String, property: String },
    #[error("property '{property}' is specified more than once")]
    DuplicateProperty { property: String },
    #[error("invalid value '{value}' for '{property}': {reason}")]
    InvalidValue {
        property: String,
        value: String,
        reason: String,
    },
    #[error("unknown field kind <{0}>")]
    UnknownFieldKind(String),
    #[error("schema '{schema}' refers to '{reference}' in schema '{target}', which is processed later")]
    SchemaOrder {
        schema: String,
        target: String,
        reference: String,
    },
    #[error("duplicate {what} '{name}'")]
    Duplicate { what: &'static str, name: String },
    #[error("{what} '{reference}' cannot be resolved")]
    Dangling {
        what: &'static str,
        reference: String,
    },
    #[error("bitfield '{field}': {message}")]
    BitLength { field: String, message: String },
    #[error("{context}: {source}")]
    Condition { context: String, source: CondError },
    #[error("override of '{entity}': {message}")]
    Override { entity: String, message: String },
    #[error("version range of '{entity}': {message}")]
    VersionRange { entity: String, message: String },
    #[error("frame '{frame}': {message}")]
    FrameLayout { frame: String, message: String },
    #[error("alias '{alias}': path '{path}' is broken at '{segment}'")]
    AliasPath {
        alias: String,
        path: String,
        segment: String,
    },
    #[error("{what} cycle: {chain}")]
    Cycle { what: &'static str, chain: String },
    #[error("'{entity}': {message}")]
    Invalid { entity: String, message: String },
    #[error("errors were reported for members")]
    AlreadyReported,
}

impl ErrorKind {
    /// Structural problems make the enclosing subtree unusable.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ErrorKind::Xml(_)
                | ErrorKind::UnexpectedElement { .. }
                | ErrorKind::UnknownAttribute { .. }
                | ErrorKind::MissingProperty { .. }
                | ErrorKind::DuplicateProperty { .. }
                | ErrorKind::InvalidValue { .. }
                | ErrorKind::UnknownFieldKind(_)
                | ErrorKind::SchemaOrder { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_errors_are_fatal() {
        let loc = Location::new("a.xml", 3, 5);
        let err = SchemaError::missing(&loc, "int", "type");
        assert_eq!(err.severity(), Severity::Fatal);
        assert_eq!(err.to_string(), "<int> is missing required property 'type'");
        let err = SchemaError::duplicate(&loc, "field", "len");
        assert_eq!(err.severity(), Severity::Error);
        assert_eq!(err.location().line, 3);
    }

    #[test]
    fn xml_error_keeps_location() {
        let err = schema_xml::parse_document("<a>", "broken.xml").unwrap_err();
        let err = SchemaError::from(err);
        assert!(matches!(err.kind(), ErrorKind::Xml(_)));
        assert_eq!(&*err.location().file, "broken.xml");
    }
}
