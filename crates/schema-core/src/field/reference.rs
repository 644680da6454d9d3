use schema_xml::Location;

use crate::common::VersionRange;
use crate::error::SchemaError;
use crate::namespace::NamespaceId;
use crate::props::{is_identifier, Props};

use super::{Field, FieldCommon, FieldHandle, FieldKind, FieldScope, Kind, LengthInfo};

pub(super) const PROPS: &[&str] = &["field"];

/// What a resolved reference points at, copied from the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub handle: FieldHandle,
    /// Kind after following any chain of references.
    pub kind: Kind,
    pub length: LengthInfo,
    pub bits: Option<u32>,
    pub version_dependent: bool,
    pub deprecated: bool,
}

/// Field defined elsewhere, looked up by qualified name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefField {
    target: String,
    scope: NamespaceId,
    resolved: Option<ResolvedRef>,
}

impl RefField {
    pub(crate) fn new(target: impl Into<String>, scope: NamespaceId) -> Self {
        Self {
            target: target.into(),
            scope,
            resolved: None,
        }
    }

    /// Qualified target name as written, `@schema.` prefix included.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Namespace the target is looked up from.
    pub fn scope(&self) -> NamespaceId {
        self.scope
    }

    pub fn resolved(&self) -> Option<&ResolvedRef> {
        self.resolved.as_ref()
    }

    pub(crate) fn set_resolved(&mut self, resolved: ResolvedRef) {
        self.resolved = Some(resolved);
    }
}

/// Check the `[@schema.]ns.name` shape of a reference.
pub(crate) fn is_qualified_name(text: &str) -> bool {
    let body = text.strip_prefix('@').unwrap_or(text);
    !body.is_empty() && body.split('.').all(is_identifier)
}

pub(super) fn parse(
    props: &Props<'_>,
    _common: &FieldCommon,
    scope: &FieldScope<'_>,
) -> Result<RefField, SchemaError> {
    let target = props.require("field")?;
    if !is_qualified_name(target) {
        return Err(props.bad_value("field", target, "expected a qualified field name"));
    }
    Ok(RefField::new(target, scope.namespace))
}

/// A `ref` standing in for an attribute that names a field instead of
/// declaring one inline.
pub(crate) fn implicit_ref(
    name: &str,
    target: &str,
    version: VersionRange,
    scope: NamespaceId,
    location: &Location,
) -> Field {
    Field::new(
        FieldCommon::implicit(name.to_string(), version, location.clone()),
        FieldKind::Ref(RefField::new(target, scope)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::field::tests::{parse_err, parse_ok};

    #[test]
    fn target_is_kept_unresolved() {
        let field = parse_ok(r#"<ref name="hdr" field="@base.common.Header"/>"#);
        let reference = field.as_ref_field().expect("ref");
        assert_eq!(reference.target(), "@base.common.Header");
        assert!(reference.resolved().is_none());
        assert_eq!(field.length(), None);
        assert_eq!(field.max_length(), usize::MAX);
    }

    #[test]
    fn malformed_target() {
        let err = parse_err(r#"<ref name="hdr" field="common..Header"/>"#);
        assert!(matches!(err.kind(), ErrorKind::InvalidValue { .. }));
        let err = parse_err(r#"<ref name="hdr"/>"#);
        assert!(matches!(err.kind(), ErrorKind::MissingProperty { .. }));
        assert!(is_qualified_name("a.b_c"));
        assert!(!is_qualified_name("@"));
    }
}
