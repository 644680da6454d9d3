use crate::context::ParseContext;
use crate::error::{ErrorKind, SchemaError};
use crate::props::Props;

use super::reference::{implicit_ref, is_qualified_name};
use super::string::parse_prefix;
use super::{parse_field, wrapped_field, Field, FieldCommon, FieldScope, Prefix};

pub(super) const PROPS: &[&str] = &[
    "element",
    "count",
    "countPrefix",
    "lengthPrefix",
    "elemLengthPrefix",
    "elemFixedLength",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ListField {
    pub element: Box<Field>,
    /// Fixed number of elements.
    pub count: Option<usize>,
    pub count_prefix: Option<Prefix>,
    /// Serialized length of the whole element sequence.
    pub length_prefix: Option<Prefix>,
    /// Serialized length before every element.
    pub elem_length_prefix: Option<Prefix>,
    /// Only the first element carries the element length prefix.
    pub elem_fixed_length: bool,
}

impl ListField {
    /// True when the element count comes from the remaining input.
    pub fn is_open(&self) -> bool {
        self.count.is_none() && self.count_prefix.is_none() && self.length_prefix.is_none()
    }
}

fn parse_element(
    props: &Props<'_>,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<Field, SchemaError> {
    let wrapper = props.elements().iter().find(|n| n.name() == "element");
    match (props.get("element")?, wrapper) {
        (Some(_), Some(node)) => Err(SchemaError::new(
            node.location().clone(),
            ErrorKind::DuplicateProperty {
                property: "element".to_string(),
            },
        )),
        (Some(text), None) if is_qualified_name(text) => Ok(implicit_ref(
            "element",
            text,
            common.version,
            scope.namespace,
            props.location(),
        )),
        (Some(text), None) => Err(props.bad_value("element", text, "expected a field name")),
        (None, Some(node)) => parse_field(wrapped_field(node)?, &scope.nested(common).named("element"), cx),
        (None, None) => Err(SchemaError::missing(props.location(), "list", "element")),
    }
}

pub(super) fn parse(
    props: &Props<'_>,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<ListField, SchemaError> {
    let given: Vec<&str> = ["count", "countPrefix", "lengthPrefix"]
        .into_iter()
        .filter(|name| props.has(name) || props.elements().iter().any(|n| n.name() == *name))
        .collect();
    if given.len() > 1 {
        return Err(SchemaError::invalid(
            props.location(),
            &common.name,
            format!("only one of count, countPrefix and lengthPrefix may be set, found {}", given.join(", ")),
        ));
    }
    let element = parse_element(props, common, scope, cx)?;
    let count = props.unsigned::<usize>("count")?;
    if count == Some(0) {
        return Err(SchemaError::invalid(props.location(), &common.name, "count must be positive"));
    }
    let elem_length_prefix = parse_prefix(props, "elemLengthPrefix", common, scope, cx)?;
    let elem_fixed_length = props.bool("elemFixedLength", false)?;
    if elem_fixed_length && elem_length_prefix.is_none() {
        return Err(SchemaError::invalid(
            props.location(),
            &common.name,
            "'elemFixedLength' requires 'elemLengthPrefix'",
        ));
    }
    Ok(ListField {
        element: Box::new(element),
        count,
        count_prefix: parse_prefix(props, "countPrefix", common, scope, cx)?,
        length_prefix: parse_prefix(props, "lengthPrefix", common, scope, cx)?,
        elem_length_prefix,
        elem_fixed_length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::tests::{parse_err, parse_ok};
    use crate::field::FieldKind;

    #[test]
    fn fixed_count_list() {
        let field = parse_ok(
            r#"<list name="points" count="3">
                <element><bundle name="pt"><int name="x" type="uint8"/><int name="y" type="uint8"/></bundle></element>
            </list>"#,
        );
        let FieldKind::List(list) = field.details() else { panic!("list expected") };
        assert_eq!(list.element.name(), "pt");
        assert_eq!(field.length(), Some(6));
        assert!(!list.is_open());
    }

    #[test]
    fn prefixed_and_open_lists() {
        let field = parse_ok(
            r#"<list name="items" element="common.Item">
                <countPrefix><int name="count" type="uint16"/></countPrefix>
            </list>"#,
        );
        let FieldKind::List(list) = field.details() else { panic!("list expected") };
        assert_eq!(list.element.as_ref_field().map(|r| r.target()), Some("common.Item"));
        assert!(list.count_prefix.as_ref().and_then(Prefix::field).is_some());

        let field = parse_ok(r#"<list name="rest"><element><int name="v" type="uint8"/></element></list>"#);
        let FieldKind::List(list) = field.details() else { panic!("list expected") };
        assert!(list.is_open());
        assert_eq!(field.min_length(), 0);
    }

    #[test]
    fn list_rules() {
        let err = parse_err(r#"<list name="l" count="2" countPrefix="$n"><element><int name="v" type="uint8"/></element></list>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
        let err = parse_err(r#"<list name="l" count="2"/>"#);
        assert!(matches!(err.kind(), ErrorKind::MissingProperty { .. }));
        let err = parse_err(r#"<list name="l" element="X" elemFixedLength="true"/>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
    }
}
