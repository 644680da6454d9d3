use schema_xml::XmlNode;

use crate::cond::{is_cond_element, parse_cond_elements, parse_cond_text, OptCond};
use crate::context::ParseContext;
use crate::error::{ErrorKind, SchemaError};
use crate::props::Props;

use super::reference::{implicit_ref, is_qualified_name};
use super::{parse_field, wrapped_field, Field, FieldCommon, FieldScope, Kind};

pub(super) const PROPS: &[&str] = &[
    "field",
    "defaultMode",
    "cond",
    "missingOnReadFail",
    "missingOnInvalid",
    "displayExtModeCtrl",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptionalMode {
    /// Presence is decided while reading.
    #[default]
    Tentative,
    Exists,
    Missing,
}

/// Field that may be absent, optionally governed by a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionalField {
    pub(crate) field: Box<Field>,
    pub default_mode: OptionalMode,
    pub(crate) cond: Option<OptCond>,
    pub missing_on_read_fail: bool,
    pub missing_on_invalid: bool,
    pub display_ext_mode_ctrl: bool,
}

impl OptionalField {
    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn cond(&self) -> Option<&OptCond> {
        self.cond.as_ref()
    }
}

fn parse_mode(props: &Props<'_>) -> Result<OptionalMode, SchemaError> {
    Ok(match props.get("defaultMode")? {
        None | Some("tentative") => OptionalMode::Tentative,
        Some("exists" | "exist") => OptionalMode::Exists,
        Some("missing") => OptionalMode::Missing,
        Some(other) => return Err(props.bad_value("defaultMode", other, "expected tentative, exists or missing")),
    })
}

pub(super) fn parse(
    props: &Props<'_>,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<OptionalField, SchemaError> {
    let name = common.name.as_str();
    let mut cond_nodes: Vec<&XmlNode> = Vec::new();
    let mut field_nodes: Vec<&XmlNode> = Vec::new();
    for node in props.elements() {
        if is_cond_element(node.name()) {
            cond_nodes.push(node);
        } else if node.name() == "field" {
            field_nodes.push(wrapped_field(node)?);
        } else if Kind::from_element(node.name()).is_some() {
            field_nodes.push(node);
        } else {
            return Err(SchemaError::new(
                node.location().clone(),
                ErrorKind::UnexpectedElement {
                    element: node.name().to_string(),
                    parent: "optional".to_string(),
                },
            ));
        }
    }

    let field = match (props.get("field")?, field_nodes.as_slice()) {
        (Some(target), []) if is_qualified_name(target) => {
            implicit_ref(name, target, common.version, scope.namespace, props.location())
        }
        (Some(target), []) => return Err(props.bad_value("field", target, "expected a field name")),
        (None, [node]) => parse_field(node, &scope.nested(common).named(name), cx)?,
        (None, []) => return Err(SchemaError::missing(props.location(), "optional", "field")),
        _ => {
            return Err(SchemaError::invalid(
                props.location(),
                name,
                "an optional wraps exactly one field",
            ))
        }
    };

    let context = format!("condition of '{name}'");
    let cond = match (props.get("cond")?, cond_nodes.is_empty()) {
        (Some(_), false) => {
            return Err(SchemaError::new(
                props.location().clone(),
                ErrorKind::DuplicateProperty {
                    property: "cond".to_string(),
                },
            ))
        }
        (Some(text), true) => Some(parse_cond_text(text, props.location(), &context)?),
        (None, false) => Some(parse_cond_elements(&cond_nodes, props.location(), &context, cx.strict(true))?),
        (None, true) => None,
    };

    Ok(OptionalField {
        field: Box::new(field),
        default_mode: parse_mode(props)?,
        cond,
        missing_on_read_fail: props.bool("missingOnReadFail", false)?,
        missing_on_invalid: props.bool("missingOnInvalid", false)?,
        display_ext_mode_ctrl: props.bool("displayExtModeCtrl", false)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cond::{CondExpr, Combinator};
    use crate::field::tests::{parse_err, parse_ok};
    use crate::field::FieldKind;

    #[test]
    fn wrapped_field_forms() {
        let field = parse_ok(r#"<optional name="ext" cond="$mode = 1"><int name="ext" type="uint8"/></optional>"#);
        let FieldKind::Optional(opt) = field.details() else { panic!("optional expected") };
        assert_eq!(opt.field().name(), "ext");
        assert!(matches!(opt.cond(), Some(OptCond::Expr(CondExpr::Compare { .. }))));
        assert_eq!(field.min_length(), 0);
        assert_eq!(field.max_length(), 1);

        let field = parse_ok(r#"<optional name="tail" field="common.Tail" defaultMode="missing"/>"#);
        let FieldKind::Optional(opt) = field.details() else { panic!("optional expected") };
        assert_eq!(opt.default_mode, OptionalMode::Missing);
        assert_eq!(opt.field().name(), "tail");
        assert!(opt.field().as_ref_field().is_some());

        let field = parse_ok(r#"<optional name="o"><field><int type="uint16"/></field></optional>"#);
        let FieldKind::Optional(opt) = field.details() else { panic!("optional expected") };
        assert_eq!(opt.field().name(), "o");
    }

    #[test]
    fn condition_elements() {
        let field = parse_ok(
            r#"<optional name="o">
                <int name="o" type="uint8"/>
                <or><cond value="$a = 1"/><cond value="$b.c"/></or>
            </optional>"#,
        );
        let FieldKind::Optional(opt) = field.details() else { panic!("optional expected") };
        assert!(matches!(opt.cond(), Some(OptCond::List(list)) if list.combinator == Combinator::Or));

        let err = parse_err(r#"<optional name="o" cond="$a = 1"><int type="uint8"/><cond value="$b = 1"/></optional>"#);
        assert!(matches!(err.kind(), ErrorKind::DuplicateProperty { .. }));
        let err = parse_err(r#"<optional name="o" cond="$a = 1 &amp;&amp; $b = 2"><int type="uint8"/></optional>"#);
        assert!(matches!(err.kind(), ErrorKind::Condition { .. }));
    }

    #[test]
    fn exactly_one_field() {
        let err = parse_err(r#"<optional name="o"/>"#);
        assert!(matches!(err.kind(), ErrorKind::MissingProperty { .. }));
        let err = parse_err(r#"<optional name="o"><int name="a" type="uint8"/><int name="b" type="uint8"/></optional>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
    }
}
