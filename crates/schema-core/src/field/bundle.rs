use schema_xml::XmlNode;

use crate::alias::{parse_aliases, Alias};
use crate::context::ParseContext;
use crate::error::SchemaError;
use crate::props::Props;

use super::{parse_members, Field, FieldCommon, FieldScope};

/// Ordered group of member fields serialized back to back.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleField {
    pub(crate) members: Vec<Field>,
    pub(crate) aliases: Vec<Alias>,
}

impl BundleField {
    pub fn members(&self) -> &[Field] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&Field> {
        self.members.iter().find(|m| m.name() == name)
    }

    pub fn aliases(&self) -> &[Alias] {
        &self.aliases
    }
}

/// Split container children into member field elements and `<alias>`
/// elements, flattening a `<members>` wrapper.
fn member_nodes<'x>(children: &[&'x XmlNode]) -> (Vec<&'x XmlNode>, Vec<&'x XmlNode>) {
    let mut members = Vec::new();
    let mut aliases = Vec::new();
    for child in children {
        match child.name() {
            "alias" => aliases.push(*child),
            "members" => members.extend(child.children()),
            _ => members.push(*child),
        }
    }
    (members, aliases)
}

pub(super) fn parse(
    props: &Props<'_>,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<BundleField, SchemaError> {
    let (nodes, alias_nodes) = member_nodes(props.elements());
    if nodes.is_empty() {
        return Err(SchemaError::invalid(
            props.location(),
            &common.name,
            "a bundle needs at least one member",
        ));
    }
    let members = parse_members(&nodes, &scope.nested(common), props.location(), cx)?;
    let taken: Vec<&str> = members.iter().map(Field::name).collect();
    let aliases = parse_aliases(&alias_nodes, &taken, &common.version, cx)?;
    Ok(BundleField { members, aliases })
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::field::tests::{parse_err, parse_ok};

    #[test]
    fn members_wrapper_and_aliases() {
        let field = parse_ok(
            r#"<bundle name="pos">
                <members>
                    <int name="x" type="int32"/>
                    <int name="y" type="int32"/>
                </members>
                <alias name="horizontal" field="$x"/>
            </bundle>"#,
        );
        let bundle = field.as_bundle().expect("bundle");
        assert_eq!(bundle.members().len(), 2);
        assert_eq!(bundle.aliases()[0].path(), ["x"]);
        assert_eq!(field.length(), Some(8));
    }

    #[test]
    fn alias_names_are_checked() {
        let err = parse_err(
            r#"<bundle name="b"><int name="x" type="uint8"/><alias name="x" field="x"/></bundle>"#,
        );
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
        let err = parse_err(
            r#"<bundle name="b"><int name="x" type="uint8"/><alias name="a" field="x"/><alias name="a" field="x"/></bundle>"#,
        );
        assert!(matches!(err.kind(), ErrorKind::Duplicate { .. }));
        let err = parse_err(r#"<bundle name="b"/>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
    }
}
