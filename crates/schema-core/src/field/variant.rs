use schema_xml::XmlNode;

use crate::context::ParseContext;
use crate::error::SchemaError;
use crate::props::{is_identifier, parse_number, Props};

use super::{parse_members, Field, FieldCommon, FieldKind, FieldScope};

pub(super) const PROPS: &[&str] = &["defaultMember", "indexField", "displayIdxReadOnlyHide"];

/// How the active member of a variant is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantSelection {
    /// An earlier sibling holds the member index.
    IndexField(String),
    /// Every member is a bundle opening with a key field; `None` marks a key
    /// that is only known through a reference.
    Keyed(Vec<Option<i128>>),
    /// Decided by code outside the schema.
    External,
}

/// Alternative members; exactly one is present at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantField {
    pub(crate) members: Vec<Field>,
    pub default_member: Option<usize>,
    pub selection: VariantSelection,
    pub display_idx_read_only_hide: bool,
}

impl VariantField {
    pub fn members(&self) -> &[Field] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&Field> {
        self.members.iter().find(|m| m.name() == name)
    }
}

/// Key of a member bundle: the default of its leading int or enum.
fn member_key(member: &Field) -> Option<Option<i128>> {
    let first = member.as_bundle()?.members().first()?;
    match first.details() {
        FieldKind::Int(f) if f.default_declared => Some(Some(f.default_value)),
        FieldKind::Enum(f) if f.default_declared => Some(Some(f.default_value)),
        FieldKind::Ref(_) => Some(None),
        _ => None,
    }
}

pub(super) fn parse(
    props: &Props<'_>,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<VariantField, SchemaError> {
    let name = common.name.as_str();
    let mut nodes: Vec<&XmlNode> = Vec::new();
    for node in props.elements() {
        if node.name() == "members" {
            nodes.extend(node.children());
        } else {
            nodes.push(node);
        }
    }
    if nodes.is_empty() {
        return Err(SchemaError::invalid(props.location(), name, "a variant needs at least one member"));
    }
    let members = parse_members(&nodes, &scope.nested(common), props.location(), cx)?;

    let default_member = match props.get("defaultMember")? {
        None | Some("none") => None,
        Some(text) => {
            let index = match parse_number(text) {
                Some(index) => usize::try_from(index).ok().filter(|idx| *idx < members.len()),
                None => members.iter().position(|m| m.name() == text),
            };
            Some(index.ok_or_else(|| {
                SchemaError::invalid(props.location(), name, format!("default member '{text}' does not exist"))
            })?)
        }
    };

    let selection = match props.get("indexField")? {
        Some(text) => match text.strip_prefix('$') {
            Some(sibling) if is_identifier(sibling) => VariantSelection::IndexField(sibling.to_string()),
            _ => return Err(props.bad_value("indexField", text, "expected '$' followed by a sibling name")),
        },
        None => match members.iter().map(member_key).collect::<Option<Vec<_>>>() {
            Some(keys) => VariantSelection::Keyed(keys),
            None => {
                cx.warn(
                    props.location(),
                    format!("variant '{name}' has no key fields or index field; its member is selected externally"),
                );
                VariantSelection::External
            }
        },
    };

    Ok(VariantField {
        members,
        default_member,
        selection,
        display_idx_read_only_hide: props.bool("displayIdxReadOnlyHide", false)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::field::tests::{parse_err, parse_one, parse_ok};

    const PROPS_VARIANT: &str = r#"
        <variant name="prop" defaultMember="p2">
            <bundle name="p1">
                <int name="key" type="uint8" defaultValue="1"/>
                <int name="val" type="uint16"/>
            </bundle>
            <bundle name="p2">
                <int name="key" type="uint8" defaultValue="2"/>
                <string name="val" length="4"/>
            </bundle>
        </variant>"#;

    #[test]
    fn keyed_members() {
        let field = parse_ok(PROPS_VARIANT);
        let FieldKind::Variant(variant) = field.details() else { panic!("variant expected") };
        assert_eq!(variant.default_member, Some(1));
        assert_eq!(variant.selection, VariantSelection::Keyed(vec![Some(1), Some(2)]));
        assert_eq!(field.min_length(), 3);
        assert_eq!(field.max_length(), 5);
        assert_eq!(field.length(), None);
    }

    #[test]
    fn index_field_and_external() {
        let field = parse_ok(
            r#"<variant name="v" indexField="$kind" defaultMember="0"><int name="a" type="uint8"/><int name="b" type="uint16"/></variant>"#,
        );
        let FieldKind::Variant(variant) = field.details() else { panic!("variant expected") };
        assert_eq!(variant.selection, VariantSelection::IndexField("kind".into()));
        assert_eq!(variant.default_member, Some(0));

        let (result, diags) = parse_one(r#"<variant name="v"><int name="a" type="uint8"/></variant>"#);
        let field = result.expect("external variant");
        assert!(matches!(field.details(), FieldKind::Variant(v) if v.selection == VariantSelection::External));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn variant_rules() {
        let err = parse_err(r#"<variant name="v"/>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
        let err = parse_err(r#"<variant name="v" indexField="$k" defaultMember="3"><int name="a" type="uint8"/></variant>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
        let err = parse_err(r#"<variant name="v" indexField="k"><int name="a" type="uint8"/></variant>"#);
        assert!(matches!(err.kind(), ErrorKind::InvalidValue { .. }));
    }
}
