use schema_xml::XmlNode;

use crate::common::Endian;
use crate::context::ParseContext;
use crate::error::{ErrorKind, SchemaError};
use crate::props::Props;

use super::{parse_members, Field, FieldCommon, FieldKind, FieldScope, Kind};

pub(super) const PROPS: &[&str] = &["endian"];

const MEMBER_KINDS: &[Kind] = &[Kind::Int, Kind::Enum, Kind::Set, Kind::Ref];

/// Fixed-width group of members packed at bit granularity.
#[derive(Debug, Clone, PartialEq)]
pub struct BitfieldField {
    pub endian: Endian,
    pub(crate) members: Vec<Field>,
}

impl BitfieldField {
    pub fn members(&self) -> &[Field] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&Field> {
        self.members.iter().find(|m| m.name() == name)
    }

    /// Sum of the member bit lengths.
    pub fn total_bits(&self) -> u32 {
        self.members
            .iter()
            .map(|m| m.common().bit_length.unwrap_or(0))
            .fold(0, u32::saturating_add)
    }

    /// Bit offset of each member from the least significant bit.
    pub fn offsets(&self) -> Vec<(&str, u32)> {
        let mut offset = 0;
        self.members
            .iter()
            .map(|m| {
                let at = offset;
                offset += m.common().bit_length.unwrap_or(0);
                (m.name(), at)
            })
            .collect()
    }
}

fn bit_error(common: &FieldCommon, message: String) -> SchemaError {
    SchemaError::new(
        common.location.clone(),
        ErrorKind::BitLength {
            field: common.name.clone(),
            message,
        },
    )
}

/// Widest value a member of this kind can hold, when known before resolution.
fn member_capacity(member: &Field) -> Option<u32> {
    match member.details() {
        FieldKind::Int(f) => Some(f.ty.value_bits()),
        FieldKind::Enum(f) => Some(f.ty.value_bits()),
        FieldKind::Set(_) => Some(64),
        _ => None,
    }
}

pub(super) fn parse(
    props: &Props<'_>,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<BitfieldField, SchemaError> {
    let nodes: Vec<&XmlNode> = props.elements().to_vec();
    for node in &nodes {
        match Kind::from_element(node.name()) {
            Some(kind) if MEMBER_KINDS.contains(&kind) => {}
            Some(kind) => {
                return Err(SchemaError::invalid(
                    node.location(),
                    &common.name,
                    format!("<{kind}> cannot be a bitfield member; use int, enum, set or ref"),
                ))
            }
            None => {
                return Err(SchemaError::new(
                    node.location().clone(),
                    ErrorKind::UnexpectedElement {
                        element: node.name().to_string(),
                        parent: "bitfield".to_string(),
                    },
                ))
            }
        }
    }
    if nodes.is_empty() {
        return Err(bit_error(common, "a bitfield needs at least one member".into()));
    }
    let member_scope = FieldScope {
        in_bitfield: true,
        ..scope.nested(common)
    };
    let members = parse_members(&nodes, &member_scope, props.location(), cx)?;

    for member in &members {
        let Some(bits) = member.common().bit_length else {
            return Err(bit_error(
                common,
                format!("member '{}' does not declare 'bitLength'", member.name()),
            ));
        };
        if let Some(capacity) = member_capacity(member) {
            if bits > capacity {
                return Err(bit_error(
                    common,
                    format!("member '{}' is {bits} bits wide, its type holds {capacity}", member.name()),
                ));
            }
        }
    }
    let field = BitfieldField {
        endian: scope.endian,
        members,
    };
    let total = field.total_bits();
    match common.bit_length {
        Some(declared) if declared != total => {
            return Err(bit_error(
                common,
                format!("members sum to {total} bits but {declared} are declared"),
            ))
        }
        Some(_) => {}
        None if total % 8 != 0 || total > 64 => {
            return Err(bit_error(
                common,
                format!("members sum to {total} bits; expected a whole number of bytes up to 64 bits"),
            ))
        }
        None => {}
    }
    if total > 64 {
        return Err(bit_error(common, format!("{total} bits exceed the 64-bit limit")));
    }
    Ok(field)
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::field::tests::{parse_err, parse_one, parse_ok};
    use crate::field::FieldKind;

    #[test]
    fn packs_members() {
        let field = parse_ok(
            r#"<bitfield name="hdr">
                <int name="ver" type="uint8" bitLength="3"/>
                <enum name="kind" type="uint8" bitLength="4">
                    <validValue name="A" val="0"/>
                    <validValue name="B" val="15"/>
                </enum>
                <set name="flags" bitLength="1"><bit name="last" idx="0"/></set>
            </bitfield>"#,
        );
        let FieldKind::Bitfield(bits) = field.details() else { panic!("bitfield expected") };
        assert_eq!(bits.total_bits(), 8);
        assert_eq!(bits.offsets(), vec![("ver", 0), ("kind", 3), ("flags", 7)]);
        assert_eq!(field.length(), Some(1));
        assert_eq!(field.bit_length(), Some(8));
        assert_eq!(bits.member("flags").and_then(|f| f.bit_length()), Some(1));
    }

    #[test]
    fn declared_length_must_match() {
        let (result, diags) = parse_one(
            r#"<bitfield name="flags" bitLength="3">
                <set name="a" bitLength="1"><bit name="x" idx="0"/></set>
                <set name="b" bitLength="1"><bit name="y" idx="0"/></set>
            </bitfield>"#,
        );
        let err = result.expect_err("sum mismatch");
        assert!(matches!(err.kind(), ErrorKind::BitLength { ref field, .. } if field == "flags"));
        assert!(diags.is_empty());
    }

    #[test]
    fn member_rules() {
        let err = parse_err(r#"<bitfield name="b"><int name="a" type="uint8"/></bitfield>"#);
        assert!(matches!(err.kind(), ErrorKind::BitLength { .. }));
        let err = parse_err(r#"<bitfield name="b"><string name="s" length="1"/></bitfield>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
        let err = parse_err(r#"<bitfield name="b"><int name="a" type="uint8" bitLength="12"/><int name="c" type="uint8" bitLength="4"/></bitfield>"#);
        assert!(matches!(err.kind(), ErrorKind::BitLength { .. }));
        let err = parse_err(r#"<bitfield name="b"><int name="a" type="uint8" bitLength="5"/></bitfield>"#);
        assert!(matches!(err.kind(), ErrorKind::BitLength { .. }));
    }

    #[test]
    fn oversized_ref_members_are_rejected() {
        let err = parse_err(
            r#"<bitfield name="b">
                <ref name="x" field="X" bitLength="4294967295"/>
                <ref name="y" field="X" bitLength="4294967295"/>
            </bitfield>"#,
        );
        assert!(
            matches!(err.kind(), ErrorKind::InvalidValue { ref property, .. } if property == "bitLength"),
            "{err}"
        );
        let err = parse_err(r#"<bitfield name="b" bitLength="72"><ref name="x" field="X" bitLength="8"/></bitfield>"#);
        assert!(matches!(err.kind(), ErrorKind::InvalidValue { .. }), "{err}");
    }
}
