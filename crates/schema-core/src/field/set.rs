use crate::common::{Endian, VersionRange, VERSION_PROPS};
use crate::context::ParseContext;
use crate::error::SchemaError;
use crate::props::Props;

use super::{FieldCommon, FieldScope};

pub(super) const PROPS: &[&str] = &[
    "type",
    "length",
    "endian",
    "defaultValue",
    "reservedValue",
    "nonUniqueAllowed",
    "validCheckVersion",
];

const BIT_PROPS: &[&str] = &[
    "name",
    "idx",
    "defaultValue",
    "reserved",
    "reservedValue",
    "description",
    "displayName",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetBit {
    pub name: String,
    pub idx: u32,
    pub default_value: bool,
    pub reserved: bool,
    pub reserved_value: bool,
    pub description: Option<String>,
    pub display_name: Option<String>,
    pub version: VersionRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetField {
    /// Serialized length in bytes.
    pub length: usize,
    /// Number of usable bit positions.
    pub width: u32,
    pub endian: Endian,
    pub bits: Vec<SetBit>,
    pub default_value: bool,
    pub(crate) default_declared: bool,
    pub reserved_value: bool,
    pub non_unique_allowed: bool,
    pub valid_check_version: bool,
    /// Explicitly reserved bits plus every undeclared position.
    pub reserved_mask: u64,
}

impl SetField {
    pub fn bit(&self, name: &str) -> Option<&SetBit> {
        self.bits.iter().find(|bit| bit.name == name)
    }
}

fn type_length(ty: &str) -> Option<usize> {
    match ty {
        "uint8" => Some(1),
        "uint16" => Some(2),
        "uint32" => Some(4),
        "uint64" => Some(8),
        _ => None,
    }
}

pub(super) fn parse(
    props: &Props<'_>,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<SetField, SchemaError> {
    let name = common.name.as_str();
    let location = props.location();
    let from_type = match props.get("type")? {
        Some(text) => Some(
            type_length(text)
                .ok_or_else(|| props.bad_value("type", text, "expected uint8, uint16, uint32 or uint64"))?,
        ),
        None => None,
    };
    let declared = props.unsigned::<usize>("length")?;
    let length = match (from_type, declared, common.bit_length) {
        (Some(a), Some(b), _) if a != b => {
            return Err(SchemaError::invalid(
                location,
                name,
                format!("length {b} contradicts the type length {a}"),
            ))
        }
        (Some(len), _, _) | (None, Some(len), _) => len,
        (None, None, Some(bits)) if scope.in_bitfield => bits.div_ceil(8) as usize,
        (None, None, _) => return Err(SchemaError::missing(location, "set", "length")),
    };
    if length == 0 || length > 8 {
        return Err(SchemaError::invalid(
            location,
            name,
            format!("length {length} is outside 1..=8"),
        ));
    }
    let width = match common.bit_length {
        Some(bits) if scope.in_bitfield => bits.min(64),
        _ => length as u32 * 8,
    };

    let default_value = props.bool("defaultValue", false)?;
    let reserved_value = props.bool("reservedValue", false)?;
    let non_unique_allowed = props.bool("nonUniqueAllowed", false)?;
    let mut bits: Vec<SetBit> = Vec::new();
    for node in props.elements().iter().filter(|n| n.name() == "bit") {
        let bp = Props::new(node, &[BIT_PROPS, VERSION_PROPS], cx.strict(true))?;
        let bit_name = bp
            .identifier("name")?
            .ok_or_else(|| SchemaError::missing(node.location(), "bit", "name"))?;
        let idx = bp
            .unsigned::<u32>("idx")?
            .ok_or_else(|| SchemaError::missing(node.location(), "bit", "idx"))?;
        let version = VersionRange::parse(&bp, bit_name, &common.version, cx.schema_version)?;
        if idx >= width {
            return Err(SchemaError::invalid(
                node.location(),
                name,
                format!("bit '{bit_name}' index {idx} is outside the {width}-bit width"),
            ));
        }
        if bits.iter().any(|b| b.name == bit_name) {
            return Err(SchemaError::duplicate(node.location(), "bit", bit_name));
        }
        if let Some(other) = bits.iter().find(|b| b.idx == idx) {
            if !non_unique_allowed {
                return Err(SchemaError::invalid(
                    node.location(),
                    name,
                    format!("bits '{}' and '{bit_name}' share index {idx}", other.name),
                ));
            }
        }
        bits.push(SetBit {
            name: bit_name.to_string(),
            idx,
            default_value: bp.bool("defaultValue", default_value)?,
            reserved: bp.bool("reserved", false)?,
            reserved_value: bp.bool("reservedValue", reserved_value)?,
            description: bp.string("description")?,
            display_name: bp.string("displayName")?,
            version,
        });
    }

    let full: u64 = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
    let declared_mask = bits
        .iter()
        .filter(|b| !b.reserved)
        .fold(0u64, |mask, b| mask | (1u64 << b.idx));
    Ok(SetField {
        length,
        width,
        endian: scope.endian,
        bits,
        default_value,
        default_declared: props.has("defaultValue"),
        reserved_value,
        non_unique_allowed,
        valid_check_version: props.bool("validCheckVersion", false)?,
        reserved_mask: full & !declared_mask,
    })
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::field::tests::{parse_err, parse_ok};
    use crate::field::FieldKind;

    #[test]
    fn bits_and_reserved_mask() {
        let field = parse_ok(
            r#"<set name="flags" type="uint8" reservedValue="false">
                <bit name="ack" idx="0"/>
                <bit name="retry" idx="2" defaultValue="true"/>
                <bit name="spare" idx="3" reserved="true"/>
            </set>"#,
        );
        let FieldKind::Set(set) = field.details() else { panic!("set expected") };
        assert_eq!(set.length, 1);
        assert_eq!(set.bit("retry").map(|b| b.idx), Some(2));
        assert!(set.bit("retry").is_some_and(|b| b.default_value));
        assert_eq!(set.reserved_mask, 0xFA);
    }

    #[test]
    fn bit_rules() {
        let err = parse_err(r#"<set name="s" length="1"><bit name="a" idx="8"/></set>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
        let err = parse_err(r#"<set name="s" length="1"><bit name="a" idx="1"/><bit name="a" idx="2"/></set>"#);
        assert!(matches!(err.kind(), ErrorKind::Duplicate { .. }));
        let err = parse_err(r#"<set name="s" length="1"><bit name="a" idx="1"/><bit name="b" idx="1"/></set>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
        parse_ok(r#"<set name="s" length="1" nonUniqueAllowed="true"><bit name="a" idx="1"/><bit name="b" idx="1"/></set>"#);
        let err = parse_err(r#"<set name="s"><bit name="a" idx="1"/></set>"#);
        assert!(matches!(err.kind(), ErrorKind::MissingProperty { .. }));
        let err = parse_err(r#"<set name="s" type="uint16" length="1"/>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
    }
}
