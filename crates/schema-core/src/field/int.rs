use crate::common::{Endian, VersionRange, VERSION_PROPS};
use crate::context::ParseContext;
use crate::error::SchemaError;
use crate::props::{parse_number, Props};

use super::{FieldCommon, FieldScope, LengthInfo};

pub(super) const PROPS: &[&str] = &[
    "type",
    "length",
    "endian",
    "serOffset",
    "signExt",
    "defaultValue",
    "scaling",
    "units",
    "displayDecimals",
    "validRange",
    "validValue",
    "validMin",
    "validMax",
    "nonUniqueSpecialsAllowed",
    "displaySpecials",
    "validCheckVersion",
];

pub(super) const SPECIAL_PROPS: &[&str] = &["name", "val", "description", "displayName"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Intvar,
    Uintvar,
}

impl IntType {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "int8" => IntType::Int8,
            "uint8" => IntType::Uint8,
            "int16" => IntType::Int16,
            "uint16" => IntType::Uint16,
            "int32" => IntType::Int32,
            "uint32" => IntType::Uint32,
            "int64" => IntType::Int64,
            "uint64" => IntType::Uint64,
            "intvar" => IntType::Intvar,
            "uintvar" => IntType::Uintvar,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            IntType::Int8 => "int8",
            IntType::Uint8 => "uint8",
            IntType::Int16 => "int16",
            IntType::Uint16 => "uint16",
            IntType::Int32 => "int32",
            IntType::Uint32 => "uint32",
            IntType::Int64 => "int64",
            IntType::Uint64 => "uint64",
            IntType::Intvar => "intvar",
            IntType::Uintvar => "uintvar",
        }
    }

    /// Largest serialized size in bytes.
    pub fn width(self) -> usize {
        match self {
            IntType::Int8 | IntType::Uint8 => 1,
            IntType::Int16 | IntType::Uint16 => 2,
            IntType::Int32 | IntType::Uint32 => 4,
            IntType::Int64 | IntType::Uint64 => 8,
            // 7 value bits per byte.
            IntType::Intvar | IntType::Uintvar => 10,
        }
    }

    /// Bits of the in-memory value.
    pub fn value_bits(self) -> u32 {
        match self {
            IntType::Int8 | IntType::Uint8 => 8,
            IntType::Int16 | IntType::Uint16 => 16,
            IntType::Int32 | IntType::Uint32 => 32,
            _ => 64,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IntType::Int8 | IntType::Int16 | IntType::Int32 | IntType::Int64 | IntType::Intvar
        )
    }

    pub fn is_var(self) -> bool {
        matches!(self, IntType::Intvar | IntType::Uintvar)
    }
}

/// Named value with a meaning of its own, e.g. "unknown".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Special {
    pub name: String,
    pub value: i128,
    pub description: Option<String>,
    pub display_name: Option<String>,
    pub version: VersionRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntField {
    pub ty: IntType,
    /// Serialized length in bytes; the maximum for variable-length types.
    pub length: usize,
    pub endian: Endian,
    pub ser_offset: i128,
    pub sign_ext: bool,
    pub default_value: i128,
    pub(crate) default_declared: bool,
    pub scaling: (i128, i128),
    pub units: Option<String>,
    pub display_decimals: u32,
    pub valid_ranges: Vec<(i128, i128)>,
    pub specials: Vec<Special>,
    pub non_unique_specials_allowed: bool,
    pub display_specials: bool,
    pub valid_check_version: bool,
}

impl IntField {
    pub fn special(&self, name: &str) -> Option<i128> {
        self.specials.iter().find(|s| s.name == name).map(|s| s.value)
    }

    pub fn is_valid(&self, value: i128) -> bool {
        self.valid_ranges.is_empty()
            || self
                .valid_ranges
                .iter()
                .any(|(lo, hi)| (*lo..=*hi).contains(&value))
    }

    pub(super) fn length_info(&self) -> LengthInfo {
        if self.ty.is_var() {
            LengthInfo {
                min: 1,
                max: self.length,
            }
        } else {
            LengthInfo::fixed(self.length)
        }
    }
}

/// Inclusive value range representable in `bits` bits.
pub(super) fn bits_range(signed: bool, bits: u32) -> (i128, i128) {
    let bits = bits.clamp(1, 64);
    if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

/// Read the integer storage type and serialized length shared by `int` and `enum`.
pub(super) fn storage(
    props: &Props<'_>,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
) -> Result<(IntType, usize, (i128, i128)), SchemaError> {
    let element = props.node().name();
    let text = props.require("type")?;
    let ty = IntType::parse(text)
        .ok_or_else(|| props.bad_value("type", text, "expected int8..uint64, intvar or uintvar"))?;
    let length = match props.unsigned::<usize>("length")? {
        Some(len) if len == 0 || len > ty.width() => {
            return Err(SchemaError::invalid(
                props.location(),
                &common.name,
                format!("length {len} is outside 1..={} for type {}", ty.width(), ty.name()),
            ))
        }
        Some(len) => len,
        None if ty.is_var() => return Err(SchemaError::missing(props.location(), element, "length")),
        None => ty.width(),
    };
    if ty.is_var() && scope.in_bitfield {
        return Err(SchemaError::invalid(
            props.location(),
            &common.name,
            "variable length values cannot be bitfield members",
        ));
    }
    let bits = match common.bit_length {
        Some(bits) => bits.min(ty.value_bits()),
        None if ty.is_var() => (length as u32 * 7).min(64),
        None => length as u32 * 8,
    };
    Ok((ty, length, bits_range(ty.is_signed(), bits)))
}

pub(super) fn parse(
    props: &Props<'_>,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<IntField, SchemaError> {
    let name = common.name.as_str();
    let location = props.location();
    let (ty, length, (min, max)) = storage(props, common, scope)?;
    let in_range = |value: i128| (min..=max).contains(&value);

    let non_unique_specials_allowed = props.bool("nonUniqueSpecialsAllowed", false)?;
    let mut specials: Vec<Special> = Vec::new();
    for node in props.elements().iter().filter(|n| n.name() == "special") {
        let sp = Props::new(node, &[SPECIAL_PROPS, VERSION_PROPS], cx.strict(true))?;
        let special_name = sp
            .identifier("name")?
            .ok_or_else(|| SchemaError::missing(node.location(), "special", "name"))?;
        let text = sp.require("val")?;
        let value = parse_number(text).ok_or_else(|| sp.bad_value("val", text, "expected a number"))?;
        let version = VersionRange::parse(&sp, special_name, &common.version, cx.schema_version)?;
        if specials.iter().any(|s| s.name == special_name) {
            return Err(SchemaError::duplicate(node.location(), "special value", special_name));
        }
        if !in_range(value) {
            return Err(SchemaError::invalid(
                node.location(),
                name,
                format!("special '{special_name}' value {value} is outside [{min}, {max}]"),
            ));
        }
        if let Some(other) = specials.iter().find(|s| s.value == value) {
            if !non_unique_specials_allowed {
                return Err(SchemaError::invalid(
                    node.location(),
                    name,
                    format!("special '{special_name}' repeats the value of '{}'", other.name),
                ));
            }
        }
        specials.push(Special {
            name: special_name.to_string(),
            value,
            description: sp.string("description")?,
            display_name: sp.string("displayName")?,
            version,
        });
    }

    let default_text = props.get("defaultValue")?;
    let default_value = match default_text {
        None => 0,
        Some(text) => parse_number(text)
            .or_else(|| specials.iter().find(|s| s.name == text).map(|s| s.value))
            .ok_or_else(|| props.bad_value("defaultValue", text, "expected a number or a special value name"))?,
    };
    if !in_range(default_value) {
        return Err(SchemaError::invalid(
            location,
            name,
            format!("default value {default_value} is outside [{min}, {max}]"),
        ));
    }

    let mut valid_ranges = Vec::new();
    for (text, _) in props.all("validRange") {
        let range = parse_range(text)
            .ok_or_else(|| props.bad_value("validRange", text, "expected '[min, max]'"))?;
        valid_ranges.push(range);
    }
    for (text, _) in props.all("validValue") {
        let value = parse_number(text)
            .ok_or_else(|| props.bad_value("validValue", text, "expected a number"))?;
        valid_ranges.push((value, value));
    }
    if let Some(value) = props.number("validMin")? {
        valid_ranges.push((value, max));
    }
    if let Some(value) = props.number("validMax")? {
        valid_ranges.push((min, value));
    }
    for (lo, hi) in &valid_ranges {
        if lo > hi || !in_range(*lo) || !in_range(*hi) {
            return Err(SchemaError::invalid(
                location,
                name,
                format!("valid range [{lo}, {hi}] is empty or outside [{min}, {max}]"),
            ));
        }
    }

    let field = IntField {
        ty,
        length,
        endian: scope.endian,
        ser_offset: props.number("serOffset")?.unwrap_or(0),
        sign_ext: props.bool("signExt", true)?,
        default_value,
        default_declared: default_text.is_some(),
        scaling: parse_scaling(props)?,
        units: props.string("units")?,
        display_decimals: props.unsigned::<u32>("displayDecimals")?.unwrap_or(0),
        valid_ranges,
        specials,
        non_unique_specials_allowed,
        display_specials: props.bool("displaySpecials", true)?,
        valid_check_version: props.bool("validCheckVersion", false)?,
    };
    if !field.is_valid(default_value) && field.special(default_text.unwrap_or_default()).is_none() {
        cx.warn(
            location,
            format!("default value {default_value} of '{name}' is outside its valid ranges"),
        );
    }
    Ok(field)
}

fn parse_range(text: &str) -> Option<(i128, i128)> {
    let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?;
    let (lo, hi) = inner.split_once(',')?;
    Some((parse_number(lo)?, parse_number(hi)?))
}

fn parse_scaling(props: &Props<'_>) -> Result<(i128, i128), SchemaError> {
    let Some(text) = props.get("scaling")? else {
        return Ok((1, 1));
    };
    text.split_once('/')
        .and_then(|(num, den)| Some((parse_number(num)?, parse_number(den)?)))
        .filter(|(_, den)| *den != 0)
        .ok_or_else(|| props.bad_value("scaling", text, "expected 'numerator/denominator'"))
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::field::tests::{parse_err, parse_one, parse_ok};
    use crate::field::FieldKind;

    #[test]
    fn type_width_and_specials() {
        let field = parse_ok(
            r#"<int name="temp" type="int16" length="1" defaultValue="Unknown" scaling="1/10" validRange="[-50, 100]">
                <special name="Unknown" val="-128"/>
            </int>"#,
        );
        let FieldKind::Int(int) = field.details() else { panic!("int expected") };
        assert_eq!(int.length, 1);
        assert_eq!(int.default_value, -128);
        assert_eq!(int.special("Unknown"), Some(-128));
        assert_eq!(int.scaling, (1, 10));
        assert_eq!(int.valid_ranges, vec![(-50, 100)]);
        assert_eq!(field.length(), Some(1));
    }

    #[test]
    fn ranges_are_enforced() {
        let err = parse_err(r#"<int name="a" type="uint8" defaultValue="256"/>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
        let err = parse_err(r#"<int name="a" type="int8"><special name="S" val="200"/></int>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
        let err = parse_err(r#"<int name="a" type="uint16" length="3"/>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
        let err = parse_err(r#"<int name="a" type="uint8" validMin="300"/>"#);
        assert!(matches!(err.kind(), ErrorKind::Invalid { .. }));
    }

    #[test]
    fn duplicate_specials() {
        let xml = r#"<int name="a" type="uint8"><special name="X" val="1"/><special name="Y" val="1"/></int>"#;
        assert!(matches!(parse_err(xml).kind(), ErrorKind::Invalid { .. }));
        parse_ok(
            r#"<int name="a" type="uint8" nonUniqueSpecialsAllowed="true"><special name="X" val="1"/><special name="Y" val="1"/></int>"#,
        );
        let xml = r#"<int name="a" type="uint8"><special name="X" val="1"/><special name="X" val="2"/></int>"#;
        assert!(matches!(parse_err(xml).kind(), ErrorKind::Duplicate { .. }));
    }

    #[test]
    fn default_outside_valid_ranges_warns() {
        let (result, diags) = parse_one(r#"<int name="a" type="uint8" defaultValue="0" validMin="1"/>"#);
        assert!(result.is_ok());
        assert!(!diags.has_failures());
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn var_length() {
        let field = parse_ok(r#"<int name="v" type="uintvar" length="4"/>"#);
        assert_eq!(field.length(), None);
        assert_eq!(field.min_length(), 1);
        assert_eq!(field.max_length(), 4);
        let err = parse_err(r#"<int name="v" type="intvar"/>"#);
        assert!(matches!(err.kind(), ErrorKind::MissingProperty { .. }));
    }
}
