use crate::common::{Endian, VersionRange, VERSION_PROPS};
use crate::context::ParseContext;
use crate::error::SchemaError;
use crate::props::{parse_number, Props};

use super::int::{self, IntType};
use super::{FieldCommon, FieldScope, LengthInfo};

pub(super) const PROPS: &[&str] = &[
    "type",
    "length",
    "endian",
    "defaultValue",
    "nonUniqueAllowed",
    "hexAssign",
    "validCheckVersion",
];

const VALUE_PROPS: &[&str] = &["name", "val", "description", "displayName"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub name: String,
    pub value: i128,
    pub description: Option<String>,
    pub display_name: Option<String>,
    pub version: VersionRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumField {
    pub ty: IntType,
    pub length: usize,
    pub endian: Endian,
    /// Values in declaration order.
    pub values: Vec<EnumValue>,
    pub default_value: i128,
    pub(crate) default_declared: bool,
    pub non_unique_allowed: bool,
    pub hex_assign: bool,
    pub valid_check_version: bool,
}

impl EnumField {
    pub fn value_of(&self, name: &str) -> Option<i128> {
        self.values.iter().find(|v| v.name == name).map(|v| v.value)
    }

    /// First declared name for `value`.
    pub fn name_of(&self, value: i128) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.value == value)
            .map(|v| v.name.as_str())
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

pub(super) fn parse(
    props: &Props<'_>,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<EnumField, SchemaError> {
    let name = common.name.as_str();
    let (ty, length, (min, max)) = int::storage(props, common, scope)?;
    let non_unique_allowed = props.bool("nonUniqueAllowed", false)?;

    let mut values: Vec<EnumValue> = Vec::new();
    for node in props.elements().iter().filter(|n| n.name() == "validValue") {
        let vp = Props::new(node, &[VALUE_PROPS, VERSION_PROPS], cx.strict(true))?;
        let value_name = vp
            .identifier("name")?
            .ok_or_else(|| SchemaError::missing(node.location(), "validValue", "name"))?;
        let text = vp.require("val")?;
        let value = parse_number(text).ok_or_else(|| vp.bad_value("val", text, "expected a number"))?;
        let version = VersionRange::parse(&vp, value_name, &common.version, cx.schema_version)?;
        if values.iter().any(|v| v.name == value_name) {
            return Err(SchemaError::duplicate(node.location(), "enum value", value_name));
        }
        if !(min..=max).contains(&value) {
            return Err(SchemaError::invalid(
                node.location(),
                name,
                format!("value {value} of '{value_name}' does not fit [{min}, {max}]"),
            ));
        }
        if let Some(other) = values.iter().find(|v| v.value == value) {
            if !non_unique_allowed {
                return Err(SchemaError::invalid(
                    node.location(),
                    name,
                    format!("'{value_name}' repeats value {value} of '{}'", other.name),
                ));
            }
        }
        values.push(EnumValue {
            name: value_name.to_string(),
            value,
            description: vp.string("description")?,
            display_name: vp.string("displayName")?,
            version,
        });
    }
    if values.is_empty() {
        return Err(SchemaError::invalid(
            props.location(),
            name,
            "an enum needs at least one <validValue>",
        ));
    }

    let default_text = props.get("defaultValue")?;
    let default_value = match default_text {
        None => 0,
        Some(text) => match parse_number(text) {
            Some(value) => value,
            None => values
                .iter()
                .find(|v| v.name == text)
                .map(|v| v.value)
                .ok_or_else(|| {
                    SchemaError::invalid(props.location(), name, format!("unknown default value '{text}'"))
                })?,
        },
    };
    if !(min..=max).contains(&default_value) {
        return Err(SchemaError::invalid(
            props.location(),
            name,
            format!("default value {default_value} does not fit [{min}, {max}]"),
        ));
    }
    if default_text.is_some() && !values.iter().any(|v| v.value == default_value) {
        cx.warn(
            props.location(),
            format!("default value {default_value} of '{name}' is not one of its values"),
        );
    }

    Ok(EnumField {
        ty,
        length,
        endian: scope.endian,
        values,
        default_value,
        default_declared: default_text.is_some(),
        non_unique_allowed,
        hex_assign: props.bool("hexAssign", false)?,
        valid_check_version: props.bool("validCheckVersion", false)?,
    })
}
