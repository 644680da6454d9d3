use crate::common::{Endian, VersionRange, VERSION_PROPS};
use crate::context::ParseContext;
use crate::error::SchemaError;
use crate::props::Props;

use super::int::SPECIAL_PROPS;
use super::{FieldCommon, FieldScope};

pub(super) const PROPS: &[&str] = &[
    "type",
    "endian",
    "defaultValue",
    "validRange",
    "validValue",
    "validMin",
    "validMax",
    "units",
    "displayDecimals",
    "nonUniqueSpecialsAllowed",
    "displaySpecials",
    "validCheckVersion",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatType {
    Float,
    Double,
}

impl FloatType {
    pub fn width(self) -> usize {
        match self {
            FloatType::Float => 4,
            FloatType::Double => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloatSpecial {
    pub name: String,
    pub value: f64,
    pub description: Option<String>,
    pub display_name: Option<String>,
    pub version: VersionRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloatField {
    pub ty: FloatType,
    pub endian: Endian,
    pub default_value: f64,
    pub(crate) default_declared: bool,
    pub valid_ranges: Vec<(f64, f64)>,
    pub specials: Vec<FloatSpecial>,
    pub units: Option<String>,
    pub display_decimals: u32,
    pub display_specials: bool,
    pub valid_check_version: bool,
}

impl FloatField {
    pub fn special(&self, name: &str) -> Option<f64> {
        self.specials.iter().find(|s| s.name == name).map(|s| s.value)
    }

    pub fn is_valid(&self, value: f64) -> bool {
        self.valid_ranges.is_empty() || self.valid_ranges.iter().any(|(lo, hi)| *lo <= value && value <= *hi)
    }
}

fn parse_float(text: &str) -> Option<f64> {
    match text.trim() {
        "nan" => Some(f64::NAN),
        "inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        other => other.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

fn same(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

pub(super) fn parse(
    props: &Props<'_>,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<FloatField, SchemaError> {
    let name = common.name.as_str();
    let location = props.location();
    let text = props.require("type")?;
    let ty = match text {
        "float" => FloatType::Float,
        "double" => FloatType::Double,
        other => return Err(props.bad_value("type", other, "expected float or double")),
    };
    if scope.in_bitfield {
        return Err(SchemaError::invalid(location, name, "float values cannot be bitfield members"));
    }

    let non_unique = props.bool("nonUniqueSpecialsAllowed", false)?;
    let mut specials: Vec<FloatSpecial> = Vec::new();
    for node in props.elements().iter().filter(|n| n.name() == "special") {
        let sp = Props::new(node, &[SPECIAL_PROPS, VERSION_PROPS], cx.strict(true))?;
        let special_name = sp
            .identifier("name")?
            .ok_or_else(|| SchemaError::missing(node.location(), "special", "name"))?;
        let text = sp.require("val")?;
        let value = parse_float(text).ok_or_else(|| sp.bad_value("val", text, "expected a number, nan, inf or -inf"))?;
        if specials.iter().any(|s| s.name == special_name) {
            return Err(SchemaError::duplicate(node.location(), "special value", special_name));
        }
        if !non_unique && specials.iter().any(|s| same(s.value, value)) {
            return Err(SchemaError::invalid(
                node.location(),
                name,
                format!("special '{special_name}' repeats an existing value"),
            ));
        }
        specials.push(FloatSpecial {
            name: special_name.to_string(),
            value,
            description: sp.string("description")?,
            display_name: sp.string("displayName")?,
            version: VersionRange::parse(&sp, special_name, &common.version, cx.schema_version)?,
        });
    }

    let default_text = props.get("defaultValue")?;
    let default_value = match default_text {
        None => 0.0,
        Some(text) => parse_float(text)
            .or_else(|| specials.iter().find(|s| s.name == text).map(|s| s.value))
            .ok_or_else(|| props.bad_value("defaultValue", text, "expected a number or a special value name"))?,
    };

    let number = |prop: &str, text: &str| {
        parse_float(text).ok_or_else(|| props.bad_value(prop, text, "expected a number"))
    };
    let mut valid_ranges = Vec::new();
    for (text, _) in props.all("validRange") {
        let (lo, hi) = text
            .trim()
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(']'))
            .and_then(|t| t.split_once(','))
            .ok_or_else(|| props.bad_value("validRange", text, "expected '[min, max]'"))?;
        valid_ranges.push((number("validRange", lo)?, number("validRange", hi)?));
    }
    for (text, _) in props.all("validValue") {
        let value = number("validValue", text)?;
        valid_ranges.push((value, value));
    }
    if let Some(text) = props.get("validMin")? {
        valid_ranges.push((number("validMin", text)?, f64::INFINITY));
    }
    if let Some(text) = props.get("validMax")? {
        valid_ranges.push((f64::NEG_INFINITY, number("validMax", text)?));
    }
    if let Some((lo, hi)) = valid_ranges.iter().find(|(lo, hi)| lo > hi) {
        return Err(SchemaError::invalid(location, name, format!("valid range [{lo}, {hi}] is empty")));
    }

    let field = FloatField {
        ty,
        endian: scope.endian,
        default_value,
        default_declared: default_text.is_some(),
        valid_ranges,
        specials,
        units: props.string("units")?,
        display_decimals: props.unsigned::<u32>("displayDecimals")?.unwrap_or(0),
        display_specials: props.bool("displaySpecials", true)?,
        valid_check_version: props.bool("validCheckVersion", false)?,
    };
    let is_special = field.specials.iter().any(|s| same(s.value, default_value));
    if default_value.is_finite() && !is_special && !field.is_valid(default_value) {
        cx.warn(
            location,
            format!("default value {default_value} of '{name}' is outside its valid ranges"),
        );
    }
    Ok(field)
}
