use crate::context::ParseContext;
use crate::error::{ErrorKind, SchemaError};
use crate::props::{is_identifier, Props};

use super::reference::{implicit_ref, is_qualified_name};
use super::{parse_field, wrapped_field, Field, FieldCommon, FieldScope, Kind};

pub(super) const STRING_PROPS: &[&str] = &["length", "lengthPrefix", "zeroTermSuffix", "defaultValue", "encoding"];

pub(super) const DATA_PROPS: &[&str] = &["length", "lengthPrefix", "defaultValue"];

/// Length or count stored in front of a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Prefix {
    /// Owned prefix serialized directly before the value.
    Field(Box<Field>),
    /// Detached prefix: an earlier sibling holds the value.
    Sibling(String),
}

impl Prefix {
    pub fn field(&self) -> Option<&Field> {
        match self {
            Prefix::Field(field) => Some(field),
            Prefix::Sibling(_) => None,
        }
    }

    pub(crate) fn field_mut(&mut self) -> Option<&mut Field> {
        match self {
            Prefix::Field(field) => Some(field),
            Prefix::Sibling(_) => None,
        }
    }

    pub fn sibling(&self) -> Option<&str> {
        match self {
            Prefix::Sibling(name) => Some(name),
            Prefix::Field(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringField {
    pub length: Option<usize>,
    pub length_prefix: Option<Prefix>,
    pub zero_term_suffix: bool,
    pub default_value: String,
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataField {
    pub length: Option<usize>,
    pub length_prefix: Option<Prefix>,
    pub default_value: Vec<u8>,
}

/// Read a prefix given as `$sibling`, as a field name, or as a wrapper
/// element holding an inline field.
pub(super) fn parse_prefix(
    props: &Props<'_>,
    prop: &'static str,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<Option<Prefix>, SchemaError> {
    let wrapper = props.elements().iter().find(|n| n.name() == prop);
    let text = props.get(prop)?;
    let prefix = match (text, wrapper) {
        (Some(_), Some(node)) => {
            return Err(SchemaError::new(
                node.location().clone(),
                ErrorKind::DuplicateProperty {
                    property: prop.to_string(),
                },
            ))
        }
        (None, None) => return Ok(None),
        (Some(text), None) => match text.strip_prefix('$') {
            Some(sibling) if is_identifier(sibling) => Prefix::Sibling(sibling.to_string()),
            Some(_) => return Err(props.bad_value(prop, text, "expected '$' followed by a sibling name")),
            None if is_qualified_name(text) => Prefix::Field(Box::new(implicit_ref(
                prop,
                text,
                common.version,
                scope.namespace,
                props.location(),
            ))),
            None => return Err(props.bad_value(prop, text, "expected a field name or '$sibling'")),
        },
        (None, Some(node)) => {
            let inner = wrapped_field(node)?;
            let field = parse_field(inner, &scope.nested(common).named(prop), cx)?;
            if !matches!(field.kind(), Kind::Int | Kind::Ref) {
                return Err(SchemaError::invalid(
                    field.location(),
                    &common.name,
                    format!("'{prop}' must be an int field, not {}", field.kind()),
                ));
            }
            Prefix::Field(Box::new(field))
        }
    };
    Ok(Some(prefix))
}

fn exclusive(props: &Props<'_>, common: &FieldCommon, names: &[&str]) -> Result<(), SchemaError> {
    let given: Vec<&str> = names
        .iter()
        .copied()
        .filter(|name| props.has(name) || props.elements().iter().any(|n| n.name() == *name))
        .collect();
    if given.len() > 1 {
        return Err(SchemaError::invalid(
            props.location(),
            &common.name,
            format!("'{}' cannot be combined", given.join("' and '")),
        ));
    }
    Ok(())
}

fn fixed_length(props: &Props<'_>, common: &FieldCommon) -> Result<Option<usize>, SchemaError> {
    match props.unsigned::<usize>("length")? {
        Some(0) => Err(SchemaError::invalid(props.location(), &common.name, "fixed length must be positive")),
        other => Ok(other),
    }
}

pub(super) fn parse_string(
    props: &Props<'_>,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<StringField, SchemaError> {
    exclusive(props, common, &["length", "lengthPrefix", "zeroTermSuffix"])?;
    let length = fixed_length(props, common)?;
    let default_value = props.string("defaultValue")?.unwrap_or_default();
    if let Some(len) = length {
        if default_value.len() > len {
            return Err(SchemaError::invalid(
                props.location(),
                &common.name,
                format!("default value is longer than the fixed length {len}"),
            ));
        }
    }
    Ok(StringField {
        length,
        length_prefix: parse_prefix(props, "lengthPrefix", common, scope, cx)?,
        zero_term_suffix: props.bool("zeroTermSuffix", false)?,
        default_value,
        encoding: props.string("encoding")?,
    })
}

fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<_>>()?;
    if digits.len() % 2 != 0 {
        return None;
    }
    Some(digits.chunks(2).map(|pair| pair[0] << 4 | pair[1]).collect())
}

pub(super) fn parse_data(
    props: &Props<'_>,
    common: &FieldCommon,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<DataField, SchemaError> {
    exclusive(props, common, &["length", "lengthPrefix"])?;
    let length = fixed_length(props, common)?;
    let default_value = match props.get("defaultValue")? {
        Some(text) => parse_hex(text).ok_or_else(|| props.bad_value("defaultValue", text, "expected hex bytes"))?,
        None => Vec::new(),
    };
    if let Some(len) = length {
        if default_value.len() > len {
            return Err(SchemaError::invalid(
                props.location(),
                &common.name,
                format!("default value has {} bytes, the fixed length is {len}", default_value.len()),
            ));
        }
    }
    Ok(DataField {
        length,
        length_prefix: parse_prefix(props, "lengthPrefix", common, scope, cx)?,
        default_value,
    })
}
